//! Type model — how a session talks about the types of stored values.
//!
//! Stored values are always heap objects, so a request for one of the eight
//! primitive scalars is normalized to its boxed Rust type before matching:
//!
//! | Primitive | Stored as |
//! |-----------|-----------|
//! | boolean   | `bool`    |
//! | byte      | `i8`      |
//! | char      | `char`    |
//! | short     | `i16`     |
//! | int       | `i32`     |
//! | long      | `i64`     |
//! | float     | `f32`     |
//! | double    | `f64`     |

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

/// Identity of a Rust type, together with its fully-qualified name.
///
/// Equality and hashing only look at the [`TypeId`]; the name is carried
/// for keys and error messages.  Unsized types such as `dyn Trait` are
/// supported.
#[derive(Clone, Copy)]
pub struct TypeRef {
    id: TypeId,
    name: &'static str,
}

impl TypeRef {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully-qualified type name, e.g. `alloc::string::String`.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The primitive scalar kinds a handler parameter may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

/// Primitive → boxed type.  Built once, never mutated.
static WRAPPER_TYPES: LazyLock<HashMap<Primitive, TypeRef>> = LazyLock::new(|| {
    HashMap::from([
        (Primitive::Boolean, TypeRef::of::<bool>()),
        (Primitive::Byte, TypeRef::of::<i8>()),
        (Primitive::Char, TypeRef::of::<char>()),
        (Primitive::Short, TypeRef::of::<i16>()),
        (Primitive::Int, TypeRef::of::<i32>()),
        (Primitive::Long, TypeRef::of::<i64>()),
        (Primitive::Float, TypeRef::of::<f32>()),
        (Primitive::Double, TypeRef::of::<f64>()),
    ])
});

impl Primitive {
    pub const ALL: [Primitive; 8] = [
        Primitive::Boolean,
        Primitive::Byte,
        Primitive::Char,
        Primitive::Short,
        Primitive::Int,
        Primitive::Long,
        Primitive::Float,
        Primitive::Double,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Boolean => "boolean",
            Primitive::Byte => "byte",
            Primitive::Char => "char",
            Primitive::Short => "short",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
        }
    }

    /// The boxed type values of this kind are stored as.
    pub fn wrapper(self) -> TypeRef {
        WRAPPER_TYPES[&self]
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Primitive {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Primitive::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| format!("unknown primitive type '{s}'"))
    }
}

/// The type a handler parameter requests from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// One of the primitive scalars; matched against its boxed type.
    Primitive(Primitive),
    /// Any other type, matched as is.
    Type(TypeRef),
}

impl Target {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Target::Type(TypeRef::of::<T>())
    }

    /// The type actually looked for in the session: primitives become
    /// their boxed type, everything else is unchanged.
    pub fn normalized(&self) -> TypeRef {
        match self {
            Target::Primitive(p) => p.wrapper(),
            Target::Type(ty) => *ty,
        }
    }
}

impl From<Primitive> for Target {
    fn from(p: Primitive) -> Self {
        Target::Primitive(p)
    }
}

impl From<TypeRef> for Target {
    fn from(ty: TypeRef) -> Self {
        Target::Type(ty)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Primitive(p) => write!(f, "{p}"),
            Target::Type(ty) => write!(f, "{ty}"),
        }
    }
}
