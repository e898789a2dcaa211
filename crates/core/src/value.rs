//! Type-erased values held by a session.
//!
//! A [`Value`] remembers the concrete type it was built from and, optionally,
//! a set of *views*: other types (usually trait objects) the value can be
//! handed out as.  A value "is a" type when that type is its concrete type
//! or one of its views.

use crate::types::TypeRef;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// An upcast handle: `handle` holds an `Rc<V>` for the view type `ty`.
#[derive(Clone)]
struct View {
    ty: TypeRef,
    handle: Rc<dyn Any>,
}

/// A reference-counted, type-erased object.  Cloning is cheap and shares
/// the underlying object.
#[derive(Clone)]
pub struct Value {
    ty: TypeRef,
    object: Rc<dyn Any>,
    views: Rc<[View]>,
}

impl Value {
    /// Wrap a value with no extra views.
    pub fn new<T: Any>(value: T) -> Self {
        Self::builder(value).build()
    }

    /// Wrap an already shared object.
    pub fn from_rc<T: Any>(object: Rc<T>) -> Self {
        ValueBuilder::from_rc(object).build()
    }

    /// Start building a value that declares additional views.
    pub fn builder<T: Any>(value: T) -> ValueBuilder<T> {
        ValueBuilder::from_rc(Rc::new(value))
    }

    /// The concrete runtime type.
    pub fn type_ref(&self) -> TypeRef {
        self.ty
    }

    pub fn type_name(&self) -> &'static str {
        self.ty.name()
    }

    /// Whether this value can be handed out as `ty`.
    pub fn is_a(&self, ty: TypeRef) -> bool {
        self.ty == ty || self.views.iter().any(|v| v.ty == ty)
    }

    /// Types this value declares besides its concrete one.
    pub fn view_types(&self) -> impl Iterator<Item = TypeRef> + '_ {
        self.views.iter().map(|v| v.ty)
    }

    /// Get the object as a sized type, either its concrete type or a
    /// sized view.
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        match Rc::clone(&self.object).downcast::<T>() {
            Ok(object) => Some(object),
            Err(_) => self.view::<T>(),
        }
    }

    /// Get one of the declared views, e.g. `value.view::<dyn Greeter>()`.
    pub fn view<V: ?Sized + 'static>(&self) -> Option<Rc<V>> {
        let ty = TypeRef::of::<V>();
        self.views
            .iter()
            .find(|v| v.ty == ty)
            .and_then(|v| v.handle.downcast_ref::<Rc<V>>())
            .cloned()
    }

    /// Whether both values share the same underlying object.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("type", &self.ty.name())
            .field("views", &self.views.iter().map(|v| v.ty.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for a [`Value`] that declares views.
///
/// ```
/// use std::rc::Rc;
/// use mintrules_core::Value;
///
/// trait Greeter {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
///
/// impl Greeter for English {
///     fn greet(&self) -> String {
///         "hello".into()
///     }
/// }
///
/// let value = Value::builder(English)
///     .implements(|rc| rc as Rc<dyn Greeter>)
///     .build();
/// assert_eq!(value.view::<dyn Greeter>().unwrap().greet(), "hello");
/// ```
pub struct ValueBuilder<T: Any> {
    object: Rc<T>,
    views: Vec<View>,
}

impl<T: Any> ValueBuilder<T> {
    pub fn from_rc(object: Rc<T>) -> Self {
        Self {
            object,
            views: Vec::new(),
        }
    }

    /// Declare that the value is also a `V`, given the upcast from `Rc<T>`.
    /// Declaring the same view twice keeps the last cast.
    pub fn implements<V: ?Sized + 'static>(mut self, cast: impl FnOnce(Rc<T>) -> Rc<V>) -> Self {
        let ty = TypeRef::of::<V>();
        let handle: Rc<V> = cast(Rc::clone(&self.object));
        self.views.retain(|v| v.ty != ty);
        self.views.push(View {
            ty,
            handle: Rc::new(handle),
        });
        self
    }

    pub fn build(self) -> Value {
        Value {
            ty: TypeRef::of::<T>(),
            object: self.object,
            views: self.views.into(),
        }
    }
}
