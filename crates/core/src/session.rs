//! The session — a per-execution registry of values that resolves handler
//! parameters by type or by explicit name.
//!
//! Resolution rules:
//!
//! 1. If the parameter carries an [`Annotation::Named`] directive, only that
//!    key is consulted.  A missing key or a value of the wrong type fails;
//!    other bindings are never looked at.
//! 2. Otherwise the requested type is normalized (primitive → boxed) and
//!    every binding is scanned.  Exactly one match is returned; zero or
//!    several matches fail.
//!
//! Nothing is cached: every call sees the bindings as they are right now.

use crate::error::{Error, Result};
use crate::parameter::{Annotation, Parameter, explicit_name};
use crate::types::{Target, TypeRef};
use crate::value::Value;
use indexmap::IndexMap;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

/// The session contract the rule engine programs against.
///
/// Object safe, so handlers may ask for `dyn Session`.
pub trait Session {
    /// Store `value` under its concrete type name, replacing any earlier
    /// value stored the same way.
    fn put(&self, value: Value) -> Result<()>;

    /// Store `value` under `name`.  Last write wins.
    fn put_named(&self, name: &str, value: Value) -> Result<()>;

    /// Resolve a parameter of type `target` described by `annotations`.
    fn resolve(&self, target: &Target, annotations: &[Annotation]) -> Result<Value>;

    /// A snapshot of every binding.
    fn elements(&self) -> Elements;

    fn resolve_parameter(&self, parameter: &Parameter) -> Result<Value> {
        self.resolve(&parameter.target, &parameter.annotations)
    }

    /// Resolve every parameter of a handler, in order.  Stops at the first
    /// failure.
    fn resolve_all(&self, parameters: &[Parameter]) -> Result<Vec<Value>> {
        parameters
            .iter()
            .map(|p| self.resolve_parameter(p))
            .collect()
    }
}

/// Typed helpers over any [`Session`].
pub trait SessionExt: Session {
    fn insert<T: Any>(&self, value: T) -> Result<()> {
        self.put(Value::new(value))
    }

    fn insert_named<T: Any>(&self, name: &str, value: T) -> Result<()> {
        self.put_named(name, Value::new(value))
    }

    /// Resolve a `T` and hand it out as a shared handle.
    fn get<T: Any>(&self, annotations: &[Annotation]) -> Result<Rc<T>> {
        let value = self.resolve(&Target::of::<T>(), annotations)?;
        value.downcast::<T>().ok_or_else(|| Error::Downcast {
            required: std::any::type_name::<T>().into(),
            actual: value.type_name().into(),
        })
    }

    /// Resolve a declared view such as `dyn Trait`.
    fn get_view<V: ?Sized + 'static>(&self, annotations: &[Annotation]) -> Result<Rc<V>> {
        let value = self.resolve(&Target::of::<V>(), annotations)?;
        value.view::<V>().ok_or_else(|| Error::Downcast {
            required: std::any::type_name::<V>().into(),
            actual: value.type_name().into(),
        })
    }
}

impl<S: Session + ?Sized> SessionExt for S {}

/// A binding slot.  `Myself` refers back to the owning session without
/// holding a strong reference to it.
#[derive(Clone)]
enum Slot {
    Value(Value),
    Myself,
}

impl Slot {
    fn is_a(&self, ty: TypeRef) -> bool {
        match self {
            Slot::Value(value) => value.is_a(ty),
            Slot::Myself => {
                ty == TypeRef::of::<DefaultSession>() || ty == TypeRef::of::<dyn Session>()
            }
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Slot::Value(value) => value.type_name(),
            Slot::Myself => DefaultSession::self_key(),
        }
    }
}

type Bindings = RefCell<IndexMap<String, Slot>>;

/// Owning handles keep the bindings alive; back-references do not.
#[derive(Clone)]
enum Handle {
    Owner(Rc<Bindings>),
    Back(Weak<Bindings>),
}

impl Handle {
    fn upgrade(&self) -> Option<Rc<Bindings>> {
        match self {
            Handle::Owner(rc) => Some(Rc::clone(rc)),
            Handle::Back(weak) => weak.upgrade(),
        }
    }

    fn as_ptr(&self) -> *const Bindings {
        match self {
            Handle::Owner(rc) => Rc::as_ptr(rc),
            Handle::Back(weak) => weak.as_ptr(),
        }
    }
}

/// The default [`Session`] implementation.
///
/// A cheap handle: clones share the same bindings.  Meant for one
/// execution on one thread; it is deliberately `!Send`.
///
/// A new session is bound to itself under [`DefaultSession::self_key`], so
/// a handler asking for `DefaultSession` or `dyn Session` gets the current
/// session.  Handles the session hands out itself (from resolution or
/// [`Session::elements`]) are back-references: storing them inside the
/// session does not keep it alive, and once every owning handle is gone
/// they fail with [`Error::SessionClosed`].
#[derive(Clone)]
pub struct DefaultSession {
    handle: Handle,
}

impl DefaultSession {
    pub fn new() -> Self {
        let mut bindings = IndexMap::new();
        bindings.insert(Self::self_key().to_string(), Slot::Myself);
        debug!(key = Self::self_key(), "Session created");
        Self {
            handle: Handle::Owner(Rc::new(RefCell::new(bindings))),
        }
    }

    /// The key the session is bound to itself under.  Writes to it are
    /// rejected.
    pub fn self_key() -> &'static str {
        std::any::type_name::<DefaultSession>()
    }

    /// A back-reference to this session that does not keep it alive.
    pub fn downgrade(&self) -> DefaultSession {
        let weak = match &self.handle {
            Handle::Owner(rc) => Rc::downgrade(rc),
            Handle::Back(weak) => weak.clone(),
        };
        Self {
            handle: Handle::Back(weak),
        }
    }

    /// Whether the bindings are still alive.
    pub fn is_open(&self) -> bool {
        self.handle.upgrade().is_some()
    }

    /// Number of bindings, the self-binding included.  Zero once closed.
    pub fn len(&self) -> usize {
        self.handle.upgrade().map_or(0, |b| b.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.handle
            .upgrade()
            .is_some_and(|b| b.borrow().contains_key(key))
    }

    /// Whether both handles point at the same bindings.
    pub fn same_session(&self, other: &DefaultSession) -> bool {
        std::ptr::eq(self.handle.as_ptr(), other.handle.as_ptr())
    }

    fn live(&self) -> Result<Rc<Bindings>> {
        self.handle.upgrade().ok_or(Error::SessionClosed)
    }

    fn as_value(&self) -> Value {
        Value::builder(self.downgrade())
            .implements(|rc| rc as Rc<dyn Session>)
            .build()
    }

    fn materialize(&self, slot: &Slot) -> Value {
        match slot {
            Slot::Value(value) => value.clone(),
            Slot::Myself => self.as_value(),
        }
    }

    fn store(&self, key: &str, value: Value) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey {
                key: key.into(),
                reason: "key cannot be empty".into(),
            });
        }
        let bindings = self.live()?;

        // A handle to this very session is kept as a back-reference, so
        // the bindings never own themselves.
        let slot = match value.downcast::<DefaultSession>() {
            Some(session) if self.same_session(&session) => Slot::Myself,
            _ if key == Self::self_key() => {
                return Err(Error::ReservedKey { key: key.into() });
            }
            _ => Slot::Value(value),
        };

        if key == Self::self_key() {
            // Re-registering the session itself; the self-binding stays.
            return Ok(());
        }

        debug!(key = %key, value_type = slot.type_name(), "Binding stored");
        bindings.borrow_mut().insert(key.to_string(), slot);
        Ok(())
    }

    fn resolve_named(&self, key: &str, target: &Target) -> Result<Value> {
        let bindings = self.live()?;
        let bindings = bindings.borrow();
        let slot = bindings
            .get(key)
            .ok_or_else(|| Error::MissingNamedValue { key: key.into() })?;

        if !slot.is_a(target.normalized()) {
            return Err(Error::TypeMismatch {
                key: key.into(),
                required: target.to_string(),
                actual: slot.type_name().into(),
            });
        }

        Ok(self.materialize(slot))
    }

    fn resolve_by_type(&self, required: TypeRef) -> Result<Value> {
        let bindings = self.live()?;
        let bindings = bindings.borrow();
        let mut matching = bindings.iter().filter(|(_, slot)| slot.is_a(required));

        let Some((first_key, candidate)) = matching.next() else {
            return Err(Error::NotFound {
                required: required.name().into(),
            });
        };

        let others: Vec<String> = matching.map(|(key, _)| key.clone()).collect();
        if !others.is_empty() {
            let mut keys = Vec::with_capacity(others.len() + 1);
            keys.push(first_key.clone());
            keys.extend(others);
            return Err(Error::AmbiguousResolution {
                required: required.name().into(),
                keys,
            });
        }

        Ok(self.materialize(candidate))
    }
}

impl Default for DefaultSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for DefaultSession {
    fn put(&self, value: Value) -> Result<()> {
        self.store(value.type_name(), value)
    }

    fn put_named(&self, name: &str, value: Value) -> Result<()> {
        self.store(name, value)
    }

    fn resolve(&self, target: &Target, annotations: &[Annotation]) -> Result<Value> {
        let result = match explicit_name(annotations) {
            Some(key) => self.resolve_named(key, target),
            None => self.resolve_by_type(target.normalized()),
        };

        match &result {
            Ok(value) => debug!(
                requested = %target,
                value_type = value.type_name(),
                "Parameter resolved"
            ),
            Err(e) => debug!(requested = %target, error = %e, "Parameter resolution failed"),
        }
        result
    }

    fn elements(&self) -> Elements {
        let Some(bindings) = self.handle.upgrade() else {
            return Elements::default();
        };
        let entries = bindings
            .borrow()
            .iter()
            .map(|(key, slot)| (key.clone(), self.materialize(slot)))
            .collect();
        Elements { entries }
    }
}

impl fmt::Debug for DefaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(bindings) = self.handle.upgrade() else {
            return f.write_str("DefaultSession(<closed>)");
        };
        let bindings = bindings.borrow();
        f.debug_map()
            .entries(bindings.iter().map(|(k, slot)| (k, slot.type_name())))
            .finish()
    }
}

/// A read-only snapshot of a session's bindings, in binding order.
///
/// Owns its entries: later writes to the session are not reflected here,
/// and the snapshot has no operations that change the session.  The
/// self-binding entry is still a live back-reference to the session, so
/// writes made through that handle do reach it.
#[derive(Debug, Clone, Default)]
pub struct Elements {
    entries: IndexMap<String, Value>,
}

impl Elements {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Primitive;

    trait Greeter {
        fn greet(&self) -> String;
    }

    struct English;
    struct French;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    impl Greeter for French {
        fn greet(&self) -> String {
            "bonjour".into()
        }
    }

    fn greeter<T: Greeter + 'static>(g: T) -> Value {
        Value::builder(g)
            .implements(|rc| rc as Rc<dyn Greeter>)
            .build()
    }

    fn strings() -> DefaultSession {
        let session = DefaultSession::new();
        session.insert_named("a", String::from("hello")).unwrap();
        session.insert_named("b", String::from("world")).unwrap();
        session
    }

    #[test]
    fn last_write_wins() {
        let session = DefaultSession::new();
        session.insert_named("key", String::from("v1")).unwrap();
        session.insert_named("key", String::from("v2")).unwrap();

        let value = session.get::<String>(&[Annotation::named("key")]).unwrap();
        assert_eq!(value.as_str(), "v2");
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn implicit_put_is_keyed_by_type_name() {
        let session = DefaultSession::new();
        session.insert(String::from("first")).unwrap();
        session.insert(String::from("second")).unwrap();

        let key = std::any::type_name::<String>();
        assert!(session.contains_key(key));
        assert_eq!(session.len(), 2);
        assert_eq!(session.get::<String>(&[]).unwrap().as_str(), "second");
    }

    #[test]
    fn fresh_session_resolves_itself() {
        let session = DefaultSession::new();
        assert_eq!(session.len(), 1);

        let me = session.get::<DefaultSession>(&[]).unwrap();
        assert!(me.same_session(&session));

        // The handle writes into the same bindings.
        me.insert_named("x", 7i32).unwrap();
        assert_eq!(*session.get::<i32>(&[]).unwrap(), 7);
    }

    #[test]
    fn session_resolves_as_trait_object() {
        let session = DefaultSession::new();
        let dynamic = session.get_view::<dyn Session>(&[]).unwrap();
        dynamic.put_named("y", Value::new(1.5f64)).unwrap();
        assert!(session.contains_key("y"));
    }

    #[test]
    fn self_key_is_reserved() {
        let session = DefaultSession::new();
        let err = session
            .put_named(DefaultSession::self_key(), Value::new(1i32))
            .unwrap_err();
        assert!(matches!(err, Error::ReservedKey { .. }));

        let other = DefaultSession::new();
        let err = session.put(Value::new(other)).unwrap_err();
        assert!(matches!(err, Error::ReservedKey { .. }));

        // Putting the session into itself keeps the self-binding.
        session.put(Value::new(session.clone())).unwrap();
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn self_alias_makes_session_ambiguous() {
        let session = DefaultSession::new();
        session.put_named("current", Value::new(session.clone())).unwrap();

        let err = session
            .resolve(&Target::of::<DefaultSession>(), &[])
            .unwrap_err();
        match err {
            Error::AmbiguousResolution { keys, .. } => {
                assert_eq!(
                    keys,
                    vec![DefaultSession::self_key().to_string(), "current".into()]
                );
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }

        let me = session
            .get::<DefaultSession>(&[Annotation::named("current")])
            .unwrap();
        assert!(me.same_session(&session));
    }

    #[test]
    fn empty_key_rejected() {
        let session = DefaultSession::new();
        let err = session.insert_named("", 1i32).unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }));
    }

    #[test]
    fn primitive_target_matches_boxed_value() {
        let session = DefaultSession::new();
        session.insert_named("count", 42i32).unwrap();

        let value = session
            .resolve(&Target::Primitive(Primitive::Int), &[])
            .unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 42);

        let value = session
            .resolve(&Primitive::Int.into(), &[Annotation::named("count")])
            .unwrap();
        assert_eq!(*value.downcast::<i32>().unwrap(), 42);

        // A long is not an int.
        let err = session
            .resolve(&Target::Primitive(Primitive::Long), &[])
            .unwrap_err();
        assert_eq!(
            err,
            Error::NotFound {
                required: "i64".into()
            }
        );
    }

    #[test]
    fn ambiguity_lists_all_keys_in_order() {
        let session = DefaultSession::new();
        session.insert_named("b", String::from("1")).unwrap();
        session.insert_named("a", String::from("2")).unwrap();
        session.insert_named("c", String::from("3")).unwrap();
        session.insert_named("n", 5i32).unwrap();

        let err = session.resolve(&Target::of::<String>(), &[]).unwrap_err();
        assert_eq!(
            err,
            Error::AmbiguousResolution {
                required: std::any::type_name::<String>().into(),
                keys: vec!["b".into(), "a".into(), "c".into()],
            }
        );
        assert!(err.to_string().contains("['b', 'a', 'c']"));
    }

    #[test]
    fn overwrite_keeps_original_position() {
        let session = DefaultSession::new();
        session.insert_named("first", String::from("x")).unwrap();
        session.insert_named("second", String::from("y")).unwrap();
        session.insert_named("first", String::from("z")).unwrap();

        let keys: Vec<String> = session.elements().keys().map(String::from).collect();
        assert_eq!(keys[1..], ["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn not_found_names_the_type() {
        let session = DefaultSession::new();
        let err = session.resolve(&Target::of::<u64>(), &[]).unwrap_err();
        assert_eq!(
            err,
            Error::NotFound {
                required: "u64".into()
            }
        );
    }

    #[test]
    fn explicit_name_short_circuits() {
        let session = DefaultSession::new();
        session.insert_named("label", String::from("text")).unwrap();
        session.insert_named("count", 3i32).unwrap();

        // "count" would match implicitly, but only "label" is consulted.
        let err = session
            .resolve(&Target::of::<i32>(), &[Annotation::named("label")])
            .unwrap_err();
        assert_eq!(
            err,
            Error::TypeMismatch {
                key: "label".into(),
                required: "i32".into(),
                actual: std::any::type_name::<String>().into(),
            }
        );

        let err = session
            .resolve(&Target::of::<i32>(), &[Annotation::named("missing")])
            .unwrap_err();
        assert_eq!(
            err,
            Error::MissingNamedValue {
                key: "missing".into()
            }
        );
    }

    #[test]
    fn explicit_name_bypasses_ambiguity() {
        let session = strings();
        let err = session.resolve(&Target::of::<String>(), &[]).unwrap_err();
        match &err {
            Error::AmbiguousResolution { keys, .. } => assert_eq!(keys, &["a", "b"]),
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert!(err.to_string().contains("'a'"));
        assert!(err.to_string().contains("'b'"));

        let a = session.get::<String>(&[Annotation::named("a")]).unwrap();
        assert_eq!(a.as_str(), "hello");
    }

    #[test]
    fn markers_do_not_trigger_named_lookup() {
        let session = DefaultSession::new();
        session.insert_named("only", 1u8).unwrap();
        let value = session
            .resolve(&Target::of::<u8>(), &[Annotation::Marker("only".into())])
            .unwrap();
        assert_eq!(*value.downcast::<u8>().unwrap(), 1);
    }

    #[test]
    fn views_participate_in_resolution() {
        let session = DefaultSession::new();
        session.put_named("en", greeter(English)).unwrap();

        let g = session.get_view::<dyn Greeter>(&[]).unwrap();
        assert_eq!(g.greet(), "hello");
        // Still resolvable by concrete type.
        assert!(session.get::<English>(&[]).is_ok());

        session.put_named("fr", greeter(French)).unwrap();
        let Err(err) = session.get_view::<dyn Greeter>(&[]) else {
            panic!("expected ambiguity");
        };
        assert!(matches!(
            err,
            Error::AmbiguousResolution { ref keys, .. } if keys.len() == 2
        ));

        let g = session
            .get_view::<dyn Greeter>(&[Annotation::named("fr")])
            .unwrap();
        assert_eq!(g.greet(), "bonjour");
    }

    #[test]
    fn resolution_sees_later_writes() {
        let session = DefaultSession::new();
        assert!(session.get::<f64>(&[]).is_err());
        session.insert(2.5f64).unwrap();
        assert_eq!(*session.get::<f64>(&[]).unwrap(), 2.5);
        session.insert_named("other", 1.0f64).unwrap();
        assert!(session.get::<f64>(&[]).is_err());
    }

    #[test]
    fn elements_is_a_snapshot() {
        let session = strings();
        let snapshot = session.elements();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.contains_key(DefaultSession::self_key()));

        session.insert_named("c", String::from("later")).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.get("c").is_none());
        assert_eq!(session.elements().len(), 4);
        assert_eq!(
            snapshot
                .get("a")
                .unwrap()
                .downcast::<String>()
                .unwrap()
                .as_str(),
            "hello"
        );
    }

    #[test]
    fn snapshot_self_entry_is_a_live_handle() {
        let session = DefaultSession::new();
        let snapshot = session.elements();
        let me = snapshot
            .get(DefaultSession::self_key())
            .unwrap()
            .downcast::<DefaultSession>()
            .unwrap();
        me.insert_named("through_snapshot", 1i32).unwrap();
        assert!(session.contains_key("through_snapshot"));
        assert!(!snapshot.contains_key("through_snapshot"));
    }

    #[test]
    fn stored_session_view_does_not_leak() {
        let session = DefaultSession::new();
        let dynamic = session.get_view::<dyn Session>(&[]).unwrap();
        session.put_named("s", Value::new(dynamic)).unwrap();
        let me = session.get::<DefaultSession>(&[]).unwrap();
        session.put_named("handle", Value::from_rc(me)).unwrap();

        let Handle::Owner(bindings) = &session.handle else {
            panic!("new session owns its bindings");
        };
        let weak = Rc::downgrade(bindings);
        drop(session);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn back_reference_fails_after_drop() {
        let session = DefaultSession::new();
        let me = session.get::<DefaultSession>(&[]).unwrap();
        assert!(me.is_open());
        assert!(me.same_session(&session));
        drop(session);

        assert!(!me.is_open());
        assert_eq!(me.len(), 0);
        assert!(me.elements().is_empty());
        assert_eq!(me.insert_named("x", 1i32).unwrap_err(), Error::SessionClosed);
        assert_eq!(
            me.resolve(&Target::of::<i32>(), &[]).unwrap_err(),
            Error::SessionClosed
        );
    }

    #[test]
    fn type_mismatch_reports_requested_primitive() {
        let session = DefaultSession::new();
        session.insert_named("limit", 5i32).unwrap();
        let err = session
            .resolve(&Primitive::Long.into(), &[Annotation::named("limit")])
            .unwrap_err();
        assert_eq!(
            err,
            Error::TypeMismatch {
                key: "limit".into(),
                required: "long".into(),
                actual: "i32".into(),
            }
        );
    }

    #[test]
    fn resolve_all_stops_at_first_failure() {
        let session = DefaultSession::new();
        session.insert_named("limit", 10i32).unwrap();
        session.insert(String::from("name")).unwrap();

        let values = session
            .resolve_all(&[
                Parameter::primitive(Primitive::Int),
                Parameter::of::<String>(),
                Parameter::of::<DefaultSession>(),
            ])
            .unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(*values[0].downcast::<i32>().unwrap(), 10);

        let err = session
            .resolve_all(&[
                Parameter::of::<String>(),
                Parameter::of::<bool>(),
                Parameter::of::<i32>().named("nope"),
            ])
            .unwrap_err();
        assert_eq!(
            err,
            Error::NotFound {
                required: "bool".into()
            }
        );
    }

    #[test]
    fn debug_lists_keys_and_types() {
        let session = DefaultSession::new();
        session.insert_named("n", 1i32).unwrap();
        let dbg = format!("{session:?}");
        assert!(dbg.contains("\"n\""));
        assert!(dbg.contains("i32"));
    }
}
