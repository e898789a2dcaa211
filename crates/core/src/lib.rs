//! # Mintrules Core
//!
//! The session registry a rule engine uses to inject handler parameters.
//!
//! A [`DefaultSession`] holds named values for one execution.  When a rule
//! handler is about to run, the engine asks the session for each parameter
//! in turn, either by explicit name ([`Annotation::Named`]) or by type.  A
//! type lookup succeeds only when exactly one stored value matches.
//!
//! ```
//! use mintrules_core::{Annotation, DefaultSession, Error, SessionExt};
//!
//! let session = DefaultSession::new();
//! session.insert_named("a", String::from("hello")).unwrap();
//! session.insert_named("b", String::from("world")).unwrap();
//!
//! let err = session.get::<String>(&[]).unwrap_err();
//! assert!(matches!(err, Error::AmbiguousResolution { .. }));
//!
//! let a = session.get::<String>(&[Annotation::named("a")]).unwrap();
//! assert_eq!(a.as_str(), "hello");
//! ```

pub mod error;
pub mod parameter;
pub mod session;
pub mod types;
pub mod value;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use parameter::{Annotation, Parameter, explicit_name};
pub use session::{DefaultSession, Elements, Session, SessionExt};
pub use types::{Primitive, Target, TypeRef};
pub use value::{Value, ValueBuilder};
