//! Per-parameter metadata handed to the session at resolution time.

use crate::types::{Primitive, Target};
use serde::{Deserialize, Serialize};

/// A piece of metadata attached to a handler parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    /// Look the value up under this key instead of scanning by type.
    Named(String),
    /// Any other host attribute.  Ignored by resolution.
    Marker(String),
}

impl Annotation {
    pub fn named(key: impl Into<String>) -> Self {
        Annotation::Named(key.into())
    }
}

/// The key of the first explicit-name directive, if any.
pub fn explicit_name(annotations: &[Annotation]) -> Option<&str> {
    annotations.iter().find_map(|a| match a {
        Annotation::Named(key) => Some(key.as_str()),
        Annotation::Marker(_) => None,
    })
}

/// A handler parameter: the type it asks for plus its annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub target: Target,
    pub annotations: Vec<Annotation>,
}

impl Parameter {
    pub fn new(target: impl Into<Target>) -> Self {
        Self {
            target: target.into(),
            annotations: Vec::new(),
        }
    }

    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(Target::of::<T>())
    }

    pub fn primitive(p: Primitive) -> Self {
        Self::new(p)
    }

    /// Attach an explicit-name directive.
    pub fn named(self, key: impl Into<String>) -> Self {
        self.annotated(Annotation::Named(key.into()))
    }

    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn explicit_name(&self) -> Option<&str> {
        explicit_name(&self.annotations)
    }
}
