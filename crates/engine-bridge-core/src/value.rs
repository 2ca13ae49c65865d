//! Values exchanged with the engine.

use std::fmt;

use crate::handle::RemoteHandle;

/// A value the local process can represent directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// The engine's empty value.
    Empty,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("[]"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// An error object the engine returned as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFault {
    pub message: String,
    pub identifier: Option<String>,
}

impl RemoteFault {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            identifier: None,
        }
    }

    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(id) => write!(f, "{id}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Anything a remote operation can yield.
///
/// The engine's own value model has no general local representation, so
/// results are either primitives, opaque handles, or error objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Primitive(Primitive),
    Handle(RemoteHandle),
    Error(RemoteFault),
}

impl Value {
    /// The empty value.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Primitive(Primitive::Empty)
    }

    #[must_use]
    pub const fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Self::Primitive(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_handle(&self) -> Option<&RemoteHandle> {
        match self {
            Self::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// Consume the value, keeping it only if it is a handle.
    #[must_use]
    pub fn into_handle(self) -> Option<RemoteHandle> {
        match self {
            Self::Handle(h) => Some(h),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Primitive(Primitive::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Integer view. Whole-valued numbers also qualify.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Primitive(Primitive::Integer(i)) => Some(*i),
            Self::Primitive(Primitive::Number(n)) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Primitive(Primitive::Number(n)) => Some(*n),
            Self::Primitive(Primitive::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Primitive(Primitive::Text(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Primitive(Primitive::Empty))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => p.fmt(f),
            Self::Handle(h) => h.fmt(f),
            Self::Error(e) => e.fmt(f),
        }
    }
}

macro_rules! primitive_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Primitive {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::Primitive(Primitive::from(v))
                }
            }
        )*
    };
}

primitive_from! {
    bool => Bool,
    i32 => Integer,
    i64 => Integer,
    u32 => Integer,
    f64 => Number,
    &str => Text,
    String => Text,
}

impl From<Primitive> for Value {
    fn from(p: Primitive) -> Self {
        Self::Primitive(p)
    }
}

impl From<RemoteHandle> for Value {
    fn from(h: RemoteHandle) -> Self {
        Self::Handle(h)
    }
}

impl From<&RemoteHandle> for Value {
    fn from(h: &RemoteHandle) -> Self {
        Self::Handle(h.clone())
    }
}

impl From<RemoteFault> for Value {
    fn from(e: RemoteFault) -> Self {
        Self::Error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::from(42).as_i64(), Some(42));
        assert_eq!(Value::from(42.0).as_i64(), Some(42));
        assert_eq!(Value::from(2.5).as_i64(), None);
        assert_eq!(Value::from(3).as_f64(), Some(3.0));
        assert_eq!(Value::from("x").as_i64(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::empty().to_string(), "[]");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(Value::from("SBML_MODEL").to_string(), "SBML_MODEL");

        let fault = RemoteFault::new("Unable to read file")
            .with_identifier("MATLAB:load:couldNotReadFile");
        assert_eq!(
            Value::from(fault).to_string(),
            "MATLAB:load:couldNotReadFile: Unable to read file"
        );
    }
}
