use std::fmt;

/// A handle to a single object owned by a [`Context`](crate::Context).
///
/// Handles are plain `Copy` data: an index into the object table and the generation of the slot
/// at the time the object was allocated. They never keep an object alive on their own; something
/// in the root set must reach the object for that. Using a handle whose object has been swept is
/// always detected, because the slot's generation no longer matches.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ObjectRef {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "<object {}#{}>", self.index, self.generation)
    }
}

/// Every value the collector manages, either an immediate or a reference to a heap object.
#[derive(Debug, Copy, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Object(ObjectRef),
}

impl Value {
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::Object(_) => "object",
        }
    }

    pub fn as_object(self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns a proxy object which can display any `Value`.
    pub fn display(self) -> impl fmt::Display {
        struct ValueDisplay(Value);

        impl fmt::Display for ValueDisplay {
            fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    Value::Undefined => write!(fmt, "undefined"),
                    Value::Null => write!(fmt, "null"),
                    Value::Boolean(b) => write!(fmt, "{}", b),
                    Value::Integer(i) => write!(fmt, "{}", i),
                    Value::Number(f) => write!(fmt, "{}", f),
                    Value::Object(obj) => write!(fmt, "{}", obj),
                }
            }
        }

        ValueDisplay(self)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (*self, *other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Undefined, _) => false,

            (Value::Null, Value::Null) => true,
            (Value::Null, _) => false,

            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Boolean(_), _) => false,

            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(a), Value::Number(b)) => a as f64 == b,
            (Value::Integer(_), _) => false,

            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Number(a), Value::Integer(b)) => b as f64 == a,
            (Value::Number(_), _) => false,

            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Object(_), _) => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Number(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Value {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Value {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
