use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::node::NodeRef;

/// Globally unique node identifier; doubles as the storage key.
pub type NodeId = i64;

/// Edge direction as seen from the node that stores the adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
        }
    }
}

/// Persisted type tags. The numeric ids are part of the storage format and
/// must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    Boolean = 0,
    String = 1,
    Byte = 2,
    Short = 3,
    Integer = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    List = 8,
    NodeRef = 9,
    Unknown = 10,
    Character = 11,
    ArrayByte = 12,
    ArrayShort = 13,
    ArrayInt = 14,
    ArrayLong = 15,
    ArrayFloat = 16,
    ArrayDouble = 17,
    ArrayChar = 18,
    ArrayBool = 19,
    ArrayObject = 20,
}

impl ValueType {
    const ALL: [ValueType; 21] = [
        ValueType::Boolean,
        ValueType::String,
        ValueType::Byte,
        ValueType::Short,
        ValueType::Integer,
        ValueType::Long,
        ValueType::Float,
        ValueType::Double,
        ValueType::List,
        ValueType::NodeRef,
        ValueType::Unknown,
        ValueType::Character,
        ValueType::ArrayByte,
        ValueType::ArrayShort,
        ValueType::ArrayInt,
        ValueType::ArrayLong,
        ValueType::ArrayFloat,
        ValueType::ArrayDouble,
        ValueType::ArrayChar,
        ValueType::ArrayBool,
        ValueType::ArrayObject,
    ];

    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn lookup(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

/// Opaque application value. It cannot be persisted directly; a
/// [`PropertyConverter`] must turn it into a supported [`Value`] first.
#[derive(Clone)]
pub struct CustomValue {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl CustomValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomValue({})", self.type_name)
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for CustomValue {}

impl Hash for CustomValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as *const () as usize).hash(state);
    }
}

/// Hook applied to [`Value::Custom`] properties before encoding.
pub type PropertyConverter = Arc<dyn Fn(&CustomValue) -> Value + Send + Sync>;

/// A node or edge property value.
///
/// Equality and hashing treat floats by their bit pattern so values can key
/// the property index.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    String(Arc<str>),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Node(NodeRef),
    List(Vec<Value>),
    ByteArray(Vec<i8>),
    ShortArray(Vec<i16>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    CharArray(Vec<char>),
    BoolArray(Vec<bool>),
    ObjectArray(Vec<Value>),
    Custom(CustomValue),
}

impl Value {
    /// Storage tag for this value; `None` for values that need conversion.
    pub fn value_type(&self) -> Option<ValueType> {
        let tag = match self {
            Value::Null => ValueType::Unknown,
            Value::Bool(_) => ValueType::Boolean,
            Value::String(_) => ValueType::String,
            Value::Byte(_) => ValueType::Byte,
            Value::Short(_) => ValueType::Short,
            Value::Int(_) => ValueType::Integer,
            Value::Long(_) => ValueType::Long,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::Char(_) => ValueType::Character,
            Value::Node(_) => ValueType::NodeRef,
            Value::List(_) => ValueType::List,
            Value::ByteArray(_) => ValueType::ArrayByte,
            Value::ShortArray(_) => ValueType::ArrayShort,
            Value::IntArray(_) => ValueType::ArrayInt,
            Value::LongArray(_) => ValueType::ArrayLong,
            Value::FloatArray(_) => ValueType::ArrayFloat,
            Value::DoubleArray(_) => ValueType::ArrayDouble,
            Value::CharArray(_) => ValueType::ArrayChar,
            Value::BoolArray(_) => ValueType::ArrayBool,
            Value::ObjectArray(_) => ValueType::ArrayObject,
            Value::Custom(_) => return None,
        };
        Some(tag)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Custom(custom) => custom.type_name(),
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Byte(_) => "i8",
            Value::Short(_) => "i16",
            Value::Int(_) => "i32",
            Value::Long(_) => "i64",
            Value::Float(_) => "f32",
            Value::Double(_) => "f64",
            Value::Char(_) => "char",
            Value::Node(_) => "node",
            Value::List(_) => "list",
            Value::ByteArray(_) => "[i8]",
            Value::ShortArray(_) => "[i16]",
            Value::IntArray(_) => "[i32]",
            Value::LongArray(_) => "[i64]",
            Value::FloatArray(_) => "[f32]",
            Value::DoubleArray(_) => "[f64]",
            Value::CharArray(_) => "[char]",
            Value::BoolArray(_) => "[bool]",
            Value::ObjectArray(_) => "[value]",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::Short(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeRef> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Char(a), Char(b)) => a == b,
            (Node(a), Node(b)) => a == b,
            (List(a), List(b)) => a == b,
            (ByteArray(a), ByteArray(b)) => a == b,
            (ShortArray(a), ShortArray(b)) => a == b,
            (IntArray(a), IntArray(b)) => a == b,
            (LongArray(a), LongArray(b)) => a == b,
            (FloatArray(a), FloatArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (DoubleArray(a), DoubleArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (CharArray(a), CharArray(b)) => a == b,
            (BoolArray(a), BoolArray(b)) => a == b,
            (ObjectArray(a), ObjectArray(b)) => a == b,
            (Custom(a), Custom(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Byte(v) => v.hash(state),
            Value::Short(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Char(v) => v.hash(state),
            Value::Node(v) => v.hash(state),
            Value::List(v) | Value::ObjectArray(v) => v.hash(state),
            Value::ByteArray(v) => v.hash(state),
            Value::ShortArray(v) => v.hash(state),
            Value::IntArray(v) => v.hash(state),
            Value::LongArray(v) => v.hash(state),
            Value::FloatArray(v) => {
                for x in v {
                    x.to_bits().hash(state);
                }
            }
            Value::DoubleArray(v) => {
                for x in v {
                    x.to_bits().hash(state);
                }
            }
            Value::CharArray(v) => v.hash(state),
            Value::BoolArray(v) => v.hash(state),
            Value::Custom(v) => v.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<Arc<str>> for Value {
    fn from(v: Arc<str>) -> Self {
        Value::String(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Byte(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Short(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl From<NodeRef> for Value {
    fn from(v: NodeRef) -> Self {
        Value::Node(v)
    }
}
