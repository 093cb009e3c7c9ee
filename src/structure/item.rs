use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use super::hash::{self, kind};
use super::value::{Text, Value};

/// A keyed member of a record.
///
/// `Attr` keys are always text and are written `@key(value)`; `Slot` keys are
/// arbitrary values and are written `key: value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    Attr(Text, Value),
    Slot(Value, Value),
}

impl Field {
    pub fn attr(key: impl Into<Text>, value: impl Into<Value>) -> Field {
        Field::Attr(key.into(), value.into())
    }

    pub fn slot(key: impl Into<Value>, value: impl Into<Value>) -> Field {
        Field::Slot(key.into(), value.into())
    }

    pub fn is_attr(&self) -> bool {
        matches!(self, Field::Attr(..))
    }

    pub fn key(&self) -> Value {
        match self {
            Field::Attr(k, _) => Value::Text(k.clone()),
            Field::Slot(k, _) => k.clone(),
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Field::Attr(_, v) | Field::Slot(_, v) => v,
        }
    }

    /// Whether this field answers a keyed lookup for `key`.
    pub fn key_equals(&self, key: &Value) -> bool {
        match (self, key) {
            (Field::Attr(k, _), Value::Text(t)) => k == t,
            (Field::Attr(..), _) => false,
            (Field::Slot(k, _), key) => k == key,
        }
    }

    pub fn key_equals_str(&self, key: &str) -> bool {
        match self {
            Field::Attr(k, _) => k.as_str() == key,
            Field::Slot(Value::Text(k), _) => k.as_str() == key,
            Field::Slot(..) => false,
        }
    }

    pub(crate) fn structural_hash(&self) -> u64 {
        match self {
            Field::Attr(k, v) => {
                let h = hash::mix(hash::SEED, kind::ATTR);
                let h = hash::mix(h, hash::bytes(kind::TEXT, k.as_bytes()));
                hash::mash(hash::mix(h, v.structural_hash()))
            }
            Field::Slot(k, v) => {
                let h = hash::mix(hash::SEED, kind::SLOT);
                let h = hash::mix(h, k.structural_hash());
                hash::mash(hash::mix(h, v.structural_hash()))
            }
        }
    }
}

impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Field::Attr(ak, av), Field::Attr(bk, bv)) => ak.cmp(bk).then_with(|| av.cmp(bv)),
            (Field::Slot(ak, av), Field::Slot(bk, bv)) => ak.cmp(bk).then_with(|| av.cmp(bv)),
            (Field::Attr(..), Field::Slot(..)) => Ordering::Less,
            (Field::Slot(..), Field::Attr(..)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

/// Member of a record: either a keyed field or a positional value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    Field(Field),
    Value(Value),
}

impl Item {
    pub fn attr(key: impl Into<Text>, value: impl Into<Value>) -> Item {
        Item::Field(Field::attr(key, value))
    }

    pub fn slot(key: impl Into<Value>, value: impl Into<Value>) -> Item {
        Item::Field(Field::slot(key, value))
    }

    pub fn absent() -> Item {
        Item::Value(Value::Absent)
    }

    pub fn is_field(&self) -> bool {
        matches!(self, Item::Field(_))
    }

    pub fn is_attr(&self) -> bool {
        matches!(self, Item::Field(Field::Attr(..)))
    }

    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Item::Field(f) => Some(f),
            Item::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Item::Value(v) => Some(v),
            Item::Field(_) => None,
        }
    }

    /// Value carried by the item: the field's value, or the item itself.
    pub fn to_value(&self) -> Value {
        match self {
            Item::Field(f) => f.value().clone(),
            Item::Value(v) => v.clone(),
        }
    }

    /// The item as a standalone value; fields are wrapped in a record.
    pub fn into_value(self) -> Value {
        match self {
            Item::Value(v) => v,
            field => Value::Record(super::record::Record::of([field])),
        }
    }

    pub(crate) fn structural_hash(&self) -> u64 {
        match self {
            Item::Field(f) => f.structural_hash(),
            Item::Value(v) => v.structural_hash(),
        }
    }
}

impl Ord for Item {
    /// Positional values order before fields.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Item::Value(a), Item::Value(b)) => a.cmp(b),
            (Item::Field(a), Item::Field(b)) => a.cmp(b),
            (Item::Value(_), Item::Field(_)) => Ordering::Less,
            (Item::Field(_), Item::Value(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Item {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl From<Field> for Item {
    fn from(f: Field) -> Self {
        Item::Field(f)
    }
}

impl<V: Into<Value>> From<V> for Item {
    fn from(v: V) -> Self {
        Item::Value(v.into())
    }
}
