use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use super::expr::Expr;
use super::hash::{self, kind};
use super::item::Item;
use super::num::Num;
use super::record::Record;

pub(crate) static ABSENT: Value = Value::Absent;

/// Immutable, cheaply cloned string leaf.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Text(Arc<str>);

impl Text {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Text {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Text {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Hashes exactly as `str` does, so `Borrow<str>` lookups find their keys.
impl Hash for Text {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Text(Arc::from(s))
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Text(Arc::from(s))
    }
}

/// Immutable binary blob, written in Recon as `%` followed by base64.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Data(Arc<[u8]>);

impl Data {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(hash::bytes(kind::DATA, &self.0));
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Data {
    fn from(bytes: Vec<u8>) -> Self {
        Data(Arc::from(bytes))
    }
}

impl From<&[u8]> for Data {
    fn from(bytes: &[u8]) -> Self {
        Data(Arc::from(bytes))
    }
}

/// A node of the structure tree that is not a field.
///
/// `Absent` is the "no value" marker and `Extant` the "present but empty"
/// marker; each equals only itself. Both sort before every other kind.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Absent,
    Extant,
    Bool(bool),
    Num(Num),
    Text(Text),
    Data(Data),
    Record(Record),
    Expr(Box<Expr>),
}

impl Value {
    pub fn absent() -> Value {
        Value::Absent
    }

    pub fn extant() -> Value {
        Value::Extant
    }

    pub fn text(s: impl Into<Text>) -> Value {
        Value::Text(s.into())
    }

    pub fn num(n: impl Into<Num>) -> Value {
        Value::Num(n.into())
    }

    pub fn data(bytes: impl Into<Data>) -> Value {
        Value::Data(bytes.into())
    }

    pub fn expr(expr: Expr) -> Value {
        Value::Expr(Box::new(expr))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn is_extant(&self) -> bool {
        matches!(self, Value::Extant)
    }

    /// Anything but `Absent`.
    pub fn is_defined(&self) -> bool {
        !self.is_absent()
    }

    /// Anything but `Absent`, `Extant` and `Bool(false)`.
    pub fn is_definite(&self) -> bool {
        !matches!(self, Value::Absent | Value::Extant | Value::Bool(false))
    }

    /// Boolean interpretation used by logical operators and filters.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Absent | Value::Bool(false) => false,
            _ => true,
        }
    }

    pub fn is_expr(&self) -> bool {
        matches!(self, Value::Expr(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<Num> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_num().and_then(Num::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_num().map(Num::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Value::Expr(e) => Some(e),
            _ => None,
        }
    }

    /// First-match lookup of a keyed field; `Absent` for non-records.
    pub fn get(&self, key: &Value) -> &Value {
        match self {
            Value::Record(r) => r.get(key),
            _ => &ABSENT,
        }
    }

    pub fn get_str(&self, key: &str) -> &Value {
        match self {
            Value::Record(r) => r.get_str(key),
            _ => &ABSENT,
        }
    }

    pub fn get_attr(&self, key: &str) -> &Value {
        match self {
            Value::Record(r) => r.get_attr(key),
            _ => &ABSENT,
        }
    }

    /// Key of the leading attribute, if this is an attributed record.
    pub fn tag(&self) -> Option<&str> {
        self.as_record().and_then(Record::tag)
    }

    /// Appends `that` to `self`, producing a record of both.
    pub fn concat(&self, that: &Value) -> Value {
        let mut record = match self {
            Value::Absent => Record::new(),
            Value::Record(r) => r.clone(),
            other => Record::of([Item::Value(other.clone())]),
        };
        match that {
            Value::Absent => {}
            Value::Record(r) => record.extend(r.iter().cloned()),
            other => record.push(other.clone()),
        }
        Value::Record(record)
    }

    /// Position in the cross-kind total order.
    pub(crate) fn kind_order(&self) -> u8 {
        match self {
            Value::Absent => 0,
            Value::Extant => 1,
            Value::Bool(_) => 2,
            Value::Num(_) => 3,
            Value::Text(_) => 4,
            Value::Data(_) => 5,
            Value::Record(_) => 6,
            Value::Expr(_) => 7,
        }
    }

    pub fn structural_hash(&self) -> u64 {
        match self {
            Value::Absent => hash::mash(hash::mix(hash::SEED, kind::ABSENT)),
            Value::Extant => hash::mash(hash::mix(hash::SEED, kind::EXTANT)),
            Value::Bool(b) => hash::mash(hash::mix(hash::mix(hash::SEED, kind::BOOL), *b as u64)),
            Value::Num(n) => hash::mash(hash::mix(hash::mix(hash::SEED, kind::NUM), n.structural_hash())),
            Value::Text(t) => hash::bytes(kind::TEXT, t.as_bytes()),
            Value::Data(d) => hash::bytes(kind::DATA, d.as_bytes()),
            Value::Record(r) => r.structural_hash(),
            Value::Expr(e) => hash::derived(kind::EXPR, e),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Absent, Value::Absent) | (Value::Extant, Value::Extant) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Expr(a), Value::Expr(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Num(a), Value::Num(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Data(a), Value::Data(b)) => a.cmp(b),
            (Value::Record(a), Value::Record(b)) => a.cmp(b),
            (Value::Expr(a), Value::Expr(b)) => a.cmp(b),
            _ => self.kind_order().cmp(&other.kind_order()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s.into())
    }
}

impl From<Text> for Value {
    fn from(t: Text) -> Self {
        Value::Text(t)
    }
}

impl From<Num> for Value {
    fn from(n: Num) -> Self {
        Value::Num(n)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<Expr> for Value {
    fn from(e: Expr) -> Self {
        Value::expr(e)
    }
}

macro_rules! value_from_num {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Num(Num::from(n))
            }
        })*
    };
}

value_from_num!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_text_keys_found_by_str() {
        let mut lanes: HashMap<Text, u32> = HashMap::new();
        lanes.insert(Text::from("light"), 1);
        lanes.insert(Text::from("door"), 2);
        assert_eq!(lanes.get("light"), Some(&1));
        assert_eq!(lanes.get("door"), Some(&2));
        assert_eq!(lanes.get("window"), None);
    }

    #[test]
    fn test_markers_equal_only_themselves() {
        assert_eq!(Value::Absent, Value::Absent);
        assert_eq!(Value::Extant, Value::Extant);
        assert_ne!(Value::Absent, Value::Extant);
        assert_ne!(Value::Extant, Value::Bool(true));
    }

    #[test]
    fn test_markers_sort_first() {
        let mut values = vec![
            Value::from("a"),
            Value::from(1),
            Value::Extant,
            Value::Record(Record::new()),
            Value::Absent,
            Value::from(false),
        ];
        values.sort();
        assert_eq!(values[0], Value::Absent);
        assert_eq!(values[1], Value::Extant);
        assert_eq!(values[2], Value::from(false));
    }

    #[test]
    fn test_hash_consistent_with_eq() {
        let mut set = HashSet::new();
        set.insert(Value::from(2));
        assert!(set.contains(&Value::from(2.0)));
        assert!(!set.contains(&Value::from("2")));
    }

    #[test]
    fn test_concat_splices_records() {
        let a = Value::Record(Record::new().with_slot("a", 1));
        let joined = a.concat(&Value::from(2));
        assert_eq!(joined.as_record().map(Record::len), Some(2));
        assert_eq!(joined.get_str("a"), &Value::from(1));
    }
}
