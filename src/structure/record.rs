use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use super::hash::{self, kind};
use super::item::{Field, Item};
use super::value::{Text, Value, ABSENT};

/// Ordered sequence of items mixing positional values and keyed fields.
///
/// Keys need not be unique; lookups return the first match. Insertion order
/// is preserved and takes part in equality.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    items: Vec<Item>,
}

impl Record {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { items: Vec::with_capacity(capacity) }
    }

    pub fn of<I: IntoIterator<Item = Item>>(items: I) -> Self {
        Self { items: items.into_iter().collect() }
    }

    pub fn with_attr(mut self, key: impl Into<Text>, value: impl Into<Value>) -> Self {
        self.items.push(Item::attr(key, value));
        self
    }

    pub fn with_slot(mut self, key: impl Into<Value>, value: impl Into<Value>) -> Self {
        self.items.push(Item::slot(key, value));
        self
    }

    pub fn with_item(mut self, item: impl Into<Item>) -> Self {
        self.items.push(item.into());
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub fn item(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn push(&mut self, item: impl Into<Item>) {
        self.items.push(item.into());
    }

    pub fn insert(&mut self, index: usize, item: impl Into<Item>) {
        let index = index.min(self.items.len());
        self.items.insert(index, item.into());
    }

    pub fn remove(&mut self, index: usize) -> Option<Item> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Keeps the first `n` items.
    pub fn truncate(&mut self, n: usize) {
        self.items.truncate(n);
    }

    /// Removes the first `n` items.
    pub fn drain_front(&mut self, n: usize) {
        let n = n.min(self.items.len());
        self.items.drain(..n);
    }

    pub fn extend<I: IntoIterator<Item = Item>>(&mut self, items: I) {
        self.items.extend(items);
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.field(key).is_some()
    }

    pub fn field(&self, key: &Value) -> Option<&Field> {
        self.items.iter().find_map(|item| match item {
            Item::Field(f) if f.key_equals(key) => Some(f),
            _ => None,
        })
    }

    pub fn index_of(&self, key: &Value) -> Option<usize> {
        self.items.iter().position(|item| matches!(item, Item::Field(f) if f.key_equals(key)))
    }

    /// Value of the first field keyed by `key`, or `Absent`.
    pub fn get(&self, key: &Value) -> &Value {
        self.field(key).map(Field::value).unwrap_or(&ABSENT)
    }

    pub fn get_str(&self, key: &str) -> &Value {
        self.items
            .iter()
            .find_map(|item| match item {
                Item::Field(f) if f.key_equals_str(key) => Some(f.value()),
                _ => None,
            })
            .unwrap_or(&ABSENT)
    }

    pub fn get_attr(&self, key: &str) -> &Value {
        self.items
            .iter()
            .find_map(|item| match item {
                Item::Field(Field::Attr(k, v)) if k.as_str() == key => Some(v),
                _ => None,
            })
            .unwrap_or(&ABSENT)
    }

    /// Replaces the value of the first field keyed by `key`, or appends a
    /// new slot. Returns the previous value.
    pub fn set(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Value {
        let key = key.into();
        let value = value.into();
        for item in self.items.iter_mut() {
            match item {
                Item::Field(Field::Slot(k, v)) if *k == key => {
                    return std::mem::replace(v, value);
                }
                Item::Field(Field::Attr(k, v)) if matches!(&key, Value::Text(t) if t.as_str() == k.as_str()) => {
                    return std::mem::replace(v, value);
                }
                _ => {}
            }
        }
        self.items.push(Item::Field(Field::Slot(key, value)));
        Value::Absent
    }

    /// Removes every field keyed by `key`. Returns the first removed value.
    pub fn remove_key(&mut self, key: &Value) -> Value {
        let mut removed = None;
        self.items.retain(|item| match item {
            Item::Field(f) if f.key_equals(key) => {
                if removed.is_none() {
                    removed = Some(f.value().clone());
                }
                false
            }
            _ => true,
        });
        removed.unwrap_or(Value::Absent)
    }

    pub fn head(&self) -> Option<&Item> {
        self.items.first()
    }

    /// Key of the first item, if it is an attribute.
    pub fn tag(&self) -> Option<&str> {
        match self.items.first() {
            Some(Item::Field(Field::Attr(k, _))) => Some(k.as_str()),
            _ => None,
        }
    }

    /// Value of the leading attribute.
    pub fn header(&self) -> &Value {
        match self.items.first() {
            Some(Item::Field(Field::Attr(_, v))) => v,
            _ => &ABSENT,
        }
    }

    /// Everything after the leading attribute, flattened to a single value
    /// when only one positional value remains.
    pub fn body(&self) -> Value {
        let rest = match self.items.first() {
            Some(Item::Field(Field::Attr(..))) => &self.items[1..],
            _ => &self.items[..],
        };
        match rest {
            [] => Value::Absent,
            [Item::Value(v)] => v.clone(),
            items => Value::Record(Record::of(items.iter().cloned())),
        }
    }

    /// Appends `body` so that `body()` reads it back unchanged: multi-item
    /// and field-led records splice in, anything else nests as one item.
    pub fn push_body(&mut self, body: &Value) {
        match body {
            Value::Absent => {}
            Value::Record(r) if r.len() > 1 || r.items.first().is_some_and(Item::is_field) => {
                self.items.extend(r.items.iter().cloned());
            }
            other => self.items.push(Item::Value(other.clone())),
        }
    }

    pub fn field_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_field()).count()
    }

    pub fn value_count(&self) -> usize {
        self.items.iter().filter(|item| !item.is_field()).count()
    }

    /// Only positional values.
    pub fn is_array(&self) -> bool {
        self.items.iter().all(|item| !item.is_field())
    }

    /// Only fields.
    pub fn is_object(&self) -> bool {
        self.items.iter().all(Item::is_field)
    }

    pub fn keys(&self) -> impl Iterator<Item = Value> + '_ {
        self.items.iter().filter_map(|item| item.as_field().map(Field::key))
    }

    pub(crate) fn structural_hash(&self) -> u64 {
        let h = self
            .items
            .iter()
            .fold(hash::mix(hash::SEED, kind::RECORD), |h, item| hash::mix(h, item.structural_hash()));
        hash::mash(hash::mix(h, self.items.len() as u64))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.items.cmp(&other.items)
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl FromIterator<Item> for Record {
    fn from_iter<I: IntoIterator<Item = Item>>(iter: I) -> Self {
        Record::of(iter)
    }
}

impl IntoIterator for Record {
    type Item = Item;
    type IntoIter = std::vec::IntoIter<Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_lookup() {
        let record = Record::new().with_slot("a", 1).with_slot("a", 2).with_item(3);
        assert_eq!(record.get_str("a"), &Value::from(1));
        assert_eq!(record.field_count(), 2);
        assert_eq!(record.value_count(), 1);
    }

    #[test]
    fn test_set_replaces_or_appends() {
        let mut record = Record::new().with_slot("a", 1);
        assert_eq!(record.set("a", 5), Value::from(1));
        assert_eq!(record.set("b", 6), Value::Absent);
        assert_eq!(record.len(), 2);
        assert_eq!(record.get_str("a"), &Value::from(5));
    }

    #[test]
    fn test_remove_key_removes_all() {
        let mut record = Record::new().with_slot("a", 1).with_item("x").with_slot("a", 2);
        assert_eq!(record.remove_key(&Value::from("a")), Value::from(1));
        assert_eq!(record, Record::new().with_item("x"));
    }

    #[test]
    fn test_order_is_part_of_equality() {
        let a = Record::new().with_slot("a", 1).with_slot("b", 2);
        let b = Record::new().with_slot("b", 2).with_slot("a", 1);
        assert_ne!(a, b);
        assert_ne!(a.structural_hash(), b.structural_hash());
    }

    #[test]
    fn test_tag_header_body() {
        let record = Record::new()
            .with_attr("event", Record::new().with_slot("node", "/a"))
            .with_item("on");
        assert_eq!(record.tag(), Some("event"));
        assert_eq!(record.header().get_str("node"), &Value::from("/a"));
        assert_eq!(record.body(), Value::from("on"));
    }
}
