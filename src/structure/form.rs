use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::item::Item;
use super::json::{cast_serde, mold_serde};
use super::num::Num;
use super::record::Record;
use super::value::Value;

/// Conversion between a host type and structure items.
///
/// `mold` never fails: a host value without a representation molds to
/// `Absent`. `cast` returns `None` when the item's shape does not match, so
/// callers can chain fallback forms.
pub trait Form<T> {
    /// Attribute tag identifying this form's records, if it has one.
    fn tag(&self) -> Option<&str> {
        None
    }

    /// Fallback value when there is nothing to cast.
    fn unit(&self) -> Option<T> {
        None
    }

    fn mold(&self, object: &T) -> Item;

    fn cast(&self, item: &Item) -> Option<T>;
}

/// Types with a canonical form.
pub trait Formed: Sized + 'static {
    type Form: Form<Self> + Default + 'static;

    fn form() -> Self::Form {
        Self::Form::default()
    }

    fn mold(&self) -> Value {
        Self::form().mold(self).into_value()
    }

    fn cast(value: &Value) -> Option<Self> {
        Self::form().cast(&Item::Value(value.clone()))
    }
}

fn value_of(item: &Item) -> &Value {
    match item {
        Item::Value(v) => v,
        Item::Field(f) => f.value(),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ValueForm;

impl Form<Value> for ValueForm {
    fn unit(&self) -> Option<Value> {
        Some(Value::Absent)
    }

    fn mold(&self, object: &Value) -> Item {
        Item::Value(object.clone())
    }

    fn cast(&self, item: &Item) -> Option<Value> {
        Some(item.clone().into_value())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BoolForm;

impl Form<bool> for BoolForm {
    fn unit(&self) -> Option<bool> {
        Some(false)
    }

    fn mold(&self, object: &bool) -> Item {
        Item::Value(Value::Bool(*object))
    }

    fn cast(&self, item: &Item) -> Option<bool> {
        match value_of(item) {
            Value::Bool(b) => Some(*b),
            Value::Text(t) if t.as_str() == "true" => Some(true),
            Value::Text(t) if t.as_str() == "false" => Some(false),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StringForm;

impl Form<String> for StringForm {
    fn unit(&self) -> Option<String> {
        Some(String::new())
    }

    fn mold(&self, object: &String) -> Item {
        Item::Value(Value::from(object.as_str()))
    }

    fn cast(&self, item: &Item) -> Option<String> {
        match value_of(item) {
            Value::Text(t) => Some(t.to_string()),
            Value::Num(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Numeric conversions shared by every primitive number type.
pub trait NumberCast: Copy + Sized + 'static {
    fn to_num(self) -> Num;
    fn from_num(num: Num) -> Option<Self>;
}

macro_rules! number_cast_int {
    ($($t:ty),*) => {
        $(impl NumberCast for $t {
            fn to_num(self) -> Num {
                Num::from(self)
            }

            fn from_num(num: Num) -> Option<Self> {
                num.as_i64().and_then(|i| <$t>::try_from(i).ok())
            }
        })*
    };
}

number_cast_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl NumberCast for f32 {
    fn to_num(self) -> Num {
        Num::Float(self as f64)
    }

    fn from_num(num: Num) -> Option<Self> {
        Some(num.as_f64() as f32)
    }
}

impl NumberCast for f64 {
    fn to_num(self) -> Num {
        Num::Float(self)
    }

    fn from_num(num: Num) -> Option<Self> {
        Some(num.as_f64())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NumberForm<N>(PhantomData<N>);

impl<N> Default for NumberForm<N> {
    fn default() -> Self {
        NumberForm(PhantomData)
    }
}

impl<N: NumberCast> Form<N> for NumberForm<N> {
    fn mold(&self, object: &N) -> Item {
        Item::Value(Value::Num(object.to_num()))
    }

    fn cast(&self, item: &Item) -> Option<N> {
        match value_of(item) {
            Value::Num(n) => N::from_num(*n),
            Value::Text(t) => t.parse::<f64>().ok().and_then(|f| N::from_num(Num::Float(f))),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OptionForm<F>(pub F);

impl<T, F: Form<T>> Form<Option<T>> for OptionForm<F> {
    fn unit(&self) -> Option<Option<T>> {
        Some(None)
    }

    fn mold(&self, object: &Option<T>) -> Item {
        match object {
            Some(t) => self.0.mold(t),
            None => Item::absent(),
        }
    }

    fn cast(&self, item: &Item) -> Option<Option<T>> {
        match value_of(item) {
            Value::Absent | Value::Extant => Some(None),
            _ => self.0.cast(item).map(Some),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VecForm<F>(pub F);

impl<T, F: Form<T>> Form<Vec<T>> for VecForm<F> {
    fn unit(&self) -> Option<Vec<T>> {
        Some(Vec::new())
    }

    fn mold(&self, object: &Vec<T>) -> Item {
        Item::Value(Value::Record(object.iter().map(|t| self.0.mold(t)).collect()))
    }

    /// Elements that fail to cast are skipped.
    fn cast(&self, item: &Item) -> Option<Vec<T>> {
        match value_of(item) {
            Value::Record(r) => Some(
                r.iter()
                    .filter_map(|item| self.0.cast(&Item::Value(item.to_value())))
                    .collect(),
            ),
            Value::Absent => None,
            other => self.0.cast(&Item::Value(other.clone())).map(|t| vec![t]),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MapForm<F>(pub F);

impl<T, F: Form<T>> Form<BTreeMap<String, T>> for MapForm<F> {
    fn unit(&self) -> Option<BTreeMap<String, T>> {
        Some(BTreeMap::new())
    }

    fn mold(&self, object: &BTreeMap<String, T>) -> Item {
        let record: Record = object
            .iter()
            .map(|(k, v)| Item::slot(k.as_str(), self.0.mold(v).into_value()))
            .collect();
        Item::Value(Value::Record(record))
    }

    fn cast(&self, item: &Item) -> Option<BTreeMap<String, T>> {
        let record = value_of(item).as_record()?;
        let mut map = BTreeMap::new();
        for item in record.iter() {
            if let Some(field) = item.as_field() {
                if let (Some(key), Some(value)) = (
                    field.key().as_text().map(str::to_owned),
                    self.0.cast(&Item::Value(field.value().clone())),
                ) {
                    map.insert(key, value);
                }
            }
        }
        Some(map)
    }
}

/// Form for any serde type, going through the JSON bridge.
#[derive(Clone, Copy, Debug)]
pub struct SerdeForm<T>(PhantomData<T>);

impl<T> Default for SerdeForm<T> {
    fn default() -> Self {
        SerdeForm(PhantomData)
    }
}

impl<T: Serialize + DeserializeOwned> Form<T> for SerdeForm<T> {
    fn mold(&self, object: &T) -> Item {
        Item::Value(mold_serde(object))
    }

    fn cast(&self, item: &Item) -> Option<T> {
        cast_serde(value_of(item))
    }
}

impl Formed for Value {
    type Form = ValueForm;
}

impl Formed for bool {
    type Form = BoolForm;
}

impl Formed for String {
    type Form = StringForm;
}

macro_rules! formed_number {
    ($($t:ty),*) => {
        $(impl Formed for $t {
            type Form = NumberForm<$t>;
        })*
    };
}

formed_number!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

/// Forms looked up by host type.
///
/// Dispatch goes through `TypeId` only; nothing is inferred from the shape of
/// a host value.
#[derive(Default)]
pub struct FormRegistry {
    forms: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

struct Registered<T>(Box<dyn Form<T> + Send + Sync>);

impl FormRegistry {
    pub fn new() -> Self {
        Self { forms: HashMap::new() }
    }

    /// Registry preloaded with the primitive forms.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ValueForm);
        registry.register(BoolForm);
        registry.register(StringForm);
        registry.register(NumberForm::<i32>::default());
        registry.register(NumberForm::<i64>::default());
        registry.register(NumberForm::<u32>::default());
        registry.register(NumberForm::<u64>::default());
        registry.register(NumberForm::<f32>::default());
        registry.register(NumberForm::<f64>::default());
        registry
    }

    /// Registers `form` for `T`, replacing any earlier registration.
    pub fn register<T: 'static, F: Form<T> + Send + Sync + 'static>(&mut self, form: F) {
        self.forms
            .insert(TypeId::of::<T>(), Box::new(Registered::<T>(Box::new(form))));
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.forms.contains_key(&TypeId::of::<T>())
    }

    pub fn form<T: 'static>(&self) -> Option<&(dyn Form<T> + Send + Sync)> {
        self.forms
            .get(&TypeId::of::<T>())
            .and_then(|any| any.downcast_ref::<Registered<T>>())
            .map(|registered| registered.0.as_ref())
    }

    /// Molds with the registered form; unregistered types mold to `Absent`.
    pub fn mold<T: 'static>(&self, object: &T) -> Item {
        self.form::<T>().map(|form| form.mold(object)).unwrap_or_else(Item::absent)
    }

    pub fn cast<T: 'static>(&self, item: &Item) -> Option<T> {
        self.form::<T>().and_then(|form| form.cast(item))
    }
}
