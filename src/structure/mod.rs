//! Self-describing structure tree: the payload type of every WARP message
//! and every dataflow computation.

mod expr;
mod form;
mod hash;
mod interpreter;
mod item;
mod json;
mod num;
mod record;
mod value;

pub use expr::{BinaryOp, Expr, Selector, UnaryOp};
pub use form::{
    BoolForm, Form, FormRegistry, Formed, MapForm, NumberCast, NumberForm, OptionForm, SerdeForm,
    StringForm, ValueForm, VecForm,
};
pub use interpreter::{binary, unary, Interpreter};
pub use item::{Field, Item};
pub use json::{cast_serde, mold_serde};
pub use num::Num;
pub use record::Record;
pub use value::{Data, Text, Value};
