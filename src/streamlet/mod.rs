//! Streamlets: an incremental dataflow graph over structure values.
//!
//! Nodes live in a [`Dataflow`] arena and are addressed by generational
//! handles. Value-shaped nodes recompute as a whole; map-shaped nodes carry
//! per-key [`KeyEffect`]s so a keyed update recomputes only that key
//! downstream.

mod combinators;
mod graph;
mod operators;
mod record_model;
mod reduced_map;
mod source;

pub use combinators::{FilterFields, FilterValue, JoinValues, MapFieldValues, MapValue, ReduceFields, WatchFields, WatchValue};
pub use graph::{AsAny, Dataflow, Handle, Inputs, KeyEffect, Node, NodeId, Propagation};
pub use operators::{BinaryOutlet, ConditionalOutlet, ExpressionOutlet, UnaryOutlet};
pub use record_model::RecordModel;
pub use reduced_map::ReducedMap;
pub use source::{KeyOutlet, ListInput, MapInput, MapOutput, Memoize, ValueInput, ValueOutput};
