//! Document flattening - expand sections, extract columns into wide rows
//!
//! [`Flattener`] walks a document against a [`SchemaTree`](crate::schema::SchemaTree)
//! and yields the leaf section instances; [`RowAssembler`] turns each leaf
//! into a [`FlatRow`]. Both are pure: one flattener and one assembler can
//! be shared by every worker of a run.

pub mod assembler;
pub mod coerce;
pub mod flattener;
pub mod types;
pub mod writer;

pub use assembler::{assemble, Assembled, RowAssembler, Transform, TransformRegistry};
pub use coerce::{coerce, parse_timestamp};
pub use flattener::{flatten, ArrayPolicy, FlattenOptions, Flattened, Flattener};
pub use types::{AnomalyKind, Cell, Diagnostics, FlatRow, InstanceKey, SectionInstance};
pub use writer::{JsonlSink, MemorySink, Sink, StreamSink};
