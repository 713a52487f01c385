//! Schema snapshots for the backends a pipeline can target.
//!
//! Snapshots are produced externally by schema inference and consumed here
//! read-only. A snapshot is replaced wholesale on reload, never partially
//! mutated.
pub mod errors;
pub mod registry;
pub mod types;

pub use registry::{FileSchemaSource, SchemaRegistry, SchemaSource, StaticSchemaSource};
pub use types::{BackendKind, ColumnDef, FieldDef, LabelSet, SchemaSnapshot, SemType};
