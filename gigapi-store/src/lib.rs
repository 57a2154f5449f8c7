//! The in-memory nullable columnar buffer (`Column`) and the per-table
//! mapping of named columns with schema-evolution semantics (`DataStore`)
//! that backs every partition before it is flushed to Parquet.

pub mod column;
pub mod data_store;

pub use column::Column;
pub use data_store::{DataStore, RawBatch};
