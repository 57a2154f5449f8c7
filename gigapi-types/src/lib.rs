//! The closed column element type system (`INT8`/`UBIGINT`/`FLOAT8`/`VARCHAR`)
//! shared by the store, index, and merge layers.

pub mod element_type;
pub mod error;
pub mod value;

pub use element_type::ElementType;
pub use error::{IngestError, Result};
pub use value::{ColumnData, Scalar};
