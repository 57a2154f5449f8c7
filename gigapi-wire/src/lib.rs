//! Wire-format decoders for the HTTP ingress (§6, an external collaborator
//! kept minimal per spec.md §1): NDJSON and InfluxDB line protocol, both
//! producing the same `RawBatch` the core ingest pipeline consumes, so
//! `gigapi-lake`/`gigapi-store` never see a wire format directly.

pub mod line_protocol;
pub mod ndjson;

pub use line_protocol::{parse_line_protocol, LineBatch};
pub use ndjson::parse_ndjson;
