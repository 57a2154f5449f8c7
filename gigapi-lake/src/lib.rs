//! The write path's service layer: partitioning, Parquet flush, background
//! merge/compaction, and the process-wide table registry that ties them
//! together.

pub mod blob_store;
pub mod merge_engine;
pub mod merge_service;
pub mod partition;
pub mod partition_by;
pub mod promise;
pub mod registry;
pub mod save_service;
pub mod table_descriptor;
pub mod table_service;

pub use blob_store::BlobStore;
pub use promise::Promise;
pub use registry::{Registry, RegistryConfig};
pub use table_descriptor::{Engine, PartitionDesc, TableDescriptor};
pub use table_service::TableService;
