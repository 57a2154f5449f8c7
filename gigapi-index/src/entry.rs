use serde::{Deserialize, Serialize};

/// One row of the `files` array in `metadata.json`. Field names and casing
/// match the on-disk JSON exactly; this struct is serialized and
/// deserialized directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub id: u32,
    pub path: String,
    pub size_bytes: i64,
    pub row_count: i64,
    pub chunk_time: i64,
    pub min_time: i64,
    pub max_time: i64,
    pub range: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A file to add to the index, before an `id` has been assigned.
#[derive(Debug, Clone)]
pub struct NewIndexEntry {
    pub path: String,
    pub size_bytes: i64,
    pub row_count: i64,
    pub chunk_time: i64,
    pub min_time: i64,
    pub max_time: i64,
}

impl NewIndexEntry {
    pub(crate) fn into_entry(self, id: u32) -> IndexEntry {
        IndexEntry {
            id,
            path: self.path,
            size_bytes: self.size_bytes,
            row_count: self.row_count,
            chunk_time: self.chunk_time,
            min_time: self.min_time,
            max_time: self.max_time,
            range: "1h".to_string(),
            kind: "compacted".to_string(),
        }
    }
}

/// The whole `metadata.json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(rename = "type")]
    pub table_name: String,
    pub parquet_size_bytes: i64,
    pub row_count: i64,
    pub min_time: i64,
    pub max_time: i64,
    #[serde(default)]
    pub wal_sequence: i64,
    #[serde(default)]
    pub drop_queue: Vec<String>,
    #[serde(default)]
    pub files: Vec<IndexEntry>,
}
