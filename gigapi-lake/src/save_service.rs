use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use gigapi_store::DataStore;
use gigapi_types::{IngestError, Result};
use parquet::arrow::AsyncArrowWriter;
use parquet::file::properties::WriterProperties;
use uuid::Uuid;

use crate::blob_store::BlobStore;

pub struct SavedFile {
    /// Path relative to the table's data root, as recorded in the index.
    pub relative_path: String,
    pub size_bytes: i64,
}

/// Flushes a [`DataStore`] to a single Parquet file. One instance per
/// partition. Local and S3-compatible destinations share the same write
/// path: the record batch is always staged to a local temp file first
/// (`local_root/tmp`), then either renamed (local data root) or uploaded
/// (S3 data root) into `local_root`'s data-dir counterpart.
pub struct SaveService {
    data: BlobStore,
    data_is_local: bool,
    /// Always a real local directory: scratch space for tmp Parquet files
    /// and the home of this partition's `metadata.json`, regardless of
    /// where the data root points (see DESIGN.md).
    local_root: PathBuf,
    /// `"date=.../hour=..."` for a Hive partition, `""` for the implicit
    /// simple-table partition.
    partition_rel: String,
}

const ROW_GROUP_LEN: usize = 8192;

impl SaveService {
    pub fn new(data: BlobStore, data_is_local: bool, local_root: PathBuf, partition_rel: String) -> SaveService {
        SaveService {
            data,
            data_is_local,
            local_root,
            partition_rel,
        }
    }

    pub fn local_index_dir(&self) -> PathBuf {
        self.local_root.clone()
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.local_root.join("tmp")).await?;
        tokio::fs::create_dir_all(self.local_root.join("data")).await?;
        Ok(())
    }

    fn data_relative(&self, file_name: &str) -> String {
        if self.partition_rel.is_empty() {
            format!("data/{file_name}")
        } else {
            format!("{}/data/{file_name}", self.partition_rel)
        }
    }

    /// Builds an Arrow schema from the store's current columns, writes one
    /// Parquet file (row-group length 8192), and commits it into the data
    /// directory. Returns `None` if the store has zero rows.
    pub async fn save(&self, store: &DataStore) -> Result<Option<SavedFile>> {
        if store.is_empty() {
            return Ok(None);
        }
        self.ensure_dirs().await?;

        let schema = store.arrow_schema();
        let batch = store.store_to_arrow(&schema)?;

        let file_name = format!("{}.1.parquet", Uuid::new_v4());
        let tmp_path = self.local_root.join("tmp").join(&file_name);
        write_parquet(&schema, &batch, &tmp_path).await?;

        let size_bytes = tokio::fs::metadata(&tmp_path).await?.len() as i64;
        let relative_path = self.data_relative(&file_name);

        if self.data_is_local {
            let final_path = self.local_root.join("data").join(&file_name);
            tokio::fs::rename(&tmp_path, &final_path).await?;
        } else {
            let bytes = tokio::fs::read(&tmp_path).await?;
            self.data.put_bytes(&relative_path, bytes.into()).await?;
            tokio::fs::remove_file(&tmp_path).await?;
        }

        Ok(Some(SavedFile {
            relative_path,
            size_bytes,
        }))
    }
}

async fn write_parquet(schema: &Schema, batch: &RecordBatch, path: &std::path::Path) -> Result<()> {
    let file = tokio::fs::File::create(path).await?;
    let props = WriterProperties::builder()
        .set_max_row_group_size(ROW_GROUP_LEN)
        .build();
    let mut writer = AsyncArrowWriter::try_new(file, Arc::new(schema.clone()), Some(props))
        .map_err(|e| IngestError::StorageIo(format!("opening parquet writer: {e}")))?;
    writer
        .write(batch)
        .await
        .map_err(|e| IngestError::StorageIo(format!("writing parquet batch: {e}")))?;
    writer
        .close()
        .await
        .map_err(|e| IngestError::StorageIo(format!("closing parquet writer: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gigapi_store::RawBatch;
    use gigapi_types::ColumnData;

    fn service(dir: &std::path::Path) -> SaveService {
        let data = BlobStore::connect(&format!("file://{}", dir.display())).unwrap();
        SaveService::new(data, true, dir.to_path_buf(), String::new())
    }

    /// Flush atomicity (§8): the file only ever appears under `data/`, named
    /// `<uuid>.1.parquet`, and is absent from `tmp/` once `save` returns.
    #[tokio::test]
    async fn save_writes_an_iteration_one_file_and_commits_it_into_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let mut store = DataStore::new();
        let mut batch: RawBatch = RawBatch::new();
        batch.insert("value".to_string(), ColumnData::Float64(vec![1.0, 2.0, 3.0]));
        store.append_batch(batch).unwrap();

        let saved = svc.save(&store).await.unwrap().expect("non-empty store produces a file");
        assert!(saved.relative_path.ends_with(".1.parquet"));
        assert!(saved.relative_path.starts_with("data/"));
        assert!(saved.size_bytes > 0);

        let file_name = saved.relative_path.strip_prefix("data/").unwrap();
        assert!(dir.path().join("data").join(file_name).exists());
        assert!(!dir.path().join("tmp").join(file_name).exists());
    }

    #[tokio::test]
    async fn save_of_an_empty_store_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let store = DataStore::new();
        assert!(svc.save(&store).await.unwrap().is_none());
    }
}
