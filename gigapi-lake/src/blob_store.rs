use std::sync::Arc;

use gigapi_types::Result;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;

/// Thin wrapper around an `object_store::ObjectStore`, uniform across local
/// filesystem and S3-compatible backends: the table root resolves to a
/// concrete store plus a root path once, at table-creation time, and every
/// partition underneath addresses files relative to that root.
#[derive(Clone)]
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
    root: StorePath,
}

impl BlobStore {
    pub fn new(store: Arc<dyn ObjectStore>, root: StorePath) -> BlobStore {
        BlobStore { store, root }
    }

    /// Parses a table root URL (`file:///...` or `s3://bucket/prefix?...`)
    /// into a concrete store. `AllowSaveToHD=false` tables should reject a
    /// non-`s3://` root before calling this (§6 configuration table).
    pub fn connect(root_url: &str) -> Result<BlobStore> {
        let url = url::Url::parse(root_url)
            .or_else(|_| url::Url::from_file_path(root_url).map_err(|_| url::ParseError::RelativeUrlWithoutBase))
            .map_err(|_| gigapi_types::IngestError::Fatal(format!("invalid table root `{root_url}`")))?;
        let (store, root) = object_store::parse_url(&url)
            .map_err(|e| gigapi_types::IngestError::Fatal(format!("parsing table root `{root_url}`: {e}")))?;
        Ok(BlobStore::new(Arc::from(store), root))
    }

    pub fn path(&self, relative: &str) -> StorePath {
        StorePath::from(format!("{}/{relative}", self.root))
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Renames `from` to `to` (both relative to the table root). The commit
    /// point for a flush or merge.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.store.rename(&self.path(from), &self.path(to)).await?;
        Ok(())
    }

    pub async fn put_bytes(&self, relative: &str, bytes: bytes::Bytes) -> Result<()> {
        self.store.put(&self.path(relative), bytes.into()).await?;
        Ok(())
    }

    pub async fn delete(&self, relative: &str) -> Result<()> {
        match self.store.delete(&self.path(relative)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn size(&self, relative: &str) -> Result<i64> {
        let meta = self.store.head(&self.path(relative)).await?;
        Ok(meta.size as i64)
    }

    /// Lists the names (relative to `prefix`) of every object under
    /// `prefix`. Partition `data/` directories are flat, so this never
    /// needs to distinguish a direct child from a deeper one.
    pub async fn list_names(&self, prefix: &str) -> Result<Vec<(String, i64)>> {
        use futures::TryStreamExt;
        let full_prefix = self.path(prefix);
        let mut stream = self.store.list(Some(&full_prefix));
        let mut out = Vec::new();
        while let Some(meta) = stream.try_next().await? {
            if let Some(name) = meta.location.filename() {
                out.push((name.to_string(), meta.size as i64));
            }
        }
        Ok(out)
    }
}
