use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gigapi_types::{IngestError, Result};
use tokio::sync::{oneshot, Mutex, Notify};

use crate::entry::{IndexDocument, IndexEntry, NewIndexEntry};

const METADATA_FILE: &str = "metadata.json";
const METADATA_BAK_FILE: &str = "metadata.json.bak";

struct Inner {
    entries: HashMap<String, IndexEntry>,
    drop_queue: Vec<String>,
    last_id: u32,
    parquet_size_bytes: i64,
    row_count: i64,
    min_time: i64,
    max_time: i64,
    pending: Vec<oneshot::Sender<Result<i32>>>,
}

impl Inner {
    fn add(&mut self, entries: Vec<IndexEntry>) {
        for entry in entries {
            self.row_count += entry.row_count;
            self.parquet_size_bytes += entry.size_bytes;
            let is_first = self.entries.is_empty();
            self.entries.insert(entry.path.clone(), entry.clone());
            if is_first {
                self.min_time = entry.min_time;
                self.max_time = entry.max_time;
                continue;
            }
            if entry.min_time != 0 {
                self.min_time = self.min_time.min(entry.min_time);
            }
            if entry.max_time != 0 {
                self.max_time = self.max_time.max(entry.max_time);
            }
        }
    }

    /// Removes `paths` from the index, recomputing `min_time`/`max_time`
    /// by full rescan whenever an extremal entry is removed. Returns
    /// whether anything was actually removed.
    fn remove(&mut self, paths: &[String]) -> bool {
        let mut removed_any = false;
        for path in paths {
            let Some(removed) = self.entries.remove(path) else {
                continue;
            };
            removed_any = true;
            self.row_count -= removed.row_count;
            self.parquet_size_bytes -= removed.size_bytes;
            if removed.min_time == self.min_time {
                self.recalc_min();
            }
            if removed.max_time == self.max_time {
                self.recalc_max();
            }
        }
        removed_any
    }

    fn recalc_min(&mut self) {
        self.min_time = self.entries.values().map(|e| e.min_time).min().unwrap_or(0);
    }

    fn recalc_max(&mut self) {
        self.max_time = self.entries.values().map(|e| e.max_time).max().unwrap_or(0);
    }
}

/// The crash-safe JSON index for one partition directory (`metadata.json`).
///
/// Mutations (`batch`) update the in-memory map under a lock and wake the
/// background writer; the writer always serializes the latest snapshot, so
/// concurrent batches while a write is in flight are coalesced into the
/// next write rather than queued individually.
pub struct JsonIndex {
    dir: PathBuf,
    table_name: String,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl JsonIndex {
    /// Loads `metadata.json` from `dir` if present, otherwise starts empty.
    pub async fn open(dir: impl Into<PathBuf>, table_name: impl Into<String>) -> Result<Arc<JsonIndex>> {
        let dir = dir.into();
        let table_name = table_name.into();
        let path = dir.join(METADATA_FILE);

        let (entries, drop_queue, last_id, parquet_size_bytes, row_count, min_time, max_time) =
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let doc: IndexDocument = serde_json::from_slice(&bytes)
                        .map_err(|e| IngestError::IndexPersistError(format!("parsing {}: {e}", path.display())))?;
                    let last_id = doc.files.iter().map(|e| e.id).max().unwrap_or(0);
                    let entries = doc.files.into_iter().map(|e| (e.path.clone(), e)).collect();
                    (
                        entries,
                        doc.drop_queue,
                        last_id,
                        doc.parquet_size_bytes,
                        doc.row_count,
                        doc.min_time,
                        doc.max_time,
                    )
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    (HashMap::new(), Vec::new(), 0, 0, 0, 0, 0)
                }
                Err(e) => return Err(e.into()),
            };

        Ok(Arc::new(JsonIndex {
            dir,
            table_name,
            inner: Mutex::new(Inner {
                entries,
                drop_queue,
                last_id,
                parquet_size_bytes,
                row_count,
                min_time,
                max_time,
                pending: Vec::new(),
            }),
            notify: Notify::new(),
        }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Looks up a single file entry by path.
    pub async fn get(&self, path: &str) -> Option<IndexEntry> {
        self.inner.lock().await.entries.get(path).cloned()
    }

    pub async fn row_count(&self) -> i64 {
        self.inner.lock().await.row_count
    }

    pub async fn parquet_size_bytes(&self) -> i64 {
        self.inner.lock().await.parquet_size_bytes
    }

    pub async fn files(&self) -> Vec<IndexEntry> {
        self.inner.lock().await.entries.values().cloned().collect()
    }

    /// Adds `add` and removes `remove`, returning a future that resolves
    /// once the resulting state has been durably written. A batch with no
    /// real change (nothing added, nothing actually present to remove)
    /// resolves immediately without touching disk.
    pub async fn batch(&self, add: Vec<NewIndexEntry>, remove: Vec<String>) -> oneshot::Receiver<Result<i32>> {
        let mut guard = self.inner.lock().await;

        let added: Vec<IndexEntry> = add
            .into_iter()
            .map(|e| {
                guard.last_id += 1;
                e.into_entry(guard.last_id)
            })
            .collect();
        let added_count = added.len();
        guard.add(added);
        let removed_any = guard.remove(&remove);

        let (tx, rx) = oneshot::channel();
        if added_count == 0 && !removed_any {
            let _ = tx.send(Ok(0));
            return rx;
        }
        guard.pending.push(tx);
        drop(guard);
        self.notify.notify_one();
        rx
    }

    /// Appends `paths` to the drop queue (pending unlink by a background
    /// worker outside this crate) and signals a write.
    pub async fn enqueue_drop(&self, paths: Vec<String>) -> oneshot::Receiver<Result<i32>> {
        let mut guard = self.inner.lock().await;
        if paths.is_empty() {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Ok(0));
            return rx;
        }
        guard.drop_queue.extend(paths);
        let (tx, rx) = oneshot::channel();
        guard.pending.push(tx);
        drop(guard);
        self.notify.notify_one();
        rx
    }

    pub async fn drop_queue(&self) -> Vec<String> {
        self.inner.lock().await.drop_queue.clone()
    }

    pub async fn clear_dropped(&self, paths: &[String]) {
        let mut guard = self.inner.lock().await;
        guard.drop_queue.retain(|p| !paths.contains(p));
    }

    /// Runs the background writer loop until `stop` resolves. One
    /// [`JsonIndex::open`]ed index should have exactly one of these
    /// running, spawned with `tokio::spawn`.
    pub async fn run(self: Arc<Self>, mut stop: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = self.notify.notified() => self.flush().await,
                _ = &mut stop => return,
            }
        }
    }

    async fn flush(&self) {
        let (doc, pending) = {
            let mut guard = self.inner.lock().await;
            let pending = std::mem::take(&mut guard.pending);
            let mut files: Vec<IndexEntry> = guard.entries.values().cloned().collect();
            files.sort_by_key(|e| e.id);
            let doc = IndexDocument {
                table_name: self.table_name.clone(),
                parquet_size_bytes: guard.parquet_size_bytes,
                row_count: guard.row_count,
                min_time: guard.min_time,
                max_time: guard.max_time,
                wal_sequence: 0,
                drop_queue: guard.drop_queue.clone(),
                files,
            };
            (doc, pending)
        };

        let result = self.write_document(&doc).await;
        for tx in pending {
            let _ = tx.send(result.clone().map(|_| doc.files.len() as i32));
        }
    }

    async fn write_document(&self, doc: &IndexDocument) -> Result<()> {
        let bak_path = self.dir.join(METADATA_BAK_FILE);
        let final_path = self.dir.join(METADATA_FILE);

        let bytes = serde_json::to_vec(doc)
            .map_err(|e| IngestError::IndexPersistError(format!("serializing index: {e}")))?;
        tokio::fs::write(&bak_path, bytes).await?;
        tokio::fs::rename(&bak_path, &final_path).await?;
        Ok(())
    }
}
