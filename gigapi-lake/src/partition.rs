use std::sync::Arc;
use std::time::Instant;

use gigapi_index::{JsonIndex, NewIndexEntry};
use gigapi_store::{DataStore, RawBatch};
use gigapi_types::{IngestError, Result, Scalar};
use tokio::sync::{oneshot, Mutex};

use crate::merge_service::{MergeService, PlanMerge};
use crate::promise::{self, Promise};
use crate::save_service::SaveService;

/// The four merge iteration levels (1-indexed in file names, 0-indexed
/// here): `(timeout_s, max_result_bytes)`, scaled by `config.MergeTimeoutS`.
pub const MERGE_LEVELS: usize = 4;

pub fn merge_level_config(merge_timeout_s: f64) -> [(f64, i64); MERGE_LEVELS] {
    [
        (merge_timeout_s, 100 * 1024 * 1024),
        (10.0 * merge_timeout_s, 400 * 1024 * 1024),
        (100.0 * merge_timeout_s, 4000 * 1024 * 1024),
        (420.0 * merge_timeout_s, 4000 * 1024 * 1024),
    ]
}

struct State {
    store: DataStore,
    promises: Vec<oneshot::Sender<Result<i32>>>,
}

/// One partition: an active in-memory data store, pending promises, a JSON
/// index, and per-level merge scheduling state. Identified by an ordered
/// `(key, value)` tuple (e.g. `date=2025-01-02, hour=15`).
pub struct Partition {
    pub values: Vec<(String, String)>,
    state: Mutex<State>,
    pub index: Arc<JsonIndex>,
    save: SaveService,
    merge: MergeService,
    sort_key: String,
    last_iteration_time: Mutex<[Instant; MERGE_LEVELS]>,
    /// Held for the lifetime of the partition; dropping it stops the
    /// index's background writer loop.
    _index_writer_stop: oneshot::Sender<()>,
}

impl Partition {
    pub async fn open(
        values: Vec<(String, String)>,
        table_name: &str,
        sort_key: &str,
        save: SaveService,
        merge: MergeService,
    ) -> Result<Partition> {
        let index = JsonIndex::open(save.local_index_dir(), table_name).await?;
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(&index).run(stop_rx));
        let now = Instant::now();
        Ok(Partition {
            values,
            state: Mutex::new(State {
                store: DataStore::new(),
                promises: Vec::new(),
            }),
            index,
            save,
            merge,
            sort_key: sort_key.to_string(),
            last_iteration_time: Mutex::new([now; MERGE_LEVELS]),
            _index_writer_stop: stop_tx,
        })
    }

    /// Appends the rows selected by `mask` from `batch` to the active
    /// store, registers a pending promise.
    pub async fn store_by_mask(&self, batch: &RawBatch, mask: &[u8]) -> Promise {
        let mut guard = self.state.lock().await;
        if let Err(e) = guard.store.append_by_mask(batch, mask) {
            return promise::fulfilled(Err(e));
        }
        let (tx, rx) = promise::pending();
        guard.promises.push(tx);
        rx
    }

    pub async fn size(&self) -> i64 {
        self.state.lock().await.store.get_size()
    }

    /// Atomic flush: swap out the active store and promise list, hand the
    /// store to the save service, record the resulting index entry,
    /// fulfill every swapped promise.
    pub async fn save(&self) {
        let (store, promises) = {
            let mut guard = self.state.lock().await;
            if guard.promises.is_empty() {
                return;
            }
            let store = std::mem::take(&mut guard.store);
            let promises = std::mem::take(&mut guard.promises);
            (store, promises)
        };

        let result = self.flush_store(store).await;
        let row_count = match &result {
            Ok(n) => *n,
            Err(_) => 0,
        };
        for tx in promises {
            let _ = tx.send(result.clone().map(|_| row_count));
        }
    }

    async fn flush_store(&self, store: DataStore) -> Result<i32> {
        if store.is_empty() {
            return Ok(0);
        }
        let row_count = store.get_size();
        let min_max = store.min_max_of(&self.sort_key);
        let chunk_time_ns = now_ns();

        let saved = self.save.save(&store).await?;
        let Some(saved) = saved else {
            return Ok(0);
        };

        let (min_time, max_time) = match min_max {
            Some((Scalar::Int64(min), Scalar::Int64(max))) => (min, max),
            Some(_) | None => (0, 0),
        };

        self.index
            .batch(
                vec![NewIndexEntry {
                    path: saved.relative_path,
                    size_bytes: saved.size_bytes,
                    row_count,
                    chunk_time: chunk_time_ns,
                    min_time,
                    max_time,
                }],
                vec![],
            )
            .await
            .await
            .map_err(|_| IngestError::IndexPersistError("index writer dropped".to_string()))??;

        Ok(row_count as i32)
    }

    /// Evaluates every merge level whose timeout has elapsed since it last
    /// ran, building merge plans from the on-disk candidates at that level.
    pub async fn plan_merge(&self, merge_timeout_s: f64) -> Result<Vec<PlanMerge>> {
        let levels = merge_level_config(merge_timeout_s);
        let mut last = self.last_iteration_time.lock().await;
        let mut plans = Vec::new();
        for (level_idx, (timeout_s, max_bytes)) in levels.iter().enumerate() {
            if last[level_idx].elapsed().as_secs_f64() <= *timeout_s {
                continue;
            }
            let iteration = level_idx + 1;
            let candidates = self.merge.candidates(&self.index, iteration).await?;
            plans.extend(self.merge.plan(&candidates, *max_bytes, iteration));
            last[level_idx] = Instant::now();
        }
        Ok(plans)
    }

    pub async fn do_merge(&self, plans: Vec<PlanMerge>) -> Result<()> {
        self.merge.execute(&self.index, plans).await
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
