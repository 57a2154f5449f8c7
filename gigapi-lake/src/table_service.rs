use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use gigapi_store::RawBatch;
use gigapi_types::{ColumnData, Result};
use tokio::sync::{Mutex, Semaphore};

use crate::blob_store::BlobStore;
use crate::merge_engine::MergeEnginePool;
use crate::merge_service::MergeService;
use crate::partition::Partition;
use crate::partition_by::{partition_by_date_hour, partition_hash};
use crate::promise::{self, Promise};
use crate::save_service::SaveService;
use crate::table_descriptor::{Engine, PartitionDesc, TableDescriptor};

/// A partition's in-memory size above which a store triggers an immediate
/// flush rather than waiting for the next tick.
const IMMEDIATE_FLUSH_ROWS: i64 = 1_000_000;

/// Process-wide bound on concurrent merges, shared by every table.
pub const MERGE_CONCURRENCY: usize = 10;

/// Owns one table descriptor and either an implicit single partition
/// (`Engine::Merge`) or a `partition_hash → Partition` map
/// (`Engine::HiveMerge`), plus the flush ticker's trigger state.
pub struct TableService {
    descriptor: TableDescriptor,
    partitions: Mutex<HashMap<u64, Arc<Partition>>>,
    data: BlobStore,
    data_is_local: bool,
    local_root: PathBuf,
    engine_pool: Arc<MergeEnginePool>,
    merge_semaphore: Arc<Semaphore>,
    merge_timeout_s: f64,
}

impl TableService {
    pub fn new(
        descriptor: TableDescriptor,
        data: BlobStore,
        data_is_local: bool,
        local_root: PathBuf,
        engine_pool: Arc<MergeEnginePool>,
        merge_timeout_s: f64,
    ) -> TableService {
        TableService {
            descriptor,
            partitions: Mutex::new(HashMap::new()),
            data,
            data_is_local,
            local_root,
            engine_pool,
            merge_semaphore: Arc::new(Semaphore::new(MERGE_CONCURRENCY)),
            merge_timeout_s,
        }
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    fn partition_rel(values: &[(String, String)]) -> String {
        values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("/")
    }

    async fn partition_for(&self, values: Vec<(String, String)>) -> Result<Arc<Partition>> {
        let hash = partition_hash(&values);
        {
            let guard = self.partitions.lock().await;
            if let Some(p) = guard.get(&hash) {
                return Ok(Arc::clone(p));
            }
        }

        let rel = Self::partition_rel(&values);
        let local_root = if rel.is_empty() {
            self.local_root.clone()
        } else {
            self.local_root.join(&rel)
        };
        let save = SaveService::new(self.data.clone(), self.data_is_local, local_root.clone(), rel.clone());
        let merge = MergeService::new(
            self.data.clone(),
            self.data_is_local,
            local_root,
            rel,
            self.descriptor.order_by.join(","),
            Arc::clone(&self.engine_pool),
            Arc::clone(&self.merge_semaphore),
        );
        let partition = Arc::new(
            Partition::open(values, &self.descriptor.name, self.descriptor.sort_key(), save, merge).await?,
        );

        let mut guard = self.partitions.lock().await;
        let entry = guard.entry(hash).or_insert_with(|| Arc::clone(&partition));
        Ok(Arc::clone(entry))
    }

    fn auto_timestamp(&self, batch: &mut RawBatch) {
        if !self.descriptor.auto_timestamp {
            return;
        }
        let rows = batch.values().next().map(|c| c.len()).unwrap_or(0);
        let now = now_ns();
        batch.insert("__timestamp".to_string(), ColumnData::Int64(vec![now; rows]));
    }

    fn partition_descs(&self, batch: &RawBatch) -> Result<Vec<PartitionDesc>> {
        match self.descriptor.engine {
            Engine::HiveMerge => partition_by_date_hour(batch),
            Engine::Merge => {
                let rows = batch.values().next().map(|c| c.len()).unwrap_or(0);
                let mut mask = vec![0xFFu8; rows / 8];
                let remainder = rows % 8;
                if remainder != 0 {
                    mask.push((1u8 << remainder) - 1);
                }
                Ok(vec![PartitionDesc {
                    values: Vec::new(),
                    index_map: mask,
                }])
            }
        }
    }

    /// `store(columns) → promise` per spec §4.8: inject `__timestamp` if
    /// configured, partition the batch, route each selected-row mask to its
    /// partition, and return a `wait_for_all` promise over the per-partition
    /// promises.
    pub async fn store(&self, mut batch: RawBatch) -> Promise {
        self.auto_timestamp(&mut batch);

        let descs = match self.partition_descs(&batch) {
            Ok(d) => d,
            Err(e) => return promise::fulfilled(Err(e)),
        };

        let mut promises = Vec::with_capacity(descs.len());
        for desc in descs {
            let partition = match self.partition_for(desc.values).await {
                Ok(p) => p,
                Err(e) => return promise::fulfilled(Err(e)),
            };
            promises.push(partition.store_by_mask(&batch, &desc.index_map).await);

            if partition.size().await > IMMEDIATE_FLUSH_ROWS {
                let partition = Arc::clone(&partition);
                tokio::spawn(async move { partition.save().await });
            }
        }

        let (tx, rx) = promise::pending();
        tokio::spawn(async move {
            let _ = tx.send(promise::wait_for_all(promises).await);
        });
        rx
    }

    /// Iterates every partition, planning and executing merges.
    pub async fn do_merge(&self) -> Result<()> {
        let partitions: Vec<Arc<Partition>> = self.partitions.lock().await.values().cloned().collect();
        for partition in partitions {
            let plans = partition.plan_merge(self.merge_timeout_s).await?;
            if !plans.is_empty() {
                partition.do_merge(plans).await?;
            }
        }
        Ok(())
    }

    /// Flushes every partition with pending promises. Called by the
    /// per-table flush ticker.
    pub async fn flush(&self) {
        let partitions: Vec<Arc<Partition>> = self.partitions.lock().await.values().cloned().collect();
        for partition in partitions {
            partition.save().await;
        }
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
