use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gigapi_index::{JsonIndex, NewIndexEntry};
use gigapi_types::{IngestError, Result};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::merge_engine::MergeEnginePool;

/// Deletion of superseded files is delayed so in-flight readers finish.
const POST_MERGE_DELETE_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct FileDesc {
    pub name: String,
    pub size: i64,
}

/// `(from: [path], to: name, iteration)`. `to` is a fresh UUID with suffix
/// `.<iteration+1>.parquet`.
#[derive(Debug, Clone)]
pub struct PlanMerge {
    pub from: Vec<String>,
    pub to: String,
    pub iteration: usize,
}

/// Lists merge candidates, builds merge plans, and executes them against
/// the pooled external engine. One instance per partition, sharing a
/// process-wide semaphore and engine pool with every other partition.
pub struct MergeService {
    data: BlobStore,
    data_is_local: bool,
    local_root: PathBuf,
    partition_rel: String,
    sort_key_csv: String,
    engine_pool: Arc<MergeEnginePool>,
    semaphore: Arc<Semaphore>,
}

impl MergeService {
    pub fn new(
        data: BlobStore,
        data_is_local: bool,
        local_root: PathBuf,
        partition_rel: String,
        sort_key_csv: String,
        engine_pool: Arc<MergeEnginePool>,
        semaphore: Arc<Semaphore>,
    ) -> MergeService {
        MergeService {
            data,
            data_is_local,
            local_root,
            partition_rel,
            sort_key_csv,
            engine_pool,
            semaphore,
        }
    }

    fn data_relative(&self, file_name: &str) -> String {
        if self.partition_rel.is_empty() {
            format!("data/{file_name}")
        } else {
            format!("{}/data/{file_name}", self.partition_rel)
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.local_root.join("data")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.local_root.join("tmp")
    }

    /// Files in the data directory named `*.{iteration}.parquet`, filtered
    /// to those still present in the JSON index, sorted by size
    /// descending.
    pub async fn candidates(&self, index: &JsonIndex, iteration: usize) -> Result<Vec<FileDesc>> {
        let suffix = format!(".{iteration}.parquet");
        let prefix = self.data_relative("");
        let prefix = prefix.trim_end_matches('/');
        let listed = self.data.list_names(prefix).await?;

        let mut out = Vec::new();
        for (name, size) in listed {
            if !name.ends_with(&suffix) {
                continue;
            }
            if index.get(&self.data_relative(&name)).await.is_none() {
                continue;
            }
            out.push(FileDesc { name, size });
        }
        out.sort_by(|a, b| b.size.cmp(&a.size));
        Ok(out)
    }

    /// Cumulative-then-split planning: walk `candidates`, accumulating
    /// bytes into the current plan; close it (and start a fresh one) when
    /// cumulative bytes exceed `max_bytes` or the plan reaches 10 files.
    pub fn plan(&self, candidates: &[FileDesc], max_bytes: i64, iteration: usize) -> Vec<PlanMerge> {
        let mut plans = Vec::new();
        let mut merge_size = 0i64;
        let mut current = PlanMerge {
            from: Vec::new(),
            to: format!("{}.{}.parquet", Uuid::new_v4(), iteration + 1),
            iteration,
        };
        for file in candidates {
            merge_size += file.size;
            current.from.push(file.name.clone());
            if merge_size > max_bytes || current.from.len() == 10 {
                plans.push(current);
                current = PlanMerge {
                    from: Vec::new(),
                    to: format!("{}.{}.parquet", Uuid::new_v4(), iteration + 1),
                    iteration,
                };
                merge_size = 0;
            }
        }
        if !current.from.is_empty() {
            plans.push(current);
        }
        plans
    }

    /// Executes every plan, bounded by the shared weighted semaphore
    /// (limit 10 concurrent merges process-wide).
    pub async fn execute(&self, index: &JsonIndex, plans: Vec<PlanMerge>) -> Result<()> {
        let mut tasks = Vec::with_capacity(plans.len());
        for plan in plans {
            let semaphore = self.semaphore.clone();
            tasks.push(async move {
                let permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| IngestError::Fatal("merge semaphore closed".to_string()))?;
                let result = self.execute_one(index, &plan).await;
                drop(permit);
                result
            });
        }
        futures::future::try_join_all(tasks).await?;
        Ok(())
    }

    async fn execute_one(&self, index: &JsonIndex, plan: &PlanMerge) -> Result<()> {
        if plan.from.len() == 1 {
            return self.execute_rename(index, plan).await;
        }
        self.execute_engine_merge(index, plan).await
    }

    async fn execute_rename(&self, index: &JsonIndex, plan: &PlanMerge) -> Result<()> {
        let source = &plan.from[0];
        let Some(entry) = index.get(&self.data_relative(source)).await else {
            return Ok(());
        };
        self.data
            .rename(&self.data_relative(source), &self.data_relative(&plan.to))
            .await?;

        index
            .batch(
                vec![NewIndexEntry {
                    path: self.data_relative(&plan.to),
                    size_bytes: entry.size_bytes,
                    row_count: entry.row_count,
                    chunk_time: entry.chunk_time,
                    min_time: entry.min_time,
                    max_time: entry.max_time,
                }],
                vec![self.data_relative(source)],
            )
            .await
            .await
            .map_err(|_| IngestError::IndexPersistError("index writer dropped".to_string()))??;
        Ok(())
    }

    async fn execute_engine_merge(&self, index: &JsonIndex, plan: &PlanMerge) -> Result<()> {
        let mut entries = Vec::with_capacity(plan.from.len());
        for name in &plan.from {
            if let Some(entry) = index.get(&self.data_relative(name)).await {
                entries.push(entry);
            }
        }
        if entries.is_empty() {
            return Ok(());
        }

        let from_paths: Vec<String> = plan
            .from
            .iter()
            .map(|name| self.absolute_source_path(name))
            .collect();
        let tmp_path = self.tmp_dir().join(&plan.to);
        let sql = format!(
            "COPY (SELECT * FROM read_parquet_mergetree(ARRAY['{}'], '{}')) TO '{}' (FORMAT 'parquet')",
            from_paths.join("','"),
            self.sort_key_csv,
            tmp_path.display(),
        );

        let mut handle = self.engine_pool.checkout().await;
        if let Err(e) = handle.execute(&sql).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        drop(handle);

        if self.data_is_local {
            tokio::fs::rename(&tmp_path, self.data_dir().join(&plan.to)).await?;
        } else {
            let bytes = tokio::fs::read(&tmp_path).await?;
            self.data.put_bytes(&self.data_relative(&plan.to), bytes.into()).await?;
            tokio::fs::remove_file(&tmp_path).await?;
        }

        let size_bytes = self.data.size(&self.data_relative(&plan.to)).await.unwrap_or(0);
        let row_count: i64 = entries.iter().map(|e| e.row_count).sum();
        let min_time = entries.iter().map(|e| e.min_time).min().unwrap_or(0);
        let max_time = entries.iter().map(|e| e.max_time).max().unwrap_or(0);
        let chunk_time = entries.iter().map(|e| e.chunk_time).min().unwrap_or(0);

        index
            .batch(
                vec![NewIndexEntry {
                    path: self.data_relative(&plan.to),
                    size_bytes,
                    row_count,
                    chunk_time,
                    min_time,
                    max_time,
                }],
                plan.from.iter().map(|name| self.data_relative(name)).collect(),
            )
            .await
            .await
            .map_err(|_| IngestError::IndexPersistError("index writer dropped".to_string()))??;

        self.schedule_delayed_delete(plan.from.clone());
        Ok(())
    }

    fn absolute_source_path(&self, name: &str) -> String {
        if self.data_is_local {
            self.data_dir().join(name).display().to_string()
        } else {
            self.data.path(&self.data_relative(name)).to_string()
        }
    }

    /// Schedules unlink of superseded files 30s later; failures are logged
    /// and ignored, matching the spec's propagation policy for this one
    /// case.
    fn schedule_delayed_delete(&self, names: Vec<String>) {
        let data = self.data.clone();
        let relatives: Vec<String> = names.iter().map(|n| self.data_relative(n)).collect();
        tokio::spawn(async move {
            tokio::time::sleep(POST_MERGE_DELETE_DELAY).await;
            for relative in relatives {
                if let Err(e) = data.delete(&relative).await {
                    log::warn!("failed to delete superseded file {relative}: {e}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Semaphore;

    fn service(dir: &std::path::Path) -> MergeService {
        let data = BlobStore::connect(&format!("file://{}", dir.display())).unwrap();
        MergeService::new(
            data,
            true,
            dir.to_path_buf(),
            String::new(),
            "__timestamp".to_string(),
            MergeEnginePool::new(),
            Arc::new(Semaphore::new(10)),
        )
    }

    fn files(sizes: &[i64]) -> Vec<FileDesc> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| FileDesc { name: format!("{i}.1.parquet"), size })
            .collect()
    }

    /// Cumulative-then-split planning (§4.6/§8 S6): every candidate lands in
    /// exactly one plan, and a plan is closed as soon as its running total
    /// exceeds the level's byte budget.
    #[test]
    fn plan_covers_every_candidate_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let mib = 1024 * 1024;
        let candidates = files(&[150 * mib, 140 * mib, 90 * mib, 80 * mib, 10 * mib]);
        let plans = svc.plan(&candidates, 200 * mib, 1);

        let total_files: usize = plans.iter().map(|p| p.from.len()).sum();
        assert_eq!(total_files, candidates.len());
        for plan in &plans {
            assert!(!plan.from.is_empty());
        }
    }

    #[test]
    fn plan_closes_once_budget_is_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let mib = 1024 * 1024;
        let candidates = files(&[150 * mib, 140 * mib]);
        let plans = svc.plan(&candidates, 200 * mib, 1);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].from, vec!["0.1.parquet".to_string(), "1.1.parquet".to_string()]);
    }

    #[test]
    fn plan_closes_at_ten_files_even_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let candidates = files(&[1; 12]);
        let plans = svc.plan(&candidates, i64::MAX, 1);
        assert_eq!(plans[0].from.len(), 10);
        assert_eq!(plans[1].from.len(), 2);
    }

    #[test]
    fn single_file_plan_is_legal() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let candidates = files(&[42]);
        let plans = svc.plan(&candidates, 1024, 1);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].from.len(), 1);
    }
}
