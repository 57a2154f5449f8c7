use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gigapi_store::RawBatch;
use gigapi_types::Result;
use tokio::sync::{oneshot, Mutex};

use crate::blob_store::BlobStore;
use crate::merge_engine::MergeEnginePool;
use crate::promise::Promise;
use crate::table_descriptor::TableDescriptor;
use crate::table_service::TableService;

/// The subset of `config.*` keys (§6) that shape registry and table
/// behavior. Built by `gigapi-config` from the TOML/env layer.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Filesystem root for all tables; also where every table's
    /// `metadata.json` and `tmp/` scratch space live, even for tables whose
    /// data root is `s3://...` (see DESIGN.md).
    pub root: PathBuf,
    pub merge_timeout_s: f64,
    pub save_timeout_s: f64,
    pub no_merges: bool,
    pub allow_save_to_hd: bool,
}

/// Process-wide `(db, table) → TableService` map, lazy auto-creation on
/// first `store`, and the global periodic-merge scheduler.
pub struct Registry {
    config: RegistryConfig,
    engine_pool: Arc<MergeEnginePool>,
    tables: Mutex<HashMap<(String, String), Arc<TableService>>>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Arc<Registry> {
        Arc::new(Registry {
            config,
            engine_pool: MergeEnginePool::new(),
            tables: Mutex::new(HashMap::new()),
        })
    }

    fn local_root_for(&self, db: &str, table: &str) -> PathBuf {
        self.config.root.join(db).join(table)
    }

    /// Registers a table with an explicit descriptor, e.g. from a
    /// `/gigapi/create` YAML body. Fails fast if `AllowSaveToHD=false` and
    /// the descriptor's root is not `s3://...`.
    pub async fn create_table(self: &Arc<Self>, descriptor: TableDescriptor) -> Result<()> {
        TableDescriptor::validate_name(&descriptor.name)?;
        if !self.config.allow_save_to_hd && !descriptor.root.starts_with("s3://") {
            return Err(gigapi_types::IngestError::Fatal(
                "AllowSaveToHD=false: table root must be an s3:// URL".to_string(),
            ));
        }
        let key = (descriptor.db.clone(), descriptor.name.clone());
        let service = self.build_table_service(&descriptor).await?;
        let mut guard = self.tables.lock().await;
        guard.entry(key).or_insert(service);
        Ok(())
    }

    async fn build_table_service(&self, descriptor: &TableDescriptor) -> Result<Arc<TableService>> {
        let data_is_local = !descriptor.root.starts_with("s3://");
        let data = BlobStore::connect(&descriptor.root)?;
        let local_root = self.local_root_for(&descriptor.db, &descriptor.name);
        tokio::fs::create_dir_all(&local_root)
            .await
            .map_err(|e| gigapi_types::IngestError::Fatal(format!("creating table root: {e}")))?;

        let service = Arc::new(TableService::new(
            descriptor.clone(),
            data,
            data_is_local,
            local_root,
            Arc::clone(&self.engine_pool),
            self.config.merge_timeout_s,
        ));
        self.spawn_flush_ticker(Arc::clone(&service));
        Ok(service)
    }

    fn spawn_flush_ticker(&self, service: Arc<TableService>) {
        let period = Duration::from_secs_f64(self.config.save_timeout_s.max(0.01));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.flush().await;
            }
        });
    }

    async fn get_or_create(self: &Arc<Self>, db: &str, table: &str) -> Result<Arc<TableService>> {
        {
            let guard = self.tables.lock().await;
            if let Some(service) = guard.get(&(db.to_string(), table.to_string())) {
                return Ok(Arc::clone(service));
            }
        }
        TableDescriptor::validate_name(table)?;
        let descriptor = TableDescriptor::simple(db, table, &self.config.root.display().to_string());
        let service = self.build_table_service(&descriptor).await?;

        let mut guard = self.tables.lock().await;
        let entry = guard
            .entry((db.to_string(), table.to_string()))
            .or_insert(service);
        Ok(Arc::clone(entry))
    }

    /// Lazily creates the table's default simple descriptor on first call,
    /// then forwards `columns` to its `store`.
    pub async fn store(self: &Arc<Self>, db: &str, table: &str, columns: RawBatch) -> Result<Promise> {
        let service = self.get_or_create(db, table).await?;
        Ok(service.store(columns).await)
    }

    /// Runs the global 10s merge ticker until `stop` resolves. No-ops
    /// entirely when `NoMerges` is set.
    pub async fn run(self: Arc<Self>, mut stop: oneshot::Receiver<()>) {
        if self.config.no_merges {
            let _ = stop.await;
            return;
        }
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let tables: Vec<Arc<TableService>> = self.tables.lock().await.values().cloned().collect();
                    for table in tables {
                        if let Err(e) = table.do_merge().await {
                            log::warn!(
                                "merge failed for table `{}`: {e}",
                                table.descriptor().name
                            );
                        }
                    }
                }
                _ = &mut stop => break,
            }
        }
    }
}
