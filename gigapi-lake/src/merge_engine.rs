use std::sync::Arc;
use std::time::{Duration, Instant};

use datafusion::execution::context::SessionContext;
use gigapi_types::{IngestError, Result};
use tokio::sync::Mutex;

const MAX_HANDLE_AGE: Duration = Duration::from_secs(5 * 60);
const MAX_IDLE_HANDLES: usize = 5;

struct PooledHandle {
    ctx: SessionContext,
    created_at: Instant,
}

/// A process-wide pool of handles to the external SQL-capable engine that
/// executes merge statements. Modeled as pooled `datafusion::SessionContext`
/// handles standing in for the spec's "opaque engine" (see DESIGN.md): the
/// merge executor issues it exactly one `COPY (...) TO ...` statement per
/// plan and otherwise never inspects its internals.
///
/// Heuristic pooling per spec §5/§9: a handle is retired once it has lived
/// longer than 5 minutes or the idle count exceeds 5.
pub struct MergeEnginePool {
    idle: Mutex<Vec<PooledHandle>>,
}

impl MergeEnginePool {
    pub fn new() -> Arc<MergeEnginePool> {
        Arc::new(MergeEnginePool { idle: Mutex::new(Vec::new()) })
    }

    pub async fn checkout(self: &Arc<Self>) -> EngineHandle {
        let mut idle = self.idle.lock().await;
        while idle.len() > MAX_IDLE_HANDLES {
            idle.pop();
        }
        let handle = idle
            .pop()
            .filter(|h| h.created_at.elapsed() < MAX_HANDLE_AGE)
            .unwrap_or_else(|| PooledHandle {
                ctx: SessionContext::new(),
                created_at: Instant::now(),
            });
        drop(idle);
        EngineHandle {
            pool: Arc::clone(self),
            handle: Some(handle),
        }
    }

    async fn checkin(&self, handle: PooledHandle) {
        let mut idle = self.idle.lock().await;
        if handle.created_at.elapsed() < MAX_HANDLE_AGE && idle.len() < MAX_IDLE_HANDLES {
            idle.push(handle);
        }
    }
}

/// A checked-out engine handle, returned to the pool on drop.
pub struct EngineHandle {
    pool: Arc<MergeEnginePool>,
    handle: Option<PooledHandle>,
}

impl EngineHandle {
    /// Issues a single statement and discards any returned rows — merge
    /// statements are `COPY ... TO ...`, executed for their file-writing
    /// side effect only.
    pub async fn execute(&mut self, sql: &str) -> Result<()> {
        let ctx = &self.handle.as_ref().expect("handle present until drop").ctx;
        let df = ctx
            .sql(sql)
            .await
            .map_err(|e| IngestError::MergeEngineError(format!("planning `{sql}`: {e}")))?;
        df.collect()
            .await
            .map_err(|e| IngestError::MergeEngineError(format!("executing `{sql}`: {e}")))?;
        Ok(())
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let pool = Arc::clone(&self.pool);
            tokio::spawn(async move {
                pool.checkin(handle).await;
            });
        }
    }
}
