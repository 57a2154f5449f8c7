use gigapi_types::{IngestError, Result};
use tokio::sync::oneshot;

/// A one-shot future carrying `Result<i32, IngestError>`, the row count (or
/// 0) written by a store/merge operation.
pub type Promise = oneshot::Receiver<Result<i32>>;

/// A pre-fulfilled promise, used when a call is a no-op (nothing to do) or
/// fails synchronously before any async work starts.
pub fn fulfilled(value: Result<i32>) -> Promise {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(value);
    rx
}

pub fn pending() -> (oneshot::Sender<Result<i32>>, Promise) {
    oneshot::channel()
}

/// Fulfills when every sub-promise fulfills with success, summing their row
/// counts; fails on the first error encountered while walking the promises
/// in submission order.
pub async fn wait_for_all(promises: Vec<Promise>) -> Result<i32> {
    let mut total = 0;
    for promise in promises {
        match promise.await {
            Ok(Ok(n)) => total += n,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(IngestError::Fatal("promise sender dropped".to_string())),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_all_sums_row_counts_on_success() {
        let result = wait_for_all(vec![fulfilled(Ok(3)), fulfilled(Ok(4))]).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn wait_for_all_fails_on_first_error() {
        let result = wait_for_all(vec![
            fulfilled(Ok(3)),
            fulfilled(Err(IngestError::InvalidData("bad".to_string()))),
        ])
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_batch_resolves_immediately() {
        assert_eq!(wait_for_all(vec![]).await.unwrap(), 0);
    }
}
