use gigapi_index::{JsonIndex, NewIndexEntry};
use tempfile::TempDir;

fn entry(path: &str, rows: i64, bytes: i64, min_t: i64, max_t: i64) -> NewIndexEntry {
    NewIndexEntry {
        path: path.to_string(),
        size_bytes: bytes,
        row_count: rows,
        chunk_time: min_t,
        min_time: min_t,
        max_time: max_t,
    }
}

#[tokio::test]
async fn batch_add_persists_metadata_json_with_correct_aggregates() {
    let dir = TempDir::new().unwrap();
    let index = JsonIndex::open(dir.path(), "events").await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let runner = tokio::spawn(index.clone().run(stop_rx));

    let rx = index
        .batch(
            vec![
                entry("data/a.parquet", 10, 1000, 100, 200),
                entry("data/b.parquet", 20, 2000, 50, 300),
            ],
            vec![],
        )
        .await;
    rx.await.unwrap().unwrap();

    assert_eq!(index.row_count().await, 30);
    assert_eq!(index.parquet_size_bytes().await, 3000);

    let on_disk = tokio::fs::read_to_string(dir.path().join("metadata.json")).await.unwrap();
    let doc: gigapi_index::IndexDocument = serde_json::from_str(&on_disk).unwrap();
    assert_eq!(doc.table_name, "events");
    assert_eq!(doc.row_count, 30);
    assert_eq!(doc.files.len(), 2);
    assert!(!dir.path().join("metadata.json.bak").exists());

    let _ = stop_tx.send(());
    runner.await.unwrap();
}

#[tokio::test]
async fn removing_the_extremal_entry_triggers_a_full_rescan() {
    let dir = TempDir::new().unwrap();
    let index = JsonIndex::open(dir.path(), "events").await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let runner = tokio::spawn(index.clone().run(stop_rx));

    index
        .batch(
            vec![
                entry("data/a.parquet", 1, 10, 0, 1000),
                entry("data/b.parquet", 1, 10, 0, 500),
            ],
            vec![],
        )
        .await
        .await
        .unwrap()
        .unwrap();

    index
        .batch(vec![], vec!["data/a.parquet".to_string()])
        .await
        .await
        .unwrap()
        .unwrap();

    let files = index.files().await;
    assert_eq!(files.len(), 1);
    let max_after_removal = files.iter().map(|e| e.max_time).max().unwrap();
    assert_eq!(max_after_removal, 500);

    let _ = stop_tx.send(());
    runner.await.unwrap();
}

#[tokio::test]
async fn batch_with_no_real_change_resolves_without_touching_disk() {
    let dir = TempDir::new().unwrap();
    let index = JsonIndex::open(dir.path(), "events").await.unwrap();

    let result = index.batch(vec![], vec!["nonexistent".to_string()]).await.await.unwrap();
    assert_eq!(result.unwrap(), 0);
    assert!(!dir.path().join("metadata.json").exists());
}

#[tokio::test]
async fn reopening_an_index_seeds_the_next_id_from_the_largest_seen() {
    let dir = TempDir::new().unwrap();
    {
        let index = JsonIndex::open(dir.path(), "events").await.unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        let runner = tokio::spawn(index.clone().run(stop_rx));
        index
            .batch(vec![entry("data/a.parquet", 1, 10, 0, 100)], vec![])
            .await
            .await
            .unwrap()
            .unwrap();
        let _ = stop_tx.send(());
        runner.await.unwrap();
    }

    let reopened = JsonIndex::open(dir.path(), "events").await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let runner = tokio::spawn(reopened.clone().run(stop_rx));
    reopened
        .batch(vec![entry("data/b.parquet", 1, 10, 0, 200)], vec![])
        .await
        .await
        .unwrap()
        .unwrap();

    let files = reopened.files().await;
    let ids: Vec<u32> = {
        let mut ids: Vec<u32> = files.iter().map(|e| e.id).collect();
        ids.sort();
        ids
    };
    assert_eq!(ids, vec![1, 2]);

    let _ = stop_tx.send(());
    runner.await.unwrap();
}

#[tokio::test]
async fn enqueue_drop_persists_the_drop_queue() {
    let dir = TempDir::new().unwrap();
    let index = JsonIndex::open(dir.path(), "events").await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let runner = tokio::spawn(index.clone().run(stop_rx));

    index
        .enqueue_drop(vec!["data/old.parquet".to_string()])
        .await
        .await
        .unwrap()
        .unwrap();
    assert_eq!(index.drop_queue().await, vec!["data/old.parquet".to_string()]);

    index.clear_dropped(&["data/old.parquet".to_string()]).await;
    assert!(index.drop_queue().await.is_empty());

    let _ = stop_tx.send(());
    runner.await.unwrap();
}
