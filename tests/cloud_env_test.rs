//! End-to-end scenarios for the cloud storage environment, driven through
//! the public facade over the in-memory object store and log stream.

use cloudenv::cloud::{
    BucketOptions, CloudEnv, CloudEnvOptions, CloudOpKind, CloudRequestCallback, CloudStatistics,
    InMemoryLogStream, InMemoryObjectStore, LogStream, ObjectStore, SharedClock, SimulatedClock,
    Ticker,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn temp_db_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "cloudenv-scenario-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn scenario_fresh_writer_dest_only() {
    let store = InMemoryObjectStore::new();
    let puts: Arc<Mutex<Vec<(u64, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&puts);
    let callback: CloudRequestCallback = Arc::new(move |kind, bytes, _micros, ok| {
        if kind == CloudOpKind::Write {
            sink.lock().push((bytes, ok));
        }
    });

    let options = CloudEnvOptions {
        dest_bucket: Some(BucketOptions::new("bucket-b", "p", "r1")),
        cloud_request_callback: Some(callback),
        ..CloudEnvOptions::default()
    };
    let env = CloudEnv::new(options, Arc::new(store.clone()), None)
        .await
        .unwrap();

    let dir = temp_db_dir();
    let local = dir.join("000123.sst");
    let path = local.to_str().unwrap();

    let body = vec![0xABu8; 1024 * 1024];
    let mut file = env.open_for_write(path).await.unwrap();
    file.append(&body).await.unwrap();
    file.close().await.unwrap();

    // Exactly one upload, carrying the full megabyte
    let recorded = puts.lock().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0], (1024 * 1024, true));

    // keep_local_sst_files = false: the local temp is gone
    assert!(!local.exists());
    assert!(store.contains("bucket-b", "p/000123.sst"));

    // Exists via destination fallback, and read-your-writes
    assert!(env.file_exists(path).await.unwrap());
    assert_eq!(env.file_size(path).await.unwrap(), 1024 * 1024);
    let mut read = env.open_for_read(path).await.unwrap();
    assert_eq!(read.read_at(0, 16).await.unwrap(), &body[..16]);
    assert_eq!(read.unique_id(), Some(123));

    env.shutdown().await;
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn scenario_read_only_replica() {
    let store = InMemoryObjectStore::new();
    store.create_bucket("bucket-a", "r1").await.unwrap();
    store
        .put("bucket-a", "q/000123.sst", b"replicated body", None)
        .await
        .unwrap();

    let options = CloudEnvOptions {
        src_bucket: Some(BucketOptions::new("bucket-a", "q", "r1")),
        ..CloudEnvOptions::default()
    };
    let env = CloudEnv::new(options, Arc::new(store), None).await.unwrap();

    // No local copy anywhere near this path
    let dir = temp_db_dir();
    let path = dir.join("000123.sst");
    let path = path.to_str().unwrap();

    assert!(env.file_exists(path).await.unwrap());
    let mut file = env.open_for_read(path).await.unwrap();
    assert_eq!(file.size(), 15);
    assert_eq!(file.read(100).await.unwrap(), b"replicated body");

    env.shutdown().await;
    std::fs::remove_dir_all(std::path::Path::new(path).parent().unwrap()).ok();
}

#[tokio::test]
async fn scenario_manifest_durability_periodicity() {
    let store = InMemoryObjectStore::new();
    let stats = Arc::new(CloudStatistics::new());
    let sim = Arc::new(SimulatedClock::new(0));
    let clock: SharedClock = sim.clone();

    let options = CloudEnvOptions {
        dest_bucket: Some(BucketOptions::new("bucket-m", "p", "r1")),
        manifest_durable_periodicity: Duration::from_millis(60_000),
        cloud_statistics: Some(Arc::clone(&stats)),
        ..CloudEnvOptions::default()
    };
    let env = CloudEnv::with_clock(options, Arc::new(store.clone()), None, clock)
        .await
        .unwrap();

    let dir = temp_db_dir();
    let local = dir.join("MANIFEST-000001");
    let path = local.to_str().unwrap();

    let mut file = env.open_for_write(path).await.unwrap();
    file.append(b"edit-1;").await.unwrap();

    // Sync at t=0 uploads
    file.sync().await.unwrap();
    assert_eq!(stats.ticker_count(Ticker::ManifestWrites), 1);

    // Syncs inside the window do not upload
    sim.advance_millis(30_000);
    file.append(b"edit-2;").await.unwrap();
    file.sync().await.unwrap();
    sim.advance_millis(29_999);
    file.sync().await.unwrap();
    assert_eq!(stats.ticker_count(Ticker::ManifestWrites), 1);

    // Sync at t=60001ms uploads again
    sim.advance_millis(2);
    file.sync().await.unwrap();
    assert_eq!(stats.ticker_count(Ticker::ManifestWrites), 2);

    // Close uploads unconditionally and keeps the local manifest
    file.append(b"edit-3;").await.unwrap();
    file.close().await.unwrap();
    assert_eq!(stats.ticker_count(Ticker::ManifestWrites), 3);
    assert!(local.exists());
    assert!(store.contains("bucket-m", "p/MANIFEST-000001"));

    env.shutdown().await;
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn scenario_deletion_delay() {
    let store = InMemoryObjectStore::new();
    let options = CloudEnvOptions {
        dest_bucket: Some(BucketOptions::new("bucket-d", "p", "r1")),
        file_deletion_delay: Duration::from_millis(150),
        ..CloudEnvOptions::default()
    };
    let env = CloudEnv::new(options, Arc::new(store.clone()), None)
        .await
        .unwrap();

    let dir = temp_db_dir();
    let local = dir.join("000456.sst");
    let path = local.to_str().unwrap();

    let mut file = env.open_for_write(path).await.unwrap();
    file.append(b"doomed").await.unwrap();
    file.close().await.unwrap();
    assert!(store.contains("bucket-d", "p/000456.sst"));

    env.delete_file(path).await.unwrap();

    // The engine no longer sees the file, but the object survives the delay
    // window for in-flight readers
    assert!(!env.file_exists(path).await.unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.contains("bucket-d", "p/000456.sst"));

    // After the window the object is gone
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!store.contains("bucket-d", "p/000456.sst"));

    env.shutdown().await;
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn scenario_log_round_trip_via_stream() {
    let store = InMemoryObjectStore::new();
    let stream = InMemoryLogStream::new(2);
    let shared: Arc<dyn LogStream> = Arc::new(stream.clone());

    let options = CloudEnvOptions {
        dest_bucket: Some(BucketOptions::new("bucket-w", "p", "r1")),
        keep_local_log_files: false,
        manifest_durable_periodicity: Duration::ZERO,
        ..CloudEnvOptions::default()
    };
    let env = CloudEnv::new(options, Arc::new(store), Some(shared))
        .await
        .unwrap();
    assert!(env.status().is_ok());

    let dir = temp_db_dir();
    let local = dir.join("000005.log");
    let path = local.to_str().unwrap();

    // Append A, B, C; delete; append X — the cache must converge to exactly X
    let mut wal = env.open_for_write(path).await.unwrap();
    wal.append(b"A").await.unwrap();
    wal.append(b"B").await.unwrap();
    wal.append(b"C").await.unwrap();
    wal.sync().await.unwrap();
    wal.close().await.unwrap();

    env.delete_file(path).await.unwrap();

    let mut wal = env.open_for_write(path).await.unwrap();
    wal.append(b"X").await.unwrap();
    wal.close().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(mut file) = env.open_for_read(path).await {
            let contents = file.read_at(0, 64).await.unwrap();
            if contents == b"X" {
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "log cache never converged to the post-delete contents"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(env.file_size(path).await.unwrap(), 1);

    // The local WAL never touched its logical path
    assert!(!local.exists());

    env.shutdown().await;
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn scenario_identity_publication() {
    let store = InMemoryObjectStore::new();
    let options = CloudEnvOptions {
        dest_bucket: Some(BucketOptions::new("bucket-i", "db", "r1")),
        ..CloudEnvOptions::default()
    };
    let env = CloudEnv::new(options, Arc::new(store.clone()), None)
        .await
        .unwrap();

    let dir = temp_db_dir();
    let staging = dir.join("IDENTITY.tmp");
    let target = dir.join("IDENTITY");
    std::fs::write(&staging, "d1\n").unwrap();

    env.rename_file(staging.to_str().unwrap(), target.to_str().unwrap())
        .await
        .unwrap();

    // Local rename happened
    assert!(!staging.exists());
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "d1\n");

    // The identity object was uploaded and the registry points the dbid at
    // this env's destination prefix
    assert!(store.contains("bucket-i", "db/IDENTITY"));
    let dirname = env.registry().lookup("bucket-i", "d1").await.unwrap();
    assert_eq!(dirname, "db");

    env.shutdown().await;
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn listing_is_a_union_of_backends() {
    let store = InMemoryObjectStore::new();
    store.create_bucket("bucket-src", "r1").await.unwrap();
    store
        .put("bucket-src", "q/000001.sst", b"x", None)
        .await
        .unwrap();

    let options = CloudEnvOptions {
        src_bucket: Some(BucketOptions::new("bucket-src", "q", "r1")),
        dest_bucket: Some(BucketOptions::new("bucket-dst", "p", "r1")),
        ..CloudEnvOptions::default()
    };
    let env = CloudEnv::new(options, Arc::new(store.clone()), None)
        .await
        .unwrap();

    // One object per backend: src, dest, local
    env.storage()
        .put("bucket-dst", "p/000002.sst", b"y", None)
        .await
        .unwrap();
    let dir = temp_db_dir();
    std::fs::write(dir.join("000003.sst"), b"z").unwrap();

    let mut names = env.get_children(dir.to_str().unwrap()).await.unwrap();
    names.sort();
    names.dedup();
    assert!(names.contains(&"000001.sst".to_string()));
    assert!(names.contains(&"000002.sst".to_string()));
    assert!(names.contains(&"000003.sst".to_string()));

    env.shutdown().await;
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn recreated_file_survives_stale_delete() {
    let store = InMemoryObjectStore::new();
    let options = CloudEnvOptions {
        dest_bucket: Some(BucketOptions::new("bucket-r", "p", "r1")),
        file_deletion_delay: Duration::from_millis(100),
        ..CloudEnvOptions::default()
    };
    let env = CloudEnv::new(options, Arc::new(store.clone()), None)
        .await
        .unwrap();

    let dir = temp_db_dir();
    let local = dir.join("000777.sst");
    let path = local.to_str().unwrap();

    let mut file = env.open_for_write(path).await.unwrap();
    file.append(b"first incarnation").await.unwrap();
    file.close().await.unwrap();

    env.delete_file(path).await.unwrap();

    // Re-create the same name before the delayed delete fires
    let mut file = env.open_for_write(path).await.unwrap();
    file.append(b"second incarnation").await.unwrap();
    file.close().await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let body = env
        .storage()
        .get("bucket-r", "p/000777.sst", None)
        .await
        .unwrap();
    assert_eq!(body, b"second incarnation");

    env.shutdown().await;
    std::fs::remove_dir_all(&dir).ok();
}
