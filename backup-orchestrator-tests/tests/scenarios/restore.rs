//! Restore: verification, fallback across locations and failure modes

use backup_orchestrator::config::CompressionAlgorithm;
use backup_orchestrator::managers::notification::EventKind;
use backup_orchestrator::utils::checksum::sha256_bytes;
use rstest::rstest;
use test_utils::{DrError, RestoreOptions, TestContext};

#[rstest]
#[case::uncompressed(None)]
#[case::gzip(Some(CompressionAlgorithm::Gzip))]
#[case::bzip2(Some(CompressionAlgorithm::Bzip2))]
#[tokio::test]
async fn test_restore_loads_original_content(#[case] compression: Option<CompressionAlgorithm>) {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("orders", 2);
    strategy.compression = compression;
    let manager = ctx.manager(vec![strategy]);

    let job = manager.run_backup("orders").await.unwrap();
    manager.restore(&RestoreOptions::new(&job.id)).await.unwrap();

    let load = ctx.dumper.last_load().expect("load was recorded");
    assert_eq!(sha256_bytes(&load.data), job.content_checksum.clone().unwrap());
    assert_eq!(load.data, b"COPY orders FROM stdin;\n1\t42.00\n\\.\n");
    assert_eq!(ctx.sink.count(EventKind::RestoreCompleted), 1);
}

#[tokio::test]
async fn test_restore_passes_target_and_tables() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 1)]);
    let job = manager.run_backup("orders").await.unwrap();

    let mut options = RestoreOptions::new(&job.id);
    options.target_location = Some("postgres://restore@standby/orders".to_string());
    options.tables = vec!["orders".to_string(), "order_items".to_string()];
    manager.restore(&options).await.unwrap();

    let load = ctx.dumper.last_load().unwrap();
    assert_eq!(load.target.as_deref(), Some("postgres://restore@standby/orders"));
    assert_eq!(load.tables, vec!["orders", "order_items"]);
}

#[tokio::test]
async fn test_restore_falls_back_to_next_location() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 2)]);
    let job = manager.run_backup("orders").await.unwrap();

    ctx.driver.break_get("dest-1");
    manager.restore(&RestoreOptions::new(&job.id)).await.unwrap();

    assert_eq!(ctx.driver.calls_for("get"), vec!["dest-1", "dest-2"]);
    assert!(ctx.dumper.last_load().is_some());
}

#[tokio::test]
async fn test_restore_with_no_readable_copy() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 2)]);
    let job = manager.run_backup("orders").await.unwrap();

    ctx.driver.break_get("dest-1");
    ctx.driver.break_get("dest-2");
    let err = manager.restore(&RestoreOptions::new(&job.id)).await.unwrap_err();

    assert!(matches!(err, DrError::NoAccessibleBackupLocation(ref id) if id == &job.id));
    assert!(ctx.dumper.last_load().is_none());
    assert_eq!(ctx.sink.count(EventKind::RestoreFailed), 1);
}

#[tokio::test]
async fn test_tampered_artifact_is_never_loaded() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 1)]);
    let job = manager.run_backup("orders").await.unwrap();

    std::fs::write(&job.locations[0].uri, b"DROP TABLE orders;").unwrap();
    let err = manager.restore(&RestoreOptions::new(&job.id)).await.unwrap_err();

    assert!(matches!(err, DrError::IntegrityCheckFailed { .. }));
    assert!(ctx.dumper.last_load().is_none());

    // Skipping verification loads whatever is stored
    let mut options = RestoreOptions::new(&job.id);
    options.verify_integrity = false;
    manager.restore(&options).await.unwrap();
    assert_eq!(ctx.dumper.last_load().unwrap().data, b"DROP TABLE orders;");
}

#[tokio::test]
async fn test_restore_of_failed_job_is_not_found() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("orders", 1)]);
    ctx.dumper.fail_dumps("disk full");
    let _ = manager.run_backup("orders").await.unwrap_err();

    let failed = manager.list_jobs(Some("orders")).unwrap().remove(0);
    let err = manager.restore(&RestoreOptions::new(&failed.id)).await.unwrap_err();
    assert!(matches!(err, DrError::BackupNotFound(_)));

    let err = manager.restore(&RestoreOptions::new("no-such-job")).await.unwrap_err();
    assert!(matches!(err, DrError::BackupNotFound(_)));
}
