//! Scheduled execution and artifact determinism

use backup_orchestrator::config::CompressionAlgorithm;
use backup_orchestrator::managers::notification::EventKind;
use rstest::rstest;
use serial_test::serial;
use std::time::Duration;
use test_utils::{JobStatus, TestContext};

#[tokio::test]
#[serial(timers)]
async fn test_schedule_tick_completes_a_backup() {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("daily-full", 1);
    strategy.schedule = "@every 1s".to_string();
    strategy.compression = Some(CompressionAlgorithm::Gzip);
    let manager = ctx.manager(vec![strategy]);

    manager.start().unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    manager.shutdown();

    assert!(ctx.sink.count(EventKind::BackupCompleted) >= 1);
    let completed: Vec<_> = manager
        .list_jobs(Some("daily-full"))
        .unwrap()
        .into_iter()
        .filter(|j| j.status == JobStatus::Completed)
        .collect();
    assert!(!completed.is_empty());
    for job in &completed {
        let elapsed = job.finished_at.unwrap() - job.started_at.unwrap();
        assert!(elapsed.to_std().unwrap() < Duration::from_secs(3600));
        assert_eq!(job.compression, Some(CompressionAlgorithm::Gzip));
    }
}

#[tokio::test]
#[serial(timers)]
async fn test_shutdown_stops_ticks() {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("daily-full", 1);
    strategy.schedule = "@every 1s".to_string();
    let manager = ctx.manager(vec![strategy]);

    manager.start().unwrap();
    manager.shutdown();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(ctx.dumper.dump_count(), 0);
}

#[rstest]
#[case::uncompressed(None)]
#[case::gzip(Some(CompressionAlgorithm::Gzip))]
#[tokio::test]
async fn test_unchanged_source_gives_identical_checksums(#[case] compression: Option<CompressionAlgorithm>) {
    let ctx = TestContext::new();
    let mut strategy = ctx.strategy("daily-full", 1);
    strategy.compression = compression;
    let manager = ctx.manager(vec![strategy]);

    let first = manager.run_backup("daily-full").await.unwrap();
    let second = manager.run_backup("daily-full").await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.content_checksum, second.content_checksum);
    assert_eq!(first.checksum, second.checksum);
    assert_eq!(first.size_bytes, second.size_bytes);
}

#[tokio::test]
async fn test_changed_source_changes_checksum() {
    let ctx = TestContext::new();
    let manager = ctx.manager(vec![ctx.strategy("daily-full", 1)]);

    let first = manager.run_backup("daily-full").await.unwrap();
    ctx.dumper.set_content(b"COPY orders FROM stdin;\n2\t17.50\n\\.\n");
    let second = manager.run_backup("daily-full").await.unwrap();

    assert_ne!(first.content_checksum, second.content_checksum);
}
