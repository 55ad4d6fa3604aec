//! Trash retention sweeper tests.

mod common;

use common::{TEST_QUOTA, TestServer, test_file, test_folder, test_user};
use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use trove_core::config::Environment;
use trove_metadata::models::FileRow;
use trove_server::lifecycle::sweeper::{run_retention_sweep, spawn_retention_sweeper};
use trove_storage::ObjectStore;

/// Upload a file for a fresh user and move it to the trash 40 days ago.
async fn expired_trash(server: &TestServer) -> FileRow {
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let file = server.upload_completed(&alice, "/", "old.txt", b"old bytes").await;
    server
        .metadata()
        .trash_file(file.file_id, OffsetDateTime::now_utc() - Duration::days(40))
        .await
        .unwrap();
    file
}

#[tokio::test]
async fn test_retention_purges_expired_trash() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let old = server.upload_completed(&alice, "/", "old.txt", b"old bytes").await;
    let recent = server.upload_completed(&alice, "/", "recent.txt", b"recent").await;
    let now = OffsetDateTime::now_utc();
    server
        .metadata()
        .trash_file(old.file_id, now - Duration::days(40))
        .await
        .unwrap();
    server
        .metadata()
        .trash_file(recent.file_id, now - Duration::days(1))
        .await
        .unwrap();

    let report = run_retention_sweep(server.metadata().as_ref(), server.storage.as_ref(), 30, 100)
        .await
        .unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(report.errors, 0);
    assert!(server.file(old.file_id).await.is_none());
    assert!(!server.storage.exists(&old.storage_path).await.unwrap());
    assert!(server.file(recent.file_id).await.is_some());
    assert_eq!(server.user(alice.user_id).await.storage_used, 6);
}

#[tokio::test]
async fn test_retention_keeps_shared_objects() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let first = server.upload_completed(&alice, "/", "a.txt", b"same").await;
    let second = server.upload_completed(&alice, "/", "b.txt", b"same").await;
    assert_eq!(first.storage_path, second.storage_path);

    server
        .metadata()
        .trash_file(first.file_id, OffsetDateTime::now_utc() - Duration::days(40))
        .await
        .unwrap();

    let report = run_retention_sweep(server.metadata().as_ref(), server.storage.as_ref(), 30, 100)
        .await
        .unwrap();

    assert_eq!(report.files, 1);
    assert!(server.storage.exists(&second.storage_path).await.unwrap());
    assert_eq!(server.user(alice.user_id).await.storage_used, 8);
}

#[tokio::test]
async fn test_zero_default_retention_disables_purging() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let file = server.upload_completed(&alice, "/", "a.txt", b"keep").await;
    server
        .metadata()
        .trash_file(file.file_id, OffsetDateTime::now_utc() - Duration::days(400))
        .await
        .unwrap();

    let report = run_retention_sweep(server.metadata().as_ref(), server.storage.as_ref(), 0, 100)
        .await
        .unwrap();

    assert_eq!(report.users, 0);
    assert!(server.file(file.file_id).await.is_some());
}

#[tokio::test]
async fn test_per_user_retention_overrides_default() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let now = OffsetDateTime::now_utc();

    let mut short = test_user("short", TEST_QUOTA);
    short.retention_days = Some(2);
    let mut forever = test_user("forever", TEST_QUOTA);
    forever.retention_days = Some(0);
    metadata.create_user(&short).await.unwrap();
    metadata.create_user(&forever).await.unwrap();

    let short_file = test_file(short.user_id, "/", "a.txt", 3);
    let forever_file = test_file(forever.user_id, "/", "a.txt", 3);
    for file in [&short_file, &forever_file] {
        metadata.create_file(file).await.unwrap();
        assert!(
            metadata
                .try_reserve_quota(file.user_id, file.file_size)
                .await
                .unwrap()
        );
        metadata
            .trash_file(file.file_id, now - Duration::days(5))
            .await
            .unwrap();
    }

    // Page size 1 walks users one page at a time.
    let report = run_retention_sweep(metadata.as_ref(), server.storage.as_ref(), 30, 1)
        .await
        .unwrap();

    assert_eq!(report.files, 1);
    assert!(server.file(short_file.file_id).await.is_none());
    assert!(server.file(forever_file.file_id).await.is_some());
    assert_eq!(server.user(short.user_id).await.storage_used, 0);
    assert_eq!(server.user(forever.user_id).await.storage_used, 3);
}

#[tokio::test]
async fn test_retention_purges_expired_folder_batches() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let user = test_user("alice", TEST_QUOTA);
    metadata.create_user(&user).await.unwrap();

    let root = test_folder(user.user_id, "/old");
    let child = test_folder(user.user_id, "/old/child");
    metadata.create_folder(&root).await.unwrap();
    metadata.create_folder(&child).await.unwrap();
    let file = test_file(user.user_id, "/old/child", "a.txt", 2);
    metadata.create_file(&file).await.unwrap();
    metadata
        .trash_folder_cascade(root.folder_id, OffsetDateTime::now_utc() - Duration::days(40))
        .await
        .unwrap();

    let report = run_retention_sweep(metadata.as_ref(), server.storage.as_ref(), 30, 100)
        .await
        .unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(report.folders, 2);
    assert!(metadata.get_folder(root.folder_id).await.unwrap().is_none());
    assert!(metadata.get_folder(child.folder_id).await.unwrap().is_none());
    assert!(server.file(file.file_id).await.is_none());
}

#[tokio::test]
async fn test_retention_sweeper_skips_startup_pass_in_test_env() {
    let server = TestServer::new().await;
    assert_eq!(server.state.config.server.env, Environment::Test);
    let file = expired_trash(&server).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_retention_sweeper(server.state.clone(), shutdown_rx);
    // The next tick is at least a minute away.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    assert!(server.file(file.file_id).await.is_some());
    assert!(server.storage.exists(&file.storage_path).await.unwrap());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_retention_sweeper_runs_startup_pass_outside_test_env() {
    let server = TestServer::with_config(|c| c.server.env = Environment::Development).await;
    let file = expired_trash(&server).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = spawn_retention_sweeper(server.state.clone(), shutdown_rx);

    let mut purged = false;
    for _ in 0..100 {
        if server.file(file.file_id).await.is_none() {
            purged = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(purged, "startup pass did not purge the expired file");
    assert!(!server.storage.exists(&file.storage_path).await.unwrap());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
