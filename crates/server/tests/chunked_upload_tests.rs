//! Resumable chunked upload protocol tests.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::fixtures::{HELLO_WORLD_SHA256, seeded_bytes, sha256_hash};
use common::{TEST_QUOTA, TestServer, TestUser};
use futures::StreamExt;
use serde_json::{Value, json};
use time::OffsetDateTime;
use trove_core::SessionStatus;
use trove_server::lifecycle::sweeper::run_session_sweep;
use trove_storage::ObjectStore;
use uuid::Uuid;

async fn init(server: &TestServer, user: &TestUser, body: Value) -> (StatusCode, Value) {
    server
        .json_request("POST", &user.token, "/v1/uploads", body)
        .await
}

async fn put_chunk(
    server: &TestServer,
    user: &TestUser,
    upload_id: &str,
    chunk: &str,
    data: &'static [u8],
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/v1/uploads/{upload_id}?chunk={chunk}"))
        .header("authorization", format!("Bearer {}", user.token))
        .header("content-type", "application/octet-stream")
        .body(Body::from(data))
        .unwrap();
    server.send_json(request).await
}

async fn complete(server: &TestServer, user: &TestUser, upload_id: &str) -> (StatusCode, Value) {
    server
        .json_request(
            "POST",
            &user.token,
            &format!("/v1/uploads/{upload_id}/complete"),
            json!({}),
        )
        .await
}

async fn session_status(server: &TestServer, upload_id: &str) -> SessionStatus {
    server
        .metadata()
        .get_session(Uuid::parse_str(upload_id).unwrap())
        .await
        .unwrap()
        .unwrap()
        .status()
        .unwrap()
}

async fn read_object(server: &TestServer, path: &str) -> Vec<u8> {
    let mut stream = server.storage.open(path).await.unwrap();
    let mut bytes = Vec::new();
    while let Some(piece) = stream.next().await {
        bytes.extend_from_slice(&piece.unwrap());
    }
    bytes
}

async fn hello_session(server: &TestServer, user: &TestUser) -> String {
    let (status, body) = init(
        server,
        user,
        json!({
            "filename": "hello.txt",
            "total_size": 13,
            "chunk_size": 7,
            "total_chunks": 2,
            "logical_path": "/",
            "hash": HELLO_WORLD_SHA256,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["chunks_received"], json!([]));
    body["upload_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_chunked_protocol_happy_path() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;

    let (status, ack) = put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received_chunks"], 1);
    let (status, ack) = put_chunk(&server, &alice, &upload_id, "1", b"World!").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received_chunks"], 2);
    assert_eq!(ack["total_chunks"], 2);

    let (status, done) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["size"], 13);
    assert_eq!(done["hash"], HELLO_WORLD_SHA256);
    assert_eq!(done["filename"], "hello.txt");

    let session = server
        .metadata()
        .get_session(Uuid::parse_str(&upload_id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status().unwrap(), SessionStatus::Completed);
    assert_eq!(server.user(alice.user_id).await.storage_used, 13);

    let file = server.file_named(&alice, "/", "hello.txt").await;
    assert_eq!(file.upload_status, "completed");
    assert_eq!(file.file_size, 13);
    assert_eq!(file.file_id.to_string(), done["file_id"].as_str().unwrap());

    // Completing twice is refused; the session is no longer active.
    let (status, _) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_chunk_then_complete() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;

    put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;
    let (status, ack) = put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received_chunks"], 1);
    put_chunk(&server, &alice, &upload_id, "1", b"World!").await;

    let (status, progress) = server
        .get_json(&alice.token, &format!("/v1/uploads/{upload_id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["chunks_received"], json!([0, 1]));
    assert_eq!(progress["status"], "active");

    let (status, _) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_chunks_out_of_order_assemble_in_index_order() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;

    put_chunk(&server, &alice, &upload_id, "1", b"World!").await;
    put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;
    let (status, done) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["hash"], HELLO_WORLD_SHA256);
}

#[tokio::test]
async fn test_concurrent_chunks_are_all_recorded() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let (_, body) = init(
        &server,
        &alice,
        json!({
            "filename": "parts.bin",
            "total_size": 8,
            "chunk_size": 1,
            "total_chunks": 8,
        }),
    )
    .await;
    let upload_id = body["upload_id"].as_str().unwrap().to_string();

    let puts = (0..8u8).map(|i| {
        let server = &server;
        let alice = &alice;
        let upload_id = upload_id.clone();
        async move {
            let data: &'static [u8] = &b"abcdefgh"[i as usize..i as usize + 1];
            put_chunk(server, alice, &upload_id, &i.to_string(), data).await
        }
    });
    let results = futures::future::join_all(puts).await;
    assert!(results.iter().all(|(status, _)| *status == StatusCode::OK));

    let (_, progress) = server
        .get_json(&alice.token, &format!("/v1/uploads/{upload_id}"))
        .await;
    assert_eq!(progress["chunks_received"], json!([0, 1, 2, 3, 4, 5, 6, 7]));

    let (status, done) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["hash"], sha256_hash(b"abcdefgh"));
}

#[tokio::test]
async fn test_hash_mismatch_creates_nothing() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let (status, body) = init(
        &server,
        &alice,
        json!({
            "filename": "bad.txt",
            "total_size": 12,
            "chunk_size": 12,
            "total_chunks": 1,
            "hash": "invalid",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let upload_id = body["upload_id"].as_str().unwrap().to_string();

    put_chunk(&server, &alice, &upload_id, "0", b"test content").await;
    let (status, error) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "hash_mismatch");

    assert!(server.files_in(&alice, "/").await.is_empty());
    assert_eq!(server.user(alice.user_id).await.storage_used, 0);
    assert_eq!(server.storage.save_count(), 0);
    assert_eq!(session_status(&server, &upload_id).await, SessionStatus::Active);
}

#[tokio::test]
async fn test_complete_with_missing_chunk_is_refused() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;

    put_chunk(&server, &alice, &upload_id, "1", b"World!").await;
    let (status, error) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "incomplete_upload");
}

#[tokio::test]
async fn test_short_chunk_fails_size_check() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;

    put_chunk(&server, &alice, &upload_id, "0", b"Hello").await;
    put_chunk(&server, &alice, &upload_id, "1", b"World!").await;
    let (status, error) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "size_mismatch");

    // The session stays open so the client can resend the bad chunk.
    put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;
    let (status, _) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_chunk_index_and_size_validation() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;

    let (status, _) = put_chunk(&server, &alice, &upload_id, "2", b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = put_chunk(&server, &alice, &upload_id, "-1", b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = put_chunk(&server, &alice, &upload_id, "zero", b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    // Larger than chunk_size.
    let (status, _) = put_chunk(&server, &alice, &upload_id, "0", b"Hello, World!").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, progress) = server
        .get_json(&alice.token, &format!("/v1/uploads/{upload_id}"))
        .await;
    assert_eq!(progress["chunks_received"], json!([]));
}

#[tokio::test]
async fn test_init_validation() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", 10).await;

    let cases = [
        json!({"filename": "a", "total_size": 0, "chunk_size": 1, "total_chunks": 1}),
        json!({"filename": "a", "total_size": 4, "chunk_size": 0, "total_chunks": 1}),
        json!({"filename": "a", "total_size": 4, "chunk_size": 2, "total_chunks": 3}),
        json!({"filename": "", "total_size": 4, "chunk_size": 4, "total_chunks": 1}),
        json!({"filename": "a", "total_size": 4, "chunk_size": 4, "total_chunks": 1, "logical_path": "../up"}),
    ];
    for case in cases {
        let (status, _) = init(&server, &alice, case.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "case {case}");
    }

    // Over quota.
    let (status, error) = init(
        &server,
        &alice,
        json!({"filename": "a", "total_size": 11, "chunk_size": 11, "total_chunks": 1}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["code"], "quota_exceeded");
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;
    put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;

    for _ in 0..2 {
        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/v1/uploads/{upload_id}"))
            .header("authorization", format!("Bearer {}", alice.token))
            .body(Body::empty())
            .unwrap();
        assert_eq!(server.send(request).await.status(), StatusCode::NO_CONTENT);
    }

    let (_, progress) = server
        .get_json(&alice.token, &format!("/v1/uploads/{upload_id}"))
        .await;
    assert_eq!(progress["status"], "cancelled");
    let (status, _) = put_chunk(&server, &alice, &upload_id, "1", b"World!").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_foreign_session_is_not_found() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let bob = server.create_user("bob", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;

    let (status, _) = server
        .get_json(&bob.token, &format!("/v1/uploads/{upload_id}"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = put_chunk(&server, &bob, &upload_id, "0", b"Hello, ").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = server
        .get_json(&alice.token, &format!("/v1/uploads/{}", Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expired_session_is_gone() {
    let server = TestServer::with_config(|config| {
        config.uploads.session_timeout_secs = 0;
    })
    .await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;

    let (status, error) = put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(error["code"], "upload_expired");

    let (_, progress) = server
        .get_json(&alice.token, &format!("/v1/uploads/{upload_id}"))
        .await;
    assert_eq!(progress["status"], "expired");
    let session_dir = server
        .state
        .temp
        .session_dir(Uuid::parse_str(&upload_id).unwrap());
    assert!(!session_dir.exists());
}

#[tokio::test]
async fn test_session_sweep_expires_and_purges() {
    let server = TestServer::with_config(|config| {
        config.uploads.session_timeout_secs = 0;
    })
    .await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = Uuid::parse_str(&hello_session(&server, &alice).await).unwrap();
    let session_dir = server.state.temp.session_dir(upload_id);
    assert!(session_dir.exists());

    let report = run_session_sweep(server.state.metadata.as_ref(), time::Duration::days(7))
        .await
        .unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.deleted, 0);
    assert!(!session_dir.exists());
    let session = server.metadata().get_session(upload_id).await.unwrap().unwrap();
    assert_eq!(session.status().unwrap(), SessionStatus::Expired);

    // A zero retention purges terminal rows updated before now.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let report = run_session_sweep(server.state.metadata.as_ref(), time::Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);
    assert!(server.metadata().get_session(upload_id).await.unwrap().is_none());
    assert!(OffsetDateTime::now_utc() > session.updated_at);
}

#[tokio::test]
async fn test_concurrent_complete_stores_one_consistent_object() {
    const CHUNK: usize = 256 * 1024;
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let content: &'static [u8] = Box::leak(seeded_bytes(7, 2 * CHUNK).into_boxed_slice());

    let (status, body) = init(
        &server,
        &alice,
        json!({
            "filename": "race.bin",
            "total_size": content.len(),
            "chunk_size": CHUNK,
            "total_chunks": 2,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let upload_id = body["upload_id"].as_str().unwrap().to_string();
    put_chunk(&server, &alice, &upload_id, "0", &content[..CHUNK]).await;
    put_chunk(&server, &alice, &upload_id, "1", &content[CHUNK..]).await;

    let ((first, _), (second, _)) = tokio::join!(
        complete(&server, &alice, &upload_id),
        complete(&server, &alice, &upload_id)
    );
    let statuses = [first, second];
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::OK).count(),
        1,
        "{statuses:?}"
    );
    assert!(
        statuses
            .iter()
            .all(|s| *s == StatusCode::OK || *s == StatusCode::CONFLICT || *s == StatusCode::BAD_REQUEST),
        "{statuses:?}"
    );
    assert_eq!(server.storage.save_count(), 1);

    let row = server.file_named(&alice, "/", "race.bin").await;
    let stored = read_object(&server, &row.storage_path).await;
    assert_eq!(stored.len() as i64, row.file_size);
    assert_eq!(sha256_hash(&stored), row.hash);
    assert_eq!(row.hash, sha256_hash(content));
    assert_eq!(server.files_in(&alice, "/").await.len(), 1);
    assert_eq!(
        server.user(alice.user_id).await.storage_used,
        content.len() as i64
    );
    assert_eq!(session_status(&server, &upload_id).await, SessionStatus::Completed);
}

#[tokio::test]
async fn test_complete_on_claimed_session_conflicts() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;
    put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;
    put_chunk(&server, &alice, &upload_id, "1", b"World!").await;

    let id = Uuid::parse_str(&upload_id).unwrap();
    let now = OffsetDateTime::now_utc();
    assert!(server.metadata().claim_session(id, now).await.unwrap());
    assert!(!server.metadata().claim_session(id, now).await.unwrap());

    let (status, error) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "conflict");
    let (status, _) = put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (_, progress) = server
        .get_json(&alice.token, &format!("/v1/uploads/{upload_id}"))
        .await;
    assert_eq!(progress["status"], "completing");
    assert_eq!(server.storage.save_count(), 0);

    // Startup recovery hands interrupted claims back.
    assert_eq!(server.metadata().release_claimed_sessions(now).await.unwrap(), 1);
    let (status, _) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_failed_commit_deletes_saved_object() {
    let server = TestServer::new().await;
    let alice = server.create_user("alice", TEST_QUOTA).await;
    let upload_id = hello_session(&server, &alice).await;
    put_chunk(&server, &alice, &upload_id, "0", b"Hello, ").await;
    put_chunk(&server, &alice, &upload_id, "1", b"World!").await;

    // Another upload took the headroom the session was admitted against.
    server
        .metadata()
        .set_quota(alice.user_id, 12, OffsetDateTime::now_utc())
        .await
        .unwrap();

    let (status, error) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["code"], "quota_exceeded");

    assert_eq!(server.storage.save_count(), 1);
    let deleted = server.storage.deleted();
    assert_eq!(deleted.len(), 1);
    assert_eq!(server.storage.delete_calls(&deleted[0]), 1);
    assert!(!server.storage.exists(&deleted[0]).await.unwrap());
    assert!(server.files_in(&alice, "/").await.is_empty());
    assert_eq!(server.user(alice.user_id).await.storage_used, 0);
    assert_eq!(session_status(&server, &upload_id).await, SessionStatus::Active);

    // The session survives, so a retry succeeds once there is room again.
    server
        .metadata()
        .set_quota(alice.user_id, TEST_QUOTA, OffsetDateTime::now_utc())
        .await
        .unwrap();
    let (status, done) = complete(&server, &alice, &upload_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["hash"], HELLO_WORLD_SHA256);
    assert_eq!(server.user(alice.user_id).await.storage_used, 13);
}
