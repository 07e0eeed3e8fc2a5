//! Persistence integration tests.
//!
//! Verifies:
//! - A restarted server restores the board from its snapshot file
//! - An unwritable snapshot path leaves the in-memory board authoritative
//! - A corrupt snapshot is treated as an empty board
//! - Rejected mutations do not touch the snapshot

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use taskboard_sync::client::BoardClient;
use taskboard_sync::protocol::{ClientMessageKind, ServerMessage};
use taskboard_sync::server::BoardServer;
use taskboard_sync::{Board, Task, TaskId};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Start a file-backed server on a free port, return it and its URL.
async fn start_server_with_storage(path: &Path) -> (Arc<BoardServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Arc::new(BoardServer::with_storage("127.0.0.1:0", path));
    let running = server.clone();
    tokio::spawn(async move {
        running.serve(listener).await.unwrap();
    });
    (server, format!("ws://127.0.0.1:{port}"))
}

async fn next(client: &mut BoardClient) -> ServerMessage {
    timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("Should receive a message within timeout")
        .unwrap()
}

async fn connect(url: &str) -> (BoardClient, Board) {
    let mut client = BoardClient::connect(url).await.unwrap();
    match next(&mut client).await {
        ServerMessage::Init(board) => (client, board),
        other => panic!("Expected INIT, got {other:?}"),
    }
}

/// Add a task over the wire and wait for its broadcast.
async fn add_task(client: &mut BoardClient, payload: serde_json::Value) {
    client.send_kind(ClientMessageKind::AddTask, payload).await.unwrap();
    assert!(matches!(next(client).await, ServerMessage::TaskAdded(_)));
}

// ─── Restart ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_restart_restores_board_from_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.json");

    {
        let (server, url) = start_server_with_storage(&path).await;
        let (mut client, _) = connect(&url).await;
        add_task(&mut client, json!({"id": "t1", "status": "todo", "title": "Persist me"})).await;
        client
            .send_kind(ClientMessageKind::MoveTask, json!({"id": "t1", "status": "done"}))
            .await
            .unwrap();
        assert!(matches!(next(&mut client).await, ServerMessage::TaskMoved(_)));
        server.store().flush().await;
    }

    // Fresh server over the same file
    let restarted = BoardServer::with_storage("127.0.0.1:0", &path);
    assert_eq!(restarted.recover().await, 1);

    let board = restarted.store().load().await;
    let expected = Task::new("t1").with_status("done").with_field("title", "Persist me");
    assert_eq!(board.tasks, vec![expected]);
}

#[tokio::test]
async fn test_new_connection_after_restart_gets_restored_init() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.json");

    {
        let (server, url) = start_server_with_storage(&path).await;
        let (mut client, _) = connect(&url).await;
        add_task(&mut client, json!({"id": 7})).await;
        client
            .send_kind(ClientMessageKind::UpdateTeamMember, json!({"name": "Alice"}))
            .await
            .unwrap();
        assert!(matches!(next(&mut client).await, ServerMessage::TeamUpdated(_)));
        server.store().flush().await;
    }

    let (_server, url) = start_server_with_storage(&path).await;
    let (_client, board) = connect(&url).await;
    assert_eq!(board.tasks.len(), 1);
    assert!(board.contains_task(&TaskId::new(7)));
    assert!(board.team_member("Alice").is_some());
}

// ─── Failure modes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unwritable_snapshot_keeps_serving() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing-dir").join("data.json");

    let (server, url) = start_server_with_storage(&path).await;
    let (mut a, _) = connect(&url).await;
    add_task(&mut a, json!({"id": "t1"})).await;
    server.store().flush().await;

    assert!(server.store().stats().snapshots_failed > 0);
    assert!(!path.exists());

    // Memory stays authoritative for later joiners
    let (_b, board) = connect(&url).await;
    assert_eq!(board.tasks, vec![Task::new("t1")]);
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.json");
    std::fs::write(&path, "{ this is not a board").unwrap();

    let (_server, url) = start_server_with_storage(&path).await;
    let (_client, board) = connect(&url).await;
    assert_eq!(board, Board::new());
}

#[tokio::test]
async fn test_missed_mutation_leaves_snapshot_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.json");

    let (server, url) = start_server_with_storage(&path).await;
    let (mut client, _) = connect(&url).await;
    add_task(&mut client, json!({"id": "t1", "status": "todo"})).await;
    server.store().flush().await;
    let before = std::fs::read(&path).unwrap();
    let written = server.store().stats().snapshots_written;

    client
        .send_kind(ClientMessageKind::MoveTask, json!({"id": "ghost", "status": "done"}))
        .await
        .unwrap();
    client
        .send_kind(ClientMessageKind::AddComment, json!({"taskId": "ghost", "comment": "hi"}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.store().flush().await;

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(server.store().stats().snapshots_written, written);
}

#[tokio::test]
async fn test_snapshot_is_readable_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.json");

    let (server, url) = start_server_with_storage(&path).await;
    let (mut client, _) = connect(&url).await;
    add_task(&mut client, json!({"id": "t1", "status": "todo", "comments": []})).await;
    server.store().flush().await;

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains('\n'), "Snapshot should be pretty-printed");

    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["tasks"][0]["id"], json!("t1"));
    assert_eq!(value["tasks"][0]["status"], json!("todo"));
    assert!(value["teamMembers"].as_array().unwrap().is_empty());
}
