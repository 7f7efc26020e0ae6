use super::*;
use crate::protocol::{CommandKind, ResponseKind, encode_message};
use std::os::unix::fs::FileTypeExt;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;

async fn echo_handler(request: Request) -> Response {
    match request {
        Request::Apply { resource, .. } => Response::success(resource.name()),
        Request::Unknown { .. } => Response::unknown("unknown command"),
    }
}

/// Send raw bytes on a fresh connection and read back the single response.
async fn exchange(socket_path: &Path, bytes: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket_path).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    read_message(&mut stream).await.unwrap()
}

fn apply_bytes(name: &str) -> Vec<u8> {
    let cmd: Command = serde_json::from_value(serde_json::json!({
        "type": "apply",
        "data": { "kind": "DataCollection", "metadata": { "name": name } }
    }))
    .unwrap();
    encode_message(&cmd).unwrap()
}

// ========================================================================
// ControlSocket
// ========================================================================

#[tokio::test]
async fn bind_rejects_empty_path() {
    let err = ControlSocket::bind("").unwrap_err();
    assert!(matches!(err, ServerError::EmptySocketPath));
}

#[tokio::test]
async fn bind_sets_permissions_and_creates_parent() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("nested").join("stockd.sock");

    let socket = ControlSocket::bind(&sock).unwrap();
    let meta = std::fs::metadata(&sock).unwrap();
    assert!(meta.file_type().is_socket());
    assert_eq!(meta.permissions().mode() & 0o777, 0o660);

    socket.close().unwrap();
    assert!(!sock.exists());
}

#[tokio::test]
async fn bind_replaces_stale_socket_file() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");

    // A leftover from a crashed daemon: the file exists but nobody listens
    let stale = std::os::unix::net::UnixListener::bind(&sock).unwrap();
    drop(stale);
    assert!(sock.exists());

    let socket = ControlSocket::bind(&sock).unwrap();
    assert!(std::fs::metadata(&sock).unwrap().file_type().is_socket());
    drop(socket);
    assert!(!sock.exists());
}

#[tokio::test]
async fn close_tolerates_already_removed_file() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");

    let socket = ControlSocket::bind(&sock).unwrap();
    std::fs::remove_file(&sock).unwrap();
    socket.close().unwrap();
}

// ========================================================================
// Request/response handling
// ========================================================================

#[tokio::test]
async fn serves_apply_and_unknown_commands() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");
    let server = Server::bind(&sock, echo_handler).unwrap();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    let resp = exchange(&sock, &apply_bytes("aapl-daily")).await;
    assert_eq!(resp.kind, ResponseKind::Success);
    assert_eq!(resp.message, "aapl-daily");

    let unknown = encode_message(&Command::new(CommandKind::Unknown)).unwrap();
    let resp = exchange(&sock, &unknown).await;
    assert_eq!(resp.kind, ResponseKind::Unknown);

    token.cancel();
    task.await.unwrap().unwrap();
    assert!(!sock.exists());
}

#[tokio::test]
async fn malformed_command_gets_error_response() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");
    let server = Server::bind(&sock, echo_handler).unwrap();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    let resp = exchange(&sock, b"{\"type\": apply}").await;
    assert_eq!(resp.kind, ResponseKind::Error);
    assert!(resp.message.starts_with("failed to decode command"));

    let missing = encode_message(&Command::new(CommandKind::Apply)).unwrap();
    let resp = exchange(&sock, &missing).await;
    assert_eq!(resp.kind, ResponseKind::Error);
    assert!(resp.message.contains("requires a resource"));

    token.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn connection_closes_after_one_response() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");
    let server = Server::bind(&sock, echo_handler).unwrap();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    let mut stream = UnixStream::connect(&sock).await.unwrap();
    stream.write_all(&apply_bytes("one")).await.unwrap();
    let resp: Response = read_message(&mut stream).await.unwrap();
    assert!(resp.is_success());

    // The server closed its side; nothing more arrives
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    token.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn truncated_request_gets_error_response() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");
    let server = Server::bind(&sock, echo_handler).unwrap();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    let mut stream = UnixStream::connect(&sock).await.unwrap();
    stream.write_all(br#"{"type":"apply","data":{"metadata""#).await.unwrap();
    stream.shutdown().await.unwrap();

    let resp: Response = read_message(&mut stream).await.unwrap();
    assert_eq!(resp.kind, ResponseKind::Error);
    assert!(resp.message.starts_with("failed to decode command"), "{}", resp.message);
    assert!(resp.message.contains("incomplete"), "{}", resp.message);

    token.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn empty_connection_gets_no_response() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");
    let server = Server::bind(&sock, echo_handler).unwrap();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    let mut stream = UnixStream::connect(&sock).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    token.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn serves_large_request() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");
    let server = Server::bind(&sock, echo_handler).unwrap();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    let cmd: Command = serde_json::from_value(serde_json::json!({
        "type": "apply",
        "parameters": { "padding": "p".repeat(4 * 1024 * 1024) },
        "data": { "kind": "DataCollection", "metadata": { "name": "big" } }
    }))
    .unwrap();
    let resp = exchange(&sock, &encode_message(&cmd).unwrap()).await;
    assert!(resp.is_success());
    assert_eq!(resp.message, "big");

    token.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn records_peer_credentials() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");

    let (entered_tx, entered_rx) = oneshot::channel::<()>();
    let entered_tx = parking_lot::Mutex::new(Some(entered_tx));
    let release = Arc::new(tokio::sync::Notify::new());
    let release_in_handler = Arc::clone(&release);

    let server = Server::bind(&sock, move |_request: Request| {
        let entered = entered_tx.lock().take();
        let release = Arc::clone(&release_in_handler);
        async move {
            if let Some(tx) = entered {
                let _ = tx.send(());
            }
            release.notified().await;
            Response::success("done")
        }
    })
    .unwrap();
    let tracker = server.tracker();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    let sock_path = sock.clone();
    let client = tokio::spawn(async move { exchange(&sock_path, &apply_bytes("x")).await });
    entered_rx.await.unwrap();

    let records = tracker.connections();
    assert_eq!(records.len(), 1);
    let uid = std::fs::metadata(tmp.path()).map(|m| {
        use std::os::unix::fs::MetadataExt;
        m.uid().to_string()
    });
    assert_eq!(records[0].attributes.get("peer_uid").cloned(), uid.ok());

    release.notify_one();
    assert!(client.await.unwrap().is_success());
    token.cancel();
    task.await.unwrap().unwrap();
}

// ========================================================================
// Shutdown and drain
// ========================================================================

#[tokio::test]
async fn shutdown_with_no_connections_is_immediate() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");
    let server = Server::bind(&sock, echo_handler)
        .unwrap()
        .with_drain_timeout(Duration::from_secs(10));
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));
    tokio::task::yield_now().await;

    let started = Instant::now();
    token.cancel();
    task.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!sock.exists());
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_connection() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");

    let server = Server::bind(&sock, |_request: Request| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Response::success("slow")
    })
    .unwrap()
    .with_drain_timeout(Duration::from_secs(5));
    let tracker = server.tracker();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    let sock_path = sock.clone();
    let client = tokio::spawn(async move { exchange(&sock_path, &apply_bytes("x")).await });

    while tracker.active_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    token.cancel();

    let resp = client.await.unwrap();
    assert_eq!(resp.message, "slow");
    task.await.unwrap().unwrap();
    assert_eq!(tracker.active_count(), 0);
    assert_eq!(tracker.completed_count(), 1);
}

#[tokio::test]
async fn drain_timeout_still_removes_socket() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");

    let server = Server::bind(&sock, |_request: Request| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Response::success("never")
    })
    .unwrap()
    .with_drain_timeout(Duration::from_millis(100));
    let tracker = server.tracker();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    let mut stuck = UnixStream::connect(&sock).await.unwrap();
    stuck.write_all(&apply_bytes("x")).await.unwrap();
    while tracker.active_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let started = Instant::now();
    token.cancel();
    task.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!sock.exists());
    assert_eq!(tracker.active_count(), 1);
}

#[tokio::test]
async fn shared_tracker_observes_connections() {
    let tmp = tempfile::tempdir().unwrap();
    let sock = tmp.path().join("stockd.sock");
    let tracker = ConnectionTracker::new();

    let server = Server::bind(&sock, echo_handler)
        .unwrap()
        .with_tracker(Arc::clone(&tracker));
    assert_eq!(server.socket_path(), sock.as_path());
    let token = CancellationToken::new();
    let task = tokio::spawn(server.run(token.clone()));

    for name in ["a", "b", "c"] {
        assert!(exchange(&sock, &apply_bytes(name)).await.is_success());
    }
    token.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(tracker.total_count(), 3);
    assert_eq!(tracker.completed_count(), 3);
}
