use super::*;
use std::sync::Arc;

use clap::error::ErrorKind;
use stockdb_protocol::protocol::Request;
use stockdb_protocol::resource::ResourceKind;
use stockdb_protocol::server::Server;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const COLLECTION_YAML: &str = r#"
apiVersion: stockdb.io/v1
kind: DataCollection
metadata:
  name: aapl-daily
spec:
  source:
    type: fmp
    endpoint: historical-price-eod/full
  targets:
    securities:
      - symbol: AAPL
  schedule:
    type: interval
    frequency: 1d
  options:
    timeout: 30s
    retries: 2
"#;

fn collection() -> DataCollection {
    config::parse_collection(COLLECTION_YAML, Path::new("aapl.yaml")).unwrap()
}

/// Serve until `token` fires, recording every request's parameters
fn mock_daemon(
    socket: &Path,
    reply: Response,
) -> (CancellationToken, Arc<Mutex<Vec<HashMap<String, String>>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    let server = Server::bind(socket, move |request: Request| {
        let seen = Arc::clone(&seen_in);
        let reply = reply.clone();
        async move {
            if let Request::Apply { parameters, .. } = request {
                seen.lock().await.push(parameters);
            }
            reply
        }
    })
    .unwrap();

    let token = CancellationToken::new();
    tokio::spawn(server.run(token.clone()));
    (token, seen)
}

// ========================================================================
// Argument parsing
// ========================================================================

#[test]
fn apply_requires_file_flag() {
    let err = Cli::try_parse_from(["stockctl", "apply"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "stockctl",
        "apply",
        "-f",
        "dc.yaml",
        "--verbose",
        "--socket",
        "/tmp/s.sock",
    ])
    .unwrap();
    assert!(cli.verbose);
    assert_eq!(cli.socket.as_deref(), Some(Path::new("/tmp/s.sock")));
    let Commands::Apply { file } = cli.command;
    assert_eq!(file, PathBuf::from("dc.yaml"));
}

#[test]
fn socket_flag_wins() {
    let path = config::resolve_socket_path(Some(Path::new("/run/custom.sock"))).unwrap();
    assert_eq!(path, PathBuf::from("/run/custom.sock"));
}

// ========================================================================
// Resource files
// ========================================================================

#[test]
fn parses_collection_file() {
    let dc = collection();
    assert_eq!(dc.kind, ResourceKind::DataCollection);
    assert_eq!(dc.name(), "aapl-daily");
    assert_eq!(dc.symbols().collect::<Vec<_>>(), vec!["AAPL"]);
    assert_eq!(dc.spec.options.retries, 2);
}

#[test]
fn missing_file_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("absent.yaml");

    let err = config::load_collection(&path).unwrap_err();
    assert!(matches!(err, CliError::FileNotFound(ref p) if *p == path));
    assert!(err.to_string().contains("absent.yaml"));
}

#[test]
fn unreadable_path_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    // A directory cannot be read as a file
    let err = config::load_collection(tmp.path()).unwrap_err();
    assert!(matches!(err, CliError::FileRead { .. }));
}

#[test]
fn parse_error_names_field_and_location() {
    let yaml = "metadata:\n  name: x\nspec:\n  options:\n    retries: many\n";
    let err = config::parse_collection(yaml, Path::new("bad.yaml")).unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("bad.yaml"), "{}", msg);
    assert!(msg.contains("spec.options.retries"), "{}", msg);
    assert!(msg.contains("line 5"), "{}", msg);
}

// ========================================================================
// Responses
// ========================================================================

#[test]
fn success_prints_resource() {
    let line = handle_response(&collection(), Response::success("aapl-daily")).unwrap();
    assert!(line.contains("datacollection/aapl-daily"), "{}", line);
}

#[test]
fn error_response_fails() {
    let err =
        handle_response(&collection(), Response::error("invalid resource: boom")).unwrap_err();
    assert!(matches!(err, CliError::Server(_)));
    assert_eq!(err.to_string(), "invalid resource: boom");
}

#[test]
fn unknown_response_fails() {
    let err = handle_response(&collection(), Response::unknown("unknown command")).unwrap_err();
    assert!(matches!(err, CliError::Unexpected(_)));
}

// ========================================================================
// Talking to the daemon
// ========================================================================

#[tokio::test]
async fn apply_sends_file_parameter() {
    let tmp = tempfile::tempdir().unwrap();
    let socket = tmp.path().join("stockd.sock");
    let file = tmp.path().join("aapl.yaml");
    std::fs::write(&file, COLLECTION_YAML).unwrap();
    let (token, seen) = mock_daemon(&socket, Response::success("aapl-daily"));

    let dc = config::load_collection(&file).unwrap();
    let response = apply(&Client::new(&socket), &dc, &file).await.unwrap();
    assert_eq!(response.kind, ResponseKind::Success);

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 1);
    let sent = PathBuf::from(&seen[0]["file"]);
    assert!(sent.is_absolute());
    assert!(sent.ends_with("aapl.yaml"));
    token.cancel();
}

#[tokio::test]
async fn apply_without_daemon_says_so() {
    let tmp = tempfile::tempdir().unwrap();
    let socket = tmp.path().join("stockd.sock");

    let err = apply(&Client::new(&socket), &collection(), Path::new("aapl.yaml"))
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::DaemonNotRunning(ref p) if *p == socket));
}
