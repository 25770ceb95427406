//! Integration tests for control socket client/server communication
#![allow(clippy::unwrap_used, clippy::panic)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use simplemerge_campaign::{ProgressSnapshot, RunPhase, SenderSnapshot, SenderStatus};
use simplemerge_common::Signal;
use simplemerge_control::{
    CampaignCommand, ControlClient, ControlError, ControlServer, Request, RequestCommand,
    Response, ResponseData, ResponsePayload, Result, SystemCommand,
    protocol::{InboxCommand, PROTOCOL_VERSION},
    server::CommandHandler,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

#[derive(Default)]
struct MockHandler {
    stopped: AtomicBool,
}

impl MockHandler {
    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            run_id: "01HZXRUN".to_string(),
            phase: if self.stopped.load(Ordering::Acquire) {
                RunPhase::Cancelled
            } else {
                RunPhase::Running
            },
            dry_run: true,
            subject: Some("Opening".to_string()),
            total_sent: 3,
            total_goal: 10,
            rounds: 2,
            ledger_failures: 0,
            senders: vec![SenderSnapshot {
                sender: "a@x.com".to_string(),
                target: Some("jane@y.com".to_string()),
                sent: 3,
                status: SenderStatus::Waiting(12),
                recipients: Vec::new(),
            }],
        }
    }
}

#[async_trait]
impl CommandHandler for MockHandler {
    async fn handle_request(&self, request: Request) -> Result<Response> {
        match request.command {
            RequestCommand::System(SystemCommand::Ping) => Ok(Response::ok()),
            RequestCommand::System(SystemCommand::Status) => Ok(Response::data(
                ResponseData::Message("status".to_string()),
            )),
            RequestCommand::Campaign(CampaignCommand::Progress) => {
                Ok(Response::data(ResponseData::Progress(self.snapshot())))
            }
            RequestCommand::Campaign(CampaignCommand::Stop) => {
                self.stopped.store(true, Ordering::Release);
                Ok(Response::data(ResponseData::Message(
                    "Stop requested".to_string(),
                )))
            }
            RequestCommand::Campaign(CampaignCommand::Preview) => Err(ControlError::ServerError(
                "no template configured".to_string(),
            )),
            RequestCommand::Inbox(InboxCommand::List { .. } | InboxCommand::Reply { .. }) => {
                Ok(Response::error("Inbox not available"))
            }
        }
    }
}

async fn start_test_server(
    socket_path: &str,
    handler: Arc<dyn CommandHandler>,
) -> (tokio::task::JoinHandle<()>, broadcast::Sender<Signal>) {
    let server = ControlServer::new(socket_path, handler).unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(shutdown_rx).await {
            eprintln!("Server error: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    (server_handle, shutdown_tx)
}

#[tokio::test]
async fn test_ping() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control.sock");
    let socket_str = socket_path.to_str().unwrap();

    let (_server, _shutdown) = start_test_server(socket_str, Arc::new(MockHandler::default())).await;

    let client = ControlClient::new(socket_str);
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_progress_round_trips_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control.sock");
    let socket_str = socket_path.to_str().unwrap();

    let handler = Arc::new(MockHandler::default());
    let (_server, _shutdown) = start_test_server(socket_str, handler.clone()).await;

    let client = ControlClient::new(socket_str);
    let data = client
        .command(RequestCommand::Campaign(CampaignCommand::Progress))
        .await
        .unwrap();

    match data {
        Some(ResponseData::Progress(snapshot)) => assert_eq!(snapshot, handler.snapshot()),
        other => panic!("Expected progress, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stop_then_progress_over_persistent_connection() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control.sock");
    let socket_str = socket_path.to_str().unwrap();

    let (_server, _shutdown) = start_test_server(socket_str, Arc::new(MockHandler::default())).await;

    let client = ControlClient::new(socket_str).with_persistent_connection();
    assert_eq!(client.stop().await.unwrap(), "Stop requested");

    let data = client
        .command(RequestCommand::Campaign(CampaignCommand::Progress))
        .await
        .unwrap();
    match data {
        Some(ResponseData::Progress(snapshot)) => assert_eq!(snapshot.phase, RunPhase::Cancelled),
        other => panic!("Expected progress, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handler_errors_become_server_errors() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control.sock");
    let socket_str = socket_path.to_str().unwrap();

    let (_server, _shutdown) = start_test_server(socket_str, Arc::new(MockHandler::default())).await;

    let client = ControlClient::new(socket_str);

    let result = client
        .command(RequestCommand::Campaign(CampaignCommand::Preview))
        .await;
    match result {
        Err(ControlError::ServerError(message)) => assert!(message.contains("no template")),
        other => panic!("Expected server error, got {other:?}"),
    }

    let result = client
        .command(RequestCommand::Inbox(InboxCommand::List { max_per_account: 10 }))
        .await;
    assert!(matches!(result, Err(ControlError::ServerError(_))));
}

#[tokio::test]
async fn test_incompatible_version_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control.sock");
    let socket_str = socket_path.to_str().unwrap();

    let (_server, _shutdown) = start_test_server(socket_str, Arc::new(MockHandler::default())).await;

    let client = ControlClient::new(socket_str);
    let request = Request {
        version: PROTOCOL_VERSION + 1,
        command: RequestCommand::System(SystemCommand::Ping),
    };

    match client.send_request(request).await {
        Err(ControlError::ServerError(message)) => {
            assert!(message.contains("Incompatible protocol version"));
        }
        other => panic!("Expected version error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_server_on_live_socket_fails() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control.sock");
    let socket_str = socket_path.to_str().unwrap();

    let (_server, _shutdown) = start_test_server(socket_str, Arc::new(MockHandler::default())).await;

    let second = ControlServer::new(socket_str, Arc::new(MockHandler::default())).unwrap();
    let (_tx, rx) = broadcast::channel(1);
    let result = second.serve(rx).await;

    assert!(matches!(result, Err(ControlError::Io(e)) if e.kind() == std::io::ErrorKind::AddrInUse));
}

#[tokio::test]
async fn test_stale_socket_is_replaced_and_removed_on_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("control.sock");
    let socket_str = socket_path.to_str().unwrap();

    // A socket file nobody is listening on
    drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
    assert!(socket_path.exists());

    let (server, shutdown) = start_test_server(socket_str, Arc::new(MockHandler::default())).await;
    ControlClient::new(socket_str).ping().await.unwrap();

    shutdown.send(Signal::Shutdown).unwrap();
    server.await.unwrap();
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_missing_socket() {
    let client = ControlClient::new("/nonexistent/control.sock");
    assert!(client.ping().await.is_err());
}

#[test]
fn test_payload_accessors() {
    let response = Response::data(ResponseData::Message("hi".to_string()));
    assert!(matches!(response.payload, ResponsePayload::Data(_)));
}
