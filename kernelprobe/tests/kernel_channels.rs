//! ChannelTransport and ExecutionSession against a scripted kernel served
//! over real ZeroMQ sockets on loopback.

use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_test::assert_ok;
use zeromq::{PubSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use kernelprobe::channel::{Header, KernelRequest, ReplyStatus, Signer, WireMessage};
use kernelprobe::error::{Error, ProtocolError};
use kernelprobe::{ConnectionInfo, ExecuteRequest, SessionBuilder, Transport};

const KEY: &str = "0f2c7a7e-5b1d-4b8e-9c55-4c8f7f1d2a10";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct FakeKernel {
    signer: Signer,
    shell: RouterSocket,
    iopub: PubSocket,
    execution_count: u64,
}

impl FakeKernel {
    async fn publish(&mut self, parent: &Header, msg_type: &str, content: Value) {
        let header = Header::new(uuid::Uuid::new_v4().to_string(), "fake-kernel", msg_type);
        let frames = WireMessage::new(header, content)
            .with_parent(parent)
            .with_identities(vec![Bytes::from(format!("kernel.{msg_type}"))])
            .into_frames(&self.signer)
            .unwrap();
        self.iopub.send(ZmqMessage::try_from(frames).unwrap()).await.unwrap();
    }

    async fn reply(&mut self, request: &WireMessage, msg_type: &str, content: Value) {
        let header = Header::new(uuid::Uuid::new_v4().to_string(), "fake-kernel", msg_type);
        let frames = WireMessage::new(header, content)
            .with_parent(&request.header)
            .with_identities(request.identities.clone())
            .into_frames(&self.signer)
            .unwrap();
        self.shell.send(ZmqMessage::try_from(frames).unwrap()).await.unwrap();
    }

    async fn serve(mut self) {
        while let Ok(received) = self.shell.recv().await {
            let Ok(request) = WireMessage::from_frames(received.into_vec(), &self.signer) else {
                continue;
            };
            let parent = request.header.clone();
            self.publish(&parent, "status", json!({"execution_state": "busy"}))
                .await;

            match parent.msg_type.as_str() {
                "kernel_info_request" => {
                    let content = json!({
                        "status": "ok",
                        "protocol_version": "5.3",
                        "implementation": "fake-sql",
                        "language_info": {"name": "sql"},
                    });
                    self.reply(&request, "kernel_info_reply", content).await;
                }
                "execute_request" => self.execute(&request).await,
                _ => {}
            }

            self.publish(&parent, "status", json!({"execution_state": "idle"}))
                .await;
        }
    }

    async fn execute(&mut self, request: &WireMessage) {
        self.execution_count += 1;
        let count = self.execution_count;
        let code = request.content["code"].as_str().unwrap_or_default().to_string();
        self.publish(
            &request.header,
            "execute_input",
            json!({"code": code, "execution_count": count}),
        )
        .await;

        let status = if code.trim() == "select 1 + 1" {
            self.publish(
                &request.header,
                "display_data",
                json!({"data": {"text/plain": "2", "text/html": "<b>2</b>"}, "metadata": {}}),
            )
            .await;
            "ok"
        } else {
            self.publish(
                &request.header,
                "error",
                json!({
                    "ename": "ParseError",
                    "evalue": "unexpected end of input",
                    "traceback": [],
                }),
            )
            .await;
            "error"
        };
        self.reply(
            request,
            "execute_reply",
            json!({"status": status, "execution_count": count}),
        )
        .await;
    }
}

/// Bind a fake kernel on fresh loopback ports and start serving.
async fn start_kernel() -> (ConnectionInfo, JoinHandle<()>) {
    let connection = ConnectionInfo::loopback(KEY).unwrap();
    let mut shell = RouterSocket::new();
    shell.bind(&connection.shell_endpoint()).await.unwrap();
    let mut iopub = PubSocket::new();
    iopub.bind(&connection.iopub_endpoint()).await.unwrap();

    let kernel = FakeKernel {
        signer: Signer::new(KEY),
        shell,
        iopub,
        execution_count: 0,
    };
    (connection, tokio::spawn(kernel.serve()))
}

fn builder() -> SessionBuilder {
    SessionBuilder::new()
        .reply_timeout(Duration::from_secs(5))
        .poll_timeout(Duration::from_millis(100))
        .ready_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn test_select_returns_result() {
    init_logging();
    let (connection, server) = start_kernel().await;
    let mut session = builder().connect(connection).await.unwrap();

    let execution = session.run("select 1 + 1").await.unwrap();
    assert_eq!(execution.reply.status, ReplyStatus::Ok);
    assert_eq!(execution.reply.execution_count, Some(1));
    assert_eq!(execution.batch.len(), 1);
    assert_eq!(execution.text().as_deref(), Some("2"));

    let item = execution.batch.first().unwrap();
    let data = item.message.data().unwrap();
    let mimes: Vec<_> = data.keys().map(String::as_str).collect();
    assert_eq!(mimes, ["text/plain", "text/html"]);

    assert_ok!(session.shutdown().await);
    server.abort();
}

#[tokio::test]
async fn test_incomplete_select_returns_error() {
    init_logging();
    let (connection, server) = start_kernel().await;
    let mut session = builder().connect(connection).await.unwrap();

    let execution = session.run("select 1 + ").await.unwrap();
    assert_eq!(execution.reply.status, ReplyStatus::Error);
    assert_eq!(execution.batch.errors().count(), 1);
    assert_eq!(
        execution.text().as_deref(),
        Some("ParseError: unexpected end of input")
    );

    // The session is reusable after an error reply.
    let execution = session.run("select 1 + 1").await.unwrap();
    assert_eq!(execution.reply.execution_count, Some(2));

    assert_ok!(session.shutdown().await);
    server.abort();
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    init_logging();
    let (connection, server) = start_kernel().await;
    let mut session = builder().connect(connection).await.unwrap();

    assert_ok!(session.shutdown().await);
    assert_ok!(session.shutdown().await);
    assert!(!session.transport().is_open());
    assert!(session.run("select 1 + 1").await.is_err());
    server.abort();
}

#[tokio::test]
async fn test_wrong_key_never_becomes_ready() {
    init_logging();
    let (connection, server) = start_kernel().await;
    let mut raw = connection.to_json();
    raw["key"] = json!("not-the-key");
    let wrong: ConnectionInfo = serde_json::from_value(raw).unwrap();

    let err = builder()
        .ready_timeout(Duration::from_millis(800))
        .connect(wrong)
        .await
        .err()
        .unwrap();
    assert!(err.is_timeout(), "{err}");
    server.abort();
}

#[tokio::test]
async fn test_echo_mismatch_then_next_cycle_recovers() {
    init_logging();
    let (connection, server) = start_kernel().await;
    let mut session = builder().connect(connection).await.unwrap();

    let msg_id = session
        .execute(&ExecuteRequest::new("select 1 + 1"))
        .await
        .unwrap();
    let reply = session.await_reply(Duration::from_secs(5)).await.unwrap();
    assert_eq!(reply.message.parent_msg_id(), Some(msg_id.as_str()));

    let batch = session
        .drain_notifications("select 1 + 2", Duration::from_millis(100), 50)
        .await;
    assert!(matches!(
        batch,
        Err(Error::Protocol(ProtocolError::Inconsistent { .. }))
    ));

    // Leftovers of the failed cycle are skipped by the next one.
    let execution = session.run("select 1 + 1").await.unwrap();
    assert_eq!(execution.text().as_deref(), Some("2"));

    assert_ok!(session.shutdown().await);
    server.abort();
}

#[tokio::test]
async fn test_receive_prefers_command_channel() {
    init_logging();
    let (connection, server) = start_kernel().await;
    let mut session = builder().connect(connection).await.unwrap();
    let transport = session.transport_mut();

    let request = KernelRequest::execute(&ExecuteRequest::new("select 1 + 1"));
    transport.send(&request).await.unwrap();
    // Let the whole cycle queue up on both sockets.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut arrivals = Vec::new();
    let mut sequences = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        let Some(message) = transport.receive(Duration::from_millis(200)).await.unwrap() else {
            continue;
        };
        if message.parent_msg_id() != Some(request.msg_id.as_str()) {
            continue;
        }
        sequences.push(message.sequence);
        arrivals.push(format!("{}:{}", message.channel, message.msg_type()));
        if message.execution_state() == Some("idle") {
            break;
        }
    }

    assert_eq!(
        arrivals,
        [
            "command:execute_reply",
            "notification:status",
            "notification:execute_input",
            "notification:display_data",
            "notification:status",
        ]
    );
    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]), "{sequences:?}");

    assert_ok!(session.shutdown().await);
    server.abort();
}

#[tokio::test]
async fn test_unbounded_ready_timeout_connects() {
    init_logging();
    let (connection, server) = start_kernel().await;
    let mut session = builder()
        .ready_timeout(Duration::MAX)
        .reply_timeout(Duration::MAX)
        .connect(connection)
        .await
        .unwrap();

    let execution = session.run("select 1 + 1").await.unwrap();
    assert_eq!(execution.text().as_deref(), Some("2"));

    assert_ok!(session.shutdown().await);
    server.abort();
}
