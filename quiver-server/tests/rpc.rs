//! End-to-end tests over a real QUIC endpoint with a self-signed certificate.

use bytes::Bytes;
use quiver_client::{Client, ClientConfig};
use quiver_codec::{write_message, Code, Header, Message, Props, PubAck, Status};
use quiver_server::{tls, CallContext, Server, ServerOptions, ServiceDesc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct TestServer {
    server: Arc<Server>,
    addr: SocketAddr,
    cert: CertificateDer<'static>,
    serve_task: JoinHandle<()>,
}

impl TestServer {
    async fn start(opts: ServerOptions, services: Vec<ServiceDesc>) -> Self {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_der = cert.cert.der().clone();
        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));

        let server_config =
            tls::server_config_with_cert(vec![cert_der.clone()], key, b"quiver").unwrap();
        let endpoint =
            quinn::Endpoint::server(server_config, "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = endpoint.local_addr().unwrap();

        let server = Arc::new(Server::new(opts));
        for desc in services {
            server.register_service(desc).unwrap();
        }

        let serve_server = Arc::clone(&server);
        let serve_task = tokio::spawn(async move {
            serve_server.serve(endpoint).await.unwrap();
        });

        TestServer {
            server,
            addr,
            cert: cert_der,
            serve_task,
        }
    }

    async fn client(&self) -> Client {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert.clone()).unwrap();
        let config = ClientConfig::new("localhost")
            .with_root_store(roots)
            .with_client_id("test-client")
            .with_request_timeout(Duration::from_secs(5));
        Client::connect(self.addr, config).await.unwrap()
    }

    fn stop(&self) {
        self.server.shutdown();
        self.serve_task.abort();
    }
}

fn echo_service() -> ServiceDesc {
    ServiceDesc::new("pb.StudentService").unary(
        "CreateStudent",
        |_ctx: CallContext, body: Bytes| async move { Ok(Some(body)) },
    )
}

#[tokio::test]
async fn unary_echo() {
    let ts = TestServer::start(ServerOptions::default(), vec![echo_service()]).await;
    let client = ts.client().await;

    let reply = client
        .unary("/pb.StudentService/CreateStudent", b"student record")
        .await
        .unwrap();
    assert_eq!(reply.status.code, Code::Ok as u8);
    assert_eq!(&reply.body[..], b"student record");
    assert_eq!(reply.message_id, 1);

    ts.stop();
}

#[tokio::test]
async fn unary_echo_compressed() {
    let ts = TestServer::start(ServerOptions::default(), vec![echo_service()]).await;
    let client = ts.client().await;

    let body = b"compressible payload ".repeat(100);
    let reply = client
        .unary_with(
            "/pb.StudentService/CreateStudent",
            &body,
            Props::new(),
            true,
        )
        .await
        .unwrap();
    assert_eq!(reply.status.code, Code::Ok as u8);
    assert_eq!(&reply.body[..], &body[..]);

    ts.stop();
}

#[tokio::test]
async fn unknown_method_gets_unimplemented() {
    let ts = TestServer::start(ServerOptions::default(), vec![echo_service()]).await;
    let client = ts.client().await;

    let reply = client
        .unary("/pb.StudentService/Nonexistent", b"ignored")
        .await
        .unwrap();
    assert_eq!(reply.status.code, Code::Unimplemented as u8);
    assert!(reply.body.is_empty());

    let reply = client.unary("/no.SuchService/Method", b"").await.unwrap();
    assert_eq!(reply.status.code, Code::Unimplemented as u8);

    ts.stop();
}

#[tokio::test]
async fn worker_exhaustion_rejects_with_resource_exhausted() {
    let gate = Arc::new(Semaphore::new(0));
    let handler_gate = Arc::clone(&gate);
    let blocking = ServiceDesc::new("pb.SlowService").unary("Block", move |_ctx, body: Bytes| {
        let gate = Arc::clone(&handler_gate);
        async move {
            let _permit = gate.acquire().await;
            Ok(Some(body))
        }
    });

    let opts = ServerOptions::default().with_num_server_workers(1);
    let ts = TestServer::start(opts, vec![blocking]).await;
    let client = Arc::new(ts.client().await);

    // First call occupies the only worker.
    let first_client = Arc::clone(&client);
    let first = tokio::spawn(async move {
        first_client
            .unary("/pb.SlowService/Block", b"first")
            .await
            .unwrap()
    });

    // Let the first call reach the worker before submitting the second.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = client.unary("/pb.SlowService/Block", b"second").await.unwrap();
    assert_eq!(second.status.code, Code::ResourceExhausted as u8);
    assert!(second.body.is_empty());

    // Release the worker; the first call completes normally.
    gate.add_permits(1);
    let first = timeout(Duration::from_secs(5), first).await.unwrap().unwrap();
    assert_eq!(first.status.code, Code::Ok as u8);
    assert_eq!(&first.body[..], b"first");

    ts.stop();
}

#[tokio::test]
async fn idle_connection_closes_with_session_timeout() {
    let opts = ServerOptions::default().with_max_connection_idle(Duration::from_millis(100));
    let ts = TestServer::start(opts, vec![echo_service()]).await;
    let client = ts.client().await;

    // One frame starts the idle clock; then silence.
    client
        .unary("/pb.StudentService/CreateStudent", b"x")
        .await
        .unwrap();

    let reason = timeout(Duration::from_secs(5), client.closed())
        .await
        .expect("connection closed within the deadline");
    match reason {
        quinn::ConnectionError::ApplicationClosed(close) => {
            assert_eq!(close.error_code, quinn::VarInt::from_u32(0xFF00));
        }
        other => panic!("expected application close, got {other:?}"),
    }

    ts.stop();
}

#[tokio::test]
async fn ping_resets_idle_timer() {
    let opts = ServerOptions::default().with_max_connection_idle(Duration::from_millis(400));
    let ts = TestServer::start(opts, vec![echo_service()]).await;
    let client = ts.client().await;

    // Pings spaced beyond half the budget keep the connection alive only
    // because each one resets the timer.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        client.ping().await.unwrap();
    }

    // Silence now runs the budget out.
    let reason = timeout(Duration::from_secs(5), client.closed())
        .await
        .expect("connection closed after going idle");
    match reason {
        quinn::ConnectionError::ApplicationClosed(close) => {
            assert_eq!(close.error_code, quinn::VarInt::from_u32(0xFF00));
        }
        other => panic!("expected application close, got {other:?}"),
    }

    ts.stop();
}

#[tokio::test]
async fn publish_props_reach_the_handler() {
    let seen: Arc<Mutex<Option<Props>>> = Arc::new(Mutex::new(None));
    let handler_seen = Arc::clone(&seen);
    let service = ServiceDesc::new("pb.PropsService").unary(
        "Record",
        move |ctx: CallContext, _body: Bytes| {
            let seen = Arc::clone(&handler_seen);
            async move {
                *seen.lock().unwrap() = Some(ctx.props);
                Ok(None)
            }
        },
    );

    let ts = TestServer::start(ServerOptions::default(), vec![service]).await;
    let client = ts.client().await;

    let mut props = Props::new();
    props.insert("trace-id", vec!["abc".to_string()]);
    props.insert(
        "hdr",
        vec!["x".to_string(), "y".to_string(), "z".to_string()],
    );

    let reply = client
        .unary_with("/pb.PropsService/Record", b"", props.clone(), false)
        .await
        .unwrap();
    assert_eq!(reply.status.code, Code::Ok as u8);
    assert!(reply.body.is_empty());

    let recorded = seen.lock().unwrap().take().expect("handler ran");
    assert_eq!(recorded, props);

    ts.stop();
}

#[tokio::test]
async fn streaming_echo_round_trip() {
    let chat = ServiceDesc::new("demo.EchoService").streaming("Chat", |_ctx, stream| {
        Box::pin(async move {
            while let Some(message) = stream.recv().await? {
                stream.send(Some(&message)).await?;
            }
            Ok(())
        })
    });

    let ts = TestServer::start(ServerOptions::default(), vec![chat]).await;
    let client = ts.client().await;

    let mut stream = client.streaming("/demo.EchoService/Chat").await.unwrap();
    for message in [&b"one"[..], b"two", b"three"] {
        stream.send(Some(message)).await.unwrap();
        let echoed = timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap()
            .expect("echo before end of stream");
        assert_eq!(&echoed[..], message);
    }

    // Closing our half ends the handler, which ends the server's half.
    stream.finish();
    let end = timeout(Duration::from_secs(5), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(end.is_none());

    ts.stop();
}

#[tokio::test]
async fn unsupported_first_message_closes_connection() {
    let ts = TestServer::start(ServerOptions::default(), vec![echo_service()]).await;
    let client = ts.client().await;

    let (mut send, _recv) = client.connection().open_bi().await.unwrap();
    let stray = Message::PubAck(PubAck {
        header: Header::default(),
        message_id: 9,
        status: Status::ok(),
        payload: None,
    });
    write_message(&mut send, &stray).await.unwrap();
    let _ = send.finish();

    let reason = timeout(Duration::from_secs(5), client.closed())
        .await
        .expect("connection closed");
    match reason {
        quinn::ConnectionError::ApplicationClosed(close) => {
            assert_eq!(close.error_code, quinn::VarInt::from_u32(0xFF01));
        }
        other => panic!("expected application close, got {other:?}"),
    }

    ts.stop();
}

#[tokio::test]
async fn disconnect_closes_gracefully() {
    let ts = TestServer::start(ServerOptions::default(), vec![echo_service()]).await;
    let client = ts.client().await;

    client.disconnect().await.unwrap();

    let reason = timeout(Duration::from_secs(5), client.closed())
        .await
        .expect("connection closed");
    match reason {
        quinn::ConnectionError::ApplicationClosed(close) => {
            assert_eq!(close.error_code, quinn::VarInt::from_u32(0));
        }
        other => panic!("expected graceful close, got {other:?}"),
    }

    ts.stop();
}

#[tokio::test]
async fn handler_error_closes_stream_without_ack() {
    let failing = ServiceDesc::new("pb.FailService").unary("Fail", |_ctx, _body: Bytes| async move {
        Err(quiver_server::ServerError::Handler("boom".to_string()))
    });
    let ts = TestServer::start(ServerOptions::default(), vec![failing]).await;
    let client = ts.client().await;

    // No PubAck is synthesised; the stream just finishes empty.
    let result = client.unary("/pb.FailService/Fail", b"x").await;
    assert!(matches!(
        result,
        Err(quiver_client::ClientError::ConnectionClosed)
    ));

    ts.stop();
}

#[tokio::test]
async fn concurrent_unary_calls_on_one_connection() {
    let ts = TestServer::start(ServerOptions::default(), vec![echo_service()]).await;
    let client = Arc::new(ts.client().await);

    let mut tasks = Vec::new();
    for i in 0..16u32 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            let body = format!("payload-{i}");
            let reply = client
                .unary("/pb.StudentService/CreateStudent", body.as_bytes())
                .await
                .unwrap();
            assert_eq!(reply.status.code, Code::Ok as u8);
            assert_eq!(&reply.body[..], body.as_bytes());
        }));
    }
    for task in tasks {
        timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    }

    ts.stop();
}

#[tokio::test]
async fn shutdown_fires_done() {
    let ts = TestServer::start(ServerOptions::default(), vec![]).await;
    ts.server.shutdown();
    timeout(Duration::from_secs(5), ts.server.done())
        .await
        .expect("accept loop exits on shutdown");
    ts.serve_task.abort();
}
