use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use cameradar_core::engine::Dictionaries;
use cameradar_core::stream::Stream;
use cameradar_engine::{MockEngine, MockReply};
use cameradar_server::{start, ConnectionConfig, ScanDriver, ServerConfig, ServerHandle};
use cameradar_telemetry::MetricsRecorder;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(engine: Arc<MockEngine>) -> ServerHandle {
    serve_with(engine, ConnectionConfig::default()).await
}

async fn serve_with(engine: Arc<MockEngine>, connection: ConnectionConfig) -> ServerHandle {
    let metrics = Arc::new(MetricsRecorder::new());
    let driver = ScanDriver::new(
        engine,
        Arc::new(Dictionaries::unchecked("/tmp/routes", "/tmp/credentials.json")),
        Arc::clone(&metrics),
    );
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        connection,
        ..Default::default()
    };
    start(config, driver, metrics).await.unwrap()
}

async fn connect(handle: &ServerHandle) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/", handle.local_addr()))
        .await
        .unwrap();
    ws
}

/// Next text or binary payload as JSON, skipping control frames.
async fn next_json(ws: &mut Client) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for server message")
            .expect("connection ended")
            .expect("read error");
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                return serde_json::from_str(msg.to_text().unwrap()).unwrap();
            }
            Message::Close(_) => panic!("server closed the connection"),
            _ => continue,
        }
    }
}

fn camera(addr: &str) -> Stream {
    let mut s = Stream::new(addr, 554);
    s.device = "Hikvision".into();
    s
}

fn accessed(addr: &str) -> Stream {
    let mut s = camera(addr);
    s.route_found = true;
    s.credentials_found = true;
    s.route = "Streaming/Channels/101".into();
    s.username = "admin".into();
    s.password = "12345".into();
    s
}

#[tokio::test]
async fn discover_request_gets_result() {
    let engine = Arc::new(MockEngine::new().on_discover(MockReply::Streams(vec![camera("10.0.0.2")])));
    let server = serve(Arc::clone(&engine)).await;
    let mut ws = connect(&server).await;

    ws.send(Message::Text(
        r#"{"target":"10.0.0.0/24","ports":[554],"mode":"discover"}"#.into(),
    ))
    .await
    .unwrap();

    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "result");
    assert_eq!(msg["streams"][0]["address"], "10.0.0.2");
    assert_eq!(msg["streams"][0]["device"], "Hikvision");
    assert_eq!(engine.route_attacks(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn full_scan_runs_attack_passes() {
    let engine = Arc::new(
        MockEngine::new()
            .on_discover(MockReply::Streams(vec![camera("10.0.0.2")]))
            .on_attack(MockReply::Streams(vec![camera("10.0.0.2")]))
            .on_attack(MockReply::Streams(vec![accessed("10.0.0.2")])),
    );
    let server = serve(Arc::clone(&engine)).await;
    let mut ws = connect(&server).await;

    ws.send(Message::Text(r#"{"target":"10.0.0.2"}"#.into()))
        .await
        .unwrap();

    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "result");
    assert_eq!(msg["streams"][0]["routeFound"], true);
    assert_eq!(msg["streams"][0]["username"], "admin");
    assert_eq!(engine.route_attacks(), 1);
    assert_eq!(engine.credential_attacks(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn malformed_message_gets_one_error_and_no_scan() {
    let engine = Arc::new(MockEngine::new().on_discover(MockReply::Streams(vec![])));
    let server = serve(Arc::clone(&engine)).await;
    let mut ws = connect(&server).await;

    ws.send(Message::Text(r#"{"ports":[554]}"#.into()))
        .await
        .unwrap();
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["message"], "missing target");

    // The connection stays usable and the next reply belongs to the next request.
    ws.send(Message::Text(r#"{"target":"10.0.0.9"}"#.into()))
        .await
        .unwrap();
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "result");
    assert_eq!(engine.discover_calls(), 1);
    assert_eq!(engine.discovered_targets(), vec!["10.0.0.9"]);

    server.shutdown().await;
}

#[tokio::test]
async fn binary_frames_are_decoded() {
    let engine = Arc::new(MockEngine::new().on_discover(MockReply::Streams(vec![])));
    let server = serve(Arc::clone(&engine)).await;
    let mut ws = connect(&server).await;

    ws.send(Message::Binary(
        br#"{"target":"10.0.0.7","mode":"discover"}"#.to_vec().into(),
    ))
    .await
    .unwrap();
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "result");
    assert_eq!(engine.discovered_targets(), vec!["10.0.0.7"]);

    server.shutdown().await;
}

#[tokio::test]
async fn engine_failure_is_reported_to_sender() {
    let engine = Arc::new(MockEngine::new().on_discover(MockReply::Error(
        cameradar_core::errors::EngineError::Discovery("invalid target".into()),
    )));
    let server = serve(engine).await;
    let mut ws = connect(&server).await;

    ws.send(Message::Text(r#"{"target":"nope"}"#.into()))
        .await
        .unwrap();
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["message"], "discovery failed: invalid target");

    server.shutdown().await;
}

#[tokio::test]
async fn results_go_only_to_their_sender() {
    let engine = Arc::new(
        MockEngine::new()
            .on_discover(MockReply::Streams(vec![camera("10.0.1.1")]))
            .on_discover(MockReply::Streams(vec![camera("10.0.2.1")])),
    );
    let server = serve(engine).await;
    let mut a = connect(&server).await;
    let mut b = connect(&server).await;

    a.send(Message::Text(r#"{"target":"10.0.1.0/24","mode":"discover"}"#.into()))
        .await
        .unwrap();
    let from_a = next_json(&mut a).await;
    b.send(Message::Text(r#"{"target":"10.0.2.0/24","mode":"discover"}"#.into()))
        .await
        .unwrap();
    let from_b = next_json(&mut b).await;

    assert_eq!(from_a["streams"][0]["address"], "10.0.1.1");
    assert_eq!(from_b["streams"][0]["address"], "10.0.2.1");

    server.shutdown().await;
}

#[tokio::test]
async fn one_connection_gets_results_in_order() {
    let engine = Arc::new(
        MockEngine::new()
            .on_discover(MockReply::delayed(
                Duration::from_millis(100),
                MockReply::Streams(vec![camera("10.0.0.1")]),
            ))
            .on_discover(MockReply::Streams(vec![camera("10.0.0.2")]))
            .on_discover(MockReply::Streams(vec![camera("10.0.0.3")])),
    );
    let server = serve(engine).await;
    let mut ws = connect(&server).await;

    for target in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        ws.send(Message::Text(
            format!(r#"{{"target":"{target}","mode":"discover"}}"#).into(),
        ))
        .await
        .unwrap();
    }
    for expected in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        let msg = next_json(&mut ws).await;
        assert_eq!(msg["streams"][0]["address"], expected);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn disconnect_mid_scan_does_not_block_others() {
    let engine = Arc::new(
        MockEngine::new()
            .on_discover(MockReply::delayed(
                Duration::from_millis(200),
                MockReply::Streams(vec![camera("10.0.0.1")]),
            ))
            .on_discover(MockReply::Streams(vec![camera("10.0.0.2")])),
    );
    let server = serve(Arc::clone(&engine)).await;
    let mut leaving = connect(&server).await;
    let mut staying = connect(&server).await;

    leaving
        .send(Message::Text(r#"{"target":"10.0.0.1","mode":"discover"}"#.into()))
        .await
        .unwrap();
    // Let the slow scan start before its requester goes away.
    tokio::time::sleep(Duration::from_millis(50)).await;
    leaving.close(None).await.unwrap();
    drop(leaving);
    staying
        .send(Message::Text(r#"{"target":"10.0.0.2","mode":"discover"}"#.into()))
        .await
        .unwrap();

    let msg = next_json(&mut staying).await;
    assert_eq!(msg["streams"][0]["address"], "10.0.0.2");
    assert_eq!(engine.discover_calls(), 2);
    assert_eq!(engine.max_in_flight(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn health_counts_live_connections() {
    let server = serve(Arc::new(MockEngine::new())).await;
    let url = format!("http://{}/health", server.local_addr());

    let mut ws = connect(&server).await;
    // Round-trip a message so the connection is registered before we ask.
    ws.send(Message::Text(r#"{"target":""}"#.into())).await.unwrap();
    let _ = next_json(&mut ws).await;

    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["connections"], 1);

    ws.close(None).await.unwrap();
    let mut connections = 1;
    for _ in 0..50 {
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        connections = body["connections"].as_u64().unwrap();
        if connections == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(connections, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_client_connections() {
    let server = serve(Arc::new(MockEngine::new())).await;
    let mut ws = connect(&server).await;
    ws.send(Message::Text(r#"{"target":""}"#.into())).await.unwrap();
    let _ = next_json(&mut ws).await;

    server.shutdown().await;

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "client connection stayed open after shutdown");
}

#[tokio::test]
async fn client_that_stops_reading_is_dropped() {
    let mut engine = MockEngine::new();
    for i in 0..24 {
        let mut big = camera(&format!("10.0.0.{i}"));
        big.device = "x".repeat(1_000_000);
        engine = engine.on_discover(MockReply::Streams(vec![big]));
    }
    let server = serve_with(
        Arc::new(engine),
        ConnectionConfig {
            heartbeat_interval: Duration::from_millis(200),
            client_timeout: Duration::from_millis(600),
            drain_timeout: Duration::from_millis(200),
            ..ConnectionConfig::default()
        },
    )
    .await;
    let url = format!("http://{}/health", server.local_addr());

    let mut ws = connect(&server).await;
    for i in 0..24 {
        ws.send(Message::Text(
            format!(r#"{{"target":"10.0.0.{i}","mode":"discover"}}"#).into(),
        ))
        .await
        .unwrap();
    }
    // Never read again; the server must give up on this client by itself.
    let mut connections = 1;
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        connections = body["connections"].as_u64().unwrap();
        if connections == 0 {
            break;
        }
    }
    assert_eq!(connections, 0, "stalled client is still registered");

    drop(ws);
    server.shutdown().await;
}
