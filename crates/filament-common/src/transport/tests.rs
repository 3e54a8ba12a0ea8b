use super::*;
use crate::protocol::error::FilamentError;
use crate::serializer::Serializer;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn tcp(settings: TcpSettings) -> TcpTransporter {
    TcpTransporter::new(Arc::new(Serializer::json()), settings)
}

#[test]
fn test_tcp_settings_defaults() {
    let settings = TcpSettings::default();
    assert_eq!(settings.connect_timeout_ms, 5000);
    assert_eq!(settings.max_frame_bytes, tcp::DEFAULT_MAX_FRAME_BYTES);
    assert!(settings.seed.is_none());
}

#[test]
fn test_tcp_settings_merge_over_defaults() {
    // Partial settings maps keep the defaults for everything absent
    let settings: TcpSettings = serde_json::from_value(json!({"connectTimeoutMs": 250})).unwrap();
    assert_eq!(settings.connect_timeout_ms, 250);
    assert_eq!(settings.max_frame_bytes, tcp::DEFAULT_MAX_FRAME_BYTES);
}

#[test]
fn test_tcp_settings_unknown_key_rejected() {
    let result: Result<TcpSettings> =
        serde_json::from_value(json!({"bogus": true})).map_err(Into::into);
    assert!(result.is_err());
}

#[test]
fn test_tcp_from_uri_sets_seed() {
    let transporter =
        TcpTransporter::from_uri(Arc::new(Serializer::json()), "tcp://10.0.0.5:7100").unwrap();
    assert_eq!(transporter.seed(), Some("10.0.0.5:7100".to_string()));
}

#[test]
fn test_tcp_from_uri_rejects_wrong_scheme() {
    assert!(TcpTransporter::from_uri(Arc::new(Serializer::json()), "nats://host:4222").is_err());
    assert!(TcpTransporter::from_uri(Arc::new(Serializer::json()), "tcp://").is_err());
}

#[tokio::test]
async fn test_tcp_request_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    // Minimal peer: read one request frame, echo the params back
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut kind = [0u8; 1];
        stream.read_exact(&mut kind).await.unwrap();
        assert_eq!(kind[0], tcp::FRAME_REQUEST);

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut payload).await.unwrap();

        let request: CallRequest = serde_json::from_slice(&payload).unwrap();
        let response = CallResponse::success(request.id, request.params.clone());
        let encoded = serde_json::to_vec(&response).unwrap();
        stream
            .write_all(&(encoded.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(&encoded).await.unwrap();
    });

    let transporter = tcp(TcpSettings::default());
    let request = CallRequest::new("math", "echo", json!({"x": 7}));
    let response = transporter.request(&addr, &request).await.unwrap();

    assert!(response.success);
    assert_eq!(response.id, request.id);
    assert_eq!(response.result, Some(json!({"x": 7})));
    server.await.unwrap();
}

#[tokio::test]
async fn test_tcp_publish_heartbeat() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut kind = [0u8; 1];
        stream.read_exact(&mut kind).await.unwrap();
        assert_eq!(kind[0], tcp::FRAME_HEARTBEAT);

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut payload).await.unwrap();

        let beat: Heartbeat = serde_json::from_slice(&payload).unwrap();
        assert_eq!(beat.node_id, "node-1");
    });

    let transporter = tcp(TcpSettings::default());
    let beat = Heartbeat {
        namespace: "dev".to_string(),
        node_id: "node-1".to_string(),
        sequence: 1,
        services: vec![],
        metadata: serde_json::Map::new(),
    };
    transporter.publish_heartbeat(&addr, &beat).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_tcp_connect_refused() {
    // Port 1 on localhost is essentially guaranteed closed
    let transporter = tcp(TcpSettings {
        connect_timeout_ms: 500,
        ..TcpSettings::default()
    });
    let request = CallRequest::new("math", "add", json!({}));
    let err = transporter.request("127.0.0.1:1", &request).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn test_null_transporter() {
    let transporter = NullTransporter;
    assert_eq!(transporter.name(), "Null");
    assert!(transporter.seed().is_none());

    let request = CallRequest::new("math", "add", json!({}));
    let err = transporter.request("anywhere:1", &request).await.unwrap_err();
    assert!(matches!(err, FilamentError::NodeUnavailable { .. }));

    let beat = Heartbeat {
        namespace: "dev".to_string(),
        node_id: "node-1".to_string(),
        sequence: 1,
        services: vec![],
        metadata: serde_json::Map::new(),
    };
    assert!(transporter.publish_heartbeat("anywhere:1", &beat).await.is_ok());
    let goodbye = Disconnect {
        namespace: "dev".to_string(),
        node_id: "node-1".to_string(),
    };
    assert!(transporter.publish_disconnect("anywhere:1", &goodbye).await.is_ok());
}
