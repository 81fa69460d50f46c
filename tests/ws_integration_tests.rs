use futures::{SinkExt, StreamExt};
use marketws::core::kernel::{SecurityLevel, WsApiClient, WsRequest, WsSession};
use marketws::stream::{MarketStream, StreamEvent};
use marketws::{Credential, WsConfig, WsError};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;

const TEST_SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";

/// Bind a local listener and hand the first accepted WebSocket to `serve`.
/// Returns the `ws://` URL to dial.
async fn spawn_server<F, Fut>(serve: F) -> String
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        serve(ws).await;
    });
    format!("ws://{}", addr)
}

fn test_config(url: &str) -> WsConfig {
    WsConfig::new(url.to_string()).with_connect_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_dial_error_surfaces_without_any_write() {
    // Grab a port, then free it so nothing is listening there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut client = WsApiClient::new(test_config(&format!("ws://{}", addr)));
    let request = WsRequest::new("time", SecurityLevel::None);
    match client.call(request, &CancellationToken::new()).await {
        Err(WsError::Dial(_)) => {}
        other => panic!("expected a dial error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_single_shot_call_returns_exactly_one_response() {
    let url = spawn_server(|mut ws| async move {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let request: Value = serde_json::from_str(&text).unwrap();
                let reply = json!({
                    "id": request["id"],
                    "status": 200,
                    "result": {"serverTime": 1_737_447_120_000_i64}
                });
                ws.send(Message::Text(reply.to_string())).await.unwrap();
                break;
            }
        }
        // Drain until the client closes.
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let mut client = WsApiClient::new(test_config(&url));
    let request = WsRequest::new("time", SecurityLevel::None);
    let response = client
        .call(request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert!(response.id.is_some());
    assert!(response.is_success());
    assert_eq!(
        response.result.unwrap()["serverTime"],
        1_737_447_120_000_i64
    );
}

#[tokio::test]
async fn test_signed_call_carries_timestamp_api_key_and_signature() {
    let url = spawn_server(|mut ws| async move {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let request: Value = serde_json::from_str(&text).unwrap();
                let params = request["params"].as_object().unwrap();
                assert_eq!(params["apiKey"], "integration-key");
                assert!(params.contains_key("timestamp"));
                assert!(params.contains_key("signature"));
                let reply = json!({"id": request["id"], "status": 200, "result": {}});
                ws.send(Message::Text(reply.to_string())).await.unwrap();
                break;
            }
        }
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let credential = Credential::new("integration-key".to_string(), TEST_SECRET.to_string());
    let mut client = WsApiClient::with_credential(test_config(&url), credential).unwrap();
    let request = WsRequest::new("account.status", SecurityLevel::Signed);
    let response = client
        .call(request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_cancellation_before_any_frame_returns_cancelled() {
    let url = spawn_server(|mut ws| async move {
        // Accept the request but never reply; hold the connection open
        // until the client tears it down.
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let mut client = WsApiClient::new(test_config(&url));
    let request = WsRequest::new("time", SecurityLevel::None);
    match client.call(request, &cancel).await {
        Err(WsError::Cancelled) => {}
        other => panic!("expected cancellation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_session_close_is_idempotent() {
    let url = spawn_server(|mut ws| async move {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let config = test_config(&url);
    let mut session = WsSession::connect(&config, &url, CancellationToken::new())
        .await
        .unwrap();
    session.close().await;
    session.close().await;
    session.close().await;
}

#[tokio::test]
async fn test_stream_survives_bad_frame_and_preserves_order() {
    let url = spawn_server(|mut ws| async move {
        let frames = [
            // Subscription ack: filtered, never surfaced.
            json!({"result": null, "id": 1}).to_string(),
            json!({
                "e": "trade", "E": 1_i64, "s": "BTCUSDT", "t": 7_i64,
                "p": "101852.71", "q": "0.001", "T": 1_i64, "m": false
            })
            .to_string(),
            // Unknown discriminator: a per-frame decode error.
            json!({"e": "mysteryEvent", "E": 2_i64}).to_string(),
            json!({
                "lastUpdateId": 160_i64,
                "bids": [["0.0024", "10"]],
                "asks": [["0.0026", "100"]]
            })
            .to_string(),
        ];
        for frame in frames {
            ws.send(Message::Text(frame)).await.unwrap();
        }
        let _ = ws.close(None).await;
    })
    .await;

    let config = test_config(&url);
    let mut stream = MarketStream::connect(&config, &url, CancellationToken::new())
        .await
        .unwrap();

    match stream.next_event().await {
        Some(Ok(StreamEvent::Trade(trade))) => assert_eq!(trade.symbol, "BTCUSDT"),
        other => panic!("expected trade first, got {:?}", other),
    }
    match stream.next_event().await {
        Some(Err(WsError::Decode(_))) => {}
        other => panic!("expected a decode error second, got {:?}", other),
    }
    // The decode error did not terminate the stream.
    match stream.next_event().await {
        Some(Ok(StreamEvent::DepthSnapshot(snapshot))) => {
            assert_eq!(snapshot.last_update_id, 160);
        }
        other => panic!("expected depth snapshot third, got {:?}", other),
    }
    // The server's close is a terminal transport error, surfaced once.
    match stream.next_event().await {
        Some(Err(WsError::Read(_))) => {}
        other => panic!("expected a read error fourth, got {:?}", other),
    }
    assert!(stream.next_event().await.is_none());
}

#[tokio::test]
async fn test_stream_cancellation_ends_the_stream() {
    let url = spawn_server(|mut ws| async move {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let cancel = CancellationToken::new();
    let config = test_config(&url);
    let mut stream = MarketStream::connect(&config, &url, cancel.clone())
        .await
        .unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    assert!(stream.next_event().await.is_none());
    stream.close().await;
}
