//! WebSocket channel: patches in both directions and server-side pushes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use vmsync_server::patch::PatchOperation;
use vmsync_server::{Application, Delivery, RunningServer, SessionToken, ViewModel};

mod common;

use common::{create_request, start_app, test_config, RawClient};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Counter;

impl Application for Counter {
    fn initial_state(&self) -> Value {
        json!({"input": 0, "total": 0})
    }

    fn on_input(&self, vm: &mut ViewModel, op: &PatchOperation) {
        if op.path == "/input" {
            let input = vm.get("/input").ok().and_then(|v| v.as_i64()).unwrap_or(0);
            let total = vm.get("/total").ok().and_then(|v| v.as_i64()).unwrap_or(0);
            let _ = vm.set("/total", json!(total + input));
        }
    }
}

async fn open(server: &RunningServer) -> (String, Socket) {
    let mut client = RawClient::connect(server).await;
    let token = client.send(create_request()).await.token();
    let url = format!("ws://{}/vm/wsupgrade/{}", server.local_addr(), token);
    let (socket, response) = connect_async(url).await.expect("upgrade");
    assert_eq!(response.status().as_u16(), 101);
    (token, socket)
}

async fn next_json(socket: &mut Socket) -> Value {
    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("frame within timeout")
        .expect("stream open")
        .expect("valid frame");
    serde_json::from_str(message.to_text().expect("text frame")).expect("json frame")
}

#[tokio::test]
async fn frames_carry_patches_both_ways() {
    let server = start_app(test_config(2), Arc::new(Counter)).await;
    let (_token, mut socket) = open(&server).await;

    socket
        .send(Message::text(r#"[{"op":"replace","path":"/input","value":5}]"#))
        .await
        .unwrap();
    assert_eq!(
        next_json(&mut socket).await,
        json!([{"op": "replace", "path": "/total", "value": 5}])
    );

    socket
        .send(Message::text(r#"[{"op":"replace","path":"/input","value":2}]"#))
        .await
        .unwrap();
    assert_eq!(
        next_json(&mut socket).await,
        json!([{"op": "replace", "path": "/total", "value": 7}])
    );

    socket
        .send(Message::text(r#"[{"op":"remove","path":"/nope"}]"#))
        .await
        .unwrap();
    let error = next_json(&mut socket).await;
    assert_eq!(error["operationIndex"], 0);

    // The channel survives a rejected document.
    socket
        .send(Message::text(r#"[{"op":"replace","path":"/input","value":1}]"#))
        .await
        .unwrap();
    assert_eq!(
        next_json(&mut socket).await,
        json!([{"op": "replace", "path": "/total", "value": 8}])
    );

    server.stop().await;
}

#[tokio::test]
async fn server_updates_are_pushed() {
    let server = start_app(test_config(1), Arc::new(Counter)).await;
    let (token, mut socket) = open(&server).await;
    let token: SessionToken = token.parse().unwrap();

    let ((), delivery) = server
        .pool()
        .update(&token, |vm| vm.set("/status", json!("ready")).unwrap())
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Pushed);
    assert_eq!(
        next_json(&mut socket).await,
        json!([{"op": "add", "path": "/status", "value": "ready"}])
    );

    server.stop().await;
}

#[tokio::test]
async fn closing_the_socket_unbinds_the_session() {
    let server = start_app(test_config(1), Arc::new(Counter)).await;
    let (token, mut socket) = open(&server).await;
    let token: SessionToken = token.parse().unwrap();

    let bound = server.pool().stats().await[0].websocket_bound;
    assert_eq!(bound, 1);

    socket.close(None).await.unwrap();
    let mut unbound = false;
    for _ in 0..50 {
        if server.pool().stats().await[0].websocket_bound == 0 {
            unbound = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(unbound);

    // The session outlives its channel; updates now wait for the next request.
    let ((), delivery) = server
        .pool()
        .update(&token, |vm| vm.set("/later", json!(1)).unwrap())
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Pending);

    server.stop().await;
}
