//! The WebSocket stream endpoint: many batches over one connection, each
//! dispatched exactly like a unary call.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use snex_core::{DeviceRegistry, DriverRegistry};
use snex_server::start;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_carries_interleaved_batches() -> anyhow::Result<()> {
    let drivers = Arc::new(DriverRegistry::new());
    drivers.register(Arc::new(snex_mock::MockDriver::new()))?;
    drivers.seal();
    let registry = Arc::new(DeviceRegistry::new(drivers));

    let server = start("127.0.0.1:0", registry).await?;
    let url = format!("ws://{}/v1/stream", server.local_addr());

    // The HTTP listener accepts as soon as `start` returns; retry the
    // upgrade a few times anyway to keep the test unflaky under load.
    let mut ws = None;
    for _ in 0..50 {
        match tokio_tungstenite::connect_async(&url).await {
            Ok((socket, _)) => {
                ws = Some(socket);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut ws = ws.expect("websocket upgrade");

    // Write, then read back, then provoke an error, all on one stream.
    ws.send(Message::Text(
        json!({
            "type": "multi_write",
            "uri": "mock://0",
            "mapping": "lorom",
            "requests": [{"space": "fxpakpro", "address": 0xF5_0000, "data": "1337"}],
        })
        .to_string(),
    ))
    .await?;

    let reply: Value = match ws.next().await.expect("write reply")? {
        Message::Text(text) => serde_json::from_str(&text)?,
        other => panic!("unexpected frame {other:?}"),
    };
    assert_eq!(reply["type"], "multi_write");
    assert_eq!(reply["responses"][0]["size"], 2);

    ws.send(Message::Text(
        json!({
            "type": "multi_read",
            "uri": "mock://0",
            "mapping": "lorom",
            "requests": [{"space": "fxpakpro", "address": 0xF5_0000, "size": 2}],
        })
        .to_string(),
    ))
    .await?;

    let reply: Value = match ws.next().await.expect("read reply")? {
        Message::Text(text) => serde_json::from_str(&text)?,
        other => panic!("unexpected frame {other:?}"),
    };
    assert_eq!(reply["type"], "multi_read");
    assert_eq!(reply["responses"][0]["data"], "1337");

    ws.send(Message::Text(
        json!({
            "type": "multi_read",
            "uri": "nosuch://0",
            "requests": [],
        })
        .to_string(),
    ))
    .await?;

    let reply: Value = match ws.next().await.expect("error reply")? {
        Message::Text(text) => serde_json::from_str(&text)?,
        other => panic!("unexpected frame {other:?}"),
    };
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["kind"], "scheme_unknown");

    // The stream survives errors; a later batch still works.
    ws.send(Message::Text(
        json!({
            "type": "multi_read",
            "uri": "mock://0",
            "mapping": "lorom",
            "requests": [{"space": "fxpakpro", "address": 0xF5_0000, "size": 1}],
        })
        .to_string(),
    ))
    .await?;
    let reply: Value = match ws.next().await.expect("follow-up reply")? {
        Message::Text(text) => serde_json::from_str(&text)?,
        other => panic!("unexpected frame {other:?}"),
    };
    assert_eq!(reply["type"], "multi_read");

    ws.close(None).await?;
    server.shutdown().await;
    Ok(())
}
