use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use snex_core::{DeviceRegistry, DriverRegistry};
use snex_server::{start, ServerHandle};

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    _server: ServerHandle,
}

impl TestServer {
    async fn start() -> anyhow::Result<TestServer> {
        // Mock-only registry: hardware and emulator probes have no place in
        // an HTTP surface test.
        let drivers = Arc::new(DriverRegistry::new());
        drivers.register(Arc::new(snex_mock::MockDriver::new()))?;
        drivers.seal();
        let registry = Arc::new(DeviceRegistry::new(drivers));

        let server = start("127.0.0.1:0", registry).await?;
        let base_url = format!("http://{}", server.local_addr());
        let client = reqwest::Client::new();

        let health_url = format!("{base_url}/healthz");
        let mut ready = false;
        for _ in 0..50 {
            if let Ok(resp) = client.get(&health_url).send().await {
                if resp.status().is_success() {
                    ready = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::ensure!(ready, "/healthz did not become ready in time");

        Ok(TestServer {
            base_url,
            client,
            _server: server,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lists_devices_with_kind_filter() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let all: Value = server
        .client
        .get(server.url("/v1/devices"))
        .send()
        .await?
        .json()
        .await?;
    let devices = all.as_array().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["uri"], "mock://0");
    assert_eq!(devices[0]["kind"], "mock");
    assert!(devices[0]["capabilities"]
        .as_array()
        .unwrap()
        .contains(&json!("read_memory")));

    let none: Value = server
        .client
        .get(server.url("/v1/devices"))
        .query(&[("kinds", "ra,luabridge")])
        .send()
        .await?
        .json()
        .await?;
    assert!(none.as_array().unwrap().is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_then_read_round_trips_across_address_spaces() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    // Write WRAM through the bus view.
    let write: Value = server
        .client
        .post(server.url("/v1/device/write"))
        .json(&json!({
            "uri": "mock://0",
            "mapping": "lorom",
            "request": {"space": "snesabus", "address": 0x7E_0010, "data": "aabbccdd"},
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(write["size"], 4);
    assert_eq!(write["device_address"], 0xF5_0010);

    // Read the same bytes back through the linear view.
    let read: Value = server
        .client
        .post(server.url("/v1/device/read"))
        .json(&json!({
            "uri": "mock://0",
            "mapping": "lorom",
            "request": {"space": "fxpakpro", "address": 0xF5_0010, "size": 4},
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(read["data"], "aabbccdd");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multi_read_preserves_request_order() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let responses: Value = server
        .client
        .post(server.url("/v1/device/multi_read"))
        .json(&json!({
            "uri": "mock://0",
            "mapping": "lorom",
            "requests": [
                {"space": "fxpakpro", "address": 0xF5_1000, "size": 2},
                {"space": "fxpakpro", "address": 0xF5_0000, "size": 3},
            ],
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let responses = responses.as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["address"], 0xF5_1000);
    assert_eq!(responses[0]["data"], "0000");
    assert_eq!(responses[1]["address"], 0xF5_0000);
    assert_eq!(responses[1]["data"], "000000");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn methods_reports_the_capability_set() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let methods: Value = server
        .client
        .get(server.url("/v1/device/methods"))
        .query(&[("uri", "mock://0")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let methods = methods.as_array().unwrap();
    assert!(methods.contains(&json!("read_memory")));
    assert!(methods.contains(&json!("write_memory")));
    assert!(methods.contains(&json!("reset_system")));
    assert!(!methods.contains(&json!("pause_toggle")));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_kinds_map_to_statuses() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    // Unknown scheme -> 404.
    let resp = server
        .client
        .post(server.url("/v1/device/read"))
        .json(&json!({
            "uri": "nosuch://0",
            "request": {"space": "fxpakpro", "address": 0, "size": 1},
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["kind"], "scheme_unknown");

    // Unsupported capability -> 501.
    let resp = server
        .client
        .post(server.url("/v1/device/pause_toggle"))
        .json(&json!({"uri": "mock://0"}))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_IMPLEMENTED);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["kind"], "capability_unavailable");

    // Untranslatable address -> 400, and the batch fails atomically.
    let resp = server
        .client
        .post(server.url("/v1/device/read"))
        .json(&json!({
            "uri": "mock://0",
            "mapping": "lorom",
            "request": {"space": "snesabus", "address": 0x00_2100, "size": 1},
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["kind"], "address_out_of_range");

    // Bad hex payload -> 400.
    let resp = server
        .client
        .post(server.url("/v1/device/write"))
        .json(&json!({
            "uri": "mock://0",
            "request": {"space": "fxpakpro", "address": 0, "data": "xyz"},
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["kind"], "invalid_request");

    // Malformed URI -> 400.
    let resp = server
        .client
        .get(server.url("/v1/device/methods"))
        .query(&[("uri", "not-a-uri")])
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"]["kind"], "invalid_uri");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_succeeds_on_the_mock() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let resp = server
        .client
        .post(server.url("/v1/device/reset"))
        .json(&json!({"uri": "mock://0"}))
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    Ok(())
}
