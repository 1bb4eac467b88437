//! Exercises the Lua bridge driver against a scripted TCP peer.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use snex_core::memory::Deadline;
use snex_core::{
    AddressSpace, DeviceError, DeviceRegistry, DeviceUri, DriverRegistry, MappingMode,
    MemoryReadRequest, MemoryWriteRequest,
};
use snex_luabridge::LuaBridgeDriver;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct FakeBridge {
    addr: SocketAddr,
    lines: Arc<StdMutex<Vec<String>>>,
    short_reads: Arc<StdMutex<bool>>,
    task: JoinHandle<()>,
}

impl FakeBridge {
    async fn start() -> FakeBridge {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let lines = Arc::new(StdMutex::new(Vec::new()));
        let short_reads = Arc::new(StdMutex::new(false));

        let task_lines = lines.clone();
        let task_short = short_reads.clone();
        // One connection at a time, handled inline, so aborting this task
        // tears the live connection down with it.
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let mut stream = BufReader::new(stream);
                let mut line = String::new();
                loop {
                    line.clear();
                    match stream.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    task_lines.lock().unwrap().push(line.trim_end().to_string());

                    let mut parts = line.trim_end().split('|');
                    if parts.next() == Some("Read") {
                        let addr: u32 = parts.next().unwrap().parse().unwrap();
                        let mut size: u32 = parts.next().unwrap().parse().unwrap();
                        if *task_short.lock().unwrap() && size > 0 {
                            size -= 1;
                        }
                        let bytes: Vec<String> = (0..size)
                            .map(|i| ((addr + i) & 0xFF).to_string())
                            .collect();
                        let reply = format!("{}\n", bytes.join(","));
                        if stream.get_mut().write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        FakeBridge {
            addr,
            lines,
            short_reads,
            task,
        }
    }

    fn uri(&self) -> DeviceUri {
        DeviceUri::parse(&format!("luabridge://{}", self.addr)).unwrap()
    }

    fn received(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    fn shutdown(&self) {
        self.task.abort();
    }
}

fn registry() -> DeviceRegistry {
    let drivers = Arc::new(DriverRegistry::new());
    drivers.register(Arc::new(LuaBridgeDriver::new())).unwrap();
    drivers.seal();
    DeviceRegistry::new(drivers)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_round_trip_the_line_protocol() {
    let bridge = FakeBridge::start().await;
    let registry = registry();

    let response = registry
        .single_read(
            &bridge.uri(),
            MappingMode::LoRom,
            MemoryReadRequest {
                request_space: AddressSpace::SnesABus,
                request_address: 0x7E_0000,
                size: 4,
            },
            Deadline::NONE,
        )
        .await
        .unwrap();

    assert_eq!(response.data, vec![0, 1, 2, 3]);
    assert_eq!(bridge.received(), vec!["Read|8257536|4".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writes_and_reset_go_unacknowledged() {
    let bridge = FakeBridge::start().await;
    let registry = registry();
    let uri = bridge.uri();

    let response = registry
        .single_write(
            &uri,
            MappingMode::LoRom,
            MemoryWriteRequest {
                request_space: AddressSpace::SnesABus,
                request_address: 0x7E_0000,
                data: vec![0xAA, 0x01],
            },
            Deadline::NONE,
        )
        .await
        .unwrap();
    assert_eq!(response.size, 2);

    registry.reset(&uri, Deadline::NONE).await.unwrap();

    // Follow up with a read so the test only checks the log once the fake
    // has certainly consumed the unacknowledged lines before it.
    registry
        .single_read(
            &uri,
            MappingMode::LoRom,
            MemoryReadRequest {
                request_space: AddressSpace::SnesABus,
                request_address: 0x7E_0000,
                size: 1,
            },
            Deadline::NONE,
        )
        .await
        .unwrap();

    assert_eq!(
        bridge.received(),
        vec![
            "Write|8257536|170|1".to_string(),
            "Reset".to_string(),
            "Read|8257536|1".to_string(),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_reply_is_a_protocol_error() {
    let bridge = FakeBridge::start().await;
    *bridge.short_reads.lock().unwrap() = true;
    let registry = registry();

    let err = registry
        .single_read(
            &bridge.uri(),
            MappingMode::LoRom,
            MemoryReadRequest {
                request_space: AddressSpace::SnesABus,
                request_address: 0x7E_0000,
                size: 4,
            },
            Deadline::NONE,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::ProtocolError(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn torn_connection_is_fatal_and_reopens() {
    let bridge = FakeBridge::start().await;
    let registry = registry();
    let uri = bridge.uri();

    let first = registry.open_or_reuse(&uri).await.unwrap();

    bridge.shutdown();

    let err = registry
        .single_read(
            &uri,
            MappingMode::LoRom,
            MemoryReadRequest {
                request_space: AddressSpace::SnesABus,
                request_address: 0x7E_0000,
                size: 4,
            },
            Deadline::after(std::time::Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert!(err.is_fatal(), "unexpected error kind: {err}");

    // The handle was dropped; a reopen attempt gets a fresh identity or a
    // connect error now that the peer is gone.
    match registry.open_or_reuse(&uri).await {
        Ok(handle) => assert_ne!(first.id(), handle.id()),
        Err(err) => assert!(matches!(
            err,
            DeviceError::Transport(_) | DeviceError::DeadlineExceeded
        )),
    }
}
