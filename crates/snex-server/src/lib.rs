#![forbid(unsafe_code)]

//! The SNEX gateway server: a JSON/WebSocket dispatcher over the device
//! registry. The wire layer stays thin; every operation maps one-to-one onto
//! a core registry call.

pub mod config;
pub mod drivers;
pub mod logging;
pub mod rpc;
pub mod server;

pub use config::Config;
pub use drivers::register_all;
pub use server::{build_app, start, AppState, ServerHandle};
