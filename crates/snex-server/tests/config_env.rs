use std::sync::Mutex;

use snex_server::config::{Config, DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT};

static ENV_LOCK: Mutex<()> = Mutex::new(());

struct EnvVarGuard {
    key: &'static str,
    prior: Option<String>,
}

impl EnvVarGuard {
    fn set(key: &'static str, value: &str) -> Self {
        let prior = std::env::var(key).ok();
        std::env::set_var(key, value);
        Self { key, prior }
    }

    fn unset(key: &'static str) -> Self {
        let prior = std::env::var(key).ok();
        std::env::remove_var(key);
        Self { key, prior }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match self.prior.take() {
            Some(value) => std::env::set_var(self.key, value),
            None => std::env::remove_var(self.key),
        }
    }
}

fn reset_env() -> Vec<EnvVarGuard> {
    vec![
        EnvVarGuard::unset("SNEX_LISTEN_HOST"),
        EnvVarGuard::unset("SNEX_LISTEN_PORT"),
        EnvVarGuard::unset("SNEX_LOG"),
    ]
}

#[test]
fn unset_environment_yields_documented_defaults() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _guards = reset_env();

    let config = Config::from_env();
    assert_eq!(config.listen_host, DEFAULT_LISTEN_HOST);
    assert_eq!(config.listen_port, DEFAULT_LISTEN_PORT);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.listen_addr(), "0.0.0.0:8191");
}

#[test]
fn environment_overrides_are_honored() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _guards = reset_env();

    let _host = EnvVarGuard::set("SNEX_LISTEN_HOST", "127.0.0.1");
    let _port = EnvVarGuard::set("SNEX_LISTEN_PORT", "9000");
    let _log = EnvVarGuard::set("SNEX_LOG", "debug,snex_core=trace");

    let config = Config::from_env();
    assert_eq!(config.listen_addr(), "127.0.0.1:9000");
    assert_eq!(config.log_level, "debug,snex_core=trace");
}

#[test]
fn invalid_port_falls_back_to_default() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _guards = reset_env();

    for bad in ["not-a-port", "-1", "0", "65536", ""] {
        let _port = EnvVarGuard::set("SNEX_LISTEN_PORT", bad);
        let config = Config::from_env();
        assert_eq!(config.listen_port, DEFAULT_LISTEN_PORT, "value {bad:?}");
    }
}

#[test]
fn blank_host_falls_back_to_default() {
    let _lock = ENV_LOCK.lock().unwrap();
    let _guards = reset_env();

    let _host = EnvVarGuard::set("SNEX_LISTEN_HOST", "   ");
    let config = Config::from_env();
    assert_eq!(config.listen_host, DEFAULT_LISTEN_HOST);
}
