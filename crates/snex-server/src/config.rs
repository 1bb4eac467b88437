use clap::Parser;

pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
pub const DEFAULT_LISTEN_PORT: u16 = 8191;

#[derive(Debug, Clone, Parser)]
#[command(name = "snex-server", version, about)]
struct Args {
    /// Host or IP the RPC listener binds to.
    ///
    /// Environment variable: `SNEX_LISTEN_HOST`.
    #[arg(long)]
    listen_host: Option<String>,

    /// Port the RPC listener binds to.
    ///
    /// Environment variable: `SNEX_LISTEN_PORT`.
    #[arg(long)]
    listen_port: Option<u16>,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `SNEX_LOG`.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub log_level: String,
}

impl Config {
    /// Environment-only configuration. Unset or unparseable values fall back
    /// to the documented defaults.
    pub fn from_env() -> Config {
        let listen_host = std::env::var("SNEX_LISTEN_HOST")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string());

        let listen_port = std::env::var("SNEX_LISTEN_PORT")
            .ok()
            .and_then(|v| v.trim().parse::<u16>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_LISTEN_PORT);

        let log_level = std::env::var("SNEX_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());

        Config {
            listen_host,
            listen_port,
            log_level,
        }
    }

    /// Environment configuration with command-line flags layered on top.
    pub fn load() -> Config {
        let args = Args::parse();
        let mut config = Config::from_env();

        if let Some(host) = args.listen_host {
            config.listen_host = host;
        }
        if let Some(port) = args.listen_port {
            config.listen_port = port;
        }
        if let Some(level) = args.log_level {
            config.log_level = level;
        }
        config
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}
