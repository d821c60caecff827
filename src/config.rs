use std::net::SocketAddr;
use std::path::PathBuf;

/// Runtime configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = match std::env::var("PORTALD_ADDR") {
            Ok(v) => v
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORTALD_ADDR {v:?}: {e}"))?,
            Err(_) => SocketAddr::from(([127, 0, 0, 1], 5000)),
        };
        let data_dir = std::env::var("PORTALD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        Ok(Config {
            bind_addr,
            data_dir,
        })
    }
}
