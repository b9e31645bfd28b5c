use std::io;
use std::path::PathBuf;

/// Server settings, read from `SEATWISE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub seed_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or blank keys take their default;
    /// a set but unparseable number is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            port: parse_or(get("SEATWISE_PORT"), "SEATWISE_PORT", 5433)?,
            bind: get("SEATWISE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: get("SEATWISE_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: get("SEATWISE_PASSWORD").unwrap_or_else(|| "seatwise".into()),
            max_connections: parse_or(get("SEATWISE_MAX_CONNECTIONS"), "SEATWISE_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(get("SEATWISE_COMPACT_THRESHOLD"), "SEATWISE_COMPACT_THRESHOLD", 1000)?,
            tls_cert: get("SEATWISE_TLS_CERT"),
            tls_key: get("SEATWISE_TLS_KEY"),
            metrics_port: get("SEATWISE_METRICS_PORT")
                .map(|v| parse_var(&v, "SEATWISE_METRICS_PORT"))
                .transpose()?,
            seed_file: get("SEATWISE_SEED_FILE").map(PathBuf::from),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("seatwise.wal")
    }
}

fn parse_var<T: std::str::FromStr>(value: &str, key: &str) -> io::Result<T> {
    value
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("{key}: invalid value {value:?}")))
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> io::Result<T> {
    value.map_or(Ok(default), |v| parse_var(&v, key))
}
