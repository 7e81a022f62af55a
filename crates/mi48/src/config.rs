use std::time::Duration;

const DEFAULT_STREAM_CAPACITY: usize = 10;
const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Session configuration, loadable from `MI48_*` environment variables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial device path. `None` selects the first MI48 found on USB.
    pub port: Option<String>,
    /// Depth of the frame delivery queue (at least 1).
    pub stream_capacity: usize,
    /// How often a blocked serial read wakes up. Expiry is retried.
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

impl SessionConfig {
    /// Load from `MI48_PORT`, `MI48_STREAM_CAPACITY` and
    /// `MI48_READ_TIMEOUT_MS`, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("MI48_PORT").ok().filter(|p| !p.is_empty()),
            stream_capacity: env_usize("MI48_STREAM_CAPACITY", DEFAULT_STREAM_CAPACITY).max(1),
            read_timeout: Duration::from_millis(env_u64(
                "MI48_READ_TIMEOUT_MS",
                DEFAULT_READ_TIMEOUT_MS,
            )),
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
