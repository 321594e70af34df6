use std::time::Duration;

use zbnt_protocol::codec::DEFAULT_MAX_PAYLOAD;

pub const DEFAULT_MEASUREMENT_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bounds both the transport connect and the wait for the HELLO response.
    pub connect_timeout: Duration,
    /// Largest payload accepted from the peer; longer messages are skipped.
    pub max_payload: usize,
    /// Measurements queued for [`Client::take_measurements`](crate::Client::take_measurements).
    /// Samples arriving while the queue is full are dropped.
    pub measurement_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_payload: DEFAULT_MAX_PAYLOAD,
            measurement_capacity: DEFAULT_MEASUREMENT_CAPACITY,
        }
    }
}

/// Builder to create a [ClientConfig] and modify configuration options
///
/// # Example
///
/// ```
/// use zbnt_client::Builder;
/// use std::time::Duration;
///
/// let config = Builder::new()
///     .connect_timeout(Duration::from_secs(2))
///     .max_payload(1024 * 1024)
///     .measurement_capacity(256)
///     .build();
/// assert_eq!(config.max_payload, 1024 * 1024);
/// assert_eq!(config.measurement_capacity, 256);
/// ```
#[derive(Default)]
pub struct Builder {
    config: ClientConfig,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set how long to wait for the connection and the handshake
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the largest message payload this client is expected to receive.
    pub fn max_payload(mut self, size: usize) -> Self {
        self.config.max_payload = size;
        self
    }

    /// Set how many measurements may wait to be read. Zero is treated as one.
    pub fn measurement_capacity(mut self, capacity: usize) -> Self {
        self.config.measurement_capacity = capacity;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
