use zbnt_protocol::error::PropertyError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport could not be opened, or the peer did not complete the handshake.
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("connection to the device was lost")]
    Disconnected,
    /// Another request is still waiting for its response.
    #[error("a request is already in flight")]
    SessionBusy,
    /// The device belongs to a bitstream that has since been replaced.
    #[error("device {device_id} belongs to a previously loaded bitstream")]
    StaleDevice { device_id: u8 },
    #[error(transparent)]
    Property(#[from] PropertyError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
