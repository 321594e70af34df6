use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use zbnt_protocol::{
    Device, DeviceSet, Message, Params, PropertyId, PropertyValue, codec::MessageCodec,
};

use crate::{
    config::ClientConfig,
    error::ClientError,
    session::{MeasurementEvent, Phase, Reply, RequestKind, Session},
};

/// A connection to a ZBNT device.
///
/// At most one request may be in flight at a time; calls made while another is still
/// waiting for its response fail with [`ClientError::SessionBusy`]. Requests have no
/// timeout of their own, wrap them in [`tokio::time::timeout`] where needed.
pub struct Client {
    session: Arc<Mutex<Session>>,
    outgoing: mpsc::UnboundedSender<Message>,
    phase: watch::Receiver<Phase>,
    measurements: Mutex<Option<mpsc::Receiver<MeasurementEvent>>>,
    closing: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Client {
    /// Connects over TCP and performs the handshake.
    pub async fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> Result<Client, ClientError> {
        let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectFailed("timed out".into()))?
            .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;
        tcp.set_nodelay(true)?;
        if let Ok(peer) = tcp.peer_addr() {
            log::info!("Connected to {}", peer);
        }
        Client::with_transport(tcp, config).await
    }

    /// Connects to a device server listening on a Unix domain socket.
    #[cfg(unix)]
    pub async fn connect_local(
        path: impl AsRef<std::path::Path>,
        config: ClientConfig,
    ) -> Result<Client, ClientError> {
        let stream = tokio::time::timeout(
            config.connect_timeout,
            tokio::net::UnixStream::connect(path.as_ref()),
        )
        .await
        .map_err(|_| ClientError::ConnectFailed("timed out".into()))?
        .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;
        Client::with_transport(stream, config).await
    }

    /// Runs the protocol over an already open transport, sending HELLO and waiting
    /// up to `config.connect_timeout` for the answer.
    pub async fn with_transport<T>(io: T, config: ClientConfig) -> Result<Client, ClientError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (hello_tx, hello_rx) = oneshot::channel();
        let (measurement_tx, measurement_rx) = mpsc::channel(config.measurement_capacity.max(1));
        let (session, phase) = Session::new(hello_tx, measurement_tx);
        let session = Arc::new(Mutex::new(session));
        let closing = Arc::new(AtomicBool::new(false));

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let mut sink = FramedWrite::new(write_half, MessageCodec::new(config.max_payload));
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                log::trace!("Sending {:#06x}: {:02x?}", message.id, &message.payload[..]);
                if let Err(e) = sink.send(message).await {
                    log::error!("Write error: {}", e);
                    break;
                }
            }
        });

        let mut stream = FramedRead::new(read_half, MessageCodec::new(config.max_payload));
        let reader = {
            let session = Arc::clone(&session);
            let closing = Arc::clone(&closing);
            tokio::spawn(async move {
                loop {
                    match stream.next().await {
                        Some(Ok(message)) => {
                            lock(&session).handle(message);
                        }
                        Some(Err(e)) => {
                            log::error!("Read error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                lock(&session).connection_lost(closing.load(Ordering::SeqCst));
            })
        };

        let client = Client {
            session,
            outgoing,
            phase,
            measurements: Mutex::new(Some(measurement_rx)),
            closing,
            reader,
            writer,
        };

        // The peer drops connections that do not start with HELLO.
        client.send(Message::hello())?;
        match tokio::time::timeout(config.connect_timeout, hello_rx).await {
            Ok(Ok(Ok(()))) => Ok(client),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(ClientError::ConnectFailed("connection closed".into())),
            Err(_) => {
                client.disconnect();
                Err(ClientError::ConnectFailed("no HELLO response".into()))
            }
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Names of the bitstreams the device can load.
    pub fn bitstreams(&self) -> Vec<String> {
        self.session().bitstreams().to_vec()
    }

    /// Name of the bitstream loaded last, empty before the first load.
    pub fn active_bitstream(&self) -> String {
        self.session().active_bitstream().to_string()
    }

    /// Snapshot of the devices of the active bitstream.
    pub fn devices(&self) -> Arc<DeviceSet> {
        self.session().devices()
    }

    /// The stream of decoded measurements. Only the first call returns it.
    ///
    /// At most [`ClientConfig::measurement_capacity`] samples wait in the stream;
    /// newer ones are dropped until it is drained.
    pub fn take_measurements(&self) -> Option<mpsc::Receiver<MeasurementEvent>> {
        self.measurements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Loads a bitstream, replacing the device set. Returns whether the device accepted it.
    pub async fn load_bitstream(&self, name: &str) -> Result<bool, ClientError> {
        log::info!("Loading bitstream '{}'", name);
        let reply = self
            .request(Message::program_bitstream(name), RequestKind::ProgramBitstream, None)
            .await?;
        Ok(reply.success)
    }

    /// Writes a property. Returns the success flag reported by the device.
    pub async fn set_property(
        &self,
        device: &Device,
        id: PropertyId,
        value: impl Into<PropertyValue>,
        params: &Params,
    ) -> Result<bool, ClientError> {
        self.check_current(device)?;
        let value = device.encode_set(id, &value.into(), params)?;
        let (success, _) = self
            .raw_request(RequestKind::SetProperty, device.id(), id.raw(), &value)
            .await?;
        Ok(success)
    }

    /// Reads a property. The value is `None` when the device reports a failure.
    pub async fn get_property(
        &self,
        device: &Device,
        id: PropertyId,
        params: &Params,
    ) -> Result<(bool, Option<PropertyValue>), ClientError> {
        self.check_current(device)?;
        let request = device.encode_get(id, params)?;
        let (success, value) = self
            .raw_request(RequestKind::GetProperty, device.id(), id.raw(), &request)
            .await?;
        if !success {
            return Ok((false, None));
        }
        Ok((true, Some(device.decode_get(id, &value)?)))
    }

    /// Writes an already encoded property value, bypassing the device schemas.
    pub async fn set_raw_property(
        &self,
        device_id: u8,
        property_id: u16,
        value: &[u8],
    ) -> Result<bool, ClientError> {
        let (success, _) = self
            .raw_request(RequestKind::SetProperty, device_id, property_id, value)
            .await?;
        Ok(success)
    }

    /// Reads a property without decoding it. Echoed parameters are left in the value.
    pub async fn get_raw_property(
        &self,
        device_id: u8,
        property_id: u16,
        params: &[u8],
    ) -> Result<(bool, Bytes), ClientError> {
        self.raw_request(RequestKind::GetProperty, device_id, property_id, params)
            .await
    }

    /// Starts a run. Returns whether the device accepted it.
    pub async fn start_run(&self) -> Result<bool, ClientError> {
        let reply = self
            .request(Message::run_start(), RequestKind::RunStart, None)
            .await?;
        Ok(reply.success)
    }

    /// Asks the device to stop the run. The run is over once
    /// [`wait_for_run_end`](Client::wait_for_run_end) returns.
    pub fn stop_run(&self) -> Result<(), ClientError> {
        self.send(Message::run_stop())
    }

    /// Waits until the device reports the end of the current run.
    pub async fn wait_for_run_end(&self) -> Result<(), ClientError> {
        let mut phase = self.phase.clone();
        match phase.wait_for(|phase| *phase != Phase::Running).await {
            Ok(phase) if *phase != Phase::Disconnected => Ok(()),
            _ => Err(ClientError::Disconnected),
        }
    }

    /// Closes the connection. Requests still in flight fail with [`ClientError::Disconnected`].
    pub fn disconnect(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
        self.session().connection_lost(true);
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }

    fn send(&self, message: Message) -> Result<(), ClientError> {
        // Aborted tasks release the channel asynchronously.
        if self.phase() == Phase::Disconnected {
            return Err(ClientError::Disconnected);
        }
        self.outgoing
            .send(message)
            .map_err(|_| ClientError::Disconnected)
    }

    fn check_current(&self, device: &Device) -> Result<(), ClientError> {
        if device.generation() != self.session().devices().generation() {
            return Err(ClientError::StaleDevice {
                device_id: device.id(),
            });
        }
        Ok(())
    }

    async fn request(
        &self,
        message: Message,
        kind: RequestKind,
        key: Option<(u8, u16)>,
    ) -> Result<Reply, ClientError> {
        let reply = self.session().begin(kind, key)?;
        if let Err(e) = self.send(message) {
            self.session().cancel();
            return Err(e);
        }
        reply.await.map_err(|_| ClientError::Disconnected)?
    }

    async fn raw_request(
        &self,
        kind: RequestKind,
        device_id: u8,
        property_id: u16,
        body: &[u8],
    ) -> Result<(bool, Bytes), ClientError> {
        let message = match kind {
            RequestKind::SetProperty => Message::set_property(device_id, property_id, body),
            _ => Message::get_property(device_id, property_id, body),
        };
        let reply = self
            .request(message, kind, Some((device_id, property_id)))
            .await?;
        Ok((reply.success, reply.value))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
