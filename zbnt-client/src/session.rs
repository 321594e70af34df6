//! Connection state, driven by incoming messages.
//!
//! [`Session`] holds everything that changes when a message arrives and performs no
//! I/O; the [`Client`](crate::Client) feeds it from its reader task and locks it to
//! issue requests.
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use zbnt_protocol::{
    DeviceSet, Measurement, Message, MessageId, MessageKind,
    device::BitstreamResponse,
    protocol::{PropertyResponse, parse_hello},
};

use crate::error::ClientError;

/// Lifecycle of a connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    /// HELLO sent, waiting for the peer to answer it.
    AwaitingHello,
    Ready,
    Running,
    Disconnected,
}

/// A decoded measurement and the device that produced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MeasurementEvent {
    pub device_id: u8,
    pub measurement: Measurement,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum RequestKind {
    SetProperty,
    GetProperty,
    ProgramBitstream,
    RunStart,
}

impl RequestKind {
    fn response_id(self) -> MessageId {
        match self {
            RequestKind::SetProperty => MessageId::SetProperty,
            RequestKind::GetProperty => MessageId::GetProperty,
            RequestKind::ProgramBitstream => MessageId::ProgramBitstream,
            RequestKind::RunStart => MessageId::RunStart,
        }
    }
}

/// Outcome of a request: the success flag reported by the peer and, for property
/// reads, the returned value.
#[derive(Debug)]
pub(crate) struct Reply {
    pub success: bool,
    pub value: Bytes,
}

impl Reply {
    fn status(success: bool) -> Reply {
        Reply {
            success,
            value: Bytes::new(),
        }
    }
}

type ReplySender = oneshot::Sender<Result<Reply, ClientError>>;

struct Pending {
    kind: RequestKind,
    /// `(device_id, property_id)` of property requests.
    key: Option<(u8, u16)>,
    reply: ReplySender,
}

pub(crate) struct Session {
    bitstreams: Vec<String>,
    active_bitstream: String,
    devices: Arc<DeviceSet>,
    pending: Option<Pending>,
    phase: watch::Sender<Phase>,
    hello: Option<oneshot::Sender<Result<(), ClientError>>>,
    measurements: mpsc::Sender<MeasurementEvent>,
}

impl Session {
    pub fn new(
        hello: oneshot::Sender<Result<(), ClientError>>,
        measurements: mpsc::Sender<MeasurementEvent>,
    ) -> (Session, watch::Receiver<Phase>) {
        let (phase, phase_rx) = watch::channel(Phase::AwaitingHello);
        let session = Session {
            bitstreams: Vec::new(),
            active_bitstream: String::new(),
            devices: Arc::new(DeviceSet::empty(0)),
            pending: None,
            phase,
            hello: Some(hello),
            measurements,
        };
        (session, phase_rx)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn bitstreams(&self) -> &[String] {
        &self.bitstreams
    }

    pub fn active_bitstream(&self) -> &str {
        &self.active_bitstream
    }

    pub fn devices(&self) -> Arc<DeviceSet> {
        Arc::clone(&self.devices)
    }

    /// Claims the request slot, failing if another request is still in flight.
    pub fn begin(
        &mut self,
        kind: RequestKind,
        key: Option<(u8, u16)>,
    ) -> Result<oneshot::Receiver<Result<Reply, ClientError>>, ClientError> {
        match self.phase() {
            Phase::Disconnected => return Err(ClientError::Disconnected),
            Phase::AwaitingHello => {
                return Err(ClientError::ConnectFailed("handshake not completed".into()));
            }
            Phase::Ready | Phase::Running => {}
        }
        if self.pending.is_some() {
            return Err(ClientError::SessionBusy);
        }

        let (reply, rx) = oneshot::channel();
        self.pending = Some(Pending { kind, key, reply });
        if kind == RequestKind::RunStart {
            self.phase.send_replace(Phase::Running);
        }
        log::debug!("Issued {:?} request, key={:?}", kind, key);
        Ok(rx)
    }

    /// Releases the request slot after the request could not be sent.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take()
            && pending.kind == RequestKind::RunStart
        {
            self.phase.send_replace(Phase::Ready);
        }
    }

    pub fn handle(&mut self, message: Message) {
        log::trace!("Message {:#06x}: {:02x?}", message.id, &message.payload[..]);

        let awaiting_hello = self.phase() == Phase::AwaitingHello;
        let is_hello = message.id == MessageId::Hello as u16;
        if awaiting_hello != is_hello {
            if is_hello {
                log::warn!("Discarding HELLO received after the handshake");
            } else {
                log::debug!("Discarding message {:#06x} received before HELLO", message.id);
            }
            return;
        }

        match message.kind() {
            MessageKind::Control(MessageId::Hello) => self.on_hello(&message.payload),
            MessageKind::Control(MessageId::ProgramBitstream) => self.on_bitstream(&message.payload),
            MessageKind::Control(MessageId::RunStart) => self.on_run_start(&message.payload),
            MessageKind::Control(MessageId::RunStop) => self.on_run_stop(),
            MessageKind::Control(id @ (MessageId::SetProperty | MessageId::GetProperty)) => {
                self.on_property(id, &message.payload)
            }
            MessageKind::Measurement { device_id } => {
                self.on_measurement(device_id, &message.payload)
            }
            MessageKind::Control(id) => log::debug!("Ignoring {:?} message", id),
            MessageKind::Unknown(id) => log::debug!("Ignoring unknown message {:#06x}", id),
        }
    }

    /// The transport closed. `requested` is set when the caller asked for it.
    pub fn connection_lost(&mut self, requested: bool) {
        let phase = self.phase();
        if phase == Phase::Disconnected {
            return;
        }

        if let Some(hello) = self.hello.take() {
            let _ = hello.send(Err(ClientError::ConnectFailed(
                "connection closed before the handshake completed".into(),
            )));
        }
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(ClientError::Disconnected));
        }

        if requested {
            log::info!("Disconnected");
        } else if phase == Phase::Running {
            log::error!("Connection lost during a run");
        } else {
            log::error!("Connection lost");
        }
        self.phase.send_replace(Phase::Disconnected);
    }

    fn on_hello(&mut self, payload: &[u8]) {
        let Some(bitstreams) = parse_hello(payload) else {
            log::warn!("Discarding malformed HELLO response");
            return;
        };
        log::info!("Connected, available bitstreams: {:?}", bitstreams);
        self.bitstreams = bitstreams;
        self.phase.send_replace(Phase::Ready);
        if let Some(hello) = self.hello.take() {
            let _ = hello.send(Ok(()));
        }
    }

    fn on_bitstream(&mut self, payload: &[u8]) {
        let generation = self.devices.generation() + 1;
        let Some(response) = BitstreamResponse::parse(payload, generation) else {
            log::warn!("Discarding malformed bitstream response");
            return;
        };
        log::info!(
            "Bitstream '{}' active with {} devices",
            response.active_name,
            response.devices.len()
        );

        self.active_bitstream = response.active_name;
        self.devices = Arc::new(response.devices);
        self.resolve(RequestKind::ProgramBitstream, None, || Reply::status(response.success));
    }

    fn on_run_start(&mut self, payload: &[u8]) {
        // Peers may acknowledge with an empty payload.
        let success = payload.first().is_none_or(|status| *status != 0);
        if self.resolve(RequestKind::RunStart, None, || Reply::status(success)) && !success {
            self.phase.send_replace(Phase::Ready);
        }
    }

    fn on_run_stop(&mut self) {
        if self.phase() == Phase::Running {
            log::info!("Run finished");
            self.phase.send_replace(Phase::Ready);
        }
    }

    fn on_property(&mut self, id: MessageId, payload: &Bytes) {
        let Some(response) = PropertyResponse::parse(payload) else {
            log::warn!("Discarding malformed property response");
            return;
        };
        let kind = match id {
            MessageId::SetProperty => RequestKind::SetProperty,
            _ => RequestKind::GetProperty,
        };
        let key = Some((response.device_id, response.property_id));
        self.resolve(kind, key, || Reply {
            success: response.success,
            value: response.value.clone(),
        });
    }

    fn on_measurement(&mut self, device_id: u16, payload: &[u8]) {
        let Some(device) = u8::try_from(device_id).ok().and_then(|id| self.devices.get(id)) else {
            log::trace!("Dropping measurement of unknown device {}", device_id);
            return;
        };
        let Some(measurement) = device.kind().decode_measurement(payload) else {
            log::trace!("Dropping {} byte measurement of device {}", payload.len(), device.id());
            return;
        };
        let event = MeasurementEvent {
            device_id: device.id(),
            measurement,
        };
        // The reader task never waits on the consumer.
        if let Err(mpsc::error::TrySendError::Full(event)) = self.measurements.try_send(event) {
            log::trace!("Measurement queue full, dropping sample of device {}", event.device_id);
        }
    }

    /// Completes the pending request if it matches. Returns whether it did.
    fn resolve(
        &mut self,
        kind: RequestKind,
        key: Option<(u8, u16)>,
        reply: impl FnOnce() -> Reply,
    ) -> bool {
        match &self.pending {
            Some(pending) if pending.kind == kind && pending.key == key => {}
            _ => {
                log::warn!(
                    "Discarding {:?} response without a matching request, key={:?}",
                    kind.response_id(),
                    key
                );
                return false;
            }
        }
        if let Some(pending) = self.pending.take() {
            log::debug!("Matched {:?} response, key={:?}", kind, key);
            let _ = pending.reply.send(Ok(reply()));
        }
        true
    }
}

#[cfg(test)]
mod test {
    use zbnt_protocol::{
        DeviceKind, DeviceType,
        device::encode_device_entry,
        measurement::Statistics,
    };

    use super::*;

    struct Harness {
        session: Session,
        hello: oneshot::Receiver<Result<(), ClientError>>,
        measurements: mpsc::Receiver<MeasurementEvent>,
    }

    fn harness() -> Harness {
        harness_with_capacity(16)
    }

    fn harness_with_capacity(capacity: usize) -> Harness {
        let (hello_tx, hello) = oneshot::channel();
        let (tx, measurements) = mpsc::channel(capacity);
        let (session, _) = Session::new(hello_tx, tx);
        Harness {
            session,
            hello,
            measurements,
        }
    }

    fn hello_payload(names: &[&str]) -> Vec<u8> {
        let mut payload = Vec::new();
        for name in names {
            payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
            payload.extend_from_slice(name.as_bytes());
        }
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload
    }

    fn ready() -> Harness {
        let mut h = harness();
        h.session
            .handle(Message::new(MessageId::Hello as u16, hello_payload(&["simple_demo"])));
        h
    }

    fn bitstream_message(devices: &[(u8, DeviceType)]) -> Message {
        let mut payload = vec![1];
        payload.extend_from_slice(&4u16.to_le_bytes());
        payload.extend_from_slice(b"demo");
        for (id, kind) in devices {
            encode_device_entry(&mut payload, *id, *kind as u8, &[]);
        }
        Message::new(MessageId::ProgramBitstream as u16, payload)
    }

    fn property_message(id: MessageId, device_id: u8, property_id: u16) -> Message {
        let response = PropertyResponse {
            device_id,
            property_id,
            success: true,
            value: Bytes::from_static(&[7]),
        };
        Message::new(id as u16, response.to_payload())
    }

    #[test]
    fn hello_completes_the_handshake() {
        let mut h = ready();
        assert_eq!(h.session.phase(), Phase::Ready);
        assert_eq!(h.session.bitstreams(), ["simple_demo"]);
        assert!(h.hello.try_recv().unwrap().is_ok());
    }

    #[test]
    fn messages_before_hello_are_discarded() {
        let mut h = harness();
        h.session.handle(bitstream_message(&[(3, DeviceType::StatsCollector)]));
        assert!(h.session.devices().is_empty());

        // Too short to be a HELLO response.
        h.session.handle(Message::new(MessageId::Hello as u16, vec![0]));
        assert_eq!(h.session.phase(), Phase::AwaitingHello);
        assert!(h.hello.try_recv().is_err());
    }

    #[test]
    fn second_hello_is_discarded() {
        let mut h = ready();
        h.session
            .handle(Message::new(MessageId::Hello as u16, hello_payload(&["other"])));
        assert_eq!(h.session.bitstreams(), ["simple_demo"]);
    }

    #[test]
    fn busy_while_a_request_is_pending() {
        let mut h = ready();
        let _first = h.session.begin(RequestKind::GetProperty, Some((1, 2))).unwrap();
        assert!(matches!(
            h.session.begin(RequestKind::SetProperty, Some((4, 5))),
            Err(ClientError::SessionBusy)
        ));
    }

    #[test]
    fn responses_match_on_kind_and_key() {
        let mut h = ready();
        let mut rx = h.session.begin(RequestKind::GetProperty, Some((1, 2))).unwrap();

        h.session.handle(property_message(MessageId::GetProperty, 1, 3));
        h.session.handle(property_message(MessageId::SetProperty, 1, 2));
        assert!(rx.try_recv().is_err());

        h.session.handle(property_message(MessageId::GetProperty, 1, 2));
        let reply = rx.try_recv().unwrap().unwrap();
        assert!(reply.success);
        assert_eq!(&reply.value[..], [7]);
        // The slot is free again.
        assert!(h.session.begin(RequestKind::GetProperty, Some((1, 2))).is_ok());
    }

    #[test]
    fn bitstream_replaces_the_device_set() {
        let mut h = ready();
        h.session.handle(bitstream_message(&[(3, DeviceType::StatsCollector)]));
        let first = h.session.devices();
        assert_eq!(first.generation(), 1);
        assert_eq!(first.get(3).unwrap().kind(), &DeviceKind::StatsCollector);

        let mut rx = h.session.begin(RequestKind::ProgramBitstream, None).unwrap();
        h.session.handle(bitstream_message(&[(1, DeviceType::LatencyMeasurer)]));
        assert!(rx.try_recv().unwrap().unwrap().success);

        let second = h.session.devices();
        assert_eq!(second.generation(), 2);
        assert!(second.get(3).is_none());
        assert_eq!(h.session.active_bitstream(), "demo");
        // Earlier snapshots are untouched.
        assert!(first.get(3).is_some());
    }

    #[test]
    fn measurements_are_routed_to_their_device() {
        let mut h = ready();
        h.session.handle(bitstream_message(&[(3, DeviceType::StatsCollector)]));

        let payload: Vec<u8> = (1..=7u64).flat_map(|v| v.to_le_bytes()).collect();
        h.session.handle(Message::new(0x8003, payload.clone()));
        // unknown device, undersized payload
        h.session.handle(Message::new(0x8004, payload));
        h.session.handle(Message::new(0x8003, vec![0; 55]));

        let event = h.measurements.try_recv().unwrap();
        assert_eq!(event.device_id, 3);
        assert_eq!(
            event.measurement,
            Measurement::Statistics(Statistics {
                time: 1,
                tx_bytes: 2,
                tx_good: 3,
                tx_bad: 4,
                rx_bytes: 5,
                rx_good: 6,
                rx_bad: 7,
            })
        );
        assert!(h.measurements.try_recv().is_err());
    }

    #[test]
    fn full_measurement_queue_drops_new_samples() {
        let mut h = harness_with_capacity(4);
        h.session.handle(Message::new(MessageId::Hello as u16, hello_payload(&["demo"])));
        h.session.handle(bitstream_message(&[(3, DeviceType::StatsCollector)]));

        for time in 0..10u64 {
            let payload: Vec<u8> = std::iter::once(time)
                .chain([0; 6])
                .flat_map(|v| v.to_le_bytes())
                .collect();
            h.session.handle(Message::new(0x8003, payload));
        }

        let mut times = Vec::new();
        while let Ok(event) = h.measurements.try_recv() {
            let Measurement::Statistics(stats) = event.measurement else {
                panic!("unexpected measurement {:?}", event.measurement);
            };
            times.push(stats.time);
        }
        // The oldest samples are kept.
        assert_eq!(times, [0, 1, 2, 3]);
    }

    #[test]
    fn closed_measurement_queue_is_ignored() {
        let mut h = ready();
        h.session.handle(bitstream_message(&[(3, DeviceType::StatsCollector)]));
        h.measurements.close();
        h.session.handle(Message::new(0x8003, vec![0; 56]));
        assert_eq!(h.session.phase(), Phase::Ready);
    }

    #[test]
    fn run_lifecycle() {
        let mut h = ready();
        let mut rx = h.session.begin(RequestKind::RunStart, None).unwrap();
        assert_eq!(h.session.phase(), Phase::Running);

        h.session.handle(Message::new(MessageId::RunStart as u16, Bytes::new()));
        assert!(rx.try_recv().unwrap().unwrap().success);
        assert_eq!(h.session.phase(), Phase::Running);

        h.session.handle(Message::run_stop());
        assert_eq!(h.session.phase(), Phase::Ready);
    }

    #[test]
    fn rejected_run_start_leaves_the_run_idle() {
        let mut h = ready();
        let mut rx = h.session.begin(RequestKind::RunStart, None).unwrap();
        h.session.handle(Message::new(MessageId::RunStart as u16, vec![0]));
        assert!(!rx.try_recv().unwrap().unwrap().success);
        assert_eq!(h.session.phase(), Phase::Ready);
    }

    #[test]
    fn connection_loss_fails_everything_outstanding() {
        let mut h = harness();
        h.session.connection_lost(false);
        assert!(matches!(
            h.hello.try_recv().unwrap(),
            Err(ClientError::ConnectFailed(_))
        ));

        let mut h = ready();
        let mut rx = h.session.begin(RequestKind::SetProperty, Some((0, 1))).unwrap();
        h.session.connection_lost(false);
        assert!(matches!(rx.try_recv().unwrap(), Err(ClientError::Disconnected)));
        assert_eq!(h.session.phase(), Phase::Disconnected);
        assert!(matches!(
            h.session.begin(RequestKind::SetProperty, Some((0, 1))),
            Err(ClientError::Disconnected)
        ));
    }
}
