//! Scripted device peer for exercising [`zbnt_client::Client`] without hardware.
//!
//! [`MockPeer`] sits on the far end of an in-memory duplex stream and speaks the
//! framed protocol, so tests decide exactly which messages the client sees and when.
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::Framed;
use zbnt_client::{Client, ClientConfig, ClientError};
use zbnt_protocol::{
    DeviceType, Message, MessageId, PropertyId,
    codec::{DEFAULT_MAX_PAYLOAD, MessageCodec},
    device::encode_device_entry,
    protocol::PropertyResponse,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub const TIMER_ID: u8 = 0;
pub const TRAFFIC_GENERATOR_ID: u8 = 1;
pub const STATS_COLLECTOR_ID: u8 = 3;
pub const LATENCY_MEASURER_ID: u8 = 4;
pub const FRAME_DETECTOR_ID: u8 = 5;

pub struct MockPeer {
    framed: Framed<DuplexStream, MessageCodec>,
}

impl MockPeer {
    /// Creates a peer and the transport a client should be given.
    pub fn pair() -> (MockPeer, DuplexStream) {
        let (client_side, peer_side) = tokio::io::duplex(64 * 1024);
        let peer = MockPeer {
            framed: Framed::new(peer_side, MessageCodec::new(DEFAULT_MAX_PAYLOAD)),
        };
        (peer, client_side)
    }

    /// Connects a client, answering its HELLO with `bitstreams`.
    pub async fn connect(bitstreams: &[&str]) -> (Client, MockPeer) {
        let (mut peer, transport) = MockPeer::pair();
        let (client, ()) = tokio::join!(
            Client::with_transport(transport, ClientConfig::default()),
            peer.handshake(bitstreams),
        );
        (client.expect("handshake should succeed"), peer)
    }

    /// Connects a client and loads `name` with the [`demo_devices`].
    pub async fn connect_loaded(name: &str) -> (Client, MockPeer) {
        let (client, mut peer) = MockPeer::connect(&[name]).await;
        let tree = demo_devices();
        let (loaded, ()) = tokio::join!(
            client.load_bitstream(name),
            peer.answer_bitstream(true, &tree),
        );
        assert!(loaded.expect("load should complete"));
        (client, peer)
    }

    pub async fn handshake(&mut self, bitstreams: &[&str]) {
        self.expect(MessageId::Hello).await;
        self.send(Message::new(MessageId::Hello as u16, hello_payload(bitstreams)))
            .await;
    }

    /// Waits for the next message from the client.
    pub async fn recv(&mut self) -> Message {
        match tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => panic!("peer read failed: {e}"),
            Ok(None) => panic!("client closed the connection"),
            Err(_) => panic!("no message from the client"),
        }
    }

    /// Returns a message if the client sends one within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Message> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Ok(Some(Ok(message))) => Some(message),
            _ => None,
        }
    }

    pub async fn expect(&mut self, id: MessageId) -> Message {
        let message = self.recv().await;
        assert_eq!(message.id, id as u16, "unexpected message {message:?}");
        message
    }

    pub async fn send(&mut self, message: Message) {
        log::debug!("Peer sending {:#06x} with {} bytes", message.id, message.payload.len());
        self.framed.send(message).await.expect("peer write failed");
    }

    /// Writes bytes straight to the transport, bypassing framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let io = self.framed.get_mut();
        io.write_all(bytes).await.expect("peer write failed");
        io.flush().await.expect("peer flush failed");
    }

    /// Answers the next ProgramBitstream request, activating the requested name.
    pub async fn answer_bitstream(&mut self, success: bool, tree: &[u8]) {
        let request = self.expect(MessageId::ProgramBitstream).await;
        let name = String::from_utf8_lossy(&request.payload).into_owned();
        self.send(Message::new(
            MessageId::ProgramBitstream as u16,
            bitstream_payload(success, &name, tree),
        ))
        .await;
    }

    /// Answers a property request, echoing its device and property ids.
    pub async fn answer_property(&mut self, request: &Message, success: bool, value: &[u8]) {
        let response = PropertyResponse {
            device_id: request.payload[0],
            property_id: u16::from_le_bytes([request.payload[1], request.payload[2]]),
            success,
            value: value.to_vec().into(),
        };
        self.send(Message::new(request.id, response.to_payload())).await;
    }

    /// Sends a property response for a request the client may never have made.
    pub async fn send_property(&mut self, id: MessageId, device_id: u8, property: PropertyId, value: &[u8]) {
        let response = PropertyResponse {
            device_id,
            property_id: property.raw(),
            success: true,
            value: value.to_vec().into(),
        };
        self.send(Message::new(id as u16, response.to_payload())).await;
    }

    pub async fn answer_run_start(&mut self, success: bool) {
        self.expect(MessageId::RunStart).await;
        self.send(Message::new(MessageId::RunStart as u16, vec![success as u8]))
            .await;
    }

    pub async fn finish_run(&mut self) {
        self.send(Message::run_stop()).await;
    }

    pub async fn measurement(&mut self, device_id: u8, payload: Vec<u8>) {
        self.send(Message::new(0x8000 | device_id as u16, payload))
            .await;
    }
}

/// `{name_len(2), name}*`
pub fn hello_payload(names: &[&str]) -> Vec<u8> {
    let mut payload = Vec::new();
    for name in names {
        payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
        payload.extend_from_slice(name.as_bytes());
    }
    if payload.is_empty() {
        payload.extend_from_slice(&[0, 0]);
    }
    payload
}

pub fn bitstream_payload(success: bool, name: &str, tree: &[u8]) -> Vec<u8> {
    let mut payload = vec![success as u8];
    payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
    payload.extend_from_slice(name.as_bytes());
    payload.extend_from_slice(tree);
    payload
}

/// A timer, a traffic generator and a stats collector on port 0, a latency
/// measurer between ports 2 and 3 and a frame detector between ports 0 and 1.
pub fn demo_devices() -> Vec<u8> {
    let u32_le = |value: u32| value.to_le_bytes();
    let fifo: Vec<u8> = [4096u32, 2048].iter().flat_map(|v| v.to_le_bytes()).collect();

    let mut tree = Vec::new();
    encode_device_entry(
        &mut tree,
        TIMER_ID,
        DeviceType::SimpleTimer as u8,
        &[(PropertyId::ClockFreq.raw(), &u32_le(125_000_000)[..])],
    );
    encode_device_entry(
        &mut tree,
        TRAFFIC_GENERATOR_ID,
        DeviceType::TrafficGenerator as u8,
        &[
            (PropertyId::Ports.raw(), &[0][..]),
            (PropertyId::MaxTemplateSize.raw(), &u32_le(2048)[..]),
        ],
    );
    encode_device_entry(
        &mut tree,
        STATS_COLLECTOR_ID,
        DeviceType::StatsCollector as u8,
        &[(PropertyId::Ports.raw(), &[0][..])],
    );
    encode_device_entry(
        &mut tree,
        LATENCY_MEASURER_ID,
        DeviceType::LatencyMeasurer as u8,
        &[(PropertyId::Ports.raw(), &[2, 3][..])],
    );
    encode_device_entry(
        &mut tree,
        FRAME_DETECTOR_ID,
        DeviceType::FrameDetector as u8,
        &[
            (PropertyId::Ports.raw(), &[0, 1][..]),
            (PropertyId::FeatureBits.raw(), &u32_le(0b1111)[..]),
            (PropertyId::NumScripts.raw(), &u32_le(4)[..]),
            (PropertyId::MaxScriptSize.raw(), &u32_le(64)[..]),
            (PropertyId::FifoSize.raw(), &fifo[..]),
        ],
    );
    tree
}

/// A stats collector sample: the timestamp followed by six counters.
pub fn stats_payload(time: u64, counters: [u64; 6]) -> Vec<u8> {
    std::iter::once(time)
        .chain(counters)
        .flat_map(|value| value.to_le_bytes())
        .collect()
}

pub fn is_disconnected<T>(result: &Result<T, ClientError>) -> bool {
    matches!(result, Err(ClientError::Disconnected))
}
