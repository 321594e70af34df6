//! Framing of protocol messages on a byte stream.
//!
//! Every message starts with [`MAGIC`], followed by a 4 byte header:
//!
//! ```text
//! FF 5A 42 02 | id: u16 | length: u16 | payload
//! FF 5A 42 02 | 7F FF   | id: u16     | length: u32 | payload   (extended header)
//! ```
use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    encoding::{read_u16, read_u32},
    protocol::{Message, MessageId},
};

/// Every message starts with this sequence.
pub const MAGIC: [u8; 4] = [0xFF, b'Z', b'B', 0x02];

/// Largest payload the receiver accepts before resynchronizing (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RxState {
    Magic,
    Header,
    ExtendedHeader,
    Data,
}

/// Incremental message reassembler.
///
/// Bytes can be fed in chunks of any size, the resulting messages do not depend on
/// how the stream was split. Garbage between messages is skipped by sliding over the
/// magic sequence one byte at a time, so the receiver never fails.
#[derive(Debug)]
pub struct FrameReceiver {
    state: RxState,
    window: [u8; 4],
    filled: usize,
    id: u16,
    length: usize,
    buffer: Vec<u8>,
    max_payload: usize,
}

impl Default for FrameReceiver {
    fn default() -> Self {
        FrameReceiver::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameReceiver {
    pub fn new() -> FrameReceiver {
        FrameReceiver::default()
    }

    pub fn with_max_payload(max_payload: usize) -> FrameReceiver {
        FrameReceiver {
            state: RxState::Magic,
            window: [0; 4],
            filled: 0,
            id: 0,
            length: 0,
            buffer: Vec::new(),
            max_payload,
        }
    }

    /// Feeds `bytes` and returns every message completed by them.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Vec<Message> {
        let mut messages = Vec::new();
        while !bytes.is_empty() {
            let (consumed, message) = self.advance(bytes);
            messages.extend(message);
            bytes = &bytes[consumed..];
        }
        messages
    }

    /// Consumes bytes from `src` until a message completes or `src` is exhausted.
    ///
    /// Returns the number of bytes consumed and the completed message, if any.
    pub fn advance(&mut self, src: &[u8]) -> (usize, Option<Message>) {
        let mut pos = 0;
        while pos < src.len() {
            if self.state == RxState::Data {
                let take = (self.length - self.buffer.len()).min(src.len() - pos);
                self.buffer.extend_from_slice(&src[pos..pos + take]);
                pos += take;
                if self.buffer.len() == self.length {
                    return (pos, Some(self.complete()));
                }
                continue;
            }

            self.window[self.filled] = src[pos];
            self.filled += 1;
            pos += 1;
            if self.filled < self.window.len() {
                continue;
            }

            match self.state {
                RxState::Magic => {
                    if self.window == MAGIC {
                        self.state = RxState::Header;
                        self.filled = 0;
                    } else {
                        log::debug!("Received incorrect magic bytes: {:02x?}", self.window);
                        self.window.copy_within(1.., 0);
                        self.filled = 3;
                    }
                }
                RxState::Header => {
                    self.filled = 0;
                    let id = read_u16(&self.window[..2]).unwrap_or_default();
                    let length = read_u16(&self.window[2..]).unwrap_or_default();
                    if id == MessageId::EXTENDED {
                        self.id = length;
                        self.state = RxState::ExtendedHeader;
                    } else {
                        self.id = id;
                        if let Some(message) = self.begin_payload(length as usize) {
                            return (pos, Some(message));
                        }
                    }
                }
                RxState::ExtendedHeader => {
                    self.filled = 0;
                    let length = read_u32(&self.window).unwrap_or_default();
                    if let Some(message) = self.begin_payload(length as usize) {
                        return (pos, Some(message));
                    }
                }
                RxState::Data => unreachable!("payload bytes are copied in bulk"),
            }
        }
        (pos, None)
    }

    fn begin_payload(&mut self, length: usize) -> Option<Message> {
        if length == 0 {
            return Some(self.complete());
        }
        if length > self.max_payload {
            log::warn!(
                "Dropping message {:#06x} with {} bytes, maximum is {}",
                self.id,
                length,
                self.max_payload
            );
            self.state = RxState::Magic;
            return None;
        }
        self.length = length;
        self.buffer = Vec::with_capacity(length.min(64 * 1024));
        self.state = RxState::Data;
        None
    }

    fn complete(&mut self) -> Message {
        self.state = RxState::Magic;
        self.length = 0;
        Message::new(self.id, Bytes::from(std::mem::take(&mut self.buffer)))
    }
}

impl Message {
    /// Whether this message needs the extended header.
    fn is_extended(&self) -> bool {
        self.payload.len() > u16::MAX as usize || self.id == MessageId::EXTENDED
    }

    /// Number of bytes this message occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        let header = if self.is_extended() { 12 } else { 8 };
        header + self.payload.len()
    }

    pub fn encode(&self, dst: &mut BytesMut) -> io::Result<()> {
        if self.payload.len() > u32::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {} bytes cannot be framed", self.payload.len()),
            ));
        }
        dst.reserve(self.encoded_len());
        dst.put_slice(&MAGIC);
        if self.is_extended() {
            dst.put_u16_le(MessageId::EXTENDED);
            dst.put_u16_le(self.id);
            dst.put_u32_le(self.payload.len() as u32);
        } else {
            dst.put_u16_le(self.id);
            dst.put_u16_le(self.payload.len() as u16);
        }
        dst.put_slice(&self.payload);
        Ok(())
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        writer.write_all(&buf)
    }
}

/// [`tokio_util::codec`] adapter over [`FrameReceiver`].
#[cfg(feature = "tokio")]
#[derive(Debug, Default)]
pub struct MessageCodec {
    receiver: FrameReceiver,
}

#[cfg(feature = "tokio")]
impl MessageCodec {
    pub fn new(max_payload: usize) -> MessageCodec {
        MessageCodec {
            receiver: FrameReceiver::with_max_payload(max_payload),
        }
    }
}

#[cfg(feature = "tokio")]
impl tokio_util::codec::Decoder for MessageCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, io::Error> {
        use bytes::Buf;

        let (consumed, message) = self.receiver.advance(src);
        src.advance(consumed);
        Ok(message)
    }
}

#[cfg(feature = "tokio")]
impl tokio_util::codec::Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), io::Error> {
        item.encode(dst)
    }
}
