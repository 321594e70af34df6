//! # ZBNT Protocol Library
//!
//! Sans-io building blocks for talking to ZBNT network testing peripherals: FPGA
//! bitstreams exposing traffic generators, frame detectors, latency measurers and
//! statistics collectors over a TCP message stream.
//!
//! ## Overview
//!
//! - [`codec`]: framing of `(id, payload)` messages, resynchronizing on corrupt input
//! - [`device`] and [`property`]: the device tree of a loaded bitstream and the
//!   per-kind property schemas used to encode property reads and writes
//! - [`measurement`]: decoding of the telemetry devices push during a run
//! - [`script`]: assembler for frame detector scripts
//! - [`template`], [`discovery`] and [`capture`]: frame templates, discovery
//!   datagrams and pcapng output
//!
//! None of these perform I/O on their own; the `zbnt-client` crate drives them over
//! a socket.
//!
//! ## Message Format
//!
//! ```text
//! magic "\xFFZB\x02" | id: u16 | length: u16 | payload
//! magic "\xFFZB\x02" | 0x7FFF  | id: u16     | length: u32 | payload
//! ```
//!
//! All integers are little-endian. Ids with the top bit set carry measurements of the
//! device whose id is in the remaining bits.
//!
//! ## Basic Usage
//!
//! ### Framing Messages
//!
//! ```
//! use bytes::BytesMut;
//! use zbnt_protocol::{Message, codec::FrameReceiver};
//!
//! let mut buf = BytesMut::new();
//! Message::hello().encode(&mut buf).expect("Encoding a small message shouldn't fail");
//! assert_eq!(&buf[..], b"\xFFZB\x02\x02\x00\x00\x00");
//!
//! // Input may arrive in arbitrary chunks
//! let mut receiver = FrameReceiver::new();
//! assert!(receiver.feed(&buf[..5]).is_empty());
//! assert_eq!(receiver.feed(&buf[5..]), vec![Message::hello()]);
//! ```
//!
//! ### Compiling a Frame Detector Script
//!
//! ```
//! use zbnt_protocol::script;
//!
//! let program = script::compile(".comp\nnop 12\neq16 0x0800\neof", 64)
//!     .expect("Script should compile");
//! assert_eq!(program.len(), 64);
//! assert_eq!(program.to_bytes().len(), 64 * 4);
//! ```
//!
//! ## Error Handling
//!
//! Local misuse is reported through the types in [`error`]. Malformed input on the
//! wire is never an error: the framing layer skips to the next magic sequence and
//! undersized measurements are dropped.

pub mod capture;
pub mod codec;
pub mod device;
pub mod discovery;
pub mod encoding;
pub mod error;
pub mod measurement;
pub mod property;
pub mod protocol;
pub mod script;
pub mod template;

pub use device::{Device, DeviceKind, DeviceSet, DeviceType};
pub use encoding::{MacAddr, PropertyValue};
pub use measurement::Measurement;
pub use property::Params;
pub use protocol::*;
