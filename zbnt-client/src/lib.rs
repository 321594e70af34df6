//! # ZBNT Client
//!
//! An async client for ZBNT network testing devices: load a bitstream, configure
//! the devices it exposes, run a test and collect the measurements they stream back.
//!
//! ## Overview
//!
//! A [`Client`] owns one connection. A background task reads incoming messages and
//! routes them: responses complete the request waiting for them, measurements are
//! decoded and queued (up to [`ClientConfig::measurement_capacity`] of them), and
//! run start/stop notifications move the [`Phase`].
//!
//! Only one request may be outstanding at a time. Starting another one before the
//! first has been answered fails with [`ClientError::SessionBusy`] instead of
//! queueing it.
//!
//! For the wire format and the device model, see the `zbnt_protocol` crate.
//!
//! ## Basic Usage
//!
//! ### Connecting and Loading a Bitstream
//!
//! ```ignore
//! use zbnt_client::{Client, ClientConfig};
//!
//! let client = Client::connect("192.168.1.10:5465", ClientConfig::default()).await?;
//! println!("Bitstreams: {:?}", client.bitstreams());
//!
//! if client.load_bitstream("dual_tgen_latency").await? {
//!     for device in client.devices().iter() {
//!         println!("{}", device);
//!     }
//! }
//! ```
//!
//! ### Running a Test
//!
//! ```ignore
//! use zbnt_protocol::{DeviceType, Params, PropertyId};
//!
//! let devices = client.devices();
//! let tgen = devices.find(DeviceType::TrafficGenerator, &[0]).unwrap();
//! client.set_property(tgen, PropertyId::Enable, true, &Params::new()).await?;
//!
//! let mut measurements = client.take_measurements().unwrap();
//! client.start_run().await?;
//! while let Some(event) = measurements.recv().await {
//!     println!("device {}: {:?}", event.device_id, event.measurement);
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every request returns `Result<_, ClientError>`. A device rejecting a request is not
//! an error: the device's success flag is returned as `Ok(false)`. Losing the
//! connection fails the pending request with [`ClientError::Disconnected`].
//!
//! ## Logging
//!
//! Connection lifecycle events are logged at `info`, lost connections at `error`,
//! discarded messages at `debug` and raw traffic at `trace`, through the `log` crate.

mod client;
mod config;
mod error;
mod session;

pub use client::Client;
pub use config::{Builder, ClientConfig, DEFAULT_MEASUREMENT_CAPACITY};
pub use error::ClientError;
pub use session::{MeasurementEvent, Phase};
pub use zbnt_protocol;
