//! This crate provides a bidirectional, framed, self-describing message
//! transport for byte-oriented links: serial lines, UDP sockets and TCP
//! streams.
//!
//! Values are serialized with a compact binary object encoding (wire-
//! compatible with MessagePack), wrapped in a frame with start/end
//! delimitation, an optional one-byte topic index and an optional CRC-8
//! trailer, and written to a transport. On the receiving side a streaming
//! decoder reconstructs frames from arbitrary byte chunks, verifies them
//! and dispatches typed values to subscribers registered by topic index.
//!
//! # Quick tour
//!
//! A [`Hub`] owns the transports, the per-source decoders and registries,
//! and the publish table. The host drives it from its event loop:
//!
//! ```
//! use std::time::Duration;
//! use wirepack::{Hub, MemTransport, Source, TransportKind};
//!
//! let mut hub = Hub::new();
//! let link = hub.attach(TransportKind::Serial, MemTransport::loopback());
//!
//! hub.subscribe_values::<(u32, f32), _>(link, 0x12, |(count, volts)| {
//!     println!("count={} volts={}", count, volts);
//! })?;
//!
//! // send once...
//! hub.send(link, 0x12, &[&42u32, &3.3f32])?;
//! // ...or on a schedule
//! hub.publish(link, 0x12, Source::getter(|| 7u32), Duration::from_millis(33))?;
//!
//! hub.update()?; // one round of polling and publishing
//! # Ok::<(), wirepack::Error>(())
//! ```
//!
//! # Layers
//!
//! Each layer is usable on its own: [`Packer`]/[`Unpacker`] for the object
//! encoding, [`framing`] for the envelope ([`FrameDecoder`] is the
//! streaming state machine), [`SubscriberRegistry`]/[`Publisher`] for
//! dispatch, and [`snapshot`] for length-prefixed persistence.
//!
//! # Error philosophy
//!
//! The receive path never fails the host. Corrupted, oversize or
//! malformed frames are counted ([`DecodeErrors`]) and dropped; a typed
//! read with the wrong shape yields defaults and a log warning but still
//! invokes the callback. `Result`s appear only at the API surface (usage
//! errors) and around transport I/O.

mod crc;
mod error;
mod hub;
mod packer;
mod publisher;
mod subscriber;
mod tags;
mod unpacker;
mod value;

pub mod framing;
pub mod snapshot;
pub mod transport;

pub use crc::crc8;
pub use error::{Error, Result};
pub use framing::{decode, encode, DecodeErrors, Encoding, FrameConfig, FrameDecoder, Packet};
pub use hub::{Clock, Hub, MonotonicClock};
pub use packer::{Pack, Packer};
pub use publisher::{Destination, PublishHandle, Publisher, Source, DEFAULT_PERIOD};
pub use subscriber::SubscriberRegistry;
pub use transport::{MemTransport, SourceId, TcpTransport, Transport, TransportKind, UdpTransport};
pub use unpacker::{Unpack, Unpacker};
pub use value::{Bin, Ext, Timespec};
