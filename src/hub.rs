//! The hub: one explicit context owning transports, per-source decoders and
//! registries, and the publish table.
//!
//! Hosts construct as many hubs as they need (tests run several against
//! each other in one process) and drive each from their event loop with
//! [`Hub::update`]. Everything is single-threaded and cooperative: no call
//! here blocks, and no packet is dispatched outside `update`/`poll_inputs`/
//! `feed`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::{Error, Result};
use crate::framing::{self, FrameConfig, FrameDecoder};
use crate::packer::{Pack, Packer};
use crate::publisher::{Destination, PublishHandle, Publisher, Source};
use crate::subscriber::SubscriberRegistry;
use crate::transport::{SourceId, Transport, TransportKind};
use crate::unpacker::Unpack;

/// Monotonic microsecond clock driving the publisher scheduler.
///
/// The default is wall-hardware time; tests substitute a hand-stepped
/// clock to pin scheduler behavior down exactly.
pub trait Clock {
	fn now_us(&self) -> u64;
}

/// Default clock backed by [`Instant`].
pub struct MonotonicClock {
	epoch: Instant,
}

impl Default for MonotonicClock {
	fn default() -> MonotonicClock {
		MonotonicClock {
			epoch: Instant::now(),
		}
	}
}

impl Clock for MonotonicClock {
	fn now_us(&self) -> u64 {
		self.epoch.elapsed().as_micros() as u64
	}
}

struct SourceSlot {
	kind: TransportKind,
	transport: Box<dyn Transport>,
	decoder: FrameDecoder,
	subscribers: SubscriberRegistry,
}

/// Context object tying the whole stack together.
pub struct Hub<C: Clock = MonotonicClock> {
	config: FrameConfig,
	clock: C,
	sources: Vec<SourceSlot>,
	publisher: Publisher,
	scratch: Packer,
}

impl Hub<MonotonicClock> {
	pub fn new() -> Hub<MonotonicClock> {
		Hub::with_clock(MonotonicClock::default())
	}

	pub fn with_config(config: FrameConfig) -> Hub<MonotonicClock> {
		let mut hub = Hub::new();
		hub.config = config;
		hub
	}
}

impl Default for Hub<MonotonicClock> {
	fn default() -> Hub<MonotonicClock> {
		Hub::new()
	}
}

impl<C: Clock> Hub<C> {
	pub fn with_clock(clock: C) -> Hub<C> {
		Hub {
			config: FrameConfig::default(),
			clock,
			sources: Vec::new(),
			publisher: Publisher::new(),
			scratch: Packer::new(),
		}
	}

	pub fn config(&self) -> &FrameConfig {
		&self.config
	}

	/// Switch indexing and CRC expectations, for future and already
	/// attached sources alike.
	pub fn set_options(&mut self, indexing: bool, crc: bool) {
		self.config.indexing = indexing;
		self.config.crc = crc;
		for slot in &mut self.sources {
			slot.decoder.set_options(indexing, crc);
		}
	}

	/// Attach a transport; the returned handle names it in every other
	/// call.
	pub fn attach(&mut self, kind: TransportKind, transport: impl Transport + 'static) -> SourceId {
		let id = SourceId(self.sources.len());
		self.sources.push(SourceSlot {
			kind,
			transport: Box::new(transport),
			decoder: FrameDecoder::new(self.config),
			subscribers: SubscriberRegistry::new(),
		});
		id
	}

	/// Frame decoder of an attached source, for counters and inspection.
	pub fn decoder(&self, source: SourceId) -> Option<&FrameDecoder> {
		self.sources.get(source.0).map(|slot| &slot.decoder)
	}

	pub fn decoder_mut(&mut self, source: SourceId) -> Option<&mut FrameDecoder> {
		self.sources.get_mut(source.0).map(|slot| &mut slot.decoder)
	}

	// ---------- subscribing ----------

	pub fn subscribe(
		&mut self,
		source: SourceId,
		index: u8,
		callback: impl FnMut(&[u8]) + 'static,
	) -> Result<()> {
		self.slot(source)?.subscribers.subscribe(index, callback);
		Ok(())
	}

	/// Callback that sees every indexed packet from `source`, before any
	/// per-index callback.
	pub fn subscribe_any(
		&mut self,
		source: SourceId,
		callback: impl FnMut(u8, &[u8]) + 'static,
	) -> Result<()> {
		self.slot(source)?.subscribers.subscribe_any(callback);
		Ok(())
	}

	/// Callback for a source running with indexing disabled.
	pub fn subscribe_unindexed(
		&mut self,
		source: SourceId,
		callback: impl FnMut(&[u8]) + 'static,
	) -> Result<()> {
		self.slot(source)?.subscribers.subscribe_unindexed(callback);
		Ok(())
	}

	/// Typed subscription; see
	/// [`SubscriberRegistry::subscribe_values`](crate::SubscriberRegistry::subscribe_values).
	pub fn subscribe_values<T, F>(&mut self, source: SourceId, index: u8, callback: F) -> Result<()>
	where
		T: Unpack + 'static,
		F: FnMut(T) + 'static,
	{
		self.slot(source)?.subscribers.subscribe_values(index, callback);
		Ok(())
	}

	/// Typed subscription over an array-framed payload (see
	/// [`Hub::send_arr`]).
	pub fn subscribe_arr_values<T, F>(
		&mut self,
		source: SourceId,
		index: u8,
		callback: F,
	) -> Result<()>
	where
		T: Unpack + 'static,
		F: FnMut(T) + 'static,
	{
		self.slot(source)?.subscribers.subscribe_arr_values(index, callback);
		Ok(())
	}

	/// Typed subscription over a map-framed payload (see
	/// [`Hub::send_map`]).
	pub fn subscribe_map_values<T, F>(
		&mut self,
		source: SourceId,
		index: u8,
		callback: F,
	) -> Result<()>
	where
		T: Unpack + 'static,
		F: FnMut(T) + 'static,
	{
		self.slot(source)?.subscribers.subscribe_map_values(index, callback);
		Ok(())
	}

	pub fn unsubscribe(&mut self, source: SourceId, index: u8) -> Result<()> {
		self.slot(source)?.subscribers.unsubscribe(index);
		Ok(())
	}

	pub fn unsubscribe_any(&mut self, source: SourceId) -> Result<()> {
		self.slot(source)?.subscribers.unsubscribe_any();
		Ok(())
	}

	pub fn unsubscribe_unindexed(&mut self, source: SourceId) -> Result<()> {
		self.slot(source)?.subscribers.unsubscribe_unindexed();
		Ok(())
	}

	// ---------- immediate sends ----------

	/// Pack `values` in order and send them as one frame.
	pub fn send(&mut self, source: SourceId, index: u8, values: &[&dyn Pack]) -> Result<()> {
		self.scratch.clear();
		self.scratch.serialize(values);
		self.send_packed(source, None, index)
	}

	/// Like [`Hub::send`] with an array header announcing `values.len()`.
	pub fn send_arr(&mut self, source: SourceId, index: u8, values: &[&dyn Pack]) -> Result<()> {
		self.scratch.clear();
		self.scratch.to_array(values);
		self.send_packed(source, None, index)
	}

	/// Like [`Hub::send`] with a map header; `values` is a flat
	/// key/value list and must have even length.
	pub fn send_map(&mut self, source: SourceId, index: u8, values: &[&dyn Pack]) -> Result<()> {
		self.scratch.clear();
		self.scratch.to_map(values)?;
		self.send_packed(source, None, index)
	}

	/// Datagram variant of [`Hub::send`].
	pub fn send_to(
		&mut self,
		source: SourceId,
		peer: SocketAddr,
		index: u8,
		values: &[&dyn Pack],
	) -> Result<()> {
		self.scratch.clear();
		self.scratch.serialize(values);
		self.send_packed(source, Some(peer), index)
	}

	/// Pack `values` and return the framed bytes without writing them
	/// anywhere, for links the host writes itself (pair with
	/// [`Hub::feed`] on the receive side).
	pub fn encode_values(&mut self, index: u8, values: &[&dyn Pack]) -> Vec<u8> {
		self.scratch.clear();
		self.scratch.serialize(values);
		framing::encode(&self.config, index, self.scratch.data())
	}

	/// Send pre-encoded payload bytes as one frame.
	pub fn send_bytes(&mut self, source: SourceId, index: u8, payload: &[u8]) -> Result<()> {
		let frame = framing::encode(&self.config, index, payload);
		let slot = self.slot(source)?;
		slot.transport.write(&frame)?;
		Ok(())
	}

	fn send_packed(&mut self, source: SourceId, peer: Option<SocketAddr>, index: u8) -> Result<()> {
		let frame = framing::encode(&self.config, index, self.scratch.data());
		let slot = self
			.sources
			.get_mut(source.0)
			.ok_or(Error::UnknownSource(source.0))?;
		match peer {
			Some(addr) => slot.transport.write_to(addr, &frame)?,
			None => slot.transport.write(&frame)?,
		}
		Ok(())
	}

	// ---------- publishing ----------

	/// Register a periodic publication of `value` to `(source, index)`.
	pub fn publish(
		&mut self,
		source: SourceId,
		index: u8,
		value: Source,
		period: Duration,
	) -> Result<PublishHandle> {
		let dest = self.destination(source, index, None)?;
		Ok(self
			.publisher
			.insert(dest, value, period, self.clock.now_us()))
	}

	/// Datagram variant of [`Hub::publish`].
	pub fn publish_to(
		&mut self,
		source: SourceId,
		peer: SocketAddr,
		index: u8,
		value: Source,
		period: Duration,
	) -> Result<PublishHandle> {
		let dest = self.destination(source, index, Some(peer))?;
		Ok(self
			.publisher
			.insert(dest, value, period, self.clock.now_us()))
	}

	/// Publish several sub-sources as one array-framed value.
	pub fn publish_arr(
		&mut self,
		source: SourceId,
		index: u8,
		parts: Vec<Source>,
		period: Duration,
	) -> Result<PublishHandle> {
		self.publish(source, index, Source::tuple_as_array(parts), period)
	}

	/// Publish a flat key/value list as one map-framed value. The list
	/// must have even length.
	pub fn publish_map(
		&mut self,
		source: SourceId,
		index: u8,
		parts: Vec<Source>,
		period: Duration,
	) -> Result<PublishHandle> {
		if parts.len() % 2 != 0 {
			warn!("map parts must come in key/value pairs, got {}", parts.len());
			return Err(Error::OddMapArguments(parts.len()));
		}
		self.publish(source, index, Source::tuple_as_map(parts), period)
	}

	/// Remove a publish entry; no emission happens after this returns.
	pub fn unpublish(&mut self, handle: &PublishHandle) -> bool {
		self.publisher.remove(handle)
	}

	pub fn set_period(&mut self, handle: &PublishHandle, period: Duration) -> bool {
		self.publisher.set_period(handle, period)
	}

	/// Period expressed as a rate in Hz.
	pub fn set_rate(&mut self, handle: &PublishHandle, hz: f32) -> bool {
		self.publisher.set_rate(handle, hz)
	}

	// ---------- driving ----------

	/// One round of input polling and publisher emission.
	pub fn update(&mut self) -> Result<()> {
		self.poll_inputs()?;
		self.run_publishers();
		Ok(())
	}

	/// Drain every transport into its decoder and dispatch the decoded
	/// packets, oldest first.
	pub fn poll_inputs(&mut self) -> Result<()> {
		for slot in &mut self.sources {
			loop {
				let n = slot.transport.bytes_available();
				if n == 0 {
					break;
				}
				let mut buf = vec![0u8; n];
				slot.transport.read_into(&mut buf)?;
				slot.decoder.feed(&buf);
			}
			let indexing = slot.decoder.indexing();
			while let Some(packet) = slot.decoder.pop() {
				slot.subscribers.dispatch(&packet, indexing);
			}
		}
		Ok(())
	}

	/// Emit every due publish entry. Write failures are logged and
	/// counted against nothing: the sweep always completes.
	pub fn run_publishers(&mut self) {
		let now = self.clock.now_us();
		let config = self.config;
		let sources = &mut self.sources;
		self.publisher.post(now, |dest, payload| {
			let Some(slot) = sources.get_mut(dest.source.0) else {
				warn!("publish entry for detached source {}", dest.source);
				return;
			};
			let frame = framing::encode(&config, dest.index, payload);
			let outcome = match dest.peer {
				Some(addr) => slot.transport.write_to(addr, &frame),
				None => slot.transport.write(&frame),
			};
			if let Err(e) = outcome {
				warn!("publish write to source {} failed: {}", dest.source, e);
			}
		});
	}

	/// Inject bytes for a source by hand, bypassing its transport, and
	/// dispatch whatever completes. For links the host drives itself.
	pub fn feed(&mut self, source: SourceId, bytes: &[u8]) -> Result<()> {
		let slot = self
			.sources
			.get_mut(source.0)
			.ok_or(Error::UnknownSource(source.0))?;
		slot.decoder.feed(bytes);
		let indexing = slot.decoder.indexing();
		while let Some(packet) = slot.decoder.pop() {
			slot.subscribers.dispatch(&packet, indexing);
		}
		Ok(())
	}

	fn slot(&mut self, source: SourceId) -> Result<&mut SourceSlot> {
		self.sources
			.get_mut(source.0)
			.ok_or(Error::UnknownSource(source.0))
	}

	fn destination(
		&mut self,
		source: SourceId,
		index: u8,
		peer: Option<SocketAddr>,
	) -> Result<Destination> {
		let kind = self.slot(source)?.kind;
		Ok(Destination {
			source,
			kind,
			index,
			peer,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::MemTransport;
	use std::cell::Cell;
	use std::cell::RefCell;
	use std::rc::Rc;

	/// Hand-stepped clock for deterministic scheduler tests.
	#[derive(Clone, Default)]
	struct StepClock(Rc<Cell<u64>>);

	impl StepClock {
		fn advance(&self, us: u64) {
			self.0.set(self.0.get() + us);
		}
	}

	impl Clock for StepClock {
		fn now_us(&self) -> u64 {
			self.0.get()
		}
	}

	#[test]
	fn send_and_receive_over_loopback() -> Result<()> {
		let mut hub = Hub::new();
		let id = hub.attach(TransportKind::Serial, MemTransport::loopback());

		let seen = Rc::new(RefCell::new(Vec::new()));
		let s = seen.clone();
		hub.subscribe_values::<(u32, String), _>(id, 0x11, move |(n, text)| {
			s.borrow_mut().push((n, text));
		})?;

		hub.send(id, 0x11, &[&1234u32, &"hello"])?;
		hub.update()?;

		assert_eq!(&*seen.borrow(), &[(1234, "hello".to_string())]);
		Ok(())
	}

	#[test]
	fn publish_emits_on_schedule() -> Result<()> {
		let clock = StepClock::default();
		let mut hub = Hub::with_clock(clock.clone());
		let id = hub.attach(TransportKind::Serial, MemTransport::loopback());

		let count = Rc::new(Cell::new(0));
		let c = count.clone();
		hub.subscribe(id, 1, move |_| c.set(c.get() + 1))?;

		hub.publish(
			id,
			1,
			Source::constant(5u8),
			Duration::from_micros(100),
		)?;

		for _ in 0..10 {
			clock.advance(50);
			hub.update()?;
		}
		// drain the frame emitted on the final tick
		hub.poll_inputs()?;
		// 500 us at one emit per 100 us
		assert_eq!(count.get(), 5);
		Ok(())
	}

	#[test]
	fn unpublish_stops_emission() -> Result<()> {
		let clock = StepClock::default();
		let mut hub = Hub::with_clock(clock.clone());
		let id = hub.attach(TransportKind::Serial, MemTransport::loopback());

		let count = Rc::new(Cell::new(0));
		let c = count.clone();
		hub.subscribe(id, 1, move |_| c.set(c.get() + 1))?;
		let handle = hub.publish(id, 1, Source::constant(0u8), Duration::from_micros(10))?;

		clock.advance(10);
		hub.update()?;
		hub.poll_inputs()?;
		assert_eq!(count.get(), 1);

		assert!(hub.unpublish(&handle));
		clock.advance(1000);
		hub.update()?;
		hub.poll_inputs()?;
		assert_eq!(count.get(), 1);
		Ok(())
	}

	#[test]
	fn two_hubs_over_a_pipe_pair() -> Result<()> {
		let (left, right) = MemTransport::pair();
		let mut tx = Hub::new();
		let mut rx = Hub::new();
		let tx_id = tx.attach(TransportKind::Serial, left);
		let rx_id = rx.attach(TransportKind::Serial, right);

		let seen = Rc::new(RefCell::new(Vec::new()));
		let s = seen.clone();
		rx.subscribe_values::<f32, _>(rx_id, 0x20, move |v| s.borrow_mut().push(v))?;

		tx.send(tx_id, 0x20, &[&0.5f32])?;
		tx.send(tx_id, 0x20, &[&1.5f32])?;
		rx.update()?;

		assert_eq!(&*seen.borrow(), &[0.5, 1.5]);
		Ok(())
	}

	#[test]
	fn always_callback_precedes_indexed() -> Result<()> {
		let mut hub = Hub::new();
		let id = hub.attach(TransportKind::Serial, MemTransport::loopback());

		let order = Rc::new(RefCell::new(Vec::new()));
		let o = order.clone();
		hub.subscribe_any(id, move |index, _| o.borrow_mut().push(format!("any:{}", index)))?;
		let o = order.clone();
		hub.subscribe(id, 9, move |_| o.borrow_mut().push("indexed".into()))?;

		hub.send(id, 9, &[&1u8])?;
		hub.update()?;
		assert_eq!(&*order.borrow(), &["any:9", "indexed"]);
		Ok(())
	}

	#[test]
	fn unknown_source_is_a_usage_error() {
		let mut hub = Hub::new();
		let err = hub.send(SourceId(4), 0, &[&1u8]);
		assert!(matches!(err, Err(Error::UnknownSource(4))));
	}

	#[test]
	fn publish_map_rejects_odd_parts() {
		let mut hub = Hub::new();
		let id = hub.attach(TransportKind::Serial, MemTransport::loopback());
		let err = hub.publish_map(
			id,
			0,
			vec![Source::constant("lonely")],
			Duration::from_micros(10),
		);
		assert!(matches!(err, Err(Error::OddMapArguments(1))));
	}

	#[test]
	fn manual_feed_dispatches() -> Result<()> {
		let mut hub = Hub::new();
		let id = hub.attach(TransportKind::Serial, MemTransport::loopback());

		let seen = Rc::new(Cell::new(0u8));
		let s = seen.clone();
		hub.subscribe_values::<u8, _>(id, 3, move |v| s.set(v))?;

		let mut packer = Packer::new();
		packer.pack_uint(42);
		let frame = framing::encode(hub.config(), 3, packer.data());
		hub.feed(id, &frame)?;
		assert_eq!(seen.get(), 42);
		Ok(())
	}

	#[test]
	fn arr_and_map_framed_round_trips() -> Result<()> {
		let mut hub = Hub::new();
		let id = hub.attach(TransportKind::Serial, MemTransport::loopback());

		let arr = Rc::new(RefCell::new(None));
		let a = arr.clone();
		hub.subscribe_arr_values::<(u8, u8), _>(id, 1, move |pair| {
			*a.borrow_mut() = Some(pair);
		})?;
		let map = Rc::new(RefCell::new(None));
		let m = map.clone();
		hub.subscribe_map_values::<(String, u16), _>(id, 2, move |kv| {
			*m.borrow_mut() = Some(kv);
		})?;

		hub.send_arr(id, 1, &[&3u8, &4u8])?;
		hub.send_map(id, 2, &[&"volts", &230u16])?;
		hub.update()?;

		assert_eq!(*arr.borrow(), Some((3, 4)));
		assert_eq!(*map.borrow(), Some(("volts".to_string(), 230)));
		Ok(())
	}

	#[test]
	fn encode_values_pairs_with_feed() -> Result<()> {
		let mut hub = Hub::new();
		let id = hub.attach(TransportKind::Serial, MemTransport::loopback());

		let seen = Rc::new(Cell::new(0u32));
		let s = seen.clone();
		hub.subscribe_values::<u32, _>(id, 6, move |v| s.set(v))?;

		let frame = hub.encode_values(6, &[&99u32]);
		hub.feed(id, &frame)?;
		assert_eq!(seen.get(), 99);
		Ok(())
	}

	#[test]
	fn set_options_applies_to_attached_sources() -> Result<()> {
		let mut hub = Hub::new();
		let id = hub.attach(TransportKind::Serial, MemTransport::loopback());
		hub.set_options(false, false);

		let seen = Rc::new(RefCell::new(Vec::new()));
		let s = seen.clone();
		hub.subscribe_unindexed(id, move |bytes| s.borrow_mut().push(bytes.to_vec()))?;

		hub.send(id, 0, &[&7u8])?;
		hub.update()?;
		assert_eq!(&*seen.borrow(), &[vec![7u8]]);
		Ok(())
	}
}
