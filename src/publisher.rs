//! Periodic publisher: destinations, value sources, and the scheduler.
//!
//! Each entry pairs a [`Destination`] with a [`Source`] and a period. A
//! `post` sweep re-encodes every due entry into a shared scratch packer and
//! hands the payload to the caller for framing and writing. Emit times are
//! stamped with the actual emit time, so a missed deadline never causes a
//! burst of catch-up frames.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use crate::packer::{Pack, Packer};
use crate::transport::{SourceId, TransportKind};

/// Default inter-emit interval: about 30 Hz.
pub const DEFAULT_PERIOD: Duration = Duration::from_micros(33_333);

/// Where a publish entry sends its frames. Ordering is lexicographic over
/// the fields, so one map can key every kind of link at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Destination {
	pub source: SourceId,
	pub kind: TransportKind,
	pub index: u8,
	/// Peer address for datagram links; `None` on streams.
	pub peer: Option<SocketAddr>,
}

/// Where a publish entry's value comes from at each emit.
pub enum Source {
	/// Live variable shared with the application, read at emit time.
	Value(Rc<RefCell<dyn Pack>>),
	/// Value captured at registration time.
	Const(Box<dyn Pack>),
	/// Closure invoked at emit time, packing whatever it produces.
	Getter(Box<dyn Fn(&mut Packer)>),
	/// Ordered sub-sources packed one after another into the same frame.
	Tuple(Vec<Source>),
}

impl Source {
	/// Share a live variable; the publisher re-reads it on every emit.
	pub fn value<T: Pack + 'static>(value: Rc<RefCell<T>>) -> Source {
		Source::Value(value)
	}

	/// Capture a value now; every emit repeats it.
	pub fn constant<T: Pack + 'static>(value: T) -> Source {
		Source::Const(Box::new(value))
	}

	/// Call a getter on every emit and pack its return value.
	pub fn getter<T, F>(getter: F) -> Source
	where
		T: Pack + 'static,
		F: Fn() -> T + 'static,
	{
		Source::Getter(Box::new(move |packer| getter().pack(packer)))
	}

	/// Pack several sub-sources into one frame, in order.
	pub fn tuple(parts: Vec<Source>) -> Source {
		Source::Tuple(parts)
	}

	/// Like [`Source::tuple`], prefixed with an array header announcing
	/// the part count.
	pub(crate) fn tuple_as_array(parts: Vec<Source>) -> Source {
		let count = parts.len();
		let mut all = Vec::with_capacity(parts.len() + 1);
		all.push(Source::Getter(Box::new(move |packer| {
			packer.pack_array_header(count);
		})));
		all.extend(parts);
		Source::Tuple(all)
	}

	/// Like [`Source::tuple`], prefixed with a map header for
	/// `parts.len() / 2` pairs. The caller has checked the count is even.
	pub(crate) fn tuple_as_map(parts: Vec<Source>) -> Source {
		let pairs = parts.len() / 2;
		let mut all = Vec::with_capacity(parts.len() + 1);
		all.push(Source::Getter(Box::new(move |packer| {
			packer.pack_map_header(pairs);
		})));
		all.extend(parts);
		Source::Tuple(all)
	}

	/// Append this source's current value to `packer`.
	pub fn encode_to(&self, packer: &mut Packer) {
		match self {
			Source::Value(value) => value.borrow().pack(packer),
			Source::Const(value) => value.pack(packer),
			Source::Getter(getter) => getter(packer),
			Source::Tuple(parts) => {
				for part in parts {
					part.encode_to(packer);
				}
			}
		}
	}
}

/// Handle returned by `publish`; names the entry for unpublish and period
/// changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishHandle(pub(crate) Destination);

impl PublishHandle {
	pub fn destination(&self) -> &Destination {
		&self.0
	}
}

struct Entry {
	source: Source,
	period_us: u64,
	last_emit_us: u64,
}

/// Table of publish entries plus the scratch encoder shared by emits.
#[derive(Default)]
pub struct Publisher {
	entries: BTreeMap<Destination, Entry>,
	scratch: Packer,
}

impl Publisher {
	pub fn new() -> Publisher {
		Publisher::default()
	}

	/// Register (or replace) the entry for `dest`.
	pub fn insert(
		&mut self,
		dest: Destination,
		source: Source,
		period: Duration,
		now_us: u64,
	) -> PublishHandle {
		self.entries.insert(
			dest,
			Entry {
				source,
				period_us: period.as_micros() as u64,
				last_emit_us: now_us,
			},
		);
		PublishHandle(dest)
	}

	/// Drop an entry; `true` if it existed. No emission happens for the
	/// handle after this returns.
	pub fn remove(&mut self, handle: &PublishHandle) -> bool {
		self.entries.remove(&handle.0).is_some()
	}

	pub fn set_period(&mut self, handle: &PublishHandle, period: Duration) -> bool {
		match self.entries.get_mut(&handle.0) {
			Some(entry) => {
				entry.period_us = period.as_micros() as u64;
				true
			}
			None => false,
		}
	}

	/// Period expressed as a rate in Hz.
	pub fn set_rate(&mut self, handle: &PublishHandle, hz: f32) -> bool {
		self.set_period(handle, Duration::from_micros((1_000_000.0 / hz) as u64))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Sweep all entries; every due one is re-encoded and handed to `emit`
	/// as `(destination, payload)`. Each entry fires at most once per
	/// sweep.
	pub fn post<F>(&mut self, now_us: u64, mut emit: F)
	where
		F: FnMut(&Destination, &[u8]),
	{
		let Publisher { entries, scratch } = self;
		for (dest, entry) in entries.iter_mut() {
			if now_us >= entry.last_emit_us + entry.period_us {
				entry.last_emit_us = now_us;
				scratch.clear();
				entry.source.encode_to(scratch);
				emit(dest, scratch.data());
			}
		}
	}
}
