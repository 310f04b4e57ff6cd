//! Per-source callback registry.
//!
//! Three callback slots, not mutually exclusive: a map of per-index
//! callbacks, a single "always" callback that sees every indexed packet
//! (and runs first), and a single callback for links with indexing
//! disabled. Typed subscription is sugar over the raw byte callback: it
//! builds a fresh [`Unpacker`] per packet and extracts arguments in
//! declared order, so a mistyped field arrives as its default rather than
//! derailing the callback.

use std::collections::HashMap;

use crate::framing::Packet;
use crate::unpacker::{Unpack, Unpacker};

type RawCallback = Box<dyn FnMut(&[u8])>;
type AlwaysCallback = Box<dyn FnMut(u8, &[u8])>;

/// Callback registry for one byte source.
#[derive(Default)]
pub struct SubscriberRegistry {
	indexed: HashMap<u8, RawCallback>,
	always: Option<AlwaysCallback>,
	unindexed: Option<RawCallback>,
}

impl SubscriberRegistry {
	pub fn new() -> SubscriberRegistry {
		SubscriberRegistry::default()
	}

	/// Register a raw byte callback for one topic index. A second
	/// subscription on the same index replaces the first.
	pub fn subscribe(&mut self, index: u8, callback: impl FnMut(&[u8]) + 'static) {
		self.indexed.insert(index, Box::new(callback));
	}

	/// Register the callback that sees every indexed packet, before any
	/// per-index callback.
	pub fn subscribe_any(&mut self, callback: impl FnMut(u8, &[u8]) + 'static) {
		self.always = Some(Box::new(callback));
	}

	/// Register the callback used when indexing is disabled on this source.
	pub fn subscribe_unindexed(&mut self, callback: impl FnMut(&[u8]) + 'static) {
		self.unindexed = Some(Box::new(callback));
	}

	/// Typed subscription: unpack `T` from each payload and hand it to the
	/// callback. Tuples unpack field by field in declared order.
	pub fn subscribe_values<T, F>(&mut self, index: u8, mut callback: F)
	where
		T: Unpack + 'static,
		F: FnMut(T) + 'static,
	{
		self.subscribe(index, move |bytes| {
			let mut unpacker = Unpacker::new();
			unpacker.feed(bytes);
			callback(unpacker.unpack::<T>());
		});
	}

	/// Like [`SubscriberRegistry::subscribe_values`] for payloads that
	/// carry a leading array header (the counterpart of a `send_arr`
	/// publisher). The header is consumed before the fields.
	pub fn subscribe_arr_values<T, F>(&mut self, index: u8, mut callback: F)
	where
		T: Unpack + 'static,
		F: FnMut(T) + 'static,
	{
		self.subscribe(index, move |bytes| {
			let mut unpacker = Unpacker::new();
			unpacker.feed(bytes);
			unpacker.unpack_array_size();
			callback(unpacker.unpack::<T>());
		});
	}

	/// Like [`SubscriberRegistry::subscribe_values`] for payloads that
	/// carry a leading map header; `T` receives the flattened
	/// key/value/key/value sequence.
	pub fn subscribe_map_values<T, F>(&mut self, index: u8, mut callback: F)
	where
		T: Unpack + 'static,
		F: FnMut(T) + 'static,
	{
		self.subscribe(index, move |bytes| {
			let mut unpacker = Unpacker::new();
			unpacker.feed(bytes);
			unpacker.unpack_map_size();
			callback(unpacker.unpack::<T>());
		});
	}

	pub fn unsubscribe(&mut self, index: u8) {
		self.indexed.remove(&index);
	}

	pub fn unsubscribe_any(&mut self) {
		self.always = None;
	}

	pub fn unsubscribe_unindexed(&mut self) {
		self.unindexed = None;
	}

	pub fn is_empty(&self) -> bool {
		self.indexed.is_empty() && self.always.is_none() && self.unindexed.is_none()
	}

	/// Route one packet to whatever callbacks apply.
	pub fn dispatch(&mut self, packet: &Packet, indexing: bool) {
		if indexing {
			if let Some(callback) = self.always.as_mut() {
				callback(packet.index, &packet.data);
			}
			if let Some(callback) = self.indexed.get_mut(&packet.index) {
				callback(&packet.data);
			}
		} else if let Some(callback) = self.unindexed.as_mut() {
			callback(&packet.data);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::RefCell;
	use std::rc::Rc;

	fn packet(index: u8, data: &[u8]) -> Packet {
		Packet {
			index,
			data: data.to_vec(),
		}
	}

	#[test]
	fn indexed_dispatch() {
		let hits = Rc::new(RefCell::new(Vec::new()));
		let mut reg = SubscriberRegistry::new();
		let h = hits.clone();
		reg.subscribe(3, move |bytes| h.borrow_mut().push(bytes.to_vec()));

		reg.dispatch(&packet(3, &[1, 2]), true);
		reg.dispatch(&packet(4, &[9]), true);
		assert_eq!(&*hits.borrow(), &[vec![1, 2]]);
	}

	#[test]
	fn always_runs_first() {
		let order = Rc::new(RefCell::new(Vec::new()));
		let mut reg = SubscriberRegistry::new();
		let o = order.clone();
		reg.subscribe_any(move |index, _| o.borrow_mut().push(format!("always:{}", index)));
		let o = order.clone();
		reg.subscribe(7, move |_| o.borrow_mut().push("indexed".to_string()));

		reg.dispatch(&packet(7, &[]), true);
		assert_eq!(&*order.borrow(), &["always:7", "indexed"]);
	}

	#[test]
	fn resubscribe_replaces() {
		let hits = Rc::new(RefCell::new(0));
		let mut reg = SubscriberRegistry::new();
		let h = hits.clone();
		reg.subscribe(1, move |_| *h.borrow_mut() += 1);
		let h = hits.clone();
		reg.subscribe(1, move |_| *h.borrow_mut() += 10);

		reg.dispatch(&packet(1, &[]), true);
		assert_eq!(*hits.borrow(), 10);
	}

	#[test]
	fn unindexed_mode() {
		let hits = Rc::new(RefCell::new(0));
		let mut reg = SubscriberRegistry::new();
		let h = hits.clone();
		reg.subscribe_unindexed(move |_| *h.borrow_mut() += 1);
		let h = hits.clone();
		reg.subscribe(0, move |_| *h.borrow_mut() += 100);

		// indexing disabled: only the unindexed callback fires
		reg.dispatch(&packet(0, &[5]), false);
		assert_eq!(*hits.borrow(), 1);
	}

	#[test]
	fn typed_subscription_decodes_in_order() {
		use crate::packer::Packer;

		let seen = Rc::new(RefCell::new(None));
		let mut reg = SubscriberRegistry::new();
		let s = seen.clone();
		reg.subscribe_values::<(u32, String, f32), _>(2, move |(a, b, c)| {
			*s.borrow_mut() = Some((a, b, c));
		});

		let mut p = Packer::new();
		p.pack_uint(300);
		p.pack_str("hi");
		p.pack_f32(0.25);
		reg.dispatch(&packet(2, p.data()), true);

		assert_eq!(*seen.borrow(), Some((300, "hi".to_string(), 0.25)));
	}

	#[test]
	fn typed_subscription_survives_mismatch() {
		use crate::packer::Packer;

		let seen = Rc::new(RefCell::new(None));
		let mut reg = SubscriberRegistry::new();
		let s = seen.clone();
		reg.subscribe_values::<(u8, u8), _>(2, move |pair| {
			*s.borrow_mut() = Some(pair);
		});

		let mut p = Packer::new();
		p.pack_str("not a number");
		p.pack_uint(8);
		reg.dispatch(&packet(2, p.data()), true);

		// callback still ran, mistyped field defaulted
		assert_eq!(*seen.borrow(), Some((0, 8)));
	}

	#[test]
	fn unsubscribe_stops_dispatch() {
		let hits = Rc::new(RefCell::new(0));
		let mut reg = SubscriberRegistry::new();
		let h = hits.clone();
		reg.subscribe(1, move |_| *h.borrow_mut() += 1);
		reg.dispatch(&packet(1, &[]), true);
		reg.unsubscribe(1);
		reg.dispatch(&packet(1, &[]), true);
		assert_eq!(*hits.borrow(), 1);
	}
}
