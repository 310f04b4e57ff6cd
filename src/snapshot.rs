//! Length-prefixed object snapshots in a byte-addressable store.
//!
//! The layout is one length byte followed by the value's object encoding.
//! A load only succeeds when the stored bytes decode to exactly one
//! complete value of the declared length, so a torn or stale region reads
//! back as an error instead of garbage.

use log::warn;

use crate::error::{Error, Result};
use crate::packer::{Pack, Packer};
use crate::unpacker::{Unpack, Unpacker};

/// Byte-addressable persistent store: EEPROM, a flash page, a file.
pub trait Storage {
	fn read_byte(&self, offset: usize) -> u8;
	fn write_byte(&mut self, offset: usize, value: u8);
}

/// Bytes `value` will occupy once object-encoded (length byte excluded).
pub fn estimate_size<T: Pack + ?Sized>(value: &T) -> usize {
	let mut packer = Packer::new();
	value.pack(&mut packer);
	packer.len()
}

/// Write `value` at `offset`. Returns the total bytes written, length
/// byte included.
pub fn save<T: Pack + ?Sized>(store: &mut dyn Storage, value: &T, offset: usize) -> Result<usize> {
	let mut packer = Packer::new();
	value.pack(&mut packer);
	let bytes = packer.data();
	if bytes.len() > u8::MAX as usize {
		warn!("snapshot of {} bytes cannot be length-prefixed", bytes.len());
		return Err(Error::SnapshotTooLarge(bytes.len()));
	}
	store.write_byte(offset, bytes.len() as u8);
	for (i, &byte) in bytes.iter().enumerate() {
		store.write_byte(offset + 1 + i, byte);
	}
	Ok(bytes.len() + 1)
}

/// Read the value stored at `offset`.
pub fn load<T: Unpack>(store: &dyn Storage, offset: usize) -> Result<T> {
	let len = store.read_byte(offset) as usize;
	let mut bytes = Vec::with_capacity(len);
	for i in 0..len {
		bytes.push(store.read_byte(offset + 1 + i));
	}
	let mut unpacker = Unpacker::new();
	if !unpacker.feed(&bytes) {
		warn!("snapshot at offset {} has a bad length prefix", offset);
		return Err(Error::BadSnapshot(offset));
	}
	let value = unpacker.unpack::<T>();
	if unpacker.index() != unpacker.element_count() {
		warn!("snapshot at offset {} has trailing elements", offset);
		return Err(Error::BadSnapshot(offset));
	}
	Ok(value)
}

/// Overwrite `len` bytes at `offset` with the erased-flash value `0xFF`.
pub fn clear(store: &mut dyn Storage, len: usize, offset: usize) {
	for i in 0..len {
		store.write_byte(offset + i, 0xFF);
	}
}

/// Fixed-size in-memory [`Storage`], standing in for EEPROM in tests.
pub struct MemStorage {
	bytes: Vec<u8>,
}

impl MemStorage {
	pub fn new(size: usize) -> MemStorage {
		MemStorage {
			bytes: vec![0xFF; size],
		}
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes
	}
}

impl Storage for MemStorage {
	fn read_byte(&self, offset: usize) -> u8 {
		self.bytes.get(offset).copied().unwrap_or(0xFF)
	}

	fn write_byte(&mut self, offset: usize, value: u8) {
		if let Some(slot) = self.bytes.get_mut(offset) {
			*slot = value;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn save_then_load() -> Result<()> {
		let mut store = MemStorage::new(64);
		let written = save(&mut store, &12345u32, 0)?;
		assert_eq!(written, 1 + 5);
		assert_eq!(load::<u32>(&store, 0)?, 12345);
		Ok(())
	}

	#[test]
	fn offsets_are_independent() -> Result<()> {
		let mut store = MemStorage::new(64);
		save(&mut store, &1u8, 0)?;
		save(&mut store, &"text", 8)?;
		assert_eq!(load::<u8>(&store, 0)?, 1);
		assert_eq!(load::<String>(&store, 8)?, "text");
		Ok(())
	}

	#[test]
	fn containers_round_trip() -> Result<()> {
		let mut store = MemStorage::new(64);
		save(&mut store, &vec![1u16, 300, 7], 0)?;
		assert_eq!(load::<Vec<u16>>(&store, 0)?, vec![1, 300, 7]);
		Ok(())
	}

	#[test]
	fn erased_region_fails_to_load() {
		let store = MemStorage::new(64);
		// length byte reads 0xFF, but the following bytes are not a valid
		// 255-byte encoding
		assert!(load::<u32>(&store, 0).is_err());
	}

	#[test]
	fn cleared_snapshot_fails_to_load() -> Result<()> {
		let mut store = MemStorage::new(64);
		let written = save(&mut store, &7u8, 0)?;
		clear(&mut store, written, 0);
		assert!(load::<u8>(&store, 0).is_err());
		Ok(())
	}

	#[test]
	fn oversize_value_is_rejected() {
		let mut store = MemStorage::new(1024);
		let big = "x".repeat(300);
		assert!(matches!(
			save(&mut store, big.as_str(), 0),
			Err(Error::SnapshotTooLarge(_))
		));
	}

	#[test]
	fn estimate_matches_save() -> Result<()> {
		let mut store = MemStorage::new(64);
		let value = 70_000u32;
		assert_eq!(save(&mut store, &value, 0)?, estimate_size(&value) + 1);
		Ok(())
	}
}
