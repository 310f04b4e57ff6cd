use std::io;
use thiserror::Error;

/// Errors surfaced by the fallible parts of the API.
///
/// Wire-level trouble (bad escapes, CRC mismatches, oversize bodies, queue
/// overflow) is deliberately *not* represented here: the frame decoder counts
/// and drops, so a noisy link can never fail the host. See
/// [`DecodeErrors`](crate::DecodeErrors) for those counters.
#[derive(Error, Debug)]
pub enum Error {
	/// A map helper was called with a flat argument list of odd length.
	#[error("map arguments must come in key/value pairs, got {0}")]
	OddMapArguments(usize),

	/// An operation named a source handle this hub never issued.
	#[error("unknown source handle {0}")]
	UnknownSource(usize),

	/// A value's object encoding is too large for a one-byte snapshot
	/// length prefix.
	#[error("snapshot encoding is {0} bytes, limit is 255")]
	SnapshotTooLarge(usize),

	/// A stored snapshot did not decode back to one complete value.
	#[error("snapshot at offset {0} did not decode cleanly")]
	BadSnapshot(usize),

	#[error("i/o error")]
	Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
