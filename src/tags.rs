//! First-byte tags of the object encoding.
//!
//! The compact variants (positive/negative fixint, fixstr, fixarray, fixmap)
//! fold their value or length into the tag byte and are matched as ranges;
//! everything else is a single tag value.

pub(crate) const NIL: u8 = 0xC0;
pub(crate) const NEVER_USED: u8 = 0xC1;
pub(crate) const FALSE: u8 = 0xC2;
pub(crate) const TRUE: u8 = 0xC3;
pub(crate) const BIN8: u8 = 0xC4;
pub(crate) const BIN16: u8 = 0xC5;
pub(crate) const BIN32: u8 = 0xC6;
pub(crate) const EXT8: u8 = 0xC7;
pub(crate) const EXT16: u8 = 0xC8;
pub(crate) const EXT32: u8 = 0xC9;
pub(crate) const FLOAT32: u8 = 0xCA;
pub(crate) const FLOAT64: u8 = 0xCB;
pub(crate) const UINT8: u8 = 0xCC;
pub(crate) const UINT16: u8 = 0xCD;
pub(crate) const UINT32: u8 = 0xCE;
pub(crate) const UINT64: u8 = 0xCF;
pub(crate) const INT8: u8 = 0xD0;
pub(crate) const INT16: u8 = 0xD1;
pub(crate) const INT32: u8 = 0xD2;
pub(crate) const INT64: u8 = 0xD3;
pub(crate) const FIXEXT1: u8 = 0xD4;
pub(crate) const FIXEXT2: u8 = 0xD5;
pub(crate) const FIXEXT4: u8 = 0xD6;
pub(crate) const FIXEXT8: u8 = 0xD7;
pub(crate) const FIXEXT16: u8 = 0xD8;
pub(crate) const STR8: u8 = 0xD9;
pub(crate) const STR16: u8 = 0xDA;
pub(crate) const STR32: u8 = 0xDB;
pub(crate) const ARRAY16: u8 = 0xDC;
pub(crate) const ARRAY32: u8 = 0xDD;
pub(crate) const MAP16: u8 = 0xDE;
pub(crate) const MAP32: u8 = 0xDF;

/// Base of the fixstr range (`0xA0..=0xBF`), length in the low five bits.
pub(crate) const FIXSTR: u8 = 0xA0;
/// Base of the fixarray range (`0x90..=0x9F`), count in the low four bits.
pub(crate) const FIXARRAY: u8 = 0x90;
/// Base of the fixmap range (`0x80..=0x8F`), pair count in the low four bits.
pub(crate) const FIXMAP: u8 = 0x80;
/// Base of the negative fixint range (`0xE0..=0xFF`).
pub(crate) const NEGATIVE_FIXINT: u8 = 0xE0;

/// Ext type byte reserved for timestamps.
pub(crate) const TIMESTAMP_TYPE: i8 = -1;
