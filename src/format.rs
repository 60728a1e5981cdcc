//! On-disk layout of a CDB file
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ SLOT DIRECTORY (2048 bytes, offset 0)                      │
//! │ 256 × [bucket_offset: u32][bucket_length: u32]             │
//! ├────────────────────────────────────────────────────────────┤
//! │ RECORD REGION (offset 2048)                                │
//! │ N × [klen: u32][vlen: u32][key bytes][value bytes]         │
//! ├────────────────────────────────────────────────────────────┤
//! │ BUCKET TABLES (bucket order 0..=255)                       │
//! │ bucket_length[i] × [hash: u32][record_offset: u32]         │
//! │ record_offset == 0 marks an empty slot                     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are unsigned 32-bit little-endian. Offsets are absolute
//! from the start of the file, which caps a database at 4 GiB − 1. A
//! bucket_length counts 8-byte slots, not bytes, and is always twice the
//! number of keys that hashed into the bucket, keeping the
//! open-addressing load factor at or below one half.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::{self, Write};

/// Number of buckets addressed by the slot directory.
pub const BUCKETS: usize = 256;

/// Size of the fixed slot directory at offset 0.
pub const DIRECTORY_BYTES: usize = BUCKETS * 8;

/// Size of one bucket-table slot.
pub const SLOT_BYTES: u32 = 8;

/// Size of the (klen, vlen) prefix in front of every record.
pub const RECORD_HEADER_BYTES: u32 = 8;

/// Largest representable file: every offset must fit in a u32.
pub const MAX_FILE_BYTES: u64 = u32::MAX as u64;

/// One slot-directory entry: where a bucket's table starts and how many
/// slots it holds. `slots == 0` means no key ever hashed to the bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketRef {
    pub offset: u32,
    pub slots: u32,
}

/// One 8-byte bucket-table slot pointing at a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slot {
    pub hash: u32,
    pub offset: u32,
}

impl Slot {
    /// A zero offset marks a slot that was never filled; probes stop here.
    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }
}

/// Bucket selected by a key hash: the low byte.
pub fn bucket_index(hash: u32) -> usize {
    (hash & 0xff) as usize
}

/// First slot probed within a bucket of `slots` entries.
pub fn initial_slot(hash: u32, slots: u32) -> u32 {
    (hash >> 8) % slots
}

/// Parse the 2048-byte slot directory into its 256 bucket entries.
pub fn parse_directory(raw: &[u8; DIRECTORY_BYTES]) -> [BucketRef; BUCKETS] {
    let mut directory = [BucketRef::default(); BUCKETS];
    for (i, entry) in directory.iter_mut().enumerate() {
        entry.offset = LittleEndian::read_u32(&raw[i * 8..i * 8 + 4]);
        entry.slots = LittleEndian::read_u32(&raw[i * 8 + 4..i * 8 + 8]);
    }
    directory
}

/// Write the slot directory in bucket order.
pub fn write_directory<W: Write>(w: &mut W, directory: &[BucketRef; BUCKETS]) -> io::Result<()> {
    for entry in directory {
        w.write_u32::<LittleEndian>(entry.offset)?;
        w.write_u32::<LittleEndian>(entry.slots)?;
    }
    Ok(())
}

pub fn decode_slot(raw: &[u8; 8]) -> Slot {
    Slot {
        hash: LittleEndian::read_u32(&raw[..4]),
        offset: LittleEndian::read_u32(&raw[4..]),
    }
}

pub fn encode_slot(slot: Slot) -> [u8; 8] {
    let mut raw = [0u8; 8];
    LittleEndian::write_u32(&mut raw[..4], slot.hash);
    LittleEndian::write_u32(&mut raw[4..], slot.offset);
    raw
}

/// Decode a record's (key length, value length) prefix.
pub fn decode_record_header(raw: &[u8; 8]) -> (u32, u32) {
    (
        LittleEndian::read_u32(&raw[..4]),
        LittleEndian::read_u32(&raw[4..]),
    )
}

pub fn encode_record_header(klen: u32, vlen: u32) -> [u8; 8] {
    let mut raw = [0u8; 8];
    LittleEndian::write_u32(&mut raw[..4], klen);
    LittleEndian::write_u32(&mut raw[4..], vlen);
    raw
}
