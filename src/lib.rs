//! # cdb-storage
//!
//! An implementation of D. J. Bernstein's [cdb]: an immutable, on-disk
//! associative array mapping byte-string keys to byte-string values.
//! Lookups cost at most two disk reads in the expected case, a key may
//! carry any number of values, and an arbitrary number of threads can
//! resolve lookups through one shared open reader without any locking.
//!
//! A database is written once and never modified; updates are performed
//! by rewriting the file. The format is byte-for-byte compatible with
//! djb's original cdb.
//!
//! ## File layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ SLOT DIRECTORY (2048 bytes)                                │
//! │ 256 × [bucket_offset: u32 LE][bucket_length: u32 LE]       │
//! ├────────────────────────────────────────────────────────────┤
//! │ RECORD REGION                                              │
//! │ N × [klen: u32 LE][vlen: u32 LE][key][value]               │
//! ├────────────────────────────────────────────────────────────┤
//! │ BUCKET TABLES (bucket order 0..=255)                       │
//! │ bucket_length[i] × [hash: u32 LE][record_offset: u32 LE]   │
//! │ record_offset == 0 marks an empty slot                     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Writing a database
//!
//! ```no_run
//! use cdb_storage::CdbWriter;
//!
//! let mut writer = CdbWriter::create("example.cdb")?;
//! writer.append(b"one", b"Hello, ")?;
//! writer.append(b"one", b"world!")?;
//! writer.append(b"two", &[1u8, 2, 3, 4])?;
//! writer.finish()?;
//! # Ok::<(), cdb_storage::CdbError>(())
//! ```
//!
//! ## Reading it back
//!
//! ```no_run
//! use cdb_storage::CdbReader;
//!
//! let reader = CdbReader::open("example.cdb")?;
//! if let Some(value) = reader.get(b"two")? {
//!     println!("{value:?}");
//! }
//! for value in reader.find(b"one") {
//!     println!("{value:?}");
//! }
//! # Ok::<(), cdb_storage::CdbError>(())
//! ```
//!
//! [cdb]: https://cr.yp.to/cdb.html

pub mod config;
pub mod error;
pub mod format;
pub mod hash;
pub mod reader;
pub mod writer;

pub use config::ReaderOptions;
pub use error::{CdbError, Result};
pub use hash::cdb_hash;
pub use reader::{CdbReader, CdbRecordIter, CdbValueIter};
pub use writer::CdbWriter;
