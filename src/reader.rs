//! CDB file reader with lock-free concurrent lookups

use crate::config::ReaderOptions;
use crate::error::{CdbError, Result};
use crate::format::{
    self, BucketRef, BUCKETS, DIRECTORY_BYTES, MAX_FILE_BYTES, RECORD_HEADER_BYTES, SLOT_BYTES,
};
use crate::hash::cdb_hash;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::{debug, error, warn};

/// Reader over a finalized CDB file.
///
/// The slot directory is loaded once at open and treated as immutable
/// from then on. Every later disk access is a positional read — a
/// memory-mapped slice copy or a `pread`-style file read — that carries
/// its own offset and touches no shared cursor. Because of that, any
/// number of threads may call [`get`](CdbReader::get) and
/// [`find`](CdbReader::find) on one shared reader without locks.
///
/// # Examples
///
/// ```no_run
/// let reader = cdb_storage::CdbReader::open("example.cdb")?;
///
/// for value in reader.find(b"one") {
///     println!("{value:?}");
/// }
/// # Ok::<(), cdb_storage::CdbError>(())
/// ```
#[derive(Debug)]
pub struct CdbReader {
    file: File,
    /// Memory-mapped view of the file, when mapping succeeded.
    mmap: Option<Mmap>,
    /// The 256 directory entries, parsed once at open.
    directory: Box<[BucketRef; BUCKETS]>,
    size: u64,
    strict: bool,
}

impl CdbReader {
    /// Open a database file with default [`ReaderOptions`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    /// Open a database file.
    ///
    /// Fails with [`CdbError::CorruptHeader`] if the file cannot hold the
    /// 2048-byte slot directory, and with [`CdbError::TooLarge`] if it
    /// exceeds what u32 offsets can address.
    pub fn open_with<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        debug!("opening cdb file: {:?} (size: {} bytes)", path, size);

        if size < DIRECTORY_BYTES as u64 {
            return Err(CdbError::CorruptHeader);
        }
        if size > MAX_FILE_BYTES {
            return Err(CdbError::TooLarge {
                size,
                max: MAX_FILE_BYTES,
            });
        }

        let mmap = if options.use_memory_mapping {
            match unsafe { MmapOptions::new().map(&file) } {
                Ok(mmap) => Some(mmap),
                Err(e) => {
                    debug!("failed to memory-map cdb file, using positional reads: {e}");
                    None
                }
            }
        } else {
            None
        };

        let mut raw = [0u8; DIRECTORY_BYTES];
        if let Some(mmap) = &mmap {
            raw.copy_from_slice(&mmap[..DIRECTORY_BYTES]);
        } else {
            read_exact_at(&file, &mut raw, 0)?;
        }
        let directory = Box::new(format::parse_directory(&raw));

        Ok(Self {
            file,
            mmap,
            directory,
            size,
            strict: options.strict,
        })
    }

    /// Look up the first value stored under `key`.
    ///
    /// For a key appended more than once this is the value appended
    /// first. I/O failures surface as [`CdbError::Io`]; corrupt record
    /// framing at a hash-matching slot is logged and treated as a miss
    /// for that slot (or surfaced, under
    /// [`ReaderOptions::strict`](crate::ReaderOptions)).
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        self.find(key).next_match()
    }

    /// Find every value stored under `key`, in probe order.
    ///
    /// The iterator is lazy and finite (at most one bucket's worth of
    /// slots is visited), owns all of its probe state, and cannot be
    /// restarted. I/O failures end the sequence and are reported through
    /// the tracing sink. Any number of these may run concurrently
    /// against one reader.
    pub fn find<K: AsRef<[u8]>>(&self, key: K) -> CdbValueIter<'_> {
        CdbValueIter::new(self, key.as_ref())
    }

    /// Iterate every record in the file, in append order.
    ///
    /// Unlike [`find`](CdbReader::find) this walks the record region
    /// directly, so framing corruption surfaces as an error item rather
    /// than a skipped slot.
    pub fn iter(&self) -> CdbRecordIter<'_> {
        // The record region ends where the lowest bucket table begins. A
        // fully zeroed directory reports no records at all.
        let end = self
            .directory
            .iter()
            .filter(|b| b.offset != 0)
            .map(|b| b.offset)
            .min()
            .unwrap_or(DIRECTORY_BYTES as u32)
            .clamp(DIRECTORY_BYTES as u32, self.size as u32);
        CdbRecordIter {
            reader: self,
            pos: DIRECTORY_BYTES as u32,
            end,
        }
    }

    /// Close the reader, releasing the file handle and any mapping.
    /// Failures while closing the underlying handle are swallowed.
    pub fn close(self) {}

    /// Positional read of `buf.len()` bytes at `offset`.
    ///
    /// A read past the end of the file is reported as corrupt framing
    /// rather than I/O failure; the caller decides whether to skip or
    /// surface it.
    fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset + buf.len() as u64;
        if end > self.size {
            return Err(CdbError::CorruptRecord {
                offset,
                reason: "read past end of file",
            });
        }
        if let Some(mmap) = &self.mmap {
            buf.copy_from_slice(&mmap[offset as usize..end as usize]);
            Ok(())
        } else {
            read_exact_at(&self.file, buf, offset)?;
            Ok(())
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Iterator over the values stored under a single key.
///
/// Holds the captured key, its hash, and the probe cursor as exclusive
/// per-call state; the reader itself is only read through `&`.
pub struct CdbValueIter<'a> {
    reader: &'a CdbReader,
    key: Vec<u8>,
    khash: u32,
    table: BucketRef,
    slot: u32,
    visited: u32,
}

impl<'a> CdbValueIter<'a> {
    fn new(reader: &'a CdbReader, key: &[u8]) -> Self {
        let khash = cdb_hash(key);
        let table = reader.directory[format::bucket_index(khash)];
        let slot = if table.slots > 0 {
            format::initial_slot(khash, table.slots)
        } else {
            0
        };
        Self {
            reader,
            key: key.to_vec(),
            khash,
            table,
            slot,
            visited: 0,
        }
    }

    /// Advance the probe to the next record matching the key and return
    /// its value, or `None` once the probe terminates.
    fn next_match(&mut self) -> Result<Option<Vec<u8>>> {
        while self.visited < self.table.slots {
            let slot_pos =
                u64::from(self.table.offset) + u64::from(self.slot) * u64::from(SLOT_BYTES);
            let mut raw = [0u8; 8];
            match self.reader.read_into(slot_pos, &mut raw) {
                Ok(()) => {}
                Err(CdbError::CorruptRecord { offset, reason }) => {
                    // A truncated bucket table will not get better at the
                    // next slot; end the probe here.
                    self.visited = self.table.slots;
                    if self.reader.strict {
                        return Err(CdbError::CorruptRecord { offset, reason });
                    }
                    warn!("cdb bucket table unreadable at offset {offset}: {reason}");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
            let slot = format::decode_slot(&raw);

            self.visited += 1;
            self.slot += 1;
            if self.slot == self.table.slots {
                self.slot = 0;
            }

            if slot.is_empty() {
                // First never-filled slot terminates the probe.
                self.visited = self.table.slots;
                return Ok(None);
            }
            if slot.hash != self.khash {
                continue;
            }

            match self.read_record(slot.offset) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {} // full-hash collision with a different key
                Err(CdbError::CorruptRecord { offset, reason }) => {
                    if self.reader.strict {
                        self.visited = self.table.slots;
                        return Err(CdbError::CorruptRecord { offset, reason });
                    }
                    warn!("skipping corrupt cdb record at offset {offset}: {reason}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Read the record at `offset` and return its value if the stored
    /// key equals the searched key.
    fn read_record(&self, offset: u32) -> Result<Option<Vec<u8>>> {
        let mut raw = [0u8; 8];
        self.reader.read_into(u64::from(offset), &mut raw)?;
        let (klen, vlen) = format::decode_record_header(&raw);

        if klen as usize != self.key.len() {
            return Err(CdbError::CorruptRecord {
                offset: u64::from(offset),
                reason: "key length mismatch",
            });
        }

        let key_pos = u64::from(offset) + u64::from(RECORD_HEADER_BYTES);
        let end = key_pos + u64::from(klen) + u64::from(vlen);
        if end > self.reader.size {
            return Err(CdbError::CorruptRecord {
                offset: u64::from(offset),
                reason: "record extends past end of file",
            });
        }

        let mut stored_key = vec![0u8; klen as usize];
        self.reader.read_into(key_pos, &mut stored_key)?;
        if stored_key != self.key {
            return Ok(None);
        }

        let mut value = vec![0u8; vlen as usize];
        self.reader.read_into(key_pos + u64::from(klen), &mut value)?;
        Ok(Some(value))
    }
}

impl Iterator for CdbValueIter<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        match self.next_match() {
            Ok(item) => item,
            Err(e) => {
                error!("error reading value from cdb file: {e}");
                self.visited = self.table.slots;
                None
            }
        }
    }
}

/// Iterator over every record of a database, in file order.
pub struct CdbRecordIter<'a> {
    reader: &'a CdbReader,
    pos: u32,
    end: u32,
}

impl CdbRecordIter<'_> {
    fn read_next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.pos >= self.end {
            return Ok(None);
        }
        if u64::from(self.pos) + u64::from(RECORD_HEADER_BYTES) > u64::from(self.end) {
            return Err(CdbError::CorruptRecord {
                offset: u64::from(self.pos),
                reason: "truncated record header",
            });
        }

        let mut raw = [0u8; 8];
        self.reader.read_into(u64::from(self.pos), &mut raw)?;
        let (klen, vlen) = format::decode_record_header(&raw);

        let data_pos = u64::from(self.pos) + u64::from(RECORD_HEADER_BYTES);
        let record_end = data_pos + u64::from(klen) + u64::from(vlen);
        if record_end > u64::from(self.end) {
            return Err(CdbError::CorruptRecord {
                offset: u64::from(self.pos),
                reason: "record extends past the record region",
            });
        }

        let mut key = vec![0u8; klen as usize];
        self.reader.read_into(data_pos, &mut key)?;
        let mut value = vec![0u8; vlen as usize];
        self.reader.read_into(data_pos + u64::from(klen), &mut value)?;

        self.pos = record_end as u32;
        Ok(Some((key, value)))
    }
}

impl Iterator for CdbRecordIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(pair)) => Some(Ok(pair)),
            Ok(None) => None,
            Err(e) => {
                self.pos = self.end;
                Some(Err(e))
            }
        }
    }
}
