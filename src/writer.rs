//! CDB file writer: stream records, then emit the index in one pass

use crate::error::{CdbError, Result};
use crate::format::{
    self, BucketRef, Slot, BUCKETS, DIRECTORY_BYTES, MAX_FILE_BYTES, RECORD_HEADER_BYTES,
    SLOT_BYTES,
};
use crate::hash::cdb_hash;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Streaming writer that builds a CDB file.
///
/// Records are appended at the tail while (hash, offset) pointers
/// accumulate in memory. [`finish`](CdbWriter::finish) materializes the
/// 256 bucket tables behind the records and patches the slot directory
/// at offset 0, after which the writer is terminal and accepts only
/// [`close`](CdbWriter::close). Dropping an unfinished writer finishes
/// and closes it, logging any failure.
///
/// The writer is single-owner: `append` takes `&mut self` and the file
/// must not be shared with a live reader until `finish` has returned.
///
/// # Examples
///
/// ```no_run
/// let mut writer = cdb_storage::CdbWriter::create("example.cdb")?;
/// writer.append(b"one", b"Hello, ")?;
/// writer.append(b"one", b"world!")?;
/// writer.finish()?;
/// # Ok::<(), cdb_storage::CdbError>(())
/// ```
pub struct CdbWriter {
    writer: Option<BufWriter<File>>,
    /// One (hash, record offset) pointer per appended record, in append
    /// order. Duplicate keys keep every pointer.
    pointers: Vec<Slot>,
    /// How many pointers hash into each bucket.
    counts: [u32; BUCKETS],
    /// Append cursor: absolute offset of the next byte to be written.
    pos: u32,
    finalized: bool,
    /// Set in atomic mode: (temp path, destination path).
    rename: Option<(PathBuf, PathBuf)>,
}

impl CdbWriter {
    /// Create (or truncate) `path` and reserve the slot directory.
    ///
    /// The first 2048 bytes are zeroed now and overwritten on
    /// [`finish`](CdbWriter::finish).
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("creating cdb file: {:?}", path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(file, None)
    }

    /// Like [`create`](CdbWriter::create), but the database is built at
    /// `<path>.tmp` and renamed over `path` only after a successful
    /// [`finish`](CdbWriter::finish), so a reader polling `path` never
    /// observes a half-built file. Dropping the writer before a
    /// successful finish removes the temporary file.
    pub fn create_atomic<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        debug!("creating cdb file: {:?} (via {:?})", path, tmp);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        Self::from_file(file, Some((tmp, path.to_path_buf())))
    }

    fn from_file(file: File, rename: Option<(PathBuf, PathBuf)>) -> Result<Self> {
        let mut writer = BufWriter::new(file);
        writer.write_all(&[0u8; DIRECTORY_BYTES])?;
        Ok(Self {
            writer: Some(writer),
            pointers: Vec::new(),
            counts: [0u32; BUCKETS],
            pos: DIRECTORY_BYTES as u32,
            finalized: false,
            rename,
        })
    }

    /// Append one record.
    ///
    /// Keys may repeat: every value appended under a key is retained and
    /// later surfaced by [`CdbReader::find`](crate::CdbReader::find), in
    /// append order. Fails with [`CdbError::AlreadyFinalized`] once
    /// `finish` or `close` has run, [`CdbError::InvalidArgument`] if a
    /// length does not fit in u32, and [`CdbError::TooLarge`] if the
    /// record would push the file past u32 offsets.
    pub fn append<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) -> Result<()> {
        let key = key.as_ref();
        let value = value.as_ref();

        if self.finalized {
            return Err(CdbError::AlreadyFinalized);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(CdbError::AlreadyFinalized);
        };

        let klen = u32::try_from(key.len())
            .map_err(|_| CdbError::InvalidArgument("key length does not fit in u32"))?;
        let vlen = u32::try_from(value.len())
            .map_err(|_| CdbError::InvalidArgument("value length does not fit in u32"))?;

        let record_len = u64::from(RECORD_HEADER_BYTES) + u64::from(klen) + u64::from(vlen);
        let end = u64::from(self.pos) + record_len;
        if end > MAX_FILE_BYTES {
            return Err(CdbError::TooLarge {
                size: end,
                max: MAX_FILE_BYTES,
            });
        }

        writer.write_all(&format::encode_record_header(klen, vlen))?;
        writer.write_all(key)?;
        writer.write_all(value)?;

        let hash = cdb_hash(key);
        self.pointers.push(Slot {
            hash,
            offset: self.pos,
        });
        self.counts[format::bucket_index(hash)] += 1;
        self.pos = end as u32;
        Ok(())
    }

    /// Emit the bucket tables and the slot directory, then flush and
    /// sync the file. Idempotent: the first successful call finalizes
    /// the database and later calls do nothing.
    ///
    /// With zero records appended the result is a 2048-byte file of
    /// zeros — a valid, empty database.
    pub fn finish(&mut self) -> Result<()> {
        if self.finalized {
            return self.commit_rename();
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(CdbError::AlreadyFinalized);
        };

        // Records plus tables must stay addressable by u32 offsets.
        let table_slots: u64 = self.counts.iter().map(|&c| u64::from(c) * 2).sum();
        let final_size = u64::from(self.pos) + table_slots * u64::from(SLOT_BYTES);
        if final_size > MAX_FILE_BYTES {
            return Err(CdbError::TooLarge {
                size: final_size,
                max: MAX_FILE_BYTES,
            });
        }

        let mut directory = [BucketRef::default(); BUCKETS];

        if self.pointers.is_empty() {
            // No records: the whole database is a zeroed directory.
            writer.seek(SeekFrom::Start(0))?;
            format::write_directory(writer, &directory)?;
        } else {
            // Exclusive end of each bucket's region in the regrouped
            // pointer array.
            let mut bounds = [0u32; BUCKETS];
            let mut total = 0u32;
            for (i, &count) in self.counts.iter().enumerate() {
                total += count;
                bounds[i] = total;
            }

            // Regroup pointers by bucket. Walking the append-ordered
            // list backwards while filling each region from its end
            // keeps append order within every bucket, which is what
            // makes the first value appended under a key the first one
            // a probe finds.
            let mut ordered = vec![Slot::default(); self.pointers.len()];
            for ptr in self.pointers.iter().rev() {
                let bucket = format::bucket_index(ptr.hash);
                bounds[bucket] -= 1;
                ordered[bounds[bucket] as usize] = *ptr;
            }
            // bounds[i] is now the start of bucket i's region.

            for i in 0..BUCKETS {
                let count = self.counts[i];
                let slots = count * 2;
                directory[i] = BucketRef {
                    offset: self.pos,
                    slots,
                };
                if slots == 0 {
                    continue;
                }

                let mut table = vec![Slot::default(); slots as usize];
                let start = bounds[i] as usize;
                for ptr in &ordered[start..start + count as usize] {
                    let mut at = format::initial_slot(ptr.hash, slots) as usize;
                    while !table[at].is_empty() {
                        at += 1;
                        if at == slots as usize {
                            at = 0;
                        }
                    }
                    table[at] = *ptr;
                }

                for slot in &table {
                    writer.write_all(&format::encode_slot(*slot))?;
                }
                self.pos += slots * SLOT_BYTES;
            }

            writer.flush()?;
            writer.seek(SeekFrom::Start(0))?;
            format::write_directory(writer, &directory)?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        self.finalized = true;

        debug!(
            "finalized cdb file: {} records, {} bytes",
            self.pointers.len(),
            final_size
        );
        self.commit_rename()
    }

    /// Finish if needed, then release the file handle.
    ///
    /// Idempotent. Errors from the underlying handle close are logged
    /// and never replace an error from `finish` itself.
    pub fn close(&mut self) -> Result<()> {
        if self.writer.is_none() && self.rename.is_none() {
            return Ok(());
        }
        let result = self.finish();
        if let Some(writer) = self.writer.take() {
            match writer.into_inner() {
                Ok(file) => drop(file),
                Err(e) => warn!("error closing cdb database file: {}", e.error()),
            }
        }
        result
    }

    /// Move the finished temp file over its destination (atomic mode).
    fn commit_rename(&mut self) -> Result<()> {
        if let Some((tmp, dest)) = self.rename.take() {
            if let Some(writer) = self.writer.take() {
                // Already flushed and synced; drop the handle so the
                // rename works on every platform.
                drop(writer);
            }
            if let Err(e) = fs::rename(&tmp, &dest) {
                self.rename = Some((tmp, dest));
                return Err(e.into());
            }
            debug!("renamed cdb file {:?} -> {:?}", tmp, dest);
        }
        Ok(())
    }
}

impl Drop for CdbWriter {
    fn drop(&mut self) {
        if self.writer.is_some() || self.rename.is_some() {
            if let Err(e) = self.close() {
                warn!("error closing cdb writer: {e}");
            }
        }
        if let Some((tmp, _)) = self.rename.take() {
            // finish failed; don't leave the temp file behind
            if let Err(e) = fs::remove_file(&tmp) {
                warn!("error removing temporary cdb file {:?}: {e}", tmp);
            }
        }
    }
}
