//! Reader configuration

/// Options controlling how a [`CdbReader`](crate::CdbReader) accesses a
/// database file.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Memory-map the file and serve probes straight from the mapping.
    /// When mapping fails the reader falls back to positional file reads.
    pub use_memory_mapping: bool,
    /// Surface corrupt record framing found mid-probe as
    /// [`CdbError::CorruptRecord`](crate::CdbError::CorruptRecord)
    /// instead of logging a warning and skipping the slot.
    pub strict: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            use_memory_mapping: true,
            strict: false,
        }
    }
}
