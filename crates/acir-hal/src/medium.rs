//! Generic `RecordMedium` trait for byte-addressable persistent storage
//! (emulated EEPROM, raw flash sectors, image files, …).
//!
//! The stores only ever talk to the trait, so the backing medium can be
//! swapped between the on-device flash driver, [`SimMedium`][crate::sim::SimMedium]
//! and [`FileMedium`][crate::file::FileMedium] without touching record logic.

use acir_types::StoreError;

/// Byte pattern of never-written (erased) flash cells.
pub const ERASED_BYTE: u8 = 0xFF;

/// A fixed-size, byte-addressable persistent region.
///
/// Writes are buffered with [`stage`][RecordMedium::stage] and only become
/// durable after a successful [`commit`][RecordMedium::commit].  Reads observe
/// staged-but-uncommitted bytes.
pub trait RecordMedium {
    /// Total size of the region in bytes.
    fn capacity(&self) -> usize;

    /// Fill `buf` with the bytes currently present at `offset`.  The content
    /// may be the erased pattern or arbitrary garbage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OutOfBounds`] when the range leaves the region.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError>;

    /// Buffer a write of `bytes` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OutOfBounds`] when the range leaves the region.
    fn stage(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError>;

    /// Flush every staged write durably.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Commit`] when the medium rejects the write.  The
    /// staged data stays pending; nothing is retried internally.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Convenience wrapper around [`read`][RecordMedium::read] returning an
    /// owned buffer.
    fn read_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>, StoreError> {
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Ensure `offset..offset + len` lies inside a region of `capacity` bytes.
pub fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<(), StoreError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StoreError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// Durable image plus an ordered list of staged writes.
///
/// Shared by the concrete media so that read-your-writes and commit
/// application behave identically everywhere.
#[derive(Debug, Clone)]
pub struct StagedImage {
    durable: Vec<u8>,
    pending: Vec<(usize, Vec<u8>)>,
}

impl StagedImage {
    /// Wrap an existing durable image with no pending writes.
    pub fn new(durable: Vec<u8>) -> Self {
        Self {
            durable,
            pending: Vec::new(),
        }
    }

    /// A fully erased image of `capacity` bytes.
    pub fn erased(capacity: usize) -> Self {
        Self::new(vec![ERASED_BYTE; capacity])
    }

    pub fn capacity(&self) -> usize {
        self.durable.len()
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        check_bounds(offset, buf.len(), self.capacity())?;
        let end = offset + buf.len();
        buf.copy_from_slice(&self.durable[offset..end]);

        // Later writes win, so overlay in staging order.
        for (at, bytes) in &self.pending {
            let (w_start, w_end) = (*at, at + bytes.len());
            let start = w_start.max(offset);
            let stop = w_end.min(end);
            if start < stop {
                buf[start - offset..stop - offset]
                    .copy_from_slice(&bytes[start - w_start..stop - w_start]);
            }
        }
        Ok(())
    }

    pub fn stage(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        check_bounds(offset, bytes.len(), self.capacity())?;
        let end = offset + bytes.len();
        // A pending write wholly inside the new range can never show through.
        self.pending.retain(|(at, old)| *at < offset || at + old.len() > end);
        self.pending.push((offset, bytes.to_vec()));
        Ok(())
    }

    /// The durable image as it would look after applying every staged write.
    pub fn merged(&self) -> Vec<u8> {
        let mut image = self.durable.clone();
        for (at, bytes) in &self.pending {
            image[*at..at + bytes.len()].copy_from_slice(bytes);
        }
        image
    }

    /// Make the staged writes durable and clear the pending list.
    pub fn apply(&mut self) {
        self.durable = self.merged();
        self.pending.clear();
    }

    /// Drop staged writes without applying them.
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    pub fn durable(&self) -> &[u8] {
        &self.durable
    }

    pub fn durable_mut(&mut self) -> &mut [u8] {
        &mut self.durable
    }
}
