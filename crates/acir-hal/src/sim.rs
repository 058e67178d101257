//! In-process record medium for CI/CD testing without flash hardware.
//!
//! [`SimMedium`] behaves like the EEPROM emulation layer on the device: an
//! erased image, a write buffer, and an explicit commit.  On top of that it
//! exposes fault-injection hooks so tests can exercise commit failures,
//! bit-rot and power loss.
//!
//! # Example
//!
//! ```rust
//! use acir_hal::medium::RecordMedium;
//! use acir_hal::sim::SimMedium;
//!
//! let mut medium = SimMedium::new(64);
//! medium.stage(0, b"hello").unwrap();
//! medium.commit().expect("sim commit must succeed");
//! assert_eq!(&medium.snapshot()[..5], b"hello");
//! ```

use acir_types::StoreError;
use tracing::{debug, warn};

use crate::medium::{RecordMedium, StagedImage};

/// Size of the emulated EEPROM region on the target board.
pub const DEFAULT_CAPACITY: usize = 4096;

/// A simulated persistent region.  Always succeeds unless a failure has been
/// armed with [`fail_next_commits`][Self::fail_next_commits].
#[derive(Debug, Clone)]
pub struct SimMedium {
    image: StagedImage,
    failing_commits: u32,
    commits: u32,
}

impl SimMedium {
    /// Create an erased region of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            image: StagedImage::erased(capacity),
            failing_commits: 0,
            commits: 0,
        }
    }

    /// Start from an existing durable image (e.g. a snapshot of another
    /// medium).
    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            image: StagedImage::new(image),
            failing_commits: 0,
            commits: 0,
        }
    }

    /// Make the next `n` commits fail with [`StoreError::Commit`].
    pub fn fail_next_commits(&mut self, n: u32) {
        self.failing_commits = n;
    }

    /// XOR the durable byte at `offset` with `mask`, simulating bit-rot.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is outside the region.
    pub fn corrupt(&mut self, offset: usize, mask: u8) {
        self.image.durable_mut()[offset] ^= mask;
    }

    /// Overwrite durable bytes directly, bypassing staging and commit.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside the region.
    pub fn write_durable(&mut self, offset: usize, bytes: &[u8]) {
        self.image.durable_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Simulate a reboot: every uncommitted write is lost.
    pub fn power_cycle(&mut self) {
        if self.image.pending_writes() > 0 {
            debug!(
                dropped = self.image.pending_writes(),
                "sim medium power cycle dropped staged writes"
            );
        }
        self.image.discard();
    }

    /// Copy of the durable image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.image.durable().to_vec()
    }

    /// Number of successful commits since construction.
    pub fn commit_count(&self) -> u32 {
        self.commits
    }

    pub fn pending_writes(&self) -> usize {
        self.image.pending_writes()
    }
}

impl Default for SimMedium {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RecordMedium for SimMedium {
    fn capacity(&self) -> usize {
        self.image.capacity()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        self.image.read(offset, buf)
    }

    fn stage(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.image.stage(offset, bytes)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.failing_commits > 0 {
            self.failing_commits -= 1;
            warn!(
                pending = self.image.pending_writes(),
                "sim medium rejected commit"
            );
            return Err(StoreError::Commit("simulated flash write failure".to_string()));
        }
        self.image.apply();
        self.commits += 1;
        Ok(())
    }
}
