//! Fixed persisted layout of the 4 KiB record region.
//!
//! | Region                         | Offset | Length |
//! |--------------------------------|--------|--------|
//! | redundant user id (u32 LE)     | 129    | 4      |
//! | redundant device id (u32 LE)   | 133    | 4      |
//! | config record                  | 256    | 224    |
//! | scene table                    | 512    | 3335   |
//!
//! All multi-byte integers are little-endian.  Bounded strings occupy their
//! full capacity: content bytes, a NUL terminator, then zero fill.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use acir_types::StoreError;

/// Total size of the region the layout is designed for.
pub const REGION_SIZE: usize = 4096;

pub const USER_ID_SLOT: usize = 129;
pub const DEVICE_ID_SLOT: usize = 133;
pub const CONFIG_BASE: usize = 256;
pub const SCENE_TABLE_BASE: usize = 512;

/// Value read from a redundant slot that was never written.
pub const SLOT_ERASED: u32 = 0xFFFF_FFFF;

/// A medium shared by both stores on a single thread of control.
pub type SharedMedium<M> = Rc<RefCell<M>>;

pub(crate) fn medium_ref<M>(medium: &SharedMedium<M>) -> Result<Ref<'_, M>, StoreError> {
    medium.try_borrow().map_err(|_| StoreError::Busy)
}

pub(crate) fn medium_mut<M>(medium: &SharedMedium<M>) -> Result<RefMut<'_, M>, StoreError> {
    medium.try_borrow_mut().map_err(|_| StoreError::Busy)
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a
/// character.
pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Printable ASCII (0x20..=0x7E) or empty.
pub fn is_printable_ascii(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| (0x20..=0x7E).contains(b))
}

/// Sequential writer over a fixed-size record buffer.
pub(crate) struct FieldWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> &mut [u8] {
        let field = &mut self.buf[self.pos..self.pos + len];
        self.pos += len;
        field
    }

    /// Write at most `capacity - 1` bytes of `s`, always NUL-terminated.
    pub(crate) fn put_str(&mut self, s: &str, capacity: usize) {
        let content = truncate_str(s, capacity - 1).as_bytes();
        let field = self.take(capacity);
        field.fill(0);
        field[..content.len()].copy_from_slice(content);
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.take(1)[0] = v;
    }

    pub(crate) fn put_bool(&mut self, v: bool) {
        self.put_u8(u8::from(v));
    }

    pub(crate) fn put_u16(&mut self, v: u16) {
        self.take(2).copy_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        self.take(4).copy_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}

/// Sequential reader mirroring [`FieldWriter`].
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let field = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        field
    }

    /// Content bytes of a bounded string: everything before the first NUL,
    /// or the whole field when no terminator is present.
    pub(crate) fn str_bytes(&mut self, capacity: usize) -> &'a [u8] {
        let field = self.take(capacity);
        let end = field.iter().position(|&b| b == 0).unwrap_or(capacity);
        &field[..end]
    }

    pub(crate) fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    pub(crate) fn u16(&mut self) -> u16 {
        let b = self.take(2);
        u16::from_le_bytes([b[0], b[1]])
    }

    pub(crate) fn u32(&mut self) -> u32 {
        let b = self.take(4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}
