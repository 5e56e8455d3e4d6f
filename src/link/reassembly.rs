//! Fixed-capacity reassembly buffer.
//!
//! This is the only memory the receive interrupt writes. Every write is
//! bounds-checked against the capacity before any byte is copied; a fragment
//! that would run past the end is refused and nothing changes.

use super::frame::JOIN_HEADER_SIZE;
use crate::config::WINOT_DATA_BUF_SIZE;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Number of valid bytes in the reassembly buffer, or unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLength(i16);

impl FrameLength {
    /// No valid frame.
    pub const UNSET: Self = Self(-1);

    /// A length of `len` bytes. Returns `None` above buffer capacity.
    pub fn new(len: usize) -> Option<Self> {
        (len <= WINOT_DATA_BUF_SIZE).then(|| Self(len as i16))
    }

    /// The length, if set.
    pub fn get(self) -> Option<usize> {
        (self.0 >= 0).then_some(self.0 as usize)
    }

}

impl fmt::Display for FrameLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(len) => write!(f, "{}", len),
            None => f.write_str("unset"),
        }
    }
}

/// A write that would run past the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overrun {
    /// Requested write offset.
    pub offset: usize,
    /// Requested write length.
    pub len: usize,
}

impl fmt::Display for Overrun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "write of {} bytes at offset {} exceeds capacity {}",
            self.len, self.offset, WINOT_DATA_BUF_SIZE
        )
    }
}

impl std::error::Error for Overrun {}

/// Shared reassembly buffer.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ReassemblyBuffer {
    data: [u8; WINOT_DATA_BUF_SIZE],
    #[zeroize(skip)]
    len: FrameLength,
    /// Bit `i` set once fragment index `i` was written.
    received: u8,
}

impl ReassemblyBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            data: [0; WINOT_DATA_BUF_SIZE],
            len: FrameLength::UNSET,
            received: 0,
        }
    }

    /// Capacity in bytes.
    pub const fn capacity(&self) -> usize {
        WINOT_DATA_BUF_SIZE
    }

    /// Copy `payload` to `offset`. Refused without writing if it would overrun.
    pub fn write_at(&mut self, offset: usize, payload: &[u8]) -> Result<(), Overrun> {
        let end = offset
            .checked_add(payload.len())
            .filter(|&end| end <= WINOT_DATA_BUF_SIZE)
            .ok_or(Overrun {
                offset,
                len: payload.len(),
            })?;
        self.data[offset..end].copy_from_slice(payload);
        Ok(())
    }

    /// Whether fragment `index` begins a new frame over a partial one.
    ///
    /// Index 0, or an index at or below one already stored, can only belong
    /// to a later frame; the earlier frame lost its terminal fragment.
    pub fn starts_new_frame(&self, index: u8) -> bool {
        let index = index & 0x07;
        self.received != 0 && (index == 0 || self.received >> index != 0)
    }

    /// Store one fragment's payload at `offset` and record `index`.
    ///
    /// A fragment that starts a new frame wipes the partial one first.
    /// Returns whether that happened. Nothing changes on overrun.
    pub fn store(&mut self, index: u8, offset: usize, payload: &[u8]) -> Result<bool, Overrun> {
        let fits = offset
            .checked_add(payload.len())
            .is_some_and(|end| end <= self.capacity());
        if !fits {
            return Err(Overrun {
                offset,
                len: payload.len(),
            });
        }
        let restarted = self.starts_new_frame(index);
        if restarted {
            self.clear();
        }
        self.write_at(offset, payload)?;
        self.mark_received(index);
        Ok(restarted)
    }

    /// Record that fragment `index` was stored.
    pub fn mark_received(&mut self, index: u8) {
        self.received |= 1 << (index & 0x07);
    }

    /// Whether the stored fragments up to `index` form one unbroken run.
    ///
    /// A sender may start at index 0 or 1, so only gaps after the lowest
    /// stored index count.
    pub fn is_contiguous_to(&self, index: u8) -> bool {
        let upto = ((1u16 << ((index & 0x07) + 1)) - 1) as u8;
        let seen = self.received & upto;
        if seen == 0 {
            return false;
        }
        let below_lowest = (1u8 << seen.trailing_zeros()) - 1;
        seen == upto & !below_lowest
    }

    /// Set the valid length.
    pub fn set_len(&mut self, len: FrameLength) {
        self.len = len;
    }

    /// Valid length.
    pub fn len(&self) -> FrameLength {
        self.len
    }

    /// The valid bytes, if a length is set.
    pub fn frame(&self) -> Option<&[u8]> {
        self.len.get().map(|len| &self.data[..len])
    }

    /// The join identity header captured at the start of the buffer.
    pub fn identity_header(&self) -> &[u8] {
        &self.data[..JOIN_HEADER_SIZE]
    }

    /// Wipe contents, length and fragment tracking.
    pub fn clear(&mut self) {
        self.data.zeroize();
        self.len = FrameLength::UNSET;
        self.received = 0;
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReassemblyBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReassemblyBuffer")
            .field("len", &self.len)
            .field("received", &format_args!("{:08b}", self.received))
            .finish()
    }
}


#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use winot_macros::tap_test;

    #[tap_test]
    fn reassembly_buffer_rejects_last_index_overrun() {
        let mut buf = ReassemblyBuffer::new();
        // Index 7 starts at 1750, past the end of the buffer.
        assert!(buf.write_at(7 * 250, &[0xAA]).is_err());
        assert!(buf.write_at(6 * 250, &[0xAA; 100]).is_ok());
    }

    #[tap_test]
    fn reassembly_buffer_clear_on_device() {
        let mut buf = ReassemblyBuffer::new();
        buf.write_at(0, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(buf.identity_header(), &[1, 2, 3, 4, 5]);
        buf.clear();
        assert_eq!(buf.identity_header(), &[0, 0, 0, 0, 0]);
    }

    #[tap_test(skip = "needs two boards on the air")]
    fn reassembly_over_the_air() {}
}
