//! WiNoT radio frame layout.
//!
//! Data frames carry a 2-byte header followed by the payload:
//!
//! ```text
//! [control: 1 byte][length: 1 byte][payload: length bytes]
//!
//! control bit 0..2  fragment index (0-7)
//! control bit 3     MORE_FRAGMENTS
//! ```
//!
//! The receiver writes a fragment's payload at `index * WINOT_FRAGMENT_SIZE`.
//! Index 0 without the flag is an unfragmented frame; index 0 with the flag
//! is the leading fragment of a longer frame.
//!
//! Join requests sent by a client to a listening access point use a fixed
//! 5-byte identity header instead:
//!
//! ```text
//! [client id: 4 bytes][declared length: 1 byte]
//! ```
//!
//! # Example
//!
//! ```
//! use winot::link::{fragment, FragmentKind, FragmentRef};
//!
//! let frame = vec![0x5A; 600];
//! let pieces: Vec<_> = fragment(&frame).unwrap().collect();
//! assert_eq!(pieces.len(), 3);
//!
//! let last = FragmentRef::parse(pieces[2].as_bytes()).unwrap();
//! assert_eq!(last.kind(), FragmentKind::Terminal);
//! assert_eq!(last.offset() + last.payload.len(), 600);
//! ```

use crate::config::{WINOT_DATA_BUF_SIZE, WINOT_FRAGMENT_SIZE};
use crate::radio::RADIO_FRAME_MAX;
use rand_core::{OsRng, RngCore};
use std::fmt;

/// Data frame header size in bytes (control + length).
pub const HEADER_SIZE: usize = 2;

/// Control bit: more fragments follow.
pub const FLAG_MORE_FRAGMENTS: u8 = 0x08;

/// Control bits holding the fragment index.
pub const FRAGMENT_INDEX_MASK: u8 = 0x07;

/// Join request size in bytes.
pub const JOIN_HEADER_SIZE: usize = 5;

/// Decoded control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control(u8);

impl Control {
    /// Build a control byte. `index` is truncated to 3 bits.
    pub const fn new(index: u8, more: bool) -> Self {
        let mut raw = index & FRAGMENT_INDEX_MASK;
        if more {
            raw |= FLAG_MORE_FRAGMENTS;
        }
        Self(raw)
    }

    /// Wrap a received control byte.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Fragment index.
    #[inline]
    pub const fn index(self) -> u8 {
        self.0 & FRAGMENT_INDEX_MASK
    }

    /// Whether more fragments follow.
    #[inline]
    pub const fn has_more(self) -> bool {
        self.0 & FLAG_MORE_FRAGMENTS != 0
    }

    /// Raw byte.
    pub const fn raw(self) -> u8 {
        self.0
    }
}

/// Role of a fragment within its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// Index 0, no more fragments: the whole frame.
    Unfragmented,
    /// More fragments follow (including index 0 with the flag set).
    Intermediate,
    /// Non-zero index, no more fragments: completes the frame.
    Terminal,
}

/// A data fragment borrowed from a received radio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRef<'a> {
    /// Control byte.
    pub control: Control,
    /// Payload, exactly as long as the length byte says.
    pub payload: &'a [u8],
}

impl<'a> FragmentRef<'a> {
    /// Decode a data fragment.
    ///
    /// Bytes beyond the declared length are radio padding and ignored.
    pub fn parse(frame: &'a [u8]) -> Result<Self, FragmentError> {
        if frame.len() < HEADER_SIZE {
            return Err(FragmentError::TooShort);
        }
        let control = Control::from_raw(frame[0]);
        let declared = frame[1] as usize;
        if declared > WINOT_FRAGMENT_SIZE {
            return Err(FragmentError::PayloadTooLarge(declared));
        }
        let available = frame.len() - HEADER_SIZE;
        if declared > available {
            return Err(FragmentError::LengthMismatch {
                declared,
                available,
            });
        }
        Ok(Self {
            control,
            payload: &frame[HEADER_SIZE..HEADER_SIZE + declared],
        })
    }

    /// Classify the fragment.
    pub fn kind(&self) -> FragmentKind {
        match (self.control.index(), self.control.has_more()) {
            (_, true) => FragmentKind::Intermediate,
            (0, false) => FragmentKind::Unfragmented,
            (_, false) => FragmentKind::Terminal,
        }
    }

    /// Write offset in the reassembly buffer.
    pub fn offset(&self) -> usize {
        self.control.index() as usize * WINOT_FRAGMENT_SIZE
    }
}

/// 4-byte client identifier carried in a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId([u8; 4]);

impl ClientId {
    /// Create an identifier from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Generate a random identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; 4];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x} {:02x} {:02x} {:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Client join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequest {
    /// Identifier of the joining client.
    pub client_id: ClientId,
    /// Payload length the client declares.
    pub declared_len: u8,
}

impl JoinRequest {
    /// Decode a join request. Trailing bytes are ignored.
    pub fn parse(frame: &[u8]) -> Result<Self, FragmentError> {
        if frame.len() < JOIN_HEADER_SIZE {
            return Err(FragmentError::TooShort);
        }
        Ok(Self {
            client_id: ClientId([frame[0], frame[1], frame[2], frame[3]]),
            declared_len: frame[4],
        })
    }

    /// Encode into the 5-byte wire form.
    pub fn to_bytes(&self) -> [u8; JOIN_HEADER_SIZE] {
        let id = self.client_id.as_bytes();
        [id[0], id[1], id[2], id[3], self.declared_len]
    }
}

/// One encoded radio frame in a fixed buffer.
#[derive(Clone)]
pub struct RadioFrame {
    bytes: [u8; RADIO_FRAME_MAX],
    len: usize,
}

impl RadioFrame {
    /// Encode a data fragment. The payload must fit one fragment.
    pub fn data(control: Control, payload: &[u8]) -> Result<Self, FragmentError> {
        if payload.len() > WINOT_FRAGMENT_SIZE {
            return Err(FragmentError::PayloadTooLarge(payload.len()));
        }
        let mut bytes = [0u8; RADIO_FRAME_MAX];
        bytes[0] = control.raw();
        bytes[1] = payload.len() as u8;
        bytes[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        Ok(Self {
            bytes,
            len: HEADER_SIZE + payload.len(),
        })
    }

    /// Encode a join request.
    pub fn join(request: &JoinRequest) -> Self {
        let mut bytes = [0u8; RADIO_FRAME_MAX];
        bytes[..JOIN_HEADER_SIZE].copy_from_slice(&request.to_bytes());
        Self {
            bytes,
            len: JOIN_HEADER_SIZE,
        }
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl fmt::Debug for RadioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadioFrame")
            .field("control", &self.bytes[0])
            .field("len", &self.len)
            .finish()
    }
}

/// Number of radio fragments needed for a frame of `len` bytes.
pub fn fragment_count(len: usize) -> usize {
    len.div_ceil(WINOT_FRAGMENT_SIZE).max(1)
}

/// Split an outbound frame into radio frames.
///
/// Frames up to one fragment go out unfragmented at index 0; longer frames
/// use indices `0..n` with [`FLAG_MORE_FRAGMENTS`] on all but the last.
pub fn fragment(frame: &[u8]) -> Result<Fragments<'_>, FragmentError> {
    if frame.is_empty() {
        return Err(FragmentError::EmptyPacket);
    }
    if frame.len() > WINOT_DATA_BUF_SIZE {
        return Err(FragmentError::PacketTooLarge {
            size: frame.len(),
            max: WINOT_DATA_BUF_SIZE,
        });
    }
    Ok(Fragments {
        frame,
        next_index: 0,
        total: fragment_count(frame.len()),
    })
}

/// Iterator over the radio frames of one outbound frame.
#[derive(Debug)]
pub struct Fragments<'a> {
    frame: &'a [u8],
    next_index: usize,
    total: usize,
}

impl Iterator for Fragments<'_> {
    type Item = RadioFrame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.total {
            return None;
        }
        let index = self.next_index;
        let start = index * WINOT_FRAGMENT_SIZE;
        let end = (start + WINOT_FRAGMENT_SIZE).min(self.frame.len());
        let more = index + 1 < self.total;
        self.next_index += 1;

        // Slices never exceed WINOT_FRAGMENT_SIZE, so encoding cannot fail.
        RadioFrame::data(Control::new(index as u8, more), &self.frame[start..end]).ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next_index;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Fragments<'_> {}

/// Errors decoding or building fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentError {
    /// Frame too short to hold its header.
    TooShort,
    /// Length byte claims more payload than the radio frame carries.
    LengthMismatch { declared: usize, available: usize },
    /// Payload longer than one fragment.
    PayloadTooLarge(usize),
    /// Outbound frame is empty.
    EmptyPacket,
    /// Outbound frame does not fit the peer's reassembly buffer.
    PacketTooLarge { size: usize, max: usize },
}

impl fmt::Display for FragmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "fragment too short"),
            Self::LengthMismatch {
                declared,
                available,
            } => write!(
                f,
                "length byte says {} bytes, frame carries {}",
                declared, available
            ),
            Self::PayloadTooLarge(len) => write!(
                f,
                "payload of {} bytes exceeds fragment size {}",
                len, WINOT_FRAGMENT_SIZE
            ),
            Self::EmptyPacket => write!(f, "cannot fragment empty frame"),
            Self::PacketTooLarge { size, max } => {
                write!(f, "frame too large: {} bytes (max {})", size, max)
            }
        }
    }
}

impl std::error::Error for FragmentError {}
