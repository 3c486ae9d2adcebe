//! Received datagrams as a chain of byte segments.
//!
//! A network stack may hand one datagram over as several buffers. The
//! transfer state machine never assumes the payload is contiguous: it walks
//! the segments through [`Datagram::payload_segments`].

use crate::packet::HEADER_LEN;

/// One received datagram, stored as an ordered chain of segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datagram {
    segments: Vec<Vec<u8>>,
}

impl Datagram {
    /// Datagram held in a single segment.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            segments: vec![bytes],
        }
    }

    /// Datagram split across several segments, in order.
    #[must_use]
    pub fn from_segments(segments: Vec<Vec<u8>>) -> Self {
        Self { segments }
    }

    /// Total length across all segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    /// True when no segment holds any byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the raw segments, empty ones included.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.segments.iter().map(Vec::as_slice)
    }

    /// First `N` bytes, gathered across segment boundaries.
    ///
    /// Returns `None` when the datagram is shorter than `N`.
    #[must_use]
    pub fn prefix<const N: usize>(&self) -> Option<[u8; N]> {
        let mut prefix = [0u8; N];
        let mut filled = 0;
        for byte in self.segments.iter().flatten() {
            if filled == N {
                break;
            }
            prefix[filled] = *byte;
            filled += 1;
        }
        (filled == N).then_some(prefix)
    }

    /// Big-endian opcode in the first two bytes.
    #[must_use]
    pub fn opcode(&self) -> Option<u16> {
        self.prefix::<2>().map(u16::from_be_bytes)
    }

    /// First [`HEADER_LEN`] bytes: opcode plus block number or error code.
    #[must_use]
    pub fn header(&self) -> Option<[u8; HEADER_LEN]> {
        self.prefix::<HEADER_LEN>()
    }

    /// Iterates the non-empty slices that follow the first `skip` bytes.
    pub fn payload_segments(&self, skip: usize) -> PayloadSegments<'_> {
        PayloadSegments {
            segments: self.segments.iter(),
            skip,
        }
    }

    /// Copies the whole datagram into one contiguous buffer.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.segments.concat()
    }
}

impl From<Vec<u8>> for Datagram {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Datagram {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

/// Iterator returned by [`Datagram::payload_segments`].
#[derive(Debug)]
pub struct PayloadSegments<'a> {
    segments: std::slice::Iter<'a, Vec<u8>>,
    skip: usize,
}

impl<'a> Iterator for PayloadSegments<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let segment = self.segments.next()?;
            if self.skip >= segment.len() {
                self.skip -= segment.len();
                continue;
            }
            let slice = &segment[self.skip..];
            self.skip = 0;
            return Some(slice);
        }
    }
}
