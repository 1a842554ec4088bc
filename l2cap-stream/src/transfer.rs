#![forbid(unsafe_code)]

//! Reassembly and comparison of fragmented payloads.
//!
//! The verifier expects the reference payload `steps` times in a row. Bytes
//! accumulate until at least one payload length is buffered; the buffer must
//! then equal the reference exactly, which completes one step. The same type
//! checks both directions: local reads of peer data and peer-hook reads of
//! local writes.

use bytes::{Bytes, BytesMut};
use tracing::trace;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TransferError {
    #[error("received {received} bytes, expected {expected}")]
    Overflow { expected: usize, received: usize },
    #[error("payload mismatch at byte {offset}")]
    Mismatch { offset: usize },
    #[error("data after the transfer completed ({len} bytes)")]
    Unexpected { len: usize },
    #[error("cannot fragment with a zero MTU")]
    ZeroMtu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferProgress {
    /// The current unit is still incomplete.
    Partial { received: usize, expected: usize },
    /// A unit matched; more are expected.
    UnitComplete { remaining: u32 },
    /// Every unit matched.
    Done,
}

#[derive(Debug)]
pub struct TransferVerifier {
    expected: Bytes,
    buffer: BytesMut,
    remaining: u32,
    fragments: usize,
}

impl TransferVerifier {
    pub fn new(expected: Bytes, steps: u32) -> Self {
        let capacity = expected.len();
        Self { expected, buffer: BytesMut::with_capacity(capacity), remaining: steps, fragments: 0 }
    }

    /// Expect the payload `steps` more times.
    pub fn add_steps(&mut self, steps: u32) {
        self.remaining += steps;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Receive events seen so far.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn on_data(&mut self, chunk: &[u8]) -> Result<TransferProgress, TransferError> {
        if self.remaining == 0 {
            return Err(TransferError::Unexpected { len: chunk.len() });
        }
        self.fragments += 1;
        self.buffer.extend_from_slice(chunk);
        let expected = self.expected.len();
        trace!(received = self.buffer.len(), expected, "transfer fragment");

        if self.buffer.len() < expected {
            return Ok(TransferProgress::Partial { received: self.buffer.len(), expected });
        }
        if self.buffer.len() > expected {
            return Err(TransferError::Overflow { expected, received: self.buffer.len() });
        }
        let mismatch = self.buffer.iter().zip(self.expected.iter()).position(|(a, b)| a != b);
        if let Some(offset) = mismatch {
            return Err(TransferError::Mismatch { offset });
        }

        self.buffer.clear();
        self.remaining -= 1;
        if self.remaining == 0 {
            Ok(TransferProgress::Done)
        } else {
            Ok(TransferProgress::UnitComplete { remaining: self.remaining })
        }
    }
}

/// Split `data` into chunks of at most `mtu` bytes, the unit the sending side
/// hands to the socket.
pub fn fragments(data: &[u8], mtu: usize) -> Result<std::slice::Chunks<'_, u8>, TransferError> {
    if mtu == 0 {
        return Err(TransferError::ZeroMtu);
    }
    Ok(data.chunks(mtu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn patterned_32k() -> Bytes {
        let mut data = Vec::with_capacity(32768);
        for block in 0u8..8 {
            data.extend(std::iter::repeat(block).take(4096));
        }
        Bytes::from(data)
    }

    #[test]
    fn single_fragment_completes() {
        let mut verifier = TransferVerifier::new(Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]), 1);
        assert_eq!(verifier.on_data(&[1, 2, 3, 4, 5, 6, 7, 8]), Ok(TransferProgress::Done));
        assert!(verifier.is_done());
    }

    #[test]
    fn patterned_32k_reassembles_from_mtu_fragments() {
        let data = patterned_32k();
        let mut verifier = TransferVerifier::new(data.clone(), 1);
        let mut last = None;
        for chunk in fragments(&data, 670).unwrap() {
            last = Some(verifier.on_data(chunk).unwrap());
        }
        assert_eq!(last, Some(TransferProgress::Done));
        assert_eq!(verifier.fragments(), 32768usize.div_ceil(670));
    }

    #[test]
    fn excess_bytes_fail() {
        let mut verifier = TransferVerifier::new(Bytes::from_static(&[1, 2, 3]), 1);
        assert_eq!(
            verifier.on_data(&[1, 2]),
            Ok(TransferProgress::Partial { received: 2, expected: 3 })
        );
        assert_eq!(
            verifier.on_data(&[3, 4]),
            Err(TransferError::Overflow { expected: 3, received: 4 })
        );
    }

    #[test]
    fn content_mismatch_reports_offset() {
        let mut verifier = TransferVerifier::new(Bytes::from_static(&[1, 2, 3]), 1);
        assert_eq!(verifier.on_data(&[1, 9, 3]), Err(TransferError::Mismatch { offset: 1 }));
    }

    #[test]
    fn repeated_units_count_down() {
        let mut verifier = TransferVerifier::new(Bytes::from_static(&[7, 7]), 2);
        verifier.add_steps(1);
        assert_eq!(verifier.on_data(&[7, 7]), Ok(TransferProgress::UnitComplete { remaining: 2 }));
        assert_eq!(verifier.on_data(&[7, 7]), Ok(TransferProgress::UnitComplete { remaining: 1 }));
        assert_eq!(verifier.on_data(&[7, 7]), Ok(TransferProgress::Done));
        assert_eq!(verifier.on_data(&[7]), Err(TransferError::Unexpected { len: 1 }));
    }

    #[test]
    fn zero_mtu_cannot_fragment() {
        assert_eq!(fragments(&[1, 2], 0).err(), Some(TransferError::ZeroMtu));
    }

    proptest! {
        #[test]
        fn any_fragmentation_reassembles(
            data in proptest::collection::vec(any::<u8>(), 1..4096),
            mtu in 1usize..700,
        ) {
            let reference = Bytes::from(data.clone());
            let mut verifier = TransferVerifier::new(reference, 1);
            let mut events = 0usize;
            for chunk in fragments(&data, mtu).unwrap() {
                verifier.on_data(chunk).unwrap();
                events += 1;
            }
            prop_assert!(verifier.is_done());
            prop_assert!(events >= data.len().div_ceil(mtu));
        }
    }
}
