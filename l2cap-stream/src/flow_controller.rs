#![forbid(unsafe_code)]

//! Credit accounting for LE credit based channels.
//!
//! An SDU of at most `mtu` bytes is carried in `ceil(mtu / mps)` frames and
//! every frame costs one credit, so a payload of `len` bytes sent in
//! MTU-sized SDUs needs `ceil(len / mtu) * ceil(mtu / mps)` credits.

use l2cap_core::signal::SDU_LEN_SIZE;
use tracing::trace;

/// Largest credit count a peer may hold on one channel.
pub const MAX_CREDITS: u32 = 65535;

/// Flow control errors
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FlowControlError {
    #[error("Invalid channel parameters: mtu={mtu}, mps={mps}")]
    InvalidParameters { mtu: u16, mps: u16 },
    #[error("Credit overflow: available={available}, granted={granted}")]
    CreditOverflow { available: u32, granted: u32 },
    #[error("Payload too large: {payload_len} bytes need more than u32::MAX credits")]
    PayloadTooLarge { payload_len: usize },
}

/// Credits needed to move `payload_len` bytes over a channel with the
/// negotiated `mtu` and `mps`.
///
/// `const` so that fixed credit budgets can be derived at compile time.
pub const fn required_credits(
    payload_len: usize,
    mtu: u16,
    mps: u16,
) -> Result<u32, FlowControlError> {
    if mtu == 0 || mps == 0 {
        return Err(FlowControlError::InvalidParameters { mtu, mps });
    }
    let sdus = payload_len.div_ceil(mtu as usize);
    let per_sdu = (mtu as usize).div_ceil(mps as usize);
    match sdus.checked_mul(per_sdu) {
        Some(credits) if credits <= u32::MAX as usize => Ok(credits as u32),
        _ => Err(FlowControlError::PayloadTooLarge { payload_len }),
    }
}

/// Frames used by one SDU carrying `sdu_len` payload bytes, counting the
/// SDU length field in the first frame.
pub fn frames_per_sdu(sdu_len: usize, mps: u16) -> Result<usize, FlowControlError> {
    if mps == 0 {
        return Err(FlowControlError::InvalidParameters { mtu: 0, mps });
    }
    Ok((sdu_len + SDU_LEN_SIZE).div_ceil(usize::from(mps)))
}

/// Transmit-side credit window of a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditWindow {
    available: u32,
    consumed: u64,
}

impl CreditWindow {
    pub fn new(initial: u16) -> Self {
        Self { available: u32::from(initial), consumed: 0 }
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Add credits granted by the receiver.
    pub fn grant(&mut self, credits: u16) -> Result<(), FlowControlError> {
        let total = self.available + u32::from(credits);
        if total > MAX_CREDITS {
            return Err(FlowControlError::CreditOverflow {
                available: self.available,
                granted: u32::from(credits),
            });
        }
        self.available = total;
        Ok(())
    }

    /// Spend one credit for a frame. Returns `false` when the window is empty.
    pub fn try_consume(&mut self) -> bool {
        if self.available == 0 {
            trace!(consumed = self.consumed, "credit window exhausted");
            return false;
        }
        self.available -= 1;
        self.consumed += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn le_32k_needs_147_credits() {
        assert_eq!(required_credits(32768, 672, 251), Ok(147));
    }

    #[test]
    fn zero_payload_needs_nothing() {
        assert_eq!(required_credits(0, 672, 251), Ok(0));
    }

    #[test]
    fn zero_mps_is_invalid() {
        assert_eq!(
            required_credits(8, 672, 0),
            Err(FlowControlError::InvalidParameters { mtu: 672, mps: 0 })
        );
    }

    #[test]
    fn oversized_payload_is_rejected() {
        // One byte per SDU, one frame per SDU: the credit count is the length.
        let len = usize::try_from(u64::from(u32::MAX) + 1).unwrap();
        assert_eq!(
            required_credits(len, 1, 1),
            Err(FlowControlError::PayloadTooLarge { payload_len: len })
        );
        assert_eq!(required_credits(len - 1, 1, 1), Ok(u32::MAX));
    }

    #[test]
    fn window_spends_until_empty() {
        let mut window = CreditWindow::new(2);
        assert!(window.try_consume());
        assert!(window.try_consume());
        assert!(!window.try_consume());
        assert_eq!(window.consumed(), 2);
        window.grant(1).unwrap();
        assert!(window.try_consume());
    }

    #[test]
    fn grant_overflow_is_rejected() {
        let mut window = CreditWindow::new(u16::MAX);
        assert!(matches!(window.grant(1), Err(FlowControlError::CreditOverflow { .. })));
        assert_eq!(window.available(), MAX_CREDITS);
    }

    #[test]
    fn mtu_sized_sdus_match_the_formula() {
        // 670 payload bytes plus the length field fill exactly one 672 byte SDU.
        assert_eq!(frames_per_sdu(670, 251), Ok(3));
        let sdus = 32768usize.div_ceil(670);
        let last = 32768 - (sdus - 1) * 670;
        let frames = (sdus - 1) * frames_per_sdu(670, 251).unwrap()
            + frames_per_sdu(last, 251).unwrap();
        assert_eq!(frames as u32, required_credits(32768, 672, 251).unwrap());
    }

    proptest! {
        #[test]
        fn credits_cover_payload_and_grow_with_it(
            len in 1usize..70_000,
            mtu in 23u16..2048,
            mps in 23u16..1024,
        ) {
            let credits = required_credits(len, mtu, mps).unwrap();
            prop_assert!(credits as usize >= len.div_ceil(usize::from(mps)));
            prop_assert!(required_credits(len + 1, mtu, mps).unwrap() >= credits);
            if mps >= mtu {
                prop_assert_eq!(credits as usize, len.div_ceil(usize::from(mtu)));
            }
        }
    }
}
