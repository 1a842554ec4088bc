#![forbid(unsafe_code)]

//! Transmit timestamp verification.
//!
//! Every outbound unit is owed one report per enabled transmit stage, in
//! stage order: scheduler entry, software send, completion. Message sockets
//! number units by send call when `OPT_ID` is set; stream sockets key them by
//! the offset of the unit's last byte. Without `OPT_ID` reports carry no key
//! and are matched against the oldest unit still owed that stage.

use l2cap_core::{SocketKind, TimestampFlags};
use std::collections::VecDeque;
use std::fmt;
use tracing::trace;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimestampKind {
    /// Entered the packet scheduler.
    Enter,
    /// Handed to the driver.
    Software,
    /// Acknowledged by the controller.
    Completion,
}

impl fmt::Display for TimestampKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimestampKind::Enter => "SCHED",
            TimestampKind::Software => "SND",
            TimestampKind::Completion => "COMPLETION",
        };
        f.write_str(name)
    }
}

/// One report read from the error queue.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TxTimestamp {
    pub key: u32,
    pub kind: TimestampKind,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TimestampError {
    #[error("no outstanding unit for {kind} report with key {key}")]
    UnknownUnit { key: u32, kind: TimestampKind },
    #[error("unit {key}: expected {expected} report, got {got}")]
    OutOfOrder { key: u32, expected: TimestampKind, got: TimestampKind },
}

#[derive(Debug)]
struct Unit {
    key: u32,
    pending: VecDeque<TimestampKind>,
}

#[derive(Debug)]
pub struct TimestampVerifier {
    flags: TimestampFlags,
    kind: SocketKind,
    next_id: u32,
    next_offset: u32,
    units: VecDeque<Unit>,
}

impl TimestampVerifier {
    pub fn new(flags: TimestampFlags, kind: SocketKind) -> Self {
        Self { flags, kind, next_id: 0, next_offset: 0, units: VecDeque::new() }
    }

    pub fn flags(&self) -> TimestampFlags {
        self.flags
    }

    /// Stages reported for each unit, in order.
    pub fn stages(&self) -> Vec<TimestampKind> {
        let mut stages = Vec::with_capacity(3);
        if self.flags.contains(TimestampFlags::TX_SCHED) {
            stages.push(TimestampKind::Enter);
        }
        if self.flags.contains(TimestampFlags::TX_SOFTWARE) {
            stages.push(TimestampKind::Software);
        }
        if self.flags.contains(TimestampFlags::TX_COMPLETION) {
            stages.push(TimestampKind::Completion);
        }
        stages
    }

    /// Register a unit of `len` bytes just handed to the socket. Returns the
    /// number of reports it is owed.
    pub fn expect(&mut self, len: usize) -> usize {
        let key = match self.kind {
            SocketKind::DatagramSeq => {
                let id = self.next_id;
                self.next_id = self.next_id.wrapping_add(1);
                id
            }
            SocketKind::Stream => {
                self.next_offset = self.next_offset.wrapping_add(len as u32);
                self.next_offset.wrapping_sub(1)
            }
        };
        let pending: VecDeque<_> = self.stages().into();
        let owed = pending.len();
        if owed > 0 {
            self.units.push_back(Unit { key, pending });
        }
        owed
    }

    /// Match a report against the owed stages. Returns the number of reports
    /// still outstanding across all units.
    pub fn on_event(&mut self, ts: TxTimestamp) -> Result<usize, TimestampError> {
        let keyed = self.flags.contains(TimestampFlags::OPT_ID);
        let index = if keyed {
            self.units.iter().position(|u| u.key == ts.key)
        } else {
            self.units.iter().position(|u| u.pending.front() == Some(&ts.kind))
        };
        let Some(index) = index else {
            return Err(TimestampError::UnknownUnit { key: ts.key, kind: ts.kind });
        };
        let unit = &mut self.units[index];
        match unit.pending.front() {
            Some(expected) if *expected == ts.kind => {
                unit.pending.pop_front();
            }
            Some(expected) => {
                return Err(TimestampError::OutOfOrder {
                    key: unit.key,
                    expected: *expected,
                    got: ts.kind,
                });
            }
            None => return Err(TimestampError::UnknownUnit { key: ts.key, kind: ts.kind }),
        }
        trace!(key = unit.key, kind = %ts.kind, "tx timestamp matched");
        if unit.pending.is_empty() {
            self.units.remove(index);
        }
        Ok(self.outstanding())
    }

    pub fn outstanding(&self) -> usize {
        self.units.iter().map(|u| u.pending.len()).sum()
    }

    pub fn is_drained(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn flags() -> TimestampFlags {
        TimestampFlags::SOFTWARE
            | TimestampFlags::OPT_ID
            | TimestampFlags::TX_SOFTWARE
            | TimestampFlags::TX_COMPLETION
    }

    #[test]
    fn software_then_completion_per_send() {
        let mut v = TimestampVerifier::new(flags(), SocketKind::DatagramSeq);
        assert_eq!(v.expect(8), 2);
        assert_eq!(v.expect(8), 2);
        assert_eq!(v.on_event(TxTimestamp { key: 0, kind: TimestampKind::Software }), Ok(3));
        assert_eq!(v.on_event(TxTimestamp { key: 1, kind: TimestampKind::Software }), Ok(2));
        assert_eq!(v.on_event(TxTimestamp { key: 0, kind: TimestampKind::Completion }), Ok(1));
        assert_eq!(v.on_event(TxTimestamp { key: 1, kind: TimestampKind::Completion }), Ok(0));
        assert!(v.is_drained());
    }

    #[test]
    fn completion_before_software_fails() {
        let mut v = TimestampVerifier::new(flags(), SocketKind::DatagramSeq);
        v.expect(8);
        assert_eq!(
            v.on_event(TxTimestamp { key: 0, kind: TimestampKind::Completion }),
            Err(TimestampError::OutOfOrder {
                key: 0,
                expected: TimestampKind::Software,
                got: TimestampKind::Completion
            })
        );
    }

    #[test]
    fn stream_units_are_keyed_by_last_byte() {
        let mut v = TimestampVerifier::new(flags(), SocketKind::Stream);
        v.expect(8);
        v.expect(8);
        v.expect(8);
        assert!(v.on_event(TxTimestamp { key: 0, kind: TimestampKind::Software }).is_err());
        for key in [7, 15, 23] {
            v.on_event(TxTimestamp { key, kind: TimestampKind::Software }).unwrap();
            v.on_event(TxTimestamp { key, kind: TimestampKind::Completion }).unwrap();
        }
        assert!(v.is_drained());
    }

    #[test]
    fn unkeyed_reports_match_oldest_unit() {
        let mut v = TimestampVerifier::new(
            TimestampFlags::TX_SOFTWARE | TimestampFlags::TX_COMPLETION,
            SocketKind::DatagramSeq,
        );
        v.expect(4);
        v.expect(4);
        v.on_event(TxTimestamp { key: 0, kind: TimestampKind::Software }).unwrap();
        v.on_event(TxTimestamp { key: 0, kind: TimestampKind::Software }).unwrap();
        assert_eq!(v.on_event(TxTimestamp { key: 0, kind: TimestampKind::Completion }), Ok(1));
        assert_eq!(v.on_event(TxTimestamp { key: 0, kind: TimestampKind::Completion }), Ok(0));
    }

    #[test]
    fn scheduler_stage_comes_first() {
        let v = TimestampVerifier::new(flags() | TimestampFlags::TX_SCHED, SocketKind::DatagramSeq);
        assert_eq!(
            v.stages(),
            vec![TimestampKind::Enter, TimestampKind::Software, TimestampKind::Completion]
        );
    }

    #[test]
    fn report_for_unregistered_unit_fails() {
        let mut v = TimestampVerifier::new(flags(), SocketKind::DatagramSeq);
        assert!(matches!(
            v.on_event(TxTimestamp { key: 3, kind: TimestampKind::Software }),
            Err(TimestampError::UnknownUnit { key: 3, .. })
        ));
    }

    #[test]
    fn rx_only_flags_owe_nothing() {
        let flags = TimestampFlags::SOFTWARE | TimestampFlags::RX_SOFTWARE;
        let mut v = TimestampVerifier::new(flags, SocketKind::DatagramSeq);
        assert_eq!(v.expect(8), 0);
        assert!(v.is_drained());
    }

    proptest! {
        #[test]
        fn stream_keys_track_cumulative_offsets(
            lens in proptest::collection::vec(1usize..4096, 1..24),
        ) {
            let mut v = TimestampVerifier::new(flags(), SocketKind::Stream);
            for len in &lens {
                prop_assert_eq!(v.expect(*len), 2);
            }
            let mut end = 0u32;
            for len in &lens {
                end += *len as u32;
                let key = end - 1;
                v.on_event(TxTimestamp { key, kind: TimestampKind::Software }).unwrap();
                v.on_event(TxTimestamp { key, kind: TimestampKind::Completion }).unwrap();
            }
            prop_assert!(v.is_drained());
        }

        #[test]
        fn message_keys_are_send_ordinals(count in 1usize..64) {
            let mut v = TimestampVerifier::new(flags(), SocketKind::DatagramSeq);
            for _ in 0..count {
                v.expect(8);
            }
            for key in (0..count as u32).rev() {
                v.on_event(TxTimestamp { key, kind: TimestampKind::Software }).unwrap();
                v.on_event(TxTimestamp { key, kind: TimestampKind::Completion }).unwrap();
            }
            prop_assert_eq!(v.outstanding(), 0);
        }
    }
}
