#![forbid(unsafe_code)]

//! Trackers fed from the outgoing controller command tap.
//!
//! [`CloseTracker`] checks what the local stack does when a pending LE
//! connection is abandoned: `Scanning → CloseRequested → {ScanStopped |
//! ConnectionCancelled}`. [`TwoSocketSequencer`] orders the two-socket
//! scenario off scan-enable commands and connection completions.

use l2cap_core::hci::opcode;
use l2cap_core::HciCommand;
use tracing::debug;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScanState {
    Idle,
    Scanning,
    CloseRequested,
    ScanStopped,
    ConnectionCancelled,
}

/// When the pending socket gets closed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CloseVariant {
    /// While the controller is still scanning for the peer. The stack must
    /// stop scanning.
    DuringScan,
    /// After scanning found the peer and connection creation is pending. The
    /// stack must cancel the connection attempt.
    DuringConnect,
}

/// What the scenario has to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanAction {
    None,
    /// Close the pending socket, then call [`CloseTracker::close_requested`].
    CloseSocket,
    /// Make the peer visible while the connection completion is withheld.
    ProvokeConnection,
    Pass,
    Fail(String),
}

#[derive(Debug)]
pub struct CloseTracker {
    variant: CloseVariant,
    state: ScanState,
}

impl CloseTracker {
    pub fn new(variant: CloseVariant) -> Self {
        Self { variant, state: ScanState::Idle }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn variant(&self) -> CloseVariant {
        self.variant
    }

    pub fn close_requested(&mut self) {
        debug!(from = ?self.state, "pending socket closed");
        self.state = ScanState::CloseRequested;
    }

    pub fn on_command(&mut self, cmd: &HciCommand) -> ScanAction {
        if let Some(enable) = cmd.scan_enable() {
            return self.on_scan(enable);
        }
        match cmd.opcode {
            opcode::LE_CREATE_CONN => self.on_create(),
            opcode::LE_CREATE_CONN_CANCEL => self.on_cancel(),
            _ => ScanAction::None,
        }
    }

    fn on_scan(&mut self, enable: bool) -> ScanAction {
        match (self.variant, self.state, enable) {
            (_, ScanState::Idle, true) => {
                self.state = ScanState::Scanning;
                match self.variant {
                    CloseVariant::DuringScan => ScanAction::CloseSocket,
                    CloseVariant::DuringConnect => ScanAction::ProvokeConnection,
                }
            }
            (CloseVariant::DuringScan, ScanState::CloseRequested, false) => {
                self.state = ScanState::ScanStopped;
                ScanAction::Pass
            }
            // Scanning ends because the peer was found; connection creation follows.
            (CloseVariant::DuringConnect, ScanState::Scanning, false) => ScanAction::CloseSocket,
            (_, state, enable) => {
                let what = if enable { "enable" } else { "disable" };
                ScanAction::Fail(format!("unexpected scan {what} in state {state:?}"))
            }
        }
    }

    fn on_create(&mut self) -> ScanAction {
        match (self.variant, self.state) {
            (_, ScanState::Idle) => ScanAction::None,
            // The peer was found while scanning; the socket is still open.
            (CloseVariant::DuringConnect, ScanState::Scanning) => ScanAction::None,
            // Scanning must end with no connection attempt at all.
            (_, state) => ScanAction::Fail(format!("connection attempt in state {state:?}")),
        }
    }

    fn on_cancel(&mut self) -> ScanAction {
        match (self.variant, self.state) {
            (CloseVariant::DuringConnect, ScanState::CloseRequested) => {
                self.state = ScanState::ConnectionCancelled;
                ScanAction::Pass
            }
            (_, ScanState::Idle) => ScanAction::None,
            (_, state) => ScanAction::Fail(format!("connection cancelled in state {state:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerAction {
    None,
    /// Open the second socket, closing the first when asked to, then let the
    /// peer advertise.
    OpenSecond { close_first: bool },
    EnableAdvertising,
    Pass,
}

/// Per-scenario counters of the two-socket case.
#[derive(Debug, Default)]
pub struct TwoSocketSequencer {
    close_first: bool,
    scan_enables: u32,
    connections: u32,
}

impl TwoSocketSequencer {
    pub fn new(close_first: bool) -> Self {
        Self { close_first, ..Default::default() }
    }

    pub fn on_command(&mut self, cmd: &HciCommand) -> SequencerAction {
        if cmd.scan_enable() != Some(true) {
            return SequencerAction::None;
        }
        self.scan_enables += 1;
        match self.scan_enables {
            1 => SequencerAction::OpenSecond { close_first: self.close_first },
            2 => SequencerAction::EnableAdvertising,
            _ => SequencerAction::None,
        }
    }

    pub fn on_connected(&mut self) -> SequencerAction {
        self.connections += 1;
        let needed = if self.close_first { 1 } else { 2 };
        if self.connections == needed {
            SequencerAction::Pass
        } else {
            SequencerAction::None
        }
    }

    pub fn connections(&self) -> u32 {
        self.connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel() -> HciCommand {
        HciCommand::new(opcode::LE_CREATE_CONN_CANCEL, Vec::new())
    }

    fn create() -> HciCommand {
        HciCommand::new(opcode::LE_CREATE_CONN, Vec::new())
    }

    #[test]
    fn close_during_scan_passes_on_scan_disable() {
        let mut t = CloseTracker::new(CloseVariant::DuringScan);
        assert_eq!(t.on_command(&HciCommand::le_scan_enable(true)), ScanAction::CloseSocket);
        t.close_requested();
        assert_eq!(t.on_command(&HciCommand::le_scan_enable(false)), ScanAction::Pass);
        assert_eq!(t.state(), ScanState::ScanStopped);
    }

    #[test]
    fn scan_disable_before_close_fails() {
        let mut t = CloseTracker::new(CloseVariant::DuringScan);
        t.on_command(&HciCommand::le_scan_enable(true));
        assert!(matches!(t.on_command(&HciCommand::le_scan_enable(false)), ScanAction::Fail(_)));
    }

    #[test]
    fn close_during_connect_passes_on_cancel() {
        let mut t = CloseTracker::new(CloseVariant::DuringConnect);
        assert_eq!(t.on_command(&HciCommand::le_scan_enable(true)), ScanAction::ProvokeConnection);
        assert_eq!(t.on_command(&HciCommand::le_scan_enable(false)), ScanAction::CloseSocket);
        assert_eq!(t.on_command(&create()), ScanAction::None);
        t.close_requested();
        assert_eq!(t.on_command(&cancel()), ScanAction::Pass);
        assert_eq!(t.state(), ScanState::ConnectionCancelled);
    }

    #[test]
    fn connection_attempt_after_close_during_scan_fails() {
        let mut t = CloseTracker::new(CloseVariant::DuringScan);
        assert_eq!(t.on_command(&HciCommand::le_scan_enable(true)), ScanAction::CloseSocket);
        t.close_requested();
        assert!(matches!(t.on_command(&create()), ScanAction::Fail(_)));
        assert!(matches!(t.on_command(&cancel()), ScanAction::Fail(_)));
        assert_eq!(t.state(), ScanState::CloseRequested);
    }

    #[test]
    fn connection_attempt_while_scanning_for_close_fails() {
        let mut t = CloseTracker::new(CloseVariant::DuringScan);
        t.on_command(&HciCommand::le_scan_enable(true));
        assert!(matches!(t.on_command(&create()), ScanAction::Fail(_)));
    }

    #[test]
    fn second_connection_attempt_after_close_fails() {
        let mut t = CloseTracker::new(CloseVariant::DuringConnect);
        t.on_command(&HciCommand::le_scan_enable(true));
        t.on_command(&HciCommand::le_scan_enable(false));
        assert_eq!(t.on_command(&create()), ScanAction::None);
        t.close_requested();
        assert!(matches!(t.on_command(&create()), ScanAction::Fail(_)));
    }

    #[test]
    fn early_cancel_fails() {
        let mut t = CloseTracker::new(CloseVariant::DuringConnect);
        t.on_command(&HciCommand::le_scan_enable(true));
        assert!(matches!(t.on_command(&cancel()), ScanAction::Fail(_)));
    }

    #[test]
    fn sequencer_opens_second_socket_then_advertises() {
        let mut s = TwoSocketSequencer::new(false);
        assert_eq!(s.on_command(&HciCommand::le_scan_enable(false)), SequencerAction::None);
        assert_eq!(
            s.on_command(&HciCommand::le_scan_enable(true)),
            SequencerAction::OpenSecond { close_first: false }
        );
        assert_eq!(
            s.on_command(&HciCommand::le_scan_enable(true)),
            SequencerAction::EnableAdvertising
        );
        assert_eq!(s.on_connected(), SequencerAction::None);
        assert_eq!(s.on_connected(), SequencerAction::Pass);
    }

    #[test]
    fn closing_first_needs_one_connection() {
        let mut s = TwoSocketSequencer::new(true);
        assert_eq!(
            s.on_command(&HciCommand::le_scan_enable(true)),
            SequencerAction::OpenSecond { close_first: true }
        );
        assert_eq!(s.on_connected(), SequencerAction::Pass);
    }
}
