#![forbid(unsafe_code)]

//! The per-case parameter block. Every recognised option is a field with an
//! explicit "unset" default; nothing relies on a numeric zero meaning absent.

use bitflags::bitflags;
use bytes::Bytes;
use nix::errno::Errno;
use std::time::Duration;

use crate::{BdAddr, TesterError, TesterResult};

/// Which radio the emulated controllers speak.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Transport {
    BrEdr,
    Le,
}

impl Transport {
    pub fn is_le(self) -> bool {
        matches!(self, Transport::Le)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ChannelMode {
    #[default]
    Basic,
    /// Enhanced credit based flow control, several channels per request.
    ExtFlowctl,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum SocketKind {
    #[default]
    DatagramSeq,
    Stream,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub enum SecurityLevel {
    Sdp,
    Low,
    Medium,
    High,
}

/// How the LE peer becomes reachable.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Advertising {
    /// The peer advertises as soon as setup completes.
    #[default]
    General,
    /// The peer stays silent; the scenario decides when it advertises.
    None,
    /// The local controller advertises and must direct it at the peer.
    Direct,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum AddressType {
    #[default]
    BrEdr,
    LePublic,
    LeRandom,
}

impl AddressType {
    pub fn is_le(self) -> bool {
        !matches!(self, AddressType::BrEdr)
    }

    /// Default address type for sockets on the given transport.
    pub fn for_transport(transport: Transport) -> Self {
        match transport {
            Transport::BrEdr => AddressType::BrEdr,
            Transport::Le => AddressType::LePublic,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum IoCapability {
    DisplayOnly = 0x00,
    DisplayYesNo = 0x01,
    KeyboardOnly = 0x02,
    NoInputNoOutput = 0x03,
    KeyboardDisplay = 0x04,
}

bitflags! {
    /// `SOF_TIMESTAMPING_*` bits.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct TimestampFlags: u32 {
        const TX_HARDWARE = 1 << 0;
        const TX_SOFTWARE = 1 << 1;
        const RX_HARDWARE = 1 << 2;
        const RX_SOFTWARE = 1 << 3;
        const SOFTWARE = 1 << 4;
        const OPT_ID = 1 << 7;
        const TX_SCHED = 1 << 8;
        const TX_ACK = 1 << 9;
        const TX_COMPLETION = 1 << 18;
    }
}

impl TimestampFlags {
    /// Bits that generate transmit reports.
    pub const TX_RECORD_MASK: TimestampFlags = TimestampFlags::TX_HARDWARE
        .union(TimestampFlags::TX_SOFTWARE)
        .union(TimestampFlags::TX_SCHED)
        .union(TimestampFlags::TX_ACK)
        .union(TimestampFlags::TX_COMPLETION);

    pub fn records_tx(self) -> bool {
        self.intersects(Self::TX_RECORD_MASK)
    }

    pub fn records_rx(self) -> bool {
        self.contains(TimestampFlags::RX_SOFTWARE)
    }
}

/// Payload moved over the channel once it is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// The peer sends, the local socket reads.
    Inbound(Bytes),
    /// The local socket writes, the peer hook reads.
    Outbound(Bytes),
}

impl Transfer {
    pub fn payload(&self) -> &Bytes {
        match self {
            Transfer::Inbound(data) | Transfer::Outbound(data) => data,
        }
    }
}

/// Peer-side LE credit parameters for a registered server.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CreditParameters {
    pub mtu: u16,
    pub mps: u16,
    pub credits: u16,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionParameters {
    /// Service id the local socket connects to.
    pub client_service_id: Option<u16>,
    /// Service id served by whichever side listens.
    pub server_service_id: Option<u16>,
    /// Fixed channel id instead of a service id.
    pub channel_id: Option<u16>,
    pub mode: ChannelMode,
    /// Peer server MTU/MPS/credits when the scenario pins them.
    pub mtu: Option<u16>,
    pub mps: Option<u16>,
    pub credits: Option<u16>,
    pub security_level: Option<SecurityLevel>,
    /// PIN the local side answers with.
    pub pin: Option<Bytes>,
    /// Register a PIN handler even without a PIN (answers negatively).
    pub expect_pin: bool,
    /// PIN configured on the peer.
    pub client_pin: Option<Bytes>,
    pub client_io_capability: Option<IoCapability>,
    /// Secure simple pairing on both controllers.
    pub enable_pairing: bool,
    pub reject_pairing: bool,
    pub advertising: Advertising,
    /// Address type used for bind and connect; defaults to the transport's.
    pub address_type: Option<AddressType>,
    /// Connect here instead of the emulated peer.
    pub peer_address: Option<BdAddr>,
    pub socket_kind: SocketKind,
    pub timestamping_flags: TimestampFlags,
    /// Extra sends of the outbound payload.
    pub repeat_count: u32,
    pub deferred_accept: bool,
    /// Send timeout; the scenario expects the connection attempt to expire.
    pub timeout: Option<Duration>,
    pub shutdown_write: bool,
    /// Two-socket scenario: close the first socket once the second is open.
    pub close_first: bool,
    pub transfer: Option<Transfer>,
    pub expect_error_code: Option<Errno>,
    /// The peer sees a rejection while the local socket reports no error.
    pub expect_rejection_without_error: bool,
    pub send_command_code: Option<u8>,
    pub raw_send_command: Option<Bytes>,
    pub expect_command_code: Option<u8>,
    pub raw_expect_command: Option<Bytes>,
}

impl ConnectionParameters {
    pub fn credit_parameters(&self) -> Option<CreditParameters> {
        match (self.mtu, self.mps, self.credits) {
            (None, None, None) => None,
            (mtu, mps, credits) => Some(CreditParameters {
                mtu: mtu.unwrap_or(0),
                mps: mps.unwrap_or(0),
                credits: credits.unwrap_or(0),
            }),
        }
    }

    pub fn address_type_for(&self, transport: Transport) -> AddressType {
        self.address_type.unwrap_or_else(|| AddressType::for_transport(transport))
    }

    pub fn inbound(&self) -> Option<&Bytes> {
        match &self.transfer {
            Some(Transfer::Inbound(data)) => Some(data),
            _ => None,
        }
    }

    pub fn outbound(&self) -> Option<&Bytes> {
        match &self.transfer {
            Some(Transfer::Outbound(data)) => Some(data),
            _ => None,
        }
    }

    /// Reject blocks that contradict themselves before any context is built.
    pub fn validate(&self) -> TesterResult<()> {
        let invalid = |msg: &str| Err(TesterError::InvalidParameters(msg.to_string()));
        if self.mtu == Some(0) || self.mps == Some(0) {
            return invalid("mtu and mps must be non-zero");
        }
        if matches!(&self.transfer, Some(t) if t.payload().is_empty()) {
            return invalid("transfer payload is empty");
        }
        if self.socket_kind == SocketKind::Stream && self.channel_id.is_some() {
            return invalid("stream sockets cannot use a fixed channel");
        }
        if self.expect_error_code.is_some() && self.expect_rejection_without_error {
            return invalid("an error code and an error-free rejection were both expected");
        }
        if self.repeat_count > 0 && self.outbound().is_none() {
            return invalid("repeat count without an outbound transfer");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unset() {
        let p = ConnectionParameters::default();
        assert_eq!(p.socket_kind, SocketKind::DatagramSeq);
        assert_eq!(p.mode, ChannelMode::Basic);
        assert_eq!(p.advertising, Advertising::General);
        assert!(p.expect_error_code.is_none());
        assert!(p.credit_parameters().is_none());
        assert!(p.validate().is_ok());
    }

    #[test]
    fn contradicting_error_expectations_are_rejected() {
        let p = ConnectionParameters {
            expect_error_code: Some(Errno::ECONNREFUSED),
            expect_rejection_without_error: true,
            ..Default::default()
        };
        assert!(matches!(p.validate(), Err(TesterError::InvalidParameters(_))));
    }

    #[test]
    fn zero_mps_is_rejected() {
        let p = ConnectionParameters { mps: Some(0), ..Default::default() };
        assert!(p.validate().is_err());
    }

    #[test]
    fn empty_payload_is_rejected() {
        let p = ConnectionParameters {
            transfer: Some(Transfer::Outbound(Bytes::new())),
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn tx_record_mask() {
        let flags = TimestampFlags::SOFTWARE | TimestampFlags::OPT_ID | TimestampFlags::TX_SOFTWARE;
        assert!(flags.records_tx());
        assert!(!flags.records_rx());
        assert!(!(TimestampFlags::SOFTWARE | TimestampFlags::RX_SOFTWARE).records_tx());
        assert_eq!(TimestampFlags::TX_COMPLETION.bits(), 1 << 18);
    }

    #[test]
    fn address_type_follows_transport() {
        let p = ConnectionParameters::default();
        assert_eq!(p.address_type_for(Transport::Le), AddressType::LePublic);
        let q = ConnectionParameters {
            address_type: Some(AddressType::LePublic),
            ..Default::default()
        };
        assert_eq!(q.address_type_for(Transport::BrEdr), AddressType::LePublic);
    }
}
