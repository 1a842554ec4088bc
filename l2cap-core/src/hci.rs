#![forbid(unsafe_code)]

//! Controller addresses and the subset of HCI commands the tester observes on
//! the outgoing command tap.

use bytes::Bytes;
use std::fmt;

/// Controller address in over-the-air (little-endian) byte order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const ANY: BdAddr = BdAddr([0; 6]);

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Opcodes of the commands scenarios react to.
pub mod opcode {
    pub const CREATE_CONN: u16 = 0x0405;
    pub const AUTH_REQUESTED: u16 = 0x0411;
    pub const WRITE_SCAN_ENABLE: u16 = 0x0c1a;
    pub const LE_SET_ADV_PARAMETERS: u16 = 0x2006;
    pub const LE_SET_SCAN_ENABLE: u16 = 0x200c;
    pub const LE_CREATE_CONN: u16 = 0x200d;
    pub const LE_CREATE_CONN_CANCEL: u16 = 0x200e;
    pub const LE_START_ENCRYPT: u16 = 0x2019;
}

/// Advertising type for connectable high duty cycle directed advertising.
pub const ADV_DIRECT_IND: u8 = 0x01;

/// A command issued by the local controller, as seen by the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciCommand {
    pub opcode: u16,
    pub params: Bytes,
}

/// Decoded `LE Set Advertising Parameters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvParameters {
    pub adv_type: u8,
    pub own_addr_type: u8,
    pub direct_addr_type: u8,
    pub direct_addr: BdAddr,
}

impl HciCommand {
    pub fn new(opcode: u16, params: impl Into<Bytes>) -> Self {
        Self { opcode, params: params.into() }
    }

    /// `Some(enabled)` for `LE Set Scan Enable`, `None` for anything else.
    pub fn scan_enable(&self) -> Option<bool> {
        if self.opcode != opcode::LE_SET_SCAN_ENABLE {
            return None;
        }
        self.params.first().map(|enable| *enable != 0)
    }

    pub fn adv_parameters(&self) -> Option<AdvParameters> {
        if self.opcode != opcode::LE_SET_ADV_PARAMETERS || self.params.len() < 15 {
            return None;
        }
        let p = &self.params;
        Some(AdvParameters {
            adv_type: p[4],
            own_addr_type: p[5],
            direct_addr_type: p[6],
            direct_addr: BdAddr::from_slice(&p[7..13])?,
        })
    }

    pub fn le_scan_enable(enable: bool) -> Self {
        Self::new(opcode::LE_SET_SCAN_ENABLE, vec![u8::from(enable), 0x01])
    }

    pub fn le_adv_parameters(adv_type: u8, direct_addr_type: u8, direct_addr: BdAddr) -> Self {
        let mut params = Vec::with_capacity(15);
        params.extend_from_slice(&0x0800u16.to_le_bytes());
        params.extend_from_slice(&0x0800u16.to_le_bytes());
        params.push(adv_type);
        params.push(0x00);
        params.push(direct_addr_type);
        params.extend_from_slice(direct_addr.as_bytes());
        params.push(0x07);
        params.push(0x00);
        Self::new(opcode::LE_SET_ADV_PARAMETERS, params)
    }

    pub fn le_create_conn(peer: BdAddr, peer_addr_type: u8) -> Self {
        let mut params = Vec::with_capacity(25);
        params.extend_from_slice(&0x0060u16.to_le_bytes());
        params.extend_from_slice(&0x0060u16.to_le_bytes());
        params.push(0x00);
        params.push(peer_addr_type);
        params.extend_from_slice(peer.as_bytes());
        params.push(0x00);
        params.extend_from_slice(&[
            0x18, 0x00, 0x28, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        Self::new(opcode::LE_CREATE_CONN, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reverses_byte_order() {
        let addr = BdAddr([0x00, 0xaa, 0x01, 0x02, 0x03, 0x00]);
        assert_eq!(addr.to_string(), "00:03:02:01:AA:00");
    }

    #[test]
    fn scan_enable_decodes_only_scan_commands() {
        assert_eq!(HciCommand::le_scan_enable(true).scan_enable(), Some(true));
        assert_eq!(HciCommand::le_scan_enable(false).scan_enable(), Some(false));
        assert_eq!(HciCommand::new(opcode::LE_CREATE_CONN_CANCEL, Vec::new()).scan_enable(), None);
        assert_eq!(HciCommand::new(opcode::LE_SET_SCAN_ENABLE, Vec::new()).scan_enable(), None);
    }

    #[test]
    fn adv_parameters_layout() {
        let peer = BdAddr([1, 2, 3, 4, 5, 6]);
        let cmd = HciCommand::le_adv_parameters(ADV_DIRECT_IND, 0, peer);
        assert_eq!(cmd.params.len(), 15);
        let adv = cmd.adv_parameters().unwrap();
        assert_eq!(adv.adv_type, ADV_DIRECT_IND);
        assert_eq!(adv.direct_addr, peer);
    }

    #[test]
    fn short_adv_parameters_are_ignored() {
        let cmd = HciCommand::new(opcode::LE_SET_ADV_PARAMETERS, vec![0u8; 6]);
        assert!(cmd.adv_parameters().is_none());
    }
}
