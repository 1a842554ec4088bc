#![forbid(unsafe_code)]

//! L2CAP signalling command codes, fixed channel ids and result codes used by
//! the wire-level assertions.

pub const CMD_REJECT: u8 = 0x01;
pub const CONN_REQ: u8 = 0x02;
pub const CONN_RSP: u8 = 0x03;
pub const CONFIG_REQ: u8 = 0x04;
pub const CONFIG_RSP: u8 = 0x05;
pub const DISCONN_REQ: u8 = 0x06;
pub const DISCONN_RSP: u8 = 0x07;
pub const LE_CONN_REQ: u8 = 0x14;
pub const LE_CONN_RSP: u8 = 0x15;
pub const ECRED_CONN_REQ: u8 = 0x17;
pub const ECRED_CONN_RSP: u8 = 0x18;

pub const CID_SIGNALING: u16 = 0x0001;
pub const CID_ATT: u16 = 0x0004;
pub const CID_LE_SIGNALING: u16 = 0x0005;
pub const CID_DYN_START: u16 = 0x0040;
pub const CID_LE_DYN_END: u16 = 0x007f;

pub const REJ_NOT_UNDERSTOOD: u16 = 0x0000;
pub const REJ_INVALID_CID: u16 = 0x0002;

pub const CR_SUCCESS: u16 = 0x0000;
pub const CR_PEND: u16 = 0x0001;
pub const CR_BAD_PSM: u16 = 0x0002;
pub const CR_SEC_BLOCK: u16 = 0x0003;

pub const CR_LE_BAD_PSM: u16 = 0x0002;
pub const CR_LE_AUTHORIZATION: u16 = 0x0006;
pub const CR_LE_INVALID_SCID: u16 = 0x0009;

/// Bytes of the SDU length field prefixed to the first frame of an LE SDU.
pub const SDU_LEN_SIZE: usize = 2;

/// Signalling channel for a transport.
pub fn signaling_cid(le: bool) -> u16 {
    if le {
        CID_LE_SIGNALING
    } else {
        CID_SIGNALING
    }
}
