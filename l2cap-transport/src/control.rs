#![forbid(unsafe_code)]

//! Management interface of the local controller.

use async_trait::async_trait;
use l2cap_core::BdAddr;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MgmtError {
    #[error("{command} failed with status 0x{status:02x}")]
    Status { command: &'static str, status: u8 },
    #[error("invalid controller index {0}")]
    InvalidIndex(u16),
}

pub const STATUS_NOT_SUPPORTED: u8 = 0x0c;
pub const STATUS_INVALID_PARAMS: u8 = 0x0d;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Setting {
    Powered,
    Le,
    Ssp,
    Bondable,
    Connectable,
    Advertising,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    pub address: BdAddr,
    pub le_capable: bool,
    pub bredr_capable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingRequest {
    UserConfirm { addr: BdAddr, passkey: u32 },
    PinCode { addr: BdAddr, secure: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingReply {
    Confirm { addr: BdAddr, accept: bool },
    Pin { addr: BdAddr, pin: Vec<u8> },
    PinNegative { addr: BdAddr },
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn read_index_list(&self) -> Result<Vec<u16>, MgmtError>;
    async fn read_info(&self, index: u16) -> Result<ControllerInfo, MgmtError>;
    async fn set_setting(
        &self,
        index: u16,
        setting: Setting,
        enable: bool,
    ) -> Result<(), MgmtError>;
    fn subscribe_pairing(&self, index: u16) -> UnboundedReceiver<PairingRequest>;
    async fn reply_pairing(&self, index: u16, reply: PairingReply) -> Result<(), MgmtError>;
}
