//! The management interface of the local controller.

use async_trait::async_trait;
use l2cap_transport::control::STATUS_NOT_SUPPORTED;
use l2cap_transport::{
    ControlPlane, ControllerInfo, MgmtError, PairingReply, PairingRequest, Setting,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use super::world::World;
use super::{SimulatedStack, CENTRAL_ADDRESS, CONTROLLER_INDEX};

fn check_index(index: u16) -> Result<(), MgmtError> {
    if index == CONTROLLER_INDEX {
        Ok(())
    } else {
        Err(MgmtError::InvalidIndex(index))
    }
}

fn unsupported(command: &'static str) -> MgmtError {
    MgmtError::Status { command, status: STATUS_NOT_SUPPORTED }
}

fn apply(world: &mut World, setting: Setting, enable: bool) -> Result<(), MgmtError> {
    let le = world.transport.is_le();
    let settings = &mut world.settings;
    match setting {
        Setting::Le if !le => return Err(unsupported("Set LE")),
        Setting::Ssp if le => return Err(unsupported("Set Secure Simple Pairing")),
        Setting::Le => settings.le = enable,
        Setting::Ssp => settings.ssp = enable,
        Setting::Bondable => settings.bondable = enable,
        Setting::Connectable => settings.connectable = enable,
        Setting::Advertising => settings.advertising = enable,
        Setting::Powered if enable => settings.powered = true,
        Setting::Powered => {
            settings.powered = false;
            world.power_off();
        }
    }
    Ok(())
}

#[async_trait]
impl ControlPlane for SimulatedStack {
    async fn read_index_list(&self) -> Result<Vec<u16>, MgmtError> {
        Ok(vec![CONTROLLER_INDEX])
    }

    async fn read_info(&self, index: u16) -> Result<ControllerInfo, MgmtError> {
        check_index(index)?;
        let le = self.shared.inspect(|world| world.transport.is_le());
        Ok(ControllerInfo { address: CENTRAL_ADDRESS, le_capable: le, bredr_capable: !le })
    }

    async fn set_setting(
        &self,
        index: u16,
        setting: Setting,
        enable: bool,
    ) -> Result<(), MgmtError> {
        check_index(index)?;
        self.shared.update(|world| apply(world, setting, enable))?;
        debug!(?setting, enable, "setting applied");
        if setting == Setting::Powered {
            info!(powered = enable, "controller power changed");
        }
        Ok(())
    }

    fn subscribe_pairing(&self, index: u16) -> UnboundedReceiver<PairingRequest> {
        if check_index(index).is_err() {
            debug!(index, "pairing agent for an unknown controller");
        }
        self.shared.update(|world| world.subs.subscribe_pairing())
    }

    async fn reply_pairing(&self, index: u16, reply: PairingReply) -> Result<(), MgmtError> {
        check_index(index)?;
        debug!(?reply, "pairing reply");
        self.shared.update(|world| world.finish_pairing(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2cap_core::{SimulatorConfig, Transport};

    #[tokio::test]
    async fn single_controller_reports_its_transport() {
        let stack = SimulatedStack::new(Transport::Le, SimulatorConfig::default());
        assert_eq!(stack.read_index_list().await, Ok(vec![0]));
        let info = stack.read_info(0).await.unwrap();
        assert_eq!(info.address, CENTRAL_ADDRESS);
        assert!(info.le_capable);
        assert!(!info.bredr_capable);
        assert_eq!(stack.read_info(1).await, Err(MgmtError::InvalidIndex(1)));
    }

    #[tokio::test]
    async fn transport_bound_settings() {
        let bredr = SimulatedStack::new(Transport::BrEdr, SimulatorConfig::default());
        assert!(matches!(
            bredr.set_setting(0, Setting::Le, true).await,
            Err(MgmtError::Status { status: STATUS_NOT_SUPPORTED, .. })
        ));
        assert_eq!(bredr.set_setting(0, Setting::Ssp, true).await, Ok(()));

        let le = SimulatedStack::new(Transport::Le, SimulatorConfig::default());
        assert!(le.set_setting(0, Setting::Ssp, true).await.is_err());
        assert_eq!(le.set_setting(0, Setting::Powered, true).await, Ok(()));
    }

    #[tokio::test]
    async fn reply_without_pairing_is_invalid() {
        let stack = SimulatedStack::new(Transport::BrEdr, SimulatorConfig::default());
        let reply = PairingReply::Confirm { addr: super::super::PEER_ADDRESS, accept: true };
        assert!(stack.reply_pairing(0, reply).await.is_err());
    }
}
