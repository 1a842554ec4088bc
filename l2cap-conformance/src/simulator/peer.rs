//! The emulated remote host.

use async_trait::async_trait;
use bytes::Bytes;
use l2cap_core::signal::signaling_cid;
use l2cap_core::{AddressType, BdAddr, Errno, HciCommand, IoCapability};
use l2cap_transport::{HookData, HookGuard, PeerEvent, PeerHost, PeerServer};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use super::{SimulatedStack, CENTRAL_ADDRESS};

#[async_trait]
impl PeerHost for SimulatedStack {
    fn address(&self) -> BdAddr {
        self.shared.inspect(|world| world.peer.address)
    }

    fn central_address(&self) -> BdAddr {
        CENTRAL_ADDRESS
    }

    fn central_le_scan_enabled(&self) -> bool {
        self.shared.inspect(|world| world.scanning)
    }

    async fn set_adv_enable(&self, enable: bool) -> Result<(), Errno> {
        debug!(enable, "peer advertising");
        self.shared.update(|world| {
            world.peer.advertising = enable;
            if enable {
                world.scan_match();
            }
        });
        Ok(())
    }

    async fn write_scan_enable(&self, mode: u8) -> Result<(), Errno> {
        debug!(mode, "peer scan enable");
        self.shared.update(|world| {
            world.peer.scan_mode = mode;
            world.page_waiting();
        });
        Ok(())
    }

    async fn write_ssp_mode(&self, enable: bool) -> Result<(), Errno> {
        self.shared.update(|world| world.peer.ssp = enable);
        Ok(())
    }

    fn set_io_capability(&self, capability: IoCapability) {
        self.shared.update(|world| world.peer.io_capability = capability);
    }

    fn set_pin_code(&self, pin: &[u8]) {
        self.shared.update(|world| world.peer.pin = Some(pin.to_vec()));
    }

    fn set_reject_user_confirm(&self, reject: bool) {
        self.shared.update(|world| world.peer.reject_confirm = reject);
    }

    fn add_l2cap_server(&self, server: PeerServer) {
        debug!(psm = server.psm, credits = ?server.credits, "peer server registered");
        self.shared.update(|world| world.peer.servers.insert(server.psm, server));
    }

    fn hci_connect(&self, addr: BdAddr, addr_type: AddressType) {
        if addr != CENTRAL_ADDRESS {
            warn!(%addr, "peer connecting to an unknown controller");
            return;
        }
        self.spawn(|shared| async move {
            shared.update(|world| world.incoming_link(addr_type));
        });
    }

    fn l2cap_request(&self, handle: u16, code: u8, payload: Bytes) -> Result<(), Errno> {
        self.shared.update(|world| {
            if world.link(handle).is_none() {
                return Err(Errno::ENOTCONN);
            }
            let ident = world.peer.next_ident();
            world.peer_request(handle, code, ident, &payload);
            Ok(())
        })
    }

    fn send_cid(&self, handle: u16, cid: u16, data: &[u8]) -> Result<(), Errno> {
        self.shared.update(|world| {
            let le = world.link(handle).map(|l| l.le).ok_or(Errno::ENOTCONN)?;
            if cid == signaling_cid(le) {
                world.peer_signal(handle, data);
            } else {
                world.deliver_inbound(handle, cid, data);
            }
            Ok(())
        })
    }

    fn subscribe(&self) -> UnboundedReceiver<PeerEvent> {
        self.shared.update(|world| world.subs.subscribe_peer())
    }

    fn add_cid_hook(&self, handle: Option<u16>, cid: u16) -> UnboundedReceiver<HookData> {
        debug!(?handle, cid, "peer channel hooked");
        self.shared.update(|world| world.subs.subscribe_hook(handle, cid))
    }

    fn command_tap(&self) -> UnboundedReceiver<HciCommand> {
        self.shared.update(|world| world.subs.subscribe_commands())
    }

    fn suppress_completion(&self, opcode: u16) -> HookGuard {
        let (guard, alive) = HookGuard::pair();
        debug!(opcode = format_args!("0x{opcode:04x}"), "completion suppressed");
        self.shared.update(|world| world.subs.suppress(opcode, alive));
        guard
    }
}
