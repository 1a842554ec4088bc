//! Subscriptions handed out by the simulated collaborators. A subscription
//! ends when its receiver or guard is dropped; dead senders are pruned on
//! the next delivery.

use bytes::Bytes;
use l2cap_core::HciCommand;
use l2cap_transport::{HookData, PairingRequest, PeerEvent};
use std::sync::Weak;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

struct Hook {
    handle: Option<u16>,
    cid: u16,
    tx: UnboundedSender<HookData>,
}

impl Hook {
    fn matches(&self, handle: u16, cid: u16) -> bool {
        self.cid == cid && self.handle.map_or(true, |h| h == handle)
    }
}

#[derive(Default)]
pub(crate) struct Subscribers {
    peer: Vec<UnboundedSender<PeerEvent>>,
    commands: Vec<UnboundedSender<HciCommand>>,
    hooks: Vec<Hook>,
    pairing: Vec<UnboundedSender<PairingRequest>>,
    suppressed: Vec<(u16, Weak<()>)>,
}

impl Subscribers {
    pub(crate) fn subscribe_peer(&mut self) -> UnboundedReceiver<PeerEvent> {
        let (tx, rx) = unbounded_channel();
        self.peer.push(tx);
        rx
    }

    pub(crate) fn subscribe_commands(&mut self) -> UnboundedReceiver<HciCommand> {
        let (tx, rx) = unbounded_channel();
        self.commands.push(tx);
        rx
    }

    pub(crate) fn subscribe_hook(
        &mut self,
        handle: Option<u16>,
        cid: u16,
    ) -> UnboundedReceiver<HookData> {
        let (tx, rx) = unbounded_channel();
        self.hooks.push(Hook { handle, cid, tx });
        rx
    }

    pub(crate) fn subscribe_pairing(&mut self) -> UnboundedReceiver<PairingRequest> {
        let (tx, rx) = unbounded_channel();
        self.pairing.push(tx);
        rx
    }

    pub(crate) fn suppress(&mut self, opcode: u16, alive: Weak<()>) {
        self.suppressed.push((opcode, alive));
    }

    pub(crate) fn peer_event(&mut self, event: PeerEvent) {
        trace!(?event, "peer event");
        self.peer.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Issue a command on the local controller.
    pub(crate) fn command(&mut self, cmd: HciCommand) {
        trace!(opcode = format_args!("0x{:04x}", cmd.opcode), "command");
        self.commands.retain(|tx| tx.send(cmd.clone()).is_ok());
    }

    /// Offer data sent to the peer's `cid` to the hooks. Returns whether any
    /// live hook took it.
    pub(crate) fn hook(&mut self, handle: u16, cid: u16, data: &Bytes) -> bool {
        let mut taken = false;
        self.hooks.retain(|hook| {
            if hook.tx.is_closed() {
                return false;
            }
            if hook.matches(handle, cid) {
                let sent = hook.tx.send(HookData { handle, cid, data: data.clone() });
                taken |= sent.is_ok();
            }
            true
        });
        taken
    }

    /// Hand a request to the pairing agents. Returns whether one listened.
    pub(crate) fn pairing(&mut self, request: PairingRequest) -> bool {
        self.pairing.retain(|tx| tx.send(request.clone()).is_ok());
        !self.pairing.is_empty()
    }

    pub(crate) fn is_suppressed(&mut self, opcode: u16) -> bool {
        self.suppressed.retain(|(_, alive)| alive.strong_count() > 0);
        self.suppressed.iter().any(|(op, _)| *op == opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2cap_transport::HookGuard;

    #[test]
    fn unbound_hook_matches_every_link() {
        let mut subs = Subscribers::default();
        let mut any = subs.subscribe_hook(None, 0x0040);
        let mut one = subs.subscribe_hook(Some(7), 0x0040);
        let data = Bytes::from_static(b"abc");
        assert!(subs.hook(3, 0x0040, &data));
        assert!(subs.hook(7, 0x0040, &data));
        assert!(!subs.hook(7, 0x0041, &data));
        assert_eq!(any.try_recv().unwrap().handle, 3);
        assert_eq!(any.try_recv().unwrap().handle, 7);
        assert_eq!(one.try_recv().unwrap().handle, 7);
        assert!(one.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut subs = Subscribers::default();
        let rx = subs.subscribe_hook(None, 0x0005);
        drop(rx);
        assert!(!subs.hook(1, 0x0005, &Bytes::new()));
        assert!(subs.hooks.is_empty());
    }

    #[test]
    fn suppression_ends_with_guard() {
        let mut subs = Subscribers::default();
        let (guard, weak) = HookGuard::pair();
        subs.suppress(0x200d, weak);
        assert!(subs.is_suppressed(0x200d));
        assert!(!subs.is_suppressed(0x0405));
        drop(guard);
        assert!(!subs.is_suppressed(0x200d));
    }
}
