//! The local socket API over the simulated world.

use async_trait::async_trait;
use l2cap_core::{BdAddr, ChannelMode, Errno, SocketKind, TimestampFlags};
use l2cap_stream::TxTimestamp;
use l2cap_transport::{
    ChannelOptions, OptionName, Readiness, Received, Shutdown, SockAddr, SocketId, SocketLayer,
    SocketOption, TsInfo,
};
use tracing::{debug, trace};

use super::socket::{SimSocket, SockState};
use super::world::LOCAL_MTU;
use super::{SimulatedStack, CENTRAL_ADDRESS};

/// Timestamping capabilities of the simulated adapter.
const TS_CAPABILITIES: TimestampFlags = TimestampFlags::SOFTWARE
    .union(TimestampFlags::RX_SOFTWARE)
    .union(TimestampFlags::TX_SOFTWARE)
    .union(TimestampFlags::OPT_ID)
    .union(TimestampFlags::TX_COMPLETION);

#[async_trait]
impl SocketLayer for SimulatedStack {
    fn open(&self, kind: SocketKind) -> Result<SocketId, Errno> {
        let sk = self.shared.update(|world| world.alloc(SimSocket::new(kind)));
        trace!(%sk, ?kind, "socket opened");
        Ok(sk)
    }

    fn bind(&self, sk: SocketId, addr: SockAddr) -> Result<(), Errno> {
        if addr.bdaddr != CENTRAL_ADDRESS && addr.bdaddr != BdAddr::ANY {
            return Err(Errno::EADDRNOTAVAIL);
        }
        self.shared.update(|world| {
            let socket = world.socket_mut(sk)?;
            if socket.state != SockState::Open || socket.local.is_some() {
                return Err(Errno::EINVAL);
            }
            socket.local = Some(addr);
            Ok(())
        })
    }

    fn set_option(&self, sk: SocketId, option: SocketOption) -> Result<(), Errno> {
        self.shared.update(|world| {
            let config = world.config;
            let socket = world.socket_mut(sk)?;
            match option {
                SocketOption::Security(level) => socket.security = level,
                SocketOption::Mode(ChannelMode::ExtFlowctl) if !config.ecred_supported => {
                    return Err(Errno::ENOPROTOOPT)
                }
                SocketOption::Mode(mode) => socket.mode = mode,
                SocketOption::DeferSetup(defer) => socket.defer_setup = defer,
                SocketOption::SendTimeout(timeout) => socket.send_timeout = Some(timeout),
                SocketOption::Timestamping(_) if !config.timestamping_supported => {
                    return Err(Errno::ENOPROTOOPT)
                }
                SocketOption::Timestamping(flags) => socket.set_timestamping(flags),
                SocketOption::SendBuffer(size) => socket.send_buffer = size,
            }
            Ok(())
        })
    }

    fn get_option(&self, sk: SocketId, name: OptionName) -> Result<u32, Errno> {
        self.shared.inspect(|world| {
            let socket = world.socket(sk)?;
            match name {
                OptionName::ReceiveMtu => {
                    Ok(u32::from(socket.channel.as_ref().map_or(LOCAL_MTU, |c| c.imtu)))
                }
                OptionName::SendMtu => {
                    socket.channel.as_ref().map(|c| u32::from(c.omtu)).ok_or(Errno::ENOTCONN)
                }
                OptionName::SendBuffer => Ok(u32::try_from(socket.send_buffer).unwrap_or(u32::MAX)),
            }
        })
    }

    fn channel_options(&self, sk: SocketId) -> Result<ChannelOptions, Errno> {
        self.shared.inspect(|world| {
            let socket = world.socket(sk)?;
            Ok(socket
                .channel
                .as_ref()
                .map_or(ChannelOptions { imtu: LOCAL_MTU, omtu: LOCAL_MTU }, |c| ChannelOptions {
                    imtu: c.imtu,
                    omtu: c.omtu,
                }))
        })
    }

    fn connect(&self, sk: SocketId, addr: SockAddr) -> Result<(), Errno> {
        let timeout = self.shared.update(|world| world.begin_connect(sk, addr))?;
        self.progress_connect(sk);
        if let Some(timeout) = timeout {
            self.arm_send_timeout(sk, timeout);
        }
        Err(Errno::EINPROGRESS)
    }

    fn listen(&self, sk: SocketId, _backlog: u32) -> Result<(), Errno> {
        self.shared.update(|world| {
            let socket = world.socket_mut(sk)?;
            if socket.state != SockState::Open || socket.local.is_none() {
                return Err(Errno::EINVAL);
            }
            socket.state = SockState::Listening;
            debug!(%sk, le = socket.is_le(), "listening");
            Ok(())
        })
    }

    fn accept(&self, sk: SocketId) -> Result<SocketId, Errno> {
        self.shared.update(|world| {
            let socket = world.socket_mut(sk)?;
            if socket.state != SockState::Listening {
                return Err(Errno::EINVAL);
            }
            socket.accept_queue.pop_front().ok_or(Errno::EAGAIN)
        })
    }

    fn send(&self, sk: SocketId, data: &[u8]) -> Result<usize, Errno> {
        self.shared.update(|world| world.transmit(sk, data))
    }

    fn recv(&self, sk: SocketId, buf: &mut [u8]) -> Result<Received, Errno> {
        self.shared.update(|world| world.receive(sk, buf))
    }

    fn recv_error_queue(&self, sk: SocketId) -> Result<TxTimestamp, Errno> {
        self.shared.update(|world| world.socket_mut(sk)?.errqueue.pop_front().ok_or(Errno::EAGAIN))
    }

    fn take_error(&self, sk: SocketId) -> Result<Option<Errno>, Errno> {
        self.shared.update(|world| Ok(world.socket_mut(sk)?.error.take()))
    }

    fn peer_name(&self, sk: SocketId) -> Result<SockAddr, Errno> {
        self.shared.inspect(|world| {
            let socket = world.socket(sk)?;
            match socket.state {
                SockState::Connected | SockState::Deferred => socket.remote.ok_or(Errno::ENOTCONN),
                _ => Err(Errno::ENOTCONN),
            }
        })
    }

    fn shutdown(&self, sk: SocketId, how: Shutdown) -> Result<(), Errno> {
        self.shared.update(|world| world.shutdown(sk, how))
    }

    fn close(&self, sk: SocketId) {
        self.shared.update(|world| world.close(sk));
    }

    fn poll(&self, sk: SocketId) -> Readiness {
        self.shared
            .inspect(|world| world.socket(sk).map_or(Readiness::HANGUP, SimSocket::readiness))
    }

    async fn readiness(&self, sk: SocketId, interest: Readiness) -> Readiness {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            // Register before probing so a change in between is not lost.
            notified.as_mut().enable();
            let ready = self.poll(sk);
            if ready.intersects(interest) {
                return ready;
            }
            notified.await;
        }
    }

    fn ts_info(&self) -> Result<TsInfo, Errno> {
        if !self.shared.inspect(|world| world.config.ts_info_supported) {
            return Err(Errno::ENOPROTOOPT);
        }
        Ok(TsInfo { so_timestamping: TS_CAPABILITIES, phc_index: -1, tx_types: 0, rx_filters: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2cap_core::{AddressType, SimulatorConfig, Transport};

    fn stack() -> SimulatedStack {
        SimulatedStack::new(Transport::BrEdr, SimulatorConfig::default())
    }

    fn local(psm: u16) -> SockAddr {
        SockAddr { bdaddr: CENTRAL_ADDRESS, addr_type: AddressType::BrEdr, psm, cid: 0 }
    }

    #[tokio::test]
    async fn bind_rejects_foreign_address() {
        let stack = stack();
        let sk = stack.open(SocketKind::DatagramSeq).unwrap();
        let mut addr = local(0x1001);
        addr.bdaddr = super::super::PEER_ADDRESS;
        assert_eq!(stack.bind(sk, addr), Err(Errno::EADDRNOTAVAIL));
        assert_eq!(stack.bind(sk, local(0x1001)), Ok(()));
        assert_eq!(stack.bind(sk, local(0x1001)), Err(Errno::EINVAL));
    }

    #[tokio::test]
    async fn unconnected_socket_has_no_peer() {
        let stack = stack();
        let sk = stack.open(SocketKind::DatagramSeq).unwrap();
        assert_eq!(stack.peer_name(sk), Err(Errno::ENOTCONN));
        assert_eq!(stack.get_option(sk, OptionName::SendMtu), Err(Errno::ENOTCONN));
        assert_eq!(stack.get_option(sk, OptionName::ReceiveMtu), Ok(672));
    }

    #[tokio::test]
    async fn capabilities_follow_config() {
        let config = SimulatorConfig {
            ecred_supported: false,
            ts_info_supported: false,
            ..Default::default()
        };
        let stack = SimulatedStack::new(Transport::Le, config);
        let sk = stack.open(SocketKind::DatagramSeq).unwrap();
        assert_eq!(
            stack.set_option(sk, SocketOption::Mode(ChannelMode::ExtFlowctl)),
            Err(Errno::ENOPROTOOPT)
        );
        assert_eq!(stack.set_option(sk, SocketOption::Mode(ChannelMode::Basic)), Ok(()));
        assert_eq!(stack.ts_info(), Err(Errno::ENOPROTOOPT));
    }

    #[tokio::test]
    async fn listener_without_pending_channel_would_block() {
        let stack = stack();
        let sk = stack.open(SocketKind::DatagramSeq).unwrap();
        assert_eq!(stack.listen(sk, 5), Err(Errno::EINVAL));
        stack.bind(sk, local(0x1001)).unwrap();
        stack.listen(sk, 5).unwrap();
        assert_eq!(stack.accept(sk), Err(Errno::EAGAIN));
        assert!(stack.poll(sk).is_empty());
    }

    #[tokio::test]
    async fn closed_socket_polls_as_hangup() {
        let stack = stack();
        let sk = stack.open(SocketKind::DatagramSeq).unwrap();
        stack.close(sk);
        assert_eq!(stack.poll(sk), Readiness::HANGUP);
        assert_eq!(stack.socket_count(), 0);
    }
}
