#![forbid(unsafe_code)]

//! Connection driver: opens channel sockets, drives connect and accept
//! (including the deferred-setup handshake) and classifies how a connection
//! attempt or a channel ended by reading the latched socket error.

use l2cap_core::signal::SDU_LEN_SIZE;
use l2cap_core::{
    BdAddr, CaseError, ChannelMode, ConnectionParameters, Errno, TimestampFlags, Transport,
};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::socket::{
    ChannelOptions, OptionName, Readiness, SockAddr, SocketId, SocketLayer, SocketOption,
};

/// Listen backlog used for server sockets.
pub const LISTEN_BACKLOG: u32 = 5;

/// What error, if any, a scenario expects a channel to end with.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct ErrorExpectation {
    pub code: Option<Errno>,
    /// The channel is expected to expire; whatever it reports is accepted.
    pub timeout_only: bool,
}

impl ErrorExpectation {
    pub fn from_params(params: &ConnectionParameters) -> Self {
        Self { code: params.expect_error_code, timeout_only: params.timeout.is_some() }
    }

    pub fn check(&self, observed: Option<Errno>) -> Result<(), CaseError> {
        if self.timeout_only {
            return Ok(());
        }
        match (self.code, observed) {
            (None, None) => Ok(()),
            (Some(expected), Some(got)) if expected == got => Ok(()),
            (expected, got) => Err(CaseError::failed(format!(
                "unexpected error: got {}, expected {}",
                describe(got),
                describe(expected)
            ))),
        }
    }
}

fn describe(errno: Option<Errno>) -> String {
    match errno {
        Some(e) => format!("{} ({})", e.desc(), e as i32),
        None => "no error".to_string(),
    }
}

/// State of a connection attempt after its completion event.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectProgress {
    /// The channel is up; the scenario continues with it.
    Established,
    /// The attempt failed exactly as expected.
    Concluded,
}

pub struct ConnectionDriver {
    layer: Arc<dyn SocketLayer>,
    transport: Transport,
    local: BdAddr,
}

impl ConnectionDriver {
    pub fn new(layer: Arc<dyn SocketLayer>, transport: Transport, local: BdAddr) -> Self {
        Self { layer, transport, local }
    }

    pub fn layer(&self) -> &Arc<dyn SocketLayer> {
        &self.layer
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Open a channel socket bound to the local controller with the case's
    /// security level and channel mode. A missing capability aborts the case.
    pub fn open_channel(
        &self,
        params: &ConnectionParameters,
        psm: u16,
    ) -> Result<SocketId, CaseError> {
        let sk = self
            .layer
            .open(params.socket_kind)
            .map_err(|e| CaseError::from_errno("socket", e))?;
        if let Err(err) = self.configure(sk, params, psm) {
            self.layer.close(sk);
            return Err(err);
        }
        debug!(%sk, psm, cid = ?params.channel_id, "channel socket open");
        Ok(sk)
    }

    fn configure(
        &self,
        sk: SocketId,
        params: &ConnectionParameters,
        psm: u16,
    ) -> Result<(), CaseError> {
        let addr = SockAddr {
            bdaddr: self.local,
            addr_type: params.address_type_for(self.transport),
            psm,
            cid: params.channel_id.unwrap_or(0),
        };
        self.layer.bind(sk, addr).map_err(|e| CaseError::from_errno("bind", e))?;
        if let Some(level) = params.security_level {
            self.layer
                .set_option(sk, SocketOption::Security(level))
                .map_err(|e| CaseError::from_errno("setsockopt(BT_SECURITY)", e))?;
        }
        if params.mode != ChannelMode::Basic {
            self.layer
                .set_option(sk, SocketOption::Mode(params.mode))
                .map_err(|e| CaseError::from_errno("setsockopt(BT_MODE)", e))?;
        }
        Ok(())
    }

    pub fn set_deferred(&self, sk: SocketId) -> Result<(), CaseError> {
        self.layer
            .set_option(sk, SocketOption::DeferSetup(true))
            .map_err(|e| CaseError::from_errno("setsockopt(BT_DEFER_SETUP)", e))
    }

    /// Start a non-blocking connect. `Ok` means the attempt is pending or
    /// already done; completion is signalled by write readiness.
    pub fn connect(&self, sk: SocketId, addr: SockAddr) -> Result<(), Errno> {
        match self.layer.connect(sk, addr) {
            Ok(()) | Err(Errno::EINPROGRESS) | Err(Errno::EAGAIN) => {
                debug!(%sk, peer = %addr.bdaddr, psm = addr.psm, cid = addr.cid, "connect pending");
                Ok(())
            }
            Err(err) => {
                warn!(%sk, %err, "connect failed immediately");
                Err(err)
            }
        }
    }

    /// Classify a connection attempt once its socket turned writable. The
    /// readiness event itself says nothing; the latched error decides.
    pub fn complete_connect(
        &self,
        sk: SocketId,
        expect: &ErrorExpectation,
    ) -> Result<ConnectProgress, CaseError> {
        let observed = self
            .layer
            .take_error(sk)
            .map_err(|e| CaseError::from_errno("getsockopt(SO_ERROR)", e))?;
        debug!(%sk, error = ?observed, expected = ?expect.code, "connect completed");
        match observed {
            Some(_) => {
                expect.check(observed)?;
                Ok(ConnectProgress::Concluded)
            }
            None if expect.code.is_some() => {
                expect.check(None)?;
                Ok(ConnectProgress::Concluded)
            }
            None => Ok(ConnectProgress::Established),
        }
    }

    /// Classify a hang-up. Only an expected error (or none, when none was
    /// declared) counts as a clean close.
    pub fn classify_hangup(
        &self,
        sk: SocketId,
        expect: &ErrorExpectation,
    ) -> Result<(), CaseError> {
        let observed = self
            .layer
            .take_error(sk)
            .map_err(|e| CaseError::from_errno("getsockopt(SO_ERROR)", e))?;
        debug!(%sk, error = ?observed, timeout_only = expect.timeout_only, "hang-up");
        expect.check(observed)
    }

    pub fn listen(&self, sk: SocketId, deferred: bool) -> Result<(), CaseError> {
        if deferred {
            self.set_deferred(sk)?;
        }
        self.layer
            .listen(sk, LISTEN_BACKLOG)
            .map_err(|e| CaseError::from_errno("listen", e))
    }

    pub fn accept(&self, listener: SocketId) -> Result<SocketId, CaseError> {
        let sk = self.layer.accept(listener).map_err(|e| CaseError::from_errno("accept", e))?;
        debug!(%listener, %sk, "accepted");
        Ok(sk)
    }

    /// Second half of deferred acceptance. Returns `true` when the channel
    /// was still held and has now been authorised, so the caller must wait
    /// for write readiness before using it.
    pub fn authorize_deferred(&self, sk: SocketId) -> Result<bool, CaseError> {
        if self.layer.poll(sk).contains(Readiness::WRITABLE) {
            return Ok(false);
        }
        let mut byte = [0u8; 1];
        match self.layer.recv(sk, &mut byte) {
            Ok(_) => {
                debug!(%sk, "deferred channel authorised");
                Ok(true)
            }
            Err(e) => Err(CaseError::from_errno("authorising read", e)),
        }
    }

    /// MTUs usable for payload on `sk`. LE credit based channels report SDU
    /// sizes including the length field, which is not payload.
    pub fn check_mtu(
        &self,
        sk: SocketId,
        params: &ConnectionParameters,
    ) -> Result<ChannelOptions, CaseError> {
        let credit_based = self.transport.is_le()
            && (params.client_service_id.is_some() || params.server_service_id.is_some());
        let options = if credit_based {
            let imtu = self
                .layer
                .get_option(sk, OptionName::ReceiveMtu)
                .map_err(|e| CaseError::from_errno("getsockopt(BT_RCVMTU)", e))?;
            let omtu = self
                .layer
                .get_option(sk, OptionName::SendMtu)
                .map_err(|e| CaseError::from_errno("getsockopt(BT_SNDMTU)", e))?;
            ChannelOptions {
                imtu: clamp_mtu(imtu).saturating_sub(SDU_LEN_SIZE as u16),
                omtu: clamp_mtu(omtu).saturating_sub(SDU_LEN_SIZE as u16),
            }
        } else {
            self.layer
                .channel_options(sk)
                .map_err(|e| CaseError::from_errno("getsockopt(L2CAP_OPTIONS)", e))?
        };
        debug!(%sk, imtu = options.imtu, omtu = options.omtu, "channel MTUs");
        if options.imtu == 0 || options.omtu == 0 {
            return Err(CaseError::failed(format!("unusable MTU {options:?}")));
        }
        Ok(options)
    }

    pub fn enable_timestamping(
        &self,
        sk: SocketId,
        flags: TimestampFlags,
    ) -> Result<(), CaseError> {
        self.layer
            .set_option(sk, SocketOption::Timestamping(flags))
            .map_err(|e| CaseError::from_errno("setsockopt(SO_TIMESTAMPING)", e))
    }

    /// Grow the send buffer by `extra` bytes; returns the new size.
    pub fn grow_send_buffer(&self, sk: SocketId, extra: usize) -> Result<usize, CaseError> {
        let current = self
            .layer
            .get_option(sk, OptionName::SendBuffer)
            .map_err(|e| CaseError::from_errno("getsockopt(SO_SNDBUF)", e))?;
        let size = current as usize + extra;
        self.layer
            .set_option(sk, SocketOption::SendBuffer(size))
            .map_err(|e| CaseError::from_errno("setsockopt(SO_SNDBUF)", e))?;
        Ok(size)
    }

    /// Write `data` in chunks of at most `mtu` bytes. Each chunk is offered
    /// again until the socket took all of it; `on_send` sees the size of every
    /// accepted write. Any error other than an interrupted call is fatal.
    pub fn write_all(
        &self,
        sk: SocketId,
        data: &[u8],
        mtu: u16,
        mut on_send: impl FnMut(usize),
    ) -> Result<usize, CaseError> {
        let chunks = l2cap_stream::fragments(data, usize::from(mtu))
            .map_err(|e| CaseError::failed(e.to_string()))?;
        let mut total = 0;
        for chunk in chunks {
            let mut offset = 0;
            while offset < chunk.len() {
                match self.layer.send(sk, &chunk[offset..]) {
                    Ok(0) => return Err(CaseError::failed("send accepted no data")),
                    Ok(n) => {
                        trace!(%sk, n, "sent");
                        on_send(n);
                        offset += n;
                    }
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(CaseError::from_errno("send", e)),
                }
            }
            total += chunk.len();
        }
        Ok(total)
    }
}

fn clamp_mtu(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use l2cap_core::{SecurityLevel, SocketKind};
    use l2cap_stream::TxTimestamp;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    use crate::socket::{Received, Shutdown, TsInfo};

    /// Scripted socket layer recording what the driver does.
    #[derive(Default)]
    struct Script {
        calls: Mutex<Vec<String>>,
        send_sizes: Mutex<VecDeque<Result<usize, Errno>>>,
        latched: Mutex<Option<Errno>>,
        option_error: Mutex<Option<Errno>>,
        readiness: Mutex<Readiness>,
        mtus: Mutex<(u32, u32)>,
    }

    impl Script {
        fn log(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }
    }

    #[async_trait]
    impl SocketLayer for Script {
        fn open(&self, _: SocketKind) -> Result<SocketId, Errno> {
            self.log("open");
            Ok(SocketId(7))
        }
        fn bind(&self, _: SocketId, addr: SockAddr) -> Result<(), Errno> {
            self.log(format!("bind psm={:#06x}", addr.psm));
            Ok(())
        }
        fn set_option(&self, _: SocketId, option: SocketOption) -> Result<(), Errno> {
            self.log(format!("set {option:?}"));
            match *self.option_error.lock() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        fn get_option(&self, _: SocketId, name: OptionName) -> Result<u32, Errno> {
            let (rcv, snd) = *self.mtus.lock();
            Ok(match name {
                OptionName::ReceiveMtu => rcv,
                OptionName::SendMtu => snd,
                OptionName::SendBuffer => 4096,
            })
        }
        fn channel_options(&self, _: SocketId) -> Result<ChannelOptions, Errno> {
            Ok(ChannelOptions { imtu: 672, omtu: 672 })
        }
        fn connect(&self, _: SocketId, _: SockAddr) -> Result<(), Errno> {
            Err(Errno::EINPROGRESS)
        }
        fn listen(&self, _: SocketId, backlog: u32) -> Result<(), Errno> {
            self.log(format!("listen {backlog}"));
            Ok(())
        }
        fn accept(&self, _: SocketId) -> Result<SocketId, Errno> {
            Ok(SocketId(8))
        }
        fn send(&self, _: SocketId, data: &[u8]) -> Result<usize, Errno> {
            self.log(format!("send {}", data.len()));
            self.send_sizes.lock().pop_front().unwrap_or(Ok(data.len())).map(|n| n.min(data.len()))
        }
        fn recv(&self, _: SocketId, buf: &mut [u8]) -> Result<Received, Errno> {
            self.log(format!("recv {}", buf.len()));
            Ok(Received { len: 0, timestamp: None })
        }
        fn recv_error_queue(&self, _: SocketId) -> Result<TxTimestamp, Errno> {
            Err(Errno::EAGAIN)
        }
        fn take_error(&self, _: SocketId) -> Result<Option<Errno>, Errno> {
            Ok(self.latched.lock().take())
        }
        fn peer_name(&self, _: SocketId) -> Result<SockAddr, Errno> {
            Err(Errno::ENOTCONN)
        }
        fn shutdown(&self, _: SocketId, _: Shutdown) -> Result<(), Errno> {
            Ok(())
        }
        fn close(&self, _: SocketId) {
            self.log("close");
        }
        fn poll(&self, _: SocketId) -> Readiness {
            *self.readiness.lock()
        }
        async fn readiness(&self, _: SocketId, _: Readiness) -> Readiness {
            futures::future::pending().await
        }
        fn ts_info(&self) -> Result<TsInfo, Errno> {
            Err(Errno::EOPNOTSUPP)
        }
    }

    fn driver(script: &Arc<Script>, transport: Transport) -> ConnectionDriver {
        ConnectionDriver::new(script.clone(), transport, BdAddr([1, 0, 0, 0, 0, 0]))
    }

    #[test]
    fn unsupported_option_aborts_and_closes() {
        let script = Arc::new(Script::default());
        *script.option_error.lock() = Some(Errno::ENOPROTOOPT);
        let params = ConnectionParameters {
            security_level: Some(SecurityLevel::Medium),
            ..Default::default()
        };
        let err = driver(&script, Transport::BrEdr).open_channel(&params, 0).unwrap_err();
        assert!(matches!(err, CaseError::Aborted(_)));
        assert_eq!(script.calls.lock().last().map(String::as_str), Some("close"));
    }

    #[test]
    fn in_progress_connect_is_pending() {
        let script = Arc::new(Script::default());
        let addr = SockAddr {
            bdaddr: BdAddr::ANY,
            addr_type: l2cap_core::AddressType::BrEdr,
            psm: 0x1001,
            cid: 0,
        };
        assert_eq!(driver(&script, Transport::BrEdr).connect(SocketId(7), addr), Ok(()));
    }

    #[test]
    fn expected_refusal_concludes() {
        let script = Arc::new(Script::default());
        *script.latched.lock() = Some(Errno::ECONNREFUSED);
        let expect = ErrorExpectation { code: Some(Errno::ECONNREFUSED), timeout_only: false };
        assert_eq!(
            driver(&script, Transport::BrEdr).complete_connect(SocketId(7), &expect),
            Ok(ConnectProgress::Concluded)
        );
    }

    #[test]
    fn unexpected_error_fails() {
        let script = Arc::new(Script::default());
        *script.latched.lock() = Some(Errno::EACCES);
        let expect = ErrorExpectation::default();
        assert!(driver(&script, Transport::BrEdr).complete_connect(SocketId(7), &expect).is_err());
    }

    #[test]
    fn success_when_an_error_was_expected_fails() {
        let script = Arc::new(Script::default());
        let expect = ErrorExpectation { code: Some(Errno::ECONNREFUSED), timeout_only: false };
        assert!(driver(&script, Transport::BrEdr).complete_connect(SocketId(7), &expect).is_err());
    }

    #[test]
    fn timeout_only_suppresses_the_error_check() {
        let script = Arc::new(Script::default());
        *script.latched.lock() = Some(Errno::ETIMEDOUT);
        let expect = ErrorExpectation { code: None, timeout_only: true };
        assert!(driver(&script, Transport::BrEdr).classify_hangup(SocketId(7), &expect).is_ok());
    }

    #[test]
    fn partial_writes_are_retried() {
        let script = Arc::new(Script::default());
        script.send_sizes.lock().extend([Ok(3), Err(Errno::EINTR), Ok(5), Ok(4)]);
        let mut sizes = Vec::new();
        let data = [0u8; 12];
        let total = driver(&script, Transport::BrEdr)
            .write_all(SocketId(7), &data, 8, |n| sizes.push(n))
            .unwrap();
        assert_eq!(total, 12);
        assert_eq!(sizes, vec![3, 5, 4]);
    }

    #[test]
    fn would_block_is_a_hard_error() {
        let script = Arc::new(Script::default());
        script.send_sizes.lock().push_back(Err(Errno::EAGAIN));
        let result = driver(&script, Transport::BrEdr).write_all(SocketId(7), &[1, 2], 8, |_| {});
        assert!(matches!(result, Err(CaseError::Failed(_))));
    }

    #[test]
    fn deferred_socket_gets_one_byte_read() {
        let script = Arc::new(Script::default());
        let drv = driver(&script, Transport::Le);
        assert_eq!(drv.authorize_deferred(SocketId(8)), Ok(true));
        assert!(script.calls.lock().contains(&"recv 1".to_string()));

        *script.readiness.lock() = Readiness::WRITABLE;
        script.calls.lock().clear();
        assert_eq!(drv.authorize_deferred(SocketId(8)), Ok(false));
        assert!(script.calls.lock().is_empty());
    }

    #[test]
    fn le_credit_channels_subtract_sdu_header() {
        let script = Arc::new(Script::default());
        *script.mtus.lock() = (672, 672);
        let params = ConnectionParameters { client_service_id: Some(0x80), ..Default::default() };
        let opts = driver(&script, Transport::Le).check_mtu(SocketId(7), &params).unwrap();
        assert_eq!(opts, ChannelOptions { imtu: 670, omtu: 670 });

        let fixed = ConnectionParameters { channel_id: Some(4), ..Default::default() };
        let opts = driver(&script, Transport::Le).check_mtu(SocketId(7), &fixed).unwrap();
        assert_eq!(opts, ChannelOptions { imtu: 672, omtu: 672 });
    }

    #[test]
    fn deferred_listen_sets_option_first() {
        let script = Arc::new(Script::default());
        driver(&script, Transport::Le).listen(SocketId(7), true).unwrap();
        let calls = script.calls.lock().clone();
        assert_eq!(calls, vec!["set DeferSetup(true)".to_string(), "listen 5".to_string()]);
    }
}
