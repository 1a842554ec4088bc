#![forbid(unsafe_code)]

//! One-shot readiness watches.
//!
//! A watch resolves once, the first time the socket shows any of the
//! requested conditions. Watches can be cancelled one by one, per socket or
//! all at once; a cancelled watch never fires, and dropping the set drops
//! every pending watch with it.

use futures::future::{abortable, AbortHandle, Aborted, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::socket::{Readiness, SocketId, SocketLayer};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WatchId(u64);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Fired {
    pub id: WatchId,
    pub socket: SocketId,
    pub readiness: Readiness,
}

type Pending = BoxFuture<'static, Result<Fired, Aborted>>;

pub struct WatchSet {
    layer: Arc<dyn SocketLayer>,
    next_id: u64,
    pending: FuturesUnordered<Pending>,
    handles: HashMap<WatchId, (SocketId, AbortHandle)>,
}

impl WatchSet {
    pub fn new(layer: Arc<dyn SocketLayer>) -> Self {
        Self { layer, next_id: 0, pending: FuturesUnordered::new(), handles: HashMap::new() }
    }

    pub fn add(&mut self, socket: SocketId, interest: Readiness) -> WatchId {
        let id = WatchId(self.next_id);
        self.next_id += 1;
        let layer = Arc::clone(&self.layer);
        let (watch, handle) = abortable(async move {
            let readiness = layer.readiness(socket, interest).await;
            Fired { id, socket, readiness }
        });
        self.pending.push(Box::pin(watch));
        self.handles.insert(id, (socket, handle));
        trace!(?id, %socket, ?interest, "watch added");
        id
    }

    pub fn cancel(&mut self, id: WatchId) -> bool {
        match self.handles.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every watch on `socket`. Returns how many were pending.
    pub fn cancel_socket(&mut self, socket: SocketId) -> usize {
        let ids: Vec<WatchId> =
            self.handles.iter().filter(|(_, (sk, _))| *sk == socket).map(|(id, _)| *id).collect();
        for id in &ids {
            self.cancel(*id);
        }
        ids.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.handles.len();
        for (_, (_, handle)) in self.handles.drain() {
            handle.abort();
        }
        self.pending = FuturesUnordered::new();
        count
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Next watch to fire. `None` when nothing is being watched.
    pub async fn next(&mut self) -> Option<Fired> {
        loop {
            match self.pending.next().await? {
                Ok(fired) if self.handles.remove(&fired.id).is_some() => return Some(fired),
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use l2cap_core::{Errno, SocketKind};
    use l2cap_stream::TxTimestamp;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    use crate::socket::{
        ChannelOptions, OptionName, Received, Shutdown, SockAddr, SocketOption, TsInfo,
    };

    /// Readiness is whatever the test stores for each socket.
    #[derive(Default)]
    struct Flags {
        state: Mutex<HashMap<SocketId, Readiness>>,
        changed: Notify,
    }

    impl Flags {
        fn set(&self, sk: SocketId, r: Readiness) {
            self.state.lock().insert(sk, r);
            self.changed.notify_waiters();
        }
    }

    #[async_trait]
    impl SocketLayer for Flags {
        fn open(&self, _: SocketKind) -> Result<SocketId, Errno> { Err(Errno::ENOSYS) }
        fn bind(&self, _: SocketId, _: SockAddr) -> Result<(), Errno> { Err(Errno::ENOSYS) }
        fn set_option(&self, _: SocketId, _: SocketOption) -> Result<(), Errno> {
            Err(Errno::ENOSYS)
        }
        fn get_option(&self, _: SocketId, _: OptionName) -> Result<u32, Errno> {
            Err(Errno::ENOSYS)
        }
        fn channel_options(&self, _: SocketId) -> Result<ChannelOptions, Errno> {
            Err(Errno::ENOSYS)
        }
        fn connect(&self, _: SocketId, _: SockAddr) -> Result<(), Errno> { Err(Errno::ENOSYS) }
        fn listen(&self, _: SocketId, _: u32) -> Result<(), Errno> { Err(Errno::ENOSYS) }
        fn accept(&self, _: SocketId) -> Result<SocketId, Errno> { Err(Errno::ENOSYS) }
        fn send(&self, _: SocketId, _: &[u8]) -> Result<usize, Errno> { Err(Errno::ENOSYS) }
        fn recv(&self, _: SocketId, _: &mut [u8]) -> Result<Received, Errno> { Err(Errno::ENOSYS) }
        fn recv_error_queue(&self, _: SocketId) -> Result<TxTimestamp, Errno> { Err(Errno::EAGAIN) }
        fn take_error(&self, _: SocketId) -> Result<Option<Errno>, Errno> { Ok(None) }
        fn peer_name(&self, _: SocketId) -> Result<SockAddr, Errno> { Err(Errno::ENOTCONN) }
        fn shutdown(&self, _: SocketId, _: Shutdown) -> Result<(), Errno> { Ok(()) }
        fn close(&self, _: SocketId) {}
        fn poll(&self, sk: SocketId) -> Readiness {
            self.state.lock().get(&sk).copied().unwrap_or(Readiness::empty())
        }
        async fn readiness(&self, sk: SocketId, interest: Readiness) -> Readiness {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                let now = self.poll(sk);
                if now.intersects(interest) {
                    return now;
                }
                notified.await;
            }
        }
        fn ts_info(&self) -> Result<TsInfo, Errno> { Err(Errno::EOPNOTSUPP) }
    }

    #[tokio::test]
    async fn fires_once_when_interest_matches() {
        let flags = Arc::new(Flags::default());
        let mut set = WatchSet::new(flags.clone());
        let sk = SocketId(1);
        let id = set.add(sk, Readiness::WRITABLE);
        flags.set(sk, Readiness::READABLE);
        flags.set(sk, Readiness::WRITABLE);
        let fired = set.next().await.unwrap();
        assert_eq!(fired.id, id);
        assert!(fired.readiness.contains(Readiness::WRITABLE));
        assert!(set.is_empty());
        assert!(set.next().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_watch_never_fires() {
        let flags = Arc::new(Flags::default());
        let mut set = WatchSet::new(flags.clone());
        let a = SocketId(1);
        let b = SocketId(2);
        set.add(a, Readiness::HANGUP);
        let kept = set.add(b, Readiness::HANGUP);
        assert_eq!(set.cancel_socket(a), 1);
        flags.set(a, Readiness::HANGUP);
        flags.set(b, Readiness::HANGUP);
        let fired = set.next().await.unwrap();
        assert_eq!(fired.id, kept);
        assert!(set.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_all_empties_the_set() {
        let flags = Arc::new(Flags::default());
        let mut set = WatchSet::new(flags.clone());
        set.add(SocketId(1), Readiness::READABLE);
        set.add(SocketId(2), Readiness::ERROR);
        assert_eq!(set.cancel_all(), 2);
        flags.set(SocketId(1), Readiness::READABLE);
        assert!(set.next().await.is_none());
    }
}
