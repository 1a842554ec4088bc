//! In-memory model of the local stack, the emulated peer and the management
//! interface.
//!
//! All three collaborator traits are implemented by one [`SimulatedStack`]
//! over a shared [`World`]. Every call takes the world lock, applies its
//! effect synchronously and wakes readiness waiters; anything that happens
//! "later" on a real controller (connection progress, send timeouts, links
//! the peer opens) runs as a task on the tokio runtime, never inside the
//! calling API.

mod control;
mod events;
mod local;
mod peer;
mod signaling;
mod socket;
mod world;

use async_trait::async_trait;
use l2cap_core::{BdAddr, CaseError, SimulatorConfig, Transport};
use l2cap_tester::{Collaborators, Environment};
use l2cap_transport::SocketId;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use world::World;

/// Address of the local controller.
pub const CENTRAL_ADDRESS: BdAddr = BdAddr([0x00, 0xAA, 0x01, 0x00, 0x00, 0x00]);

/// Address of the emulated peer.
pub const PEER_ADDRESS: BdAddr = BdAddr([0x00, 0xAA, 0x01, 0x01, 0x00, 0x00]);

/// The only controller index the management interface reports.
pub const CONTROLLER_INDEX: u16 = 0;

pub(crate) struct Shared {
    world: Mutex<World>,
    changed: Notify,
}

impl Shared {
    /// Run `f` on the world and wake everything waiting for readiness.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        let result = f(&mut self.world.lock());
        self.changed.notify_waiters();
        result
    }

    /// Run `f` on the world without waking anyone.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&World) -> R) -> R {
        f(&self.world.lock())
    }
}

/// One controller pair: the local stack under test and the emulated peer.
#[derive(Clone)]
pub struct SimulatedStack {
    shared: Arc<Shared>,
}

impl SimulatedStack {
    pub fn new(transport: Transport, config: SimulatorConfig) -> Self {
        debug!(?transport, ?config, "simulated controllers created");
        Self {
            shared: Arc::new(Shared {
                world: Mutex::new(World::new(transport, config)),
                changed: Notify::new(),
            }),
        }
    }

    /// Number of open local sockets, children awaiting `accept` included.
    pub fn socket_count(&self) -> usize {
        self.shared.inspect(World::socket_count)
    }

    /// Number of links between the two controllers.
    pub fn link_count(&self) -> usize {
        self.shared.inspect(World::link_count)
    }

    fn spawn<F>(&self, task: impl FnOnce(Arc<Shared>) -> F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(task(Arc::clone(&self.shared)));
    }

    /// Advance a pending connect on the runtime.
    fn progress_connect(&self, sk: SocketId) {
        self.spawn(|shared| async move {
            shared.update(|world| world.progress_connect(sk));
        });
    }

    /// Fail a pending connect with `ETIMEDOUT` once `timeout` elapsed.
    fn arm_send_timeout(&self, sk: SocketId, timeout: Duration) {
        self.spawn(|shared| async move {
            tokio::time::sleep(timeout).await;
            shared.update(|world| world.expire_connect(sk));
        });
    }
}

/// Hands every case a freshly built [`SimulatedStack`].
#[derive(Debug, Clone, Default)]
pub struct SimulatedEnvironment {
    config: SimulatorConfig,
}

impl SimulatedEnvironment {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SimulatorConfig {
        self.config
    }
}

#[async_trait]
impl Environment for SimulatedEnvironment {
    async fn bring_up(&self, transport: Transport) -> Result<Collaborators, CaseError> {
        let stack = Arc::new(SimulatedStack::new(transport, self.config));
        Ok(Collaborators {
            sockets: stack.clone(),
            peer: stack.clone(),
            control: stack,
        })
    }
}
