use std::collections::VecDeque;

use tfs_common::{Command, CommandContext, Result};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::dispatcher::{Dispatcher, Ticket};

/// Lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Waiting for the first server list (and the application id); requests queue
    Bootstrapping,
    /// Requests go straight to the dispatcher. Terminal.
    Ready,
}

/// A request parked while the client bootstraps.
pub struct PendingRequest {
    command: Command,
    reply: oneshot::Sender<Result<Ticket>>,
}

enum GateState {
    Bootstrapping(VecDeque<PendingRequest>),
    Ready,
}

/// What [`ReadinessGate::admit`] did with a command.
pub enum Admission {
    /// The gate is open; dispatch the command now
    Open(Command),
    /// The command was queued; its ticket arrives when the gate opens
    Queued(oneshot::Receiver<Result<Ticket>>),
}

/// One-shot queue bridging the time before the server pool is usable.
///
/// Commands admitted while bootstrapping are held in FIFO order. Opening the
/// gate assigns each of them an agent, in order, and hands the resulting
/// [`Ticket`] back to the waiting caller, who performs the request itself.
/// The queue is drained under the gate lock, so a command admitted
/// concurrently with the drain is assigned after every queued one.
pub struct ReadinessGate {
    state: Mutex<GateState>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Bootstrapping(VecDeque::new())),
        }
    }

    pub async fn admit(&self, command: Command) -> Admission {
        let mut state = self.state.lock().await;
        match &mut *state {
            GateState::Ready => Admission::Open(command),
            GateState::Bootstrapping(queue) => {
                let (reply, rx) = oneshot::channel();
                debug!(kind = command.kind(), queued = queue.len() + 1, "Client not ready, queueing request");
                queue.push_back(PendingRequest { command, reply });
                Admission::Queued(rx)
            }
        }
    }

    /// Opens the gate and releases the queue.
    ///
    /// Every queued command is built with `ctx` and assigned through
    /// `dispatcher` exactly once, in submission order. Returns the number of
    /// released commands; opening an already open gate releases nothing.
    pub async fn open(&self, dispatcher: &Dispatcher, ctx: &CommandContext<'_>) -> usize {
        let mut state = self.state.lock().await;
        let queue = match std::mem::replace(&mut *state, GateState::Ready) {
            GateState::Bootstrapping(queue) => queue,
            GateState::Ready => return 0,
        };

        let mut released = 0;
        for pending in queue {
            if pending.reply.is_closed() {
                debug!(kind = pending.command.kind(), "Dropping queued request, caller went away");
                continue;
            }

            let ticket = match pending.command.build(ctx) {
                Ok(descriptor) => dispatcher.assign(descriptor).await,
                Err(e) => Err(e),
            };
            let _ = pending.reply.send(ticket);
            released += 1;
        }

        released
    }

    pub async fn state(&self) -> ClientState {
        match &*self.state.lock().await {
            GateState::Bootstrapping(_) => ClientState::Bootstrapping,
            GateState::Ready => ClientState::Ready,
        }
    }

    /// Number of commands waiting for the gate to open.
    pub async fn queued(&self) -> usize {
        match &*self.state.lock().await {
            GateState::Bootstrapping(queue) => queue.len(),
            GateState::Ready => 0,
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
