use super::rpc::BridgeReply;
use super::BridgeError;
use crate::shared::ids::ChannelId;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

pub type Invocation = Box<dyn FnOnce() -> Result<BridgeReply, BridgeError> + Send + 'static>;

struct QueuedJob {
    invocation: Invocation,
    reply: Sender<Result<BridgeReply, BridgeError>>,
}

#[derive(Default)]
struct ChannelState {
    jobs: VecDeque<QueuedJob>,
    in_flight: bool,
}

/// FIFO queue for one execution channel. Invocations run strictly one at a
/// time in enqueue order; a failed invocation does not stop the drain.
#[derive(Clone, Default)]
pub struct ChannelQueue {
    state: Arc<Mutex<ChannelState>>,
    occupant: Arc<Mutex<Option<String>>>,
}

impl ChannelQueue {
    /// Label of whatever currently occupies the execution context (for the
    /// container's benefit; the queue itself never reads it).
    pub fn set_occupant(&self, occupant: Option<String>) {
        if let Ok(mut current) = self.occupant.lock() {
            *current = occupant;
        }
    }

    pub fn occupant(&self) -> Option<String> {
        self.occupant.lock().ok().and_then(|current| current.clone())
    }

    pub fn enqueue(&self, invocation: Invocation) -> Receiver<Result<BridgeReply, BridgeError>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let start_drain = match self.state.lock() {
            Ok(mut state) => {
                state.jobs.push_back(QueuedJob {
                    invocation,
                    reply: reply_tx,
                });
                !state.in_flight
            }
            Err(_) => {
                let _ = reply_tx.send(Err(BridgeError::Cancelled));
                false
            }
        };

        if start_drain {
            let state = Arc::clone(&self.state);
            thread::spawn(move || drain(&state));
        }
        reply_rx
    }

    /// Pending plus in-flight, the number an operator sees as "queued".
    pub fn depth(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.jobs.len() + usize::from(state.in_flight),
            Err(_) => 0,
        }
    }

    /// Cancels all pending invocations; an in-flight invocation is left to
    /// settle on its own. Returns how many were dropped.
    pub fn reset(&self) -> usize {
        let cancelled: Vec<QueuedJob> = match self.state.lock() {
            Ok(mut state) => state.jobs.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let count = cancelled.len();
        for job in cancelled {
            let _ = job.reply.send(Err(BridgeError::Cancelled));
        }
        count
    }
}

fn drain(state: &Arc<Mutex<ChannelState>>) {
    loop {
        let job = {
            let Ok(mut guard) = state.lock() else {
                return;
            };
            if guard.in_flight {
                // Another drain thread already owns the channel.
                return;
            }
            match guard.jobs.pop_front() {
                Some(job) => {
                    guard.in_flight = true;
                    job
                }
                None => return,
            }
        };

        let outcome = (job.invocation)();
        let _ = job.reply.send(outcome);

        if let Ok(mut guard) = state.lock() {
            guard.in_flight = false;
        }
    }
}

/// The set of known execution channels. Enqueuing on a channel that was never
/// registered fails immediately rather than queueing into the void.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<ChannelId, ChannelQueue>>,
}

impl ChannelRegistry {
    pub fn register(&self, id: ChannelId) -> ChannelQueue {
        let queue = ChannelQueue::default();
        if let Ok(mut channels) = self.channels.lock() {
            channels.insert(id, queue.clone());
        }
        queue
    }

    pub fn get(&self, id: &str) -> Option<ChannelQueue> {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(id).cloned())
    }

    pub fn enqueue(
        &self,
        id: &str,
        invocation: Invocation,
    ) -> Result<Receiver<Result<BridgeReply, BridgeError>>, BridgeError> {
        match self.get(id) {
            Some(queue) => Ok(queue.enqueue(invocation)),
            None => Err(BridgeError::UnknownChannel(id.to_string())),
        }
    }

    pub fn depth(&self, id: &str) -> Option<usize> {
        self.get(id).map(|queue| queue.depth())
    }

    pub fn reset(&self, id: &str) -> Option<usize> {
        self.get(id).map(|queue| queue.reset())
    }
}
