//! The outgoing message bus and its long-poll protocol.
//!
//! The game process can't be dialed, so "push" is simulated: the server
//! queues messages here and the client collects them with a blocking read
//! that waits up to a bound. There is exactly one read operation,
//! **drain-or-wait**:
//!
//! ```text
//!                 ┌── queue non-empty ──→ return everything, clear queue
//! drain_or_wait ──┤
//!                 └── queue empty ──→ wait for the FIRST of:
//!                        push     → return everything queued at that moment
//!                        timeout  → return what is there (usually nothing)
//!                        close    → return what is there, immediately
//!                        newer poll on the same bus → return nothing
//! ```
//!
//! A message is handed to exactly one caller, and always in push order.
//!
//! # Cancellation
//!
//! Messages are only removed from the queue in the same critical section
//! that returns them, so dropping a pending `drain_or_wait` future (e.g. the
//! HTTP client hung up) never loses anything.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::{deadline_after, lock};

/// Returned by [`MessageBus::push`] once the bus has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("message bus is closed")]
pub struct BusClosed;

struct BusState {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
    /// Bumped by every `drain_or_wait`. A waiter whose generation is no
    /// longer current has been superseded by a newer poll.
    generation: u64,
}

/// A FIFO of opaque messages with a closed state and a long-poll read.
pub struct MessageBus {
    state: Mutex<BusState>,
    notify: Notify,
}

impl MessageBus {
    /// Creates an open, empty bus.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                queue: VecDeque::new(),
                closed: false,
                generation: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends `message` and wakes any waiting poll.
    ///
    /// # Errors
    /// Returns [`BusClosed`] if [`close`](Self::close) has been called.
    pub fn push(&self, message: Vec<u8>) -> Result<(), BusClosed> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(BusClosed);
            }
            state.queue.push_back(message);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Closes the bus. Further pushes fail; a waiting poll is released with
    /// whatever is still queued. Idempotent.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.notify.notify_waiters();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of messages waiting for the next poll.
    pub fn len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the queue, waiting up to `max_wait` for something to arrive if
    /// it is empty. See the module docs for the exact wake-up rules.
    pub async fn drain_or_wait(&self, max_wait: Duration) -> Vec<Vec<u8>> {
        let deadline = deadline_after(Instant::now(), max_wait);
        let generation = {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.generation
        };
        // Release any older poll still parked on this bus.
        self.notify.notify_waiters();

        let sleep = time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            // Register interest BEFORE looking at the queue, otherwise a
            // push between the check and the await would be missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                if state.generation != generation {
                    return Vec::new();
                }
                if !state.queue.is_empty() || state.closed {
                    return state.queue.drain(..).collect();
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = &mut sleep => {
                    let mut state = lock(&self.state);
                    if state.generation != generation {
                        return Vec::new();
                    }
                    return state.queue.drain(..).collect();
                }
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MessageBus")
            .field("queued", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

// =========================================================================
// Tests
// =========================================================================
