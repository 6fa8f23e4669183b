//! In-process channel pair.
//!
//! Both ends share one queue pair behind a mutex. Readers park either on a
//! condition variable (threads) or by registering a waker (tasks); every write
//! and close wakes both kinds.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use fathom_wire::{Limits, MessageBuf};
use parking_lot::{Condvar, Mutex};

use crate::{ReadOutcome, Transport, TransportError};

#[derive(Debug, Default)]
struct Inbox {
    queue: VecDeque<MessageBuf>,
    wakers: Vec<Waker>,
}

impl Inbox {
    fn wake(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }
}

#[derive(Debug, Default)]
struct PairState {
    inboxes: [Inbox; 2],
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PairState>,
    readable: Condvar,
    limits: Limits,
}

/// One end of an in-process channel.
///
/// Dropping either end closes the pair. Messages already queued for the
/// surviving end stay readable; messages queued for the closed end are dropped
/// and their handles closed.
#[derive(Debug)]
pub struct Channel {
    shared: Arc<Shared>,
    side: usize,
}

impl Channel {
    pub fn create() -> (Channel, Channel) {
        Self::create_with_limits(Limits::default())
    }

    /// Create a pair that refuses messages beyond `limits`.
    pub fn create_with_limits(limits: Limits) -> (Channel, Channel) {
        let shared = Arc::new(Shared {
            state: Mutex::new(PairState::default()),
            readable: Condvar::new(),
            limits,
        });
        (
            Channel {
                shared: shared.clone(),
                side: 0,
            },
            Channel { shared, side: 1 },
        )
    }

    fn peer(&self) -> usize {
        1 - self.side
    }
}

impl Transport for Channel {
    fn write(&self, msg: MessageBuf) -> Result<(), TransportError> {
        let limits = self.shared.limits;
        if msg.len() > limits.max_message_bytes {
            return Err(TransportError::MessageTooLarge {
                size: msg.len(),
                max: limits.max_message_bytes,
            });
        }
        if msg.handles.len() > limits.max_message_handles {
            return Err(TransportError::TooManyHandles {
                count: msg.handles.len(),
                max: limits.max_message_handles,
            });
        }
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(TransportError::PeerClosed);
        }
        let inbox = &mut state.inboxes[self.peer()];
        inbox.queue.push_back(msg);
        inbox.wake();
        self.shared.readable.notify_all();
        Ok(())
    }

    fn try_read(&self) -> Result<ReadOutcome, TransportError> {
        let mut state = self.shared.state.lock();
        let closed = state.closed;
        Ok(match state.inboxes[self.side].queue.pop_front() {
            Some(msg) => ReadOutcome::Ready(msg),
            None if closed => ReadOutcome::Closed,
            None => ReadOutcome::Pending,
        })
    }

    fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.shared.state.lock();
        let closed = state.closed;
        let inbox = &mut state.inboxes[self.side];
        if closed || !inbox.queue.is_empty() {
            return Poll::Ready(());
        }
        if !inbox.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inbox.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }

    fn wait_readable(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.shared.state.lock();
        loop {
            if state.closed || !state.inboxes[self.side].queue.is_empty() {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    let result = self.shared.readable.wait_until(&mut state, deadline);
                    if result.timed_out() {
                        return state.closed || !state.inboxes[self.side].queue.is_empty();
                    }
                }
                None => self.shared.readable.wait(&mut state),
            }
        }
    }

    fn close(&self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            if !state.closed {
                tracing::trace!(side = self.side, "closing in-process channel");
            }
            state.closed = true;
            for inbox in &mut state.inboxes {
                inbox.wake();
            }
            std::mem::take(&mut state.inboxes[self.side].queue)
        };
        self.shared.readable.notify_all();
        // Queued handles close here, outside the lock.
        drop(dropped);
    }

    fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}
