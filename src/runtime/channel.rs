//! # Typed Channels
//!
//! Buffered channels with fixed capacity ≥ 0, owned by a session-level
//! [`ChannelStore`] and referenced by cheap string handles. The channel kind
//! (SPSC/MPSC/MPMC/broadcast) is an informational tag; semantics are those
//! of a bounded FIFO:
//!
//! - `send` on a closed channel errors; with a waiting receiver it delivers
//!   directly (rendezvous); with buffer space it enqueues; otherwise the
//!   sender suspends until a receive moves its value into the buffer.
//! - `recv` on an empty open channel suspends; on a closed empty channel it
//!   errors; otherwise it dequeues the head and resumes one waiting sender.
//! - `close` rejects all waiting senders and receivers with a
//!   channel-closed error, then idempotently marks the channel closed.
//!
//! Buffer entries remember their sender's task id so the receive side can
//! establish a happens-before edge for the race detector.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::error::ErrorCode;
use crate::types::ChannelKind;
use crate::value::Value;

/// Result of a receive: the value (possibly an error value) and the sending
/// task when known.
#[derive(Debug, Clone)]
pub struct RecvOutcome {
    pub value: Value,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParkState {
    Waiting,
    Done,
    Closed,
}

/// Shared park slot for a suspended sender.
struct SendPark {
    state: Cell<ParkState>,
    waker: RefCell<Option<Waker>>,
}

impl SendPark {
    fn new() -> Rc<Self> {
        Rc::new(SendPark {
            state: Cell::new(ParkState::Waiting),
            waker: RefCell::new(None),
        })
    }

    fn finish(&self, state: ParkState) {
        self.state.set(state);
        if let Some(w) = self.waker.borrow_mut().take() {
            w.wake();
        }
    }
}

/// Shared park slot for a suspended receiver; the sender fills `outcome`.
struct RecvPark {
    outcome: RefCell<Option<RecvOutcome>>,
    waker: RefCell<Option<Waker>>,
}

impl RecvPark {
    fn new() -> Rc<Self> {
        Rc::new(RecvPark {
            outcome: RefCell::new(None),
            waker: RefCell::new(None),
        })
    }

    fn fill(&self, outcome: RecvOutcome) {
        *self.outcome.borrow_mut() = Some(outcome);
        if let Some(w) = self.waker.borrow_mut().take() {
            w.wake();
        }
    }
}

struct ParkedSender {
    value: Option<Value>,
    task: String,
    park: Rc<SendPark>,
}

struct ChannelState {
    kind: ChannelKind,
    capacity: usize,
    closed: bool,
    buffer: VecDeque<(Value, String)>,
    parked_senders: VecDeque<ParkedSender>,
    parked_receivers: VecDeque<Rc<RecvPark>>,
}

fn closed_error() -> Value {
    Value::error(ErrorCode::ChannelClosed, "channel is closed")
}

fn unknown_error(id: &str) -> Value {
    Value::error(ErrorCode::DomainError, format!("unknown channel {id}"))
}

/// Owns every channel in a session; handles are `chan-N` strings.
pub struct ChannelStore {
    channels: RefCell<HashMap<String, ChannelState>>,
    next_id: Cell<u64>,
}

impl ChannelStore {
    pub fn new() -> Rc<Self> {
        Rc::new(ChannelStore {
            channels: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
        })
    }

    /// Create a channel and return its handle value.
    pub fn create(&self, kind: ChannelKind, capacity: usize) -> Value {
        let n = self.next_id.get();
        self.next_id.set(n + 1);
        let id = format!("chan-{n}");
        self.channels.borrow_mut().insert(
            id.clone(),
            ChannelState {
                kind,
                capacity,
                closed: false,
                buffer: VecDeque::new(),
                parked_senders: VecDeque::new(),
                parked_receivers: VecDeque::new(),
            },
        );
        trace!(channel = %id, %kind, capacity, "channel created");
        Value::channel(id, kind, capacity)
    }

    /// Number of buffered values; `None` for unknown channels.
    pub fn buffered(&self, id: &str) -> Option<usize> {
        self.channels.borrow().get(id).map(|c| c.buffer.len())
    }

    pub fn is_closed(&self, id: &str) -> Option<bool> {
        self.channels.borrow().get(id).map(|c| c.closed)
    }

    /// Non-suspending send. `Ok(true)` on delivery/enqueue, `Ok(false)` when
    /// the channel is full, an error value when closed or unknown.
    pub fn try_send(&self, id: &str, value: Value, task: &str) -> Result<bool, Value> {
        let mut channels = self.channels.borrow_mut();
        let Some(ch) = channels.get_mut(id) else {
            return Err(unknown_error(id));
        };
        if ch.closed {
            return Err(closed_error());
        }
        if let Some(park) = ch.parked_receivers.pop_front() {
            park.fill(RecvOutcome {
                value,
                sender: Some(task.to_string()),
            });
            return Ok(true);
        }
        if ch.buffer.len() < ch.capacity {
            ch.buffer.push_back((value, task.to_string()));
            return Ok(true);
        }
        Ok(false)
    }

    /// Non-suspending receive. `Ok(Some)` with the head, `Ok(None)` when the
    /// channel is open and empty, an error value when closed-empty or
    /// unknown.
    pub fn try_recv(&self, id: &str) -> Result<Option<RecvOutcome>, Value> {
        let mut channels = self.channels.borrow_mut();
        let Some(ch) = channels.get_mut(id) else {
            return Err(unknown_error(id));
        };
        if let Some((value, sender)) = ch.buffer.pop_front() {
            // Slide one suspended sender's value into the freed slot
            if let Some(mut ps) = ch.parked_senders.pop_front() {
                if let Some(v) = ps.value.take() {
                    ch.buffer.push_back((v, ps.task.clone()));
                }
                ps.park.finish(ParkState::Done);
            }
            return Ok(Some(RecvOutcome {
                value,
                sender: Some(sender),
            }));
        }
        if let Some(mut ps) = ch.parked_senders.pop_front() {
            // Rendezvous: take the waiting sender's value directly
            let value = ps.value.take().unwrap_or(Value::Void);
            let sender = ps.task.clone();
            ps.park.finish(ParkState::Done);
            return Ok(Some(RecvOutcome {
                value,
                sender: Some(sender),
            }));
        }
        if ch.closed {
            return Err(closed_error());
        }
        Ok(None)
    }

    /// Suspending send from `task`.
    pub fn send(self: &Rc<Self>, id: &str, value: Value, task: &str) -> SendFuture {
        SendFuture {
            store: Rc::clone(self),
            id: id.to_string(),
            task: task.to_string(),
            value: Some(value),
            park: None,
        }
    }

    /// Suspending receive.
    pub fn recv(self: &Rc<Self>, id: &str) -> RecvFuture {
        RecvFuture {
            store: Rc::clone(self),
            id: id.to_string(),
            park: None,
        }
    }

    /// Reject all waiters with a channel-closed error, then mark closed.
    /// Idempotent.
    pub fn close(&self, id: &str) -> Result<(), Value> {
        let (senders, receivers) = {
            let mut channels = self.channels.borrow_mut();
            let Some(ch) = channels.get_mut(id) else {
                return Err(unknown_error(id));
            };
            ch.closed = true;
            (
                std::mem::take(&mut ch.parked_senders),
                std::mem::take(&mut ch.parked_receivers),
            )
        };
        trace!(channel = %id, "channel closed");
        for ps in senders {
            ps.park.finish(ParkState::Closed);
        }
        for park in receivers {
            park.fill(RecvOutcome {
                value: closed_error(),
                sender: None,
            });
        }
        Ok(())
    }
}

/// Suspending send; resolves to `void` or an error value.
pub struct SendFuture {
    store: Rc<ChannelStore>,
    id: String,
    task: String,
    value: Option<Value>,
    park: Option<Rc<SendPark>>,
}

impl Future for SendFuture {
    type Output = Value;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Some(park) = &this.park {
            return match park.state.get() {
                ParkState::Done => Poll::Ready(Value::Void),
                ParkState::Closed => Poll::Ready(closed_error()),
                ParkState::Waiting => {
                    *park.waker.borrow_mut() = Some(cx.waker().clone());
                    Poll::Pending
                }
            };
        }

        let value = this.value.take().unwrap_or(Value::Void);
        let mut channels = this.store.channels.borrow_mut();
        let Some(ch) = channels.get_mut(&this.id) else {
            return Poll::Ready(unknown_error(&this.id));
        };
        if ch.closed {
            return Poll::Ready(closed_error());
        }
        if let Some(park) = ch.parked_receivers.pop_front() {
            drop(channels);
            park.fill(RecvOutcome {
                value,
                sender: Some(this.task.clone()),
            });
            return Poll::Ready(Value::Void);
        }
        if ch.buffer.len() < ch.capacity {
            ch.buffer.push_back((value, this.task.clone()));
            return Poll::Ready(Value::Void);
        }
        let park = SendPark::new();
        *park.waker.borrow_mut() = Some(cx.waker().clone());
        ch.parked_senders.push_back(ParkedSender {
            value: Some(value),
            task: this.task.clone(),
            park: Rc::clone(&park),
        });
        this.park = Some(park);
        Poll::Pending
    }
}

/// Suspending receive; resolves to the value plus the sender's task id.
pub struct RecvFuture {
    store: Rc<ChannelStore>,
    id: String,
    park: Option<Rc<RecvPark>>,
}

impl Future for RecvFuture {
    type Output = RecvOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Some(park) = &this.park {
            if let Some(outcome) = park.outcome.borrow_mut().take() {
                return Poll::Ready(outcome);
            }
            *park.waker.borrow_mut() = Some(cx.waker().clone());
            return Poll::Pending;
        }

        match this.store.try_recv(&this.id) {
            Ok(Some(outcome)) => Poll::Ready(outcome),
            Err(err) => Poll::Ready(RecvOutcome {
                value: err,
                sender: None,
            }),
            Ok(None) => {
                let park = RecvPark::new();
                *park.waker.borrow_mut() = Some(cx.waker().clone());
                let mut channels = this.store.channels.borrow_mut();
                if let Some(ch) = channels.get_mut(&this.id) {
                    ch.parked_receivers.push_back(Rc::clone(&park));
                }
                this.park = Some(park);
                Poll::Pending
            }
        }
    }
}
