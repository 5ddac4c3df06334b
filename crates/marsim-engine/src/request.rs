//! FIFO queue of world-mutating requests executed on the simulation thread.
//!
//! [`RequestQueue`] buffers requests that must not run concurrently with a
//! physics step: scene loads and saves, world resets, and collision checks.
//! Any thread may enqueue; only the simulation thread drains, strictly
//! between two ticks.
//!
//! # Completion
//!
//! A caller that wants to block receives a [`Ticket`] holding the receiving
//! end of a one-shot channel. The simulation thread replies on it after the
//! specific request ran, so no lock is held across the load itself. Errors
//! from requests enqueued without a ticket set the queue's fault flag and
//! are kept as the last request error.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use marsim_core::{LoadRequest, RequestError};

/// A request that mutates (or inspects) the world.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum WorldRequest {
    /// Load a scene file.
    Load(LoadRequest),
    /// Save the world; restart afterwards if `was_running`.
    Save { path: PathBuf, was_running: bool },
    /// Rebuild the loaded scenes in a fresh world.
    Reset,
    /// Start an empty world.
    NewWorld { clear_all: bool },
    /// Run collision detection once.
    CheckCollisions,
}

impl WorldRequest {
    fn label(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::Save { .. } => "save",
            Self::Reset => "reset",
            Self::NewWorld { .. } => "new_world",
            Self::CheckCollisions => "check_collisions",
        }
    }
}

/// What a successfully executed request produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RequestOutcome {
    Done,
    Collisions(usize),
}

type Reply = Sender<Result<RequestOutcome, RequestError>>;

struct QueuedRequest {
    seq: u64,
    request: WorldRequest,
    reply: Option<Reply>,
}

/// Completion handle for a blocking request.
pub(crate) struct Ticket {
    rx: Receiver<Result<RequestOutcome, RequestError>>,
}

impl Ticket {
    /// Block until the simulation thread has executed the request.
    pub fn wait(self) -> Result<RequestOutcome, RequestError> {
        // A dropped sender means the request was discarded at shutdown.
        self.rx.recv().unwrap_or(Err(RequestError::ShuttingDown))
    }
}

/// Counters returned by [`RequestQueue::drain_and_execute`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct DrainStats {
    pub executed: u64,
    pub failed: u64,
}

pub(crate) struct RequestQueue {
    tx: Sender<QueuedRequest>,
    rx: Receiver<QueuedRequest>,
    /// Set once at shutdown. Held across enqueue so nothing slips in
    /// behind the final abandon pass.
    closed: Mutex<bool>,
    next_seq: AtomicU64,
    executing: AtomicBool,
    fault: AtomicBool,
    last_error: Mutex<Option<RequestError>>,
}

impl RequestQueue {
    /// A queue holding at most `capacity` waiting requests.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RequestQueue capacity must be at least 1");
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            tx,
            rx,
            closed: Mutex::new(false),
            next_seq: AtomicU64::new(0),
            executing: AtomicBool::new(false),
            fault: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    fn closed(&self) -> MutexGuard<'_, bool> {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a request. Never blocks. With `blocking`, the returned
    /// ticket resolves once the request has executed.
    pub fn enqueue(
        &self,
        request: WorldRequest,
        blocking: bool,
    ) -> Result<Option<Ticket>, RequestError> {
        let closed = self.closed();
        if *closed {
            return Err(RequestError::ShuttingDown);
        }
        let (reply, ticket) = if blocking {
            let (tx, rx) = crossbeam_channel::bounded(1);
            (Some(tx), Some(Ticket { rx }))
        } else {
            (None, None)
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        log::debug!("request #{seq} ({}) queued", request.label());
        self.tx
            .try_send(QueuedRequest {
                seq,
                request,
                reply,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => RequestError::QueueFull,
                TrySendError::Disconnected(_) => RequestError::ShuttingDown,
            })?;
        drop(closed);
        Ok(ticket)
    }

    /// Number of requests waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no request is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// No request is waiting and none is executing.
    pub fn is_idle(&self) -> bool {
        self.rx.is_empty() && !self.executing.load(Ordering::Acquire)
    }

    /// Whether a non-blocking request has failed since the last
    /// [`take_last_error`](Self::take_last_error).
    pub fn has_fault(&self) -> bool {
        self.fault.load(Ordering::Acquire)
    }

    /// Take the last non-blocking failure and clear the fault flag.
    pub fn take_last_error(&self) -> Option<RequestError> {
        self.fault.store(false, Ordering::Release);
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Execute the requests queued at the time of the call, in arrival
    /// order, one at a time. Simulation thread only.
    pub fn drain_and_execute<F>(&self, mut execute: F) -> DrainStats
    where
        F: FnMut(&WorldRequest) -> Result<RequestOutcome, RequestError>,
    {
        let mut stats = DrainStats::default();
        // Requests enqueued while draining wait for the next boundary.
        let n = self.rx.len();
        for _ in 0..n {
            // Flag first so `is_idle` never sees the gap after the dequeue.
            self.executing.store(true, Ordering::Release);
            let Ok(queued) = self.rx.try_recv() else {
                self.executing.store(false, Ordering::Release);
                break;
            };
            let result = execute(&queued.request);
            self.executing.store(false, Ordering::Release);

            stats.executed += 1;
            if let Err(e) = &result {
                stats.failed += 1;
                log::warn!(
                    "request #{} ({}) failed: {e}",
                    queued.seq,
                    queued.request.label()
                );
            }
            match queued.reply {
                Some(reply) => {
                    // The caller may have given up waiting.
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(e) = result {
                        *self
                            .last_error
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(e);
                        self.fault.store(true, Ordering::Release);
                    }
                }
            }
        }
        stats
    }

    /// Refuse further requests and fail every waiting one with
    /// `ShuttingDown`. Returns how many were abandoned.
    pub fn close_and_abandon(&self) -> usize {
        let mut closed = self.closed();
        *closed = true;
        let mut abandoned = 0;
        while let Ok(queued) = self.rx.try_recv() {
            if let Some(reply) = queued.reply {
                let _ = reply.send(Err(RequestError::ShuttingDown));
            }
            abandoned += 1;
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn load(name: &str) -> WorldRequest {
        WorldRequest::Load(LoadRequest::new(name))
    }

    #[test]
    fn drains_in_fifo_order() {
        let q = RequestQueue::new(16);
        q.enqueue(load("a.scn"), false).unwrap();
        q.enqueue(WorldRequest::Reset, false).unwrap();
        q.enqueue(load("b.scn"), false).unwrap();

        let mut seen = Vec::new();
        let stats = q.drain_and_execute(|r| {
            seen.push(r.clone());
            Ok(RequestOutcome::Done)
        });
        assert_eq!(stats.executed, 3);
        assert_eq!(seen, vec![load("a.scn"), WorldRequest::Reset, load("b.scn")]);
        assert!(q.is_idle());
    }

    #[test]
    fn full_queue_rejects() {
        let q = RequestQueue::new(1);
        q.enqueue(WorldRequest::Reset, false).unwrap();
        assert_eq!(
            q.enqueue(WorldRequest::Reset, false).err(),
            Some(RequestError::QueueFull)
        );
    }

    #[test]
    fn blocking_ticket_receives_result() {
        let q = Arc::new(RequestQueue::new(4));
        let ticket = q
            .enqueue(WorldRequest::CheckCollisions, true)
            .unwrap()
            .unwrap();
        let drainer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.drain_and_execute(|_| Ok(RequestOutcome::Collisions(3))))
        };
        assert_eq!(ticket.wait(), Ok(RequestOutcome::Collisions(3)));
        drainer.join().unwrap();
    }

    #[test]
    fn blocking_failure_goes_to_caller_not_fault_flag() {
        let q = RequestQueue::new(4);
        let ticket = q.enqueue(load("missing.scn"), true).unwrap().unwrap();
        q.drain_and_execute(|_| {
            Err(RequestError::FileNotFound {
                path: "missing.scn".into(),
            })
        });
        assert!(matches!(
            ticket.wait(),
            Err(RequestError::FileNotFound { .. })
        ));
        assert!(!q.has_fault());
    }

    #[test]
    fn non_blocking_failure_sets_fault() {
        let q = RequestQueue::new(4);
        q.enqueue(load("bad.scn"), false).unwrap();
        let stats = q.drain_and_execute(|_| {
            Err(RequestError::LoadFailed {
                reason: "parse".into(),
            })
        });
        assert_eq!(stats.failed, 1);
        assert!(q.has_fault());
        assert!(matches!(
            q.take_last_error(),
            Some(RequestError::LoadFailed { .. })
        ));
        assert!(!q.has_fault());
    }

    #[test]
    fn requests_enqueued_during_drain_wait_for_next_pass() {
        let q = RequestQueue::new(8);
        q.enqueue(WorldRequest::Reset, false).unwrap();
        let stats = q.drain_and_execute(|_| {
            q.enqueue(WorldRequest::Reset, false).unwrap();
            Ok(RequestOutcome::Done)
        });
        assert_eq!(stats.executed, 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn close_abandons_waiters_and_rejects_new() {
        let q = RequestQueue::new(4);
        let ticket = q.enqueue(WorldRequest::Reset, true).unwrap().unwrap();
        q.enqueue(WorldRequest::Reset, false).unwrap();
        assert_eq!(q.close_and_abandon(), 2);
        assert_eq!(ticket.wait(), Err(RequestError::ShuttingDown));
        assert_eq!(
            q.enqueue(WorldRequest::Reset, true).err(),
            Some(RequestError::ShuttingDown)
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn execution_order_matches_arrival(names in prop::collection::vec("[a-z]{1,6}", 0..32)) {
                let q = RequestQueue::new(64);
                for n in &names {
                    q.enqueue(load(n), false).unwrap();
                }
                let mut seen = Vec::new();
                q.drain_and_execute(|r| {
                    if let WorldRequest::Load(req) = r {
                        seen.push(req.filename.to_string_lossy().into_owned());
                    }
                    Ok(RequestOutcome::Done)
                });
                prop_assert_eq!(seen, names);
            }
        }
    }
}
