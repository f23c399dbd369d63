//! Multicast push streams with last-value replay.
//!
//! A [`Subject`] fans each value out to every current subscriber and keeps a
//! bounded replay buffer for subscribers that attach late. Subscribers either
//! pull through an unbounded channel ([`Subject::subscribe`]) or receive values
//! synchronously through a callback ([`Subject::subscribe_fn`]). Callback
//! delivery happens on the producer's task, which is what keeps a job's log
//! and output events in emission order.
//!
//! A callback must not emit into the subject it is subscribed to.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};

use crate::jobs::error::JobError;

/// A stream of values that ends after the subject completes, or after
/// yielding one `Err` when it errors.
pub type EventStream<T> = BoxStream<'static, Result<T, JobError>>;

/// One event delivered to a callback subscriber.
#[derive(Debug)]
pub enum Notification<T> {
    Next(T),
    Error(JobError),
    Complete,
}

type Callback<T> = Arc<dyn Fn(Notification<&T>) + Send + Sync>;

enum Observer<T> {
    Channel(mpsc::UnboundedSender<Result<T, JobError>>),
    Callback {
        callback: Callback<T>,
        gate: Arc<Mutex<()>>,
    },
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        match self {
            Observer::Channel(tx) => Observer::Channel(tx.clone()),
            Observer::Callback { callback, gate } => Observer::Callback {
                callback: callback.clone(),
                gate: gate.clone(),
            },
        }
    }
}

struct State<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    /// `Some(None)` once completed, `Some(Some(err))` once errored.
    terminal: Option<Option<JobError>>,
    observers: Vec<(u64, Observer<T>)>,
    next_observer: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A multicast source with a replay buffer.
pub struct Subject<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Subject {
            state: self.state.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// A subject without replay.
    pub fn new() -> Self {
        Self::with_replay(0)
    }

    /// A subject replaying its most recent value.
    pub fn replay_last() -> Self {
        Self::with_replay(1)
    }

    /// A subject replaying every value it has seen.
    pub fn replay_all() -> Self {
        Self::with_replay(usize::MAX)
    }

    /// A subject replaying up to `capacity` values.
    pub fn with_replay(capacity: usize) -> Self {
        Subject {
            state: Arc::new(Mutex::new(State {
                buffer: VecDeque::new(),
                capacity,
                terminal: None,
                observers: Vec::new(),
                next_observer: 0,
            })),
        }
    }

    /// Emit a value. Ignored once the subject is stopped.
    pub fn next(&self, value: T) {
        let observers = {
            let mut state = lock(&self.state);
            if state.terminal.is_some() {
                return;
            }
            if state.capacity > 0 {
                if state.buffer.len() >= state.capacity {
                    state.buffer.pop_front();
                }
                state.buffer.push_back(value.clone());
            }
            state.observers.clone()
        };

        let mut closed = Vec::new();
        for (id, observer) in observers {
            match observer {
                Observer::Channel(tx) => {
                    if tx.unbounded_send(Ok(value.clone())).is_err() {
                        closed.push(id);
                    }
                }
                Observer::Callback { callback, gate } => {
                    let _gate = lock(&gate);
                    callback(Notification::Next(&value));
                }
            }
        }

        if !closed.is_empty() {
            lock(&self.state)
                .observers
                .retain(|(id, _)| !closed.contains(id));
        }
    }

    /// Terminate with an error. Subscribers receive the error, then the end.
    pub fn error(&self, error: JobError) {
        self.terminate(Some(error));
    }

    /// Terminate successfully.
    pub fn complete(&self) {
        self.terminate(None);
    }

    fn terminate(&self, error: Option<JobError>) {
        let observers = {
            let mut state = lock(&self.state);
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(error.clone());
            std::mem::take(&mut state.observers)
        };

        for (_, observer) in observers {
            match observer {
                Observer::Channel(tx) => {
                    if let Some(error) = &error {
                        let _ = tx.unbounded_send(Err(error.clone()));
                    }
                }
                Observer::Callback { callback, gate } => {
                    let _gate = lock(&gate);
                    match &error {
                        Some(error) => callback(Notification::Error(error.clone())),
                        None => callback(Notification::Complete),
                    }
                }
            }
        }
    }

    /// Whether the subject has completed or errored.
    pub fn is_stopped(&self) -> bool {
        lock(&self.state).terminal.is_some()
    }

    /// The most recent buffered value.
    pub fn last(&self) -> Option<T> {
        lock(&self.state).buffer.back().cloned()
    }

    /// Number of live subscribers.
    pub fn observer_count(&self) -> usize {
        lock(&self.state).observers.len()
    }

    /// Subscribe as a stream. Buffered values are replayed first.
    pub fn subscribe(&self) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded();
        let mut state = lock(&self.state);
        for value in &state.buffer {
            let _ = tx.unbounded_send(Ok(value.clone()));
        }
        match &state.terminal {
            Some(Some(error)) => {
                let _ = tx.unbounded_send(Err(error.clone()));
            }
            Some(None) => {}
            None => {
                let id = state.next_observer;
                state.next_observer += 1;
                state.observers.push((id, Observer::Channel(tx)));
            }
        }
        rx.boxed()
    }

    /// Subscribe with a callback invoked on the producer's task.
    ///
    /// Buffered values are replayed before any new value reaches the callback.
    pub fn subscribe_fn<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Notification<&T>) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let gate = Arc::new(Mutex::new(()));
        let replay_gate = gate.clone();
        let _replaying = lock(&replay_gate);

        let (replay, terminal, id) = {
            let mut state = lock(&self.state);
            let replay: Vec<T> = state.buffer.iter().cloned().collect();
            let terminal = state.terminal.clone();
            let id = if terminal.is_none() {
                let id = state.next_observer;
                state.next_observer += 1;
                state.observers.push((
                    id,
                    Observer::Callback {
                        callback: callback.clone(),
                        gate: gate.clone(),
                    },
                ));
                Some(id)
            } else {
                None
            };
            (replay, terminal, id)
        };

        for value in &replay {
            callback(Notification::Next(value));
        }
        match terminal {
            Some(Some(error)) => callback(Notification::Error(error)),
            Some(None) => callback(Notification::Complete),
            None => {}
        }

        match id {
            Some(id) => {
                let state: Weak<Mutex<State<T>>> = Arc::downgrade(&self.state);
                Subscription::new(move || {
                    if let Some(state) = state.upgrade() {
                        lock(&state).observers.retain(|(oid, _)| *oid != id);
                    }
                })
            }
            None => Subscription::empty(),
        }
    }

    /// A read-only view of this subject.
    pub fn as_observable(&self) -> Observable<T> {
        Observable {
            subject: self.clone(),
        }
    }
}

/// Read-only view of a [`Subject`].
pub struct Observable<T> {
    subject: Subject<T>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable {
            subject: self.subject.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Subscribe as a stream.
    pub fn subscribe(&self) -> EventStream<T> {
        self.subject.subscribe()
    }

    /// Subscribe with a callback.
    pub fn subscribe_fn<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Notification<&T>) + Send + Sync + 'static,
    {
        self.subject.subscribe_fn(callback)
    }

    /// The most recent buffered value.
    pub fn last(&self) -> Option<T> {
        self.subject.last()
    }

    /// Whether the source has completed or errored.
    pub fn is_stopped(&self) -> bool {
        self.subject.is_stopped()
    }
}

/// Handle to a callback subscription. Unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// A subscription that runs `teardown` when unsubscribed.
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Subscription { teardown: None }
    }

    /// Unsubscribe now.
    pub fn unsubscribe(mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }

    /// Whether this subscription is still attached.
    pub fn is_active(&self) -> bool {
        self.teardown.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
