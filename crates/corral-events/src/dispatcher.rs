//! ---
//! corral_section: "02-events-messaging"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Typed lifecycle events and asynchronous dispatch."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::events::{Event, FleetListener};

/// Handle returned by [`EventDispatcher::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Per-listener serial queue. A cell is scheduled on at most one worker at a
/// time, which gives each listener FIFO delivery while distinct listeners are
/// fanned out concurrently across the pool.
struct ListenerCell {
    listener: Arc<dyn FleetListener>,
    state: Mutex<CellState>,
}

#[derive(Default)]
struct CellState {
    pending: VecDeque<Event>,
    scheduled: bool,
}

struct RunQueue {
    ready: VecDeque<Arc<ListenerCell>>,
    /// Events accepted but not yet delivered, across all cells.
    outstanding: usize,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<RunQueue>,
    work_available: Condvar,
    drained: Condvar,
}

impl Shared {
    /// Append an event to the cell's serial queue and schedule the cell if it
    /// is not already owned by a worker. Lock order: run queue, then cell.
    fn enqueue(&self, cell: &Arc<ListenerCell>, event: Event) {
        let mut queue = self.queue.lock();
        let mut state = cell.state.lock();
        state.pending.push_back(event);
        queue.outstanding += 1;
        if !state.scheduled {
            state.scheduled = true;
            queue.ready.push_back(cell.clone());
            self.work_available.notify_one();
        }
    }
}

/// Thread-pooled, fan-out, at-least-once event dispatcher.
///
/// Dispatch takes an atomic snapshot of the subscriber set before fan-out, so
/// concurrent subscribe/unsubscribe never corrupts an in-flight delivery
/// round. Dispatching while the pool is stopped still enqueues; the events are
/// delivered once the pool starts. `stop` drains all accepted events before
/// the workers exit.
pub struct EventDispatcher {
    shared: Arc<Shared>,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<ListenerCell>)>>,
    /// One-shot listener cells keyed by listener pointer identity, so repeated
    /// per-call listeners keep their FIFO queue while any delivery is pending.
    extras: Mutex<HashMap<usize, Weak<ListenerCell>>>,
    next_subscription: AtomicU64,
}

impl EventDispatcher {
    /// Create a dispatcher backed by `worker_count` pool threads.
    pub fn new(worker_count: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(RunQueue {
                    ready: VecDeque::new(),
                    outstanding: 0,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                drained: Condvar::new(),
            }),
            worker_count: worker_count.max(1),
            workers: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            extras: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Spawn the worker pool. Idempotent; a no-op while already running.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        self.shared.queue.lock().shutdown = false;
        for index in 0..self.worker_count {
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("corral-events-{index}"))
                .spawn(move || worker_loop(shared))
                .expect("spawn dispatcher worker");
            workers.push(handle);
        }
        debug!(workers = self.worker_count, "event dispatcher started");
    }

    /// Drain accepted events and join the worker pool. Idempotent.
    pub fn stop(&self) {
        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return;
        }
        {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            self.shared.work_available.notify_all();
        }
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("event dispatcher worker panicked");
            }
        }
        debug!("event dispatcher stopped");
    }

    /// Whether the worker pool is currently running.
    pub fn is_running(&self) -> bool {
        !self.workers.lock().is_empty()
    }

    /// Register a listener for all subsequent events.
    pub fn subscribe(&self, listener: Arc<dyn FleetListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let cell = Arc::new(ListenerCell {
            listener,
            state: Mutex::new(CellState::default()),
        });
        self.subscribers.lock().push((id, cell));
        id
    }

    /// Remove a listener. Events already accepted for it are still delivered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    /// Fan an event out to all registered listeners.
    pub fn dispatch(&self, event: impl Into<Event>) {
        self.dispatch_with(event, None);
    }

    /// Fan an event out to all registered listeners plus an optional one-shot
    /// per-call listener.
    pub fn dispatch_with(
        &self,
        event: impl Into<Event>,
        extra: Option<Arc<dyn FleetListener>>,
    ) {
        let event = event.into();
        let snapshot: Vec<Arc<ListenerCell>> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, cell)| cell.clone())
            .collect();
        for cell in &snapshot {
            self.shared.enqueue(cell, event.clone());
        }
        if let Some(listener) = extra {
            let cell = self.extra_cell(listener);
            self.shared.enqueue(&cell, event);
        }
    }

    /// Block until every accepted event has been delivered.
    ///
    /// Only meaningful while the pool is running; waits indefinitely if it is
    /// stopped with events pending.
    pub fn drain(&self) {
        let mut queue = self.shared.queue.lock();
        while queue.outstanding > 0 {
            self.shared.drained.wait(&mut queue);
        }
    }

    /// Look up or create the serial cell for a one-shot listener. Keyed by
    /// pointer identity so successive calls with the same listener share one
    /// FIFO queue for as long as any of its deliveries are pending.
    fn extra_cell(&self, listener: Arc<dyn FleetListener>) -> Arc<ListenerCell> {
        let key = Arc::as_ptr(&listener) as *const () as usize;
        let mut extras = self.extras.lock();
        extras.retain(|_, weak| weak.strong_count() > 0);
        if let Some(cell) = extras.get(&key).and_then(Weak::upgrade) {
            return cell;
        }
        let cell = Arc::new(ListenerCell {
            listener,
            state: Mutex::new(CellState::default()),
        });
        extras.insert(key, Arc::downgrade(&cell));
        cell
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let cell = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(cell) = queue.ready.pop_front() {
                    break cell;
                }
                if queue.shutdown && queue.outstanding == 0 {
                    return;
                }
                shared.work_available.wait(&mut queue);
            }
        };

        let event = {
            let mut state = cell.state.lock();
            state.pending.pop_front()
        };

        if let Some(event) = event {
            deliver(cell.listener.as_ref(), &event);
        }

        // Re-queue the cell while it has work left, otherwise release it so a
        // later enqueue can schedule it again. Lock order: run queue, then cell.
        let mut queue = shared.queue.lock();
        let mut state = cell.state.lock();
        queue.outstanding = queue.outstanding.saturating_sub(1);
        if state.pending.is_empty() {
            state.scheduled = false;
        } else {
            queue.ready.push_back(cell.clone());
            shared.work_available.notify_one();
        }
        if queue.outstanding == 0 {
            shared.drained.notify_all();
            if queue.shutdown {
                shared.work_available.notify_all();
            }
        }
    }
}

fn deliver(listener: &dyn FleetListener, event: &Event) {
    let outcome = match event {
        Event::Provisioning(event) => listener.on_provisioning(event),
        Event::Profile(event) => listener.on_profile(event),
        Event::Component(event) => listener.on_component(event),
    };
    if let Err(err) = outcome {
        warn!(kind = event.kind(), error = %err, "listener delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ProvisioningEvent, ProvisioningStatus};
    use corral_common::{ContainerId, ProfileId, VersionId};

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl FleetListener for Recorder {
        fn on_provisioning(&self, event: &ProvisioningEvent) -> anyhow::Result<()> {
            self.seen.lock().push(event.profile.canonical());
            Ok(())
        }
    }

    fn provisioning(profile: &str) -> ProvisioningEvent {
        ProvisioningEvent::new(
            ProvisioningStatus::Provisioned,
            ContainerId::new("cnt-a").unwrap(),
            ProfileId::new(profile).unwrap(),
            VersionId::new("1.0").unwrap(),
        )
    }

    #[test]
    fn per_listener_delivery_preserves_submission_order() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.start();
        let recorder = Recorder::new();
        dispatcher.subscribe(recorder.clone());

        let expected: Vec<String> = (0..64).map(|i| format!("p-{i}")).collect();
        for name in &expected {
            dispatcher.dispatch(provisioning(name));
        }
        dispatcher.drain();
        assert_eq!(*recorder.seen.lock(), expected);
        dispatcher.stop();
    }

    #[test]
    fn events_enqueued_while_stopped_are_delivered_on_start() {
        let dispatcher = EventDispatcher::new(2);
        let recorder = Recorder::new();
        dispatcher.subscribe(recorder.clone());
        dispatcher.dispatch(provisioning("early"));
        assert!(recorder.seen.lock().is_empty());

        dispatcher.start();
        dispatcher.drain();
        assert_eq!(*recorder.seen.lock(), vec!["early".to_owned()]);
        dispatcher.stop();
    }

    #[test]
    fn one_shot_listener_shares_a_fifo_queue_across_calls() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.start();
        let recorder = Recorder::new();
        for i in 0..16 {
            dispatcher.dispatch_with(
                provisioning(&format!("p-{i}")),
                Some(recorder.clone() as Arc<dyn FleetListener>),
            );
        }
        dispatcher.drain();
        let expected: Vec<String> = (0..16).map(|i| format!("p-{i}")).collect();
        assert_eq!(*recorder.seen.lock(), expected);
        dispatcher.stop();
    }
}
