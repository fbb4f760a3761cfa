//! TaskLifecycle - race-free `Initialized -> Running -> Completed` state for one task.
//!
//! Three parties touch a lifecycle concurrently:
//! - the scheduler, which polls `is_running` / `is_complete` (or subscribes),
//! - the worker that calls `mark_running` and drives `execute`,
//! - whichever thread eventually calls `complete`.
//!
//! The state is guarded by a short-held mutex and nothing else ever blocks.
//! Observer callbacks are never invoked while that mutex is held: an observer
//! that reads `is_complete()` from inside its callback would otherwise wait on
//! its own thread's lock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::domain::{LifecycleError, LifecycleEvent, LifecycleState, TaskId};

/// Push-based observer of lifecycle changes.
///
/// Called with no lifecycle lock held. Implementations may read the
/// lifecycle's predicates and may even call `complete()` re-entrantly.
///
/// `WillChange` is delivered on the requesting thread, once per request that
/// starts before the task completes. Racing `complete()` calls can each
/// announce themselves, but only one `DidChange { to: Completed }` fires.
pub trait LifecycleObserver: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F> LifecycleObserver for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// Lifecycle state owned by a single task.
pub struct TaskLifecycle {
    id: TaskId,
    state: Mutex<LifecycleState>,
    /// One-shot guard for `complete()`. Claimed under `state`, together with
    /// the completing mutation.
    completed_once: AtomicBool,
    notifier: Notifier,
    /// Mirrors `state` for async waiters. Updated inside the critical section
    /// (`send_replace` runs no user code and never blocks), so waiters never
    /// see states out of order.
    state_tx: watch::Sender<LifecycleState>,
}

impl TaskLifecycle {
    pub fn new() -> Self {
        Self::with_id(TaskId::generate())
    }

    pub fn with_id(id: TaskId) -> Self {
        Self {
            id,
            state: Mutex::new(LifecycleState::Initialized),
            completed_once: AtomicBool::new(false),
            notifier: Notifier::default(),
            state_tx: watch::Sender::new(LifecycleState::Initialized),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Current state (lock-protected read).
    pub fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn is_complete(&self) -> bool {
        self.state() == LifecycleState::Completed
    }

    /// Register an observer for every subsequent change notification.
    pub fn subscribe(&self, observer: Arc<dyn LifecycleObserver>) {
        self.notifier.add(observer);
    }

    /// Receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Resolve once the task reaches `Completed`.
    ///
    /// Never resolves for a task whose `execute` forgets to call `complete()`.
    pub async fn wait_complete(&self) {
        let mut rx = self.state_tx.subscribe();
        // The sender lives in `self`, so this only errors if `self` is gone.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    /// State half of `begin()`: move `Initialized -> Running`.
    ///
    /// Returns `Ok(true)` when the transition was applied and `Ok(false)` when
    /// the task had already completed (absorbing, silently ignored). Any other
    /// source state is a caller defect and is refused.
    pub fn mark_running(&self) -> Result<bool, LifecycleError> {
        self.transition_to(LifecycleState::Running)
    }

    /// Mark the task finished.
    ///
    /// Idempotent and callable from any thread. Only the first call to reach
    /// the lock has an effect. Every call returns with `Completed` visible and
    /// none of them waits on another caller's observers.
    pub fn complete(&self) {
        if self.completed_once.load(Ordering::Acquire) {
            debug!(task_id = %self.id, "complete() already called, ignoring");
            return;
        }
        // Initialized/Running -> Completed are both legal and Completed is
        // absorbing, so this cannot be refused.
        let _ = self.transition_to(LifecycleState::Completed);
    }

    /// will-change (no lock) -> mutate (locked) -> did-change (no lock).
    fn transition_to(&self, target: LifecycleState) -> Result<bool, LifecycleError> {
        // Delivered on the calling thread, so it always precedes this mutation.
        self.notifier.deliver(&LifecycleEvent::WillChange {
            task_id: self.id,
            target,
        });

        let (result, drain) = {
            let mut state = lock(&self.state);
            let from = *state;

            if target.is_terminal() && self.completed_once.swap(true, Ordering::AcqRel) {
                debug!(task_id = %self.id, "complete() already called, ignoring");
                (Ok(false), false)
            } else if from.is_terminal() {
                debug!(task_id = %self.id, %target, "task already completed, ignoring transition");
                (Ok(false), false)
            } else if !from.can_transition_to(target) {
                error!(task_id = %self.id, %from, to = %target, "illegal lifecycle transition refused");
                (
                    Err(LifecycleError::IllegalTransition {
                        task_id: self.id,
                        from,
                        to: target,
                    }),
                    false,
                )
            } else {
                *state = target;
                self.state_tx.send_replace(target);
                debug!(task_id = %self.id, %from, to = %target, "lifecycle transition");

                // Queued while still locked so delivery order matches mutation order.
                let drain = self.notifier.enqueue(LifecycleEvent::DidChange {
                    task_id: self.id,
                    from,
                    to: target,
                    at: Utc::now(),
                });
                (Ok(true), drain)
            }
        }; // Lock released here

        if drain {
            self.notifier.drain();
        }
        result
    }
}

impl Default for TaskLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLifecycle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("completed_once", &self.completed_once.load(Ordering::Acquire))
            .finish()
    }
}

/// Fans events out to observers.
///
/// Will-change events go straight to observers on the calling thread.
/// Did-change events are queued in mutation order; whichever thread finds no
/// drain in progress delivers everything queued, with no lock held while
/// observers run. Other threads (including observers re-entering the
/// lifecycle) only enqueue.
#[derive(Default)]
struct Notifier {
    observers: RwLock<Vec<Arc<dyn LifecycleObserver>>>,
    pending: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    events: VecDeque<LifecycleEvent>,
    draining: bool,
}

impl Notifier {
    fn add(&self, observer: Arc<dyn LifecycleObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn snapshot(&self) -> Vec<Arc<dyn LifecycleObserver>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn deliver(&self, event: &LifecycleEvent) {
        for observer in &self.snapshot() {
            observer.on_event(event);
        }
    }

    /// Queue an event. Returns true if the caller must drain.
    fn enqueue(&self, event: LifecycleEvent) -> bool {
        let mut pending = lock(&self.pending);
        pending.events.push_back(event);
        !std::mem::replace(&mut pending.draining, true)
    }

    fn drain(&self) {
        let _guard = DrainGuard(&self.pending);
        loop {
            let event = {
                let mut pending = lock(&self.pending);
                match pending.events.pop_front() {
                    Some(event) => event,
                    None => {
                        pending.draining = false;
                        return;
                    }
                }
            };
            self.deliver(&event);
        }
    }
}

/// Releases the drain role if an observer panics mid-delivery.
struct DrainGuard<'a>(&'a Mutex<Pending>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            lock(self.0).draining = false;
        }
    }
}

/// Critical sections never panic, but recover from poisoning anyway.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Records every applied transition target.
    #[derive(Default)]
    struct Recorder {
        applied: Mutex<Vec<LifecycleState>>,
        will: AtomicUsize,
    }

    impl LifecycleObserver for Recorder {
        fn on_event(&self, event: &LifecycleEvent) {
            match event {
                LifecycleEvent::WillChange { .. } => {
                    self.will.fetch_add(1, Ordering::SeqCst);
                }
                LifecycleEvent::DidChange { to, .. } => self.applied.lock().unwrap().push(*to),
            }
        }
    }

    impl Recorder {
        fn applied(&self) -> Vec<LifecycleState> {
            self.applied.lock().unwrap().clone()
        }

        fn completions(&self) -> usize {
            self.applied()
                .iter()
                .filter(|s| **s == LifecycleState::Completed)
                .count()
        }
    }

    fn is_legal_sequence(seq: &[LifecycleState]) -> bool {
        use LifecycleState::*;
        matches!(seq, [] | [Running] | [Completed] | [Running, Completed])
    }

    #[test]
    fn new_lifecycle_is_initialized() {
        let lc = TaskLifecycle::new();
        assert_eq!(lc.state(), LifecycleState::Initialized);
        assert!(!lc.is_running());
        assert!(!lc.is_complete());
    }

    #[test]
    fn running_then_completed() {
        let lc = TaskLifecycle::new();
        assert_eq!(lc.mark_running(), Ok(true));
        assert!(lc.is_running());
        assert!(!lc.is_complete());

        lc.complete();
        assert!(!lc.is_running());
        assert!(lc.is_complete());
    }

    #[test]
    fn complete_before_begin_is_allowed() {
        let lc = TaskLifecycle::new();
        lc.complete();
        assert_eq!(lc.state(), LifecycleState::Completed);
    }

    #[test]
    fn second_mark_running_is_refused_and_state_stays_running() {
        let lc = TaskLifecycle::new();
        lc.mark_running().unwrap();

        let err = lc.mark_running().unwrap_err();
        assert_eq!(
            err,
            LifecycleError::IllegalTransition {
                task_id: lc.id(),
                from: LifecycleState::Running,
                to: LifecycleState::Running,
            }
        );
        assert_eq!(lc.state(), LifecycleState::Running);
    }

    #[test]
    fn mark_running_after_completion_is_a_silent_no_op() {
        let lc = TaskLifecycle::new();
        lc.complete();
        assert_eq!(lc.mark_running(), Ok(false));
        assert_eq!(lc.state(), LifecycleState::Completed);
    }

    #[test]
    fn repeated_complete_notifies_once() {
        let lc = TaskLifecycle::new();
        let rec = Arc::new(Recorder::default());
        lc.subscribe(rec.clone());

        lc.mark_running().unwrap();
        for _ in 0..5 {
            lc.complete();
        }

        assert_eq!(
            rec.applied(),
            vec![LifecycleState::Running, LifecycleState::Completed]
        );
        assert_eq!(rec.will.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refused_transition_fires_no_did_change() {
        let lc = TaskLifecycle::new();
        let rec = Arc::new(Recorder::default());
        lc.subscribe(rec.clone());

        lc.mark_running().unwrap();
        let _ = lc.mark_running();

        assert_eq!(rec.applied(), vec![LifecycleState::Running]);
    }

    #[test]
    fn observer_can_read_predicates_without_deadlock() {
        let lc = Arc::new(TaskLifecycle::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&lc);
        let sink = Arc::clone(&seen);
        lc.subscribe(Arc::new(move |event: &LifecycleEvent| {
            if let Some(lc) = weak.upgrade() {
                sink.lock()
                    .unwrap()
                    .push((event.is_applied(), lc.is_running(), lc.is_complete()));
            }
        }));

        lc.mark_running().unwrap();
        lc.complete();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (false, false, false), // will -> running
                (true, true, false),   // did  -> running
                (false, true, false),  // will -> completed
                (true, false, true),   // did  -> completed
            ]
        );
    }

    #[test]
    fn observer_can_complete_reentrantly() {
        let lc = Arc::new(TaskLifecycle::new());
        let rec = Arc::new(Recorder::default());
        lc.subscribe(rec.clone());

        let weak = Arc::downgrade(&lc);
        lc.subscribe(Arc::new(move |event: &LifecycleEvent| {
            if let LifecycleEvent::DidChange {
                to: LifecycleState::Running,
                ..
            } = event
                && let Some(lc) = weak.upgrade()
            {
                lc.complete();
            }
        }));

        lc.mark_running().unwrap();

        assert!(lc.is_complete());
        assert_eq!(
            rec.applied(),
            vec![LifecycleState::Running, LifecycleState::Completed]
        );
    }

    #[test]
    fn complete_inside_will_change_does_not_deadlock() {
        let lc = Arc::new(TaskLifecycle::new());
        let rec = Arc::new(Recorder::default());
        lc.subscribe(rec.clone());

        let weak = Arc::downgrade(&lc);
        let fired = AtomicBool::new(false);
        lc.subscribe(Arc::new(move |event: &LifecycleEvent| {
            if let LifecycleEvent::WillChange {
                target: LifecycleState::Completed,
                ..
            } = event
                && !fired.swap(true, Ordering::SeqCst)
                && let Some(lc) = weak.upgrade()
            {
                lc.complete();
                assert!(lc.is_complete());
            }
        }));

        lc.mark_running().unwrap();
        lc.complete();
        assert!(lc.is_complete());
        assert_eq!(rec.completions(), 1);
    }

    #[test]
    fn complete_from_thread_joined_by_will_change_observer() {
        let lc = Arc::new(TaskLifecycle::new());
        let weak = Arc::downgrade(&lc);
        let fired = AtomicBool::new(false);
        lc.subscribe(Arc::new(move |event: &LifecycleEvent| {
            if let LifecycleEvent::WillChange {
                target: LifecycleState::Completed,
                ..
            } = event
                && !fired.swap(true, Ordering::SeqCst)
                && let Some(lc) = weak.upgrade()
            {
                // Hand completion off to a callback thread and wait for it.
                thread::spawn(move || lc.complete()).join().unwrap();
            }
        }));
        lc.mark_running().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let completer = {
            let lc = Arc::clone(&lc);
            thread::spawn(move || {
                lc.complete();
                tx.send(()).unwrap();
            })
        };

        rx.recv_timeout(Duration::from_secs(3))
            .expect("complete() deadlocked on its own callback thread");
        completer.join().unwrap();
        assert!(lc.is_complete());
    }

    #[test]
    fn redundant_complete_does_not_wait_for_slow_observer() {
        let lc = Arc::new(TaskLifecycle::new());
        let rec = Arc::new(Recorder::default());
        lc.subscribe(rec.clone());

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let slow = AtomicBool::new(true);
        lc.subscribe(Arc::new(move |event: &LifecycleEvent| {
            if let LifecycleEvent::WillChange {
                target: LifecycleState::Completed,
                ..
            } = event
                && slow.swap(false, Ordering::SeqCst)
            {
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(500));
            }
        }));
        lc.mark_running().unwrap();

        let first = {
            let lc = Arc::clone(&lc);
            thread::spawn(move || lc.complete())
        };
        entered_rx.recv().unwrap();

        let started = Instant::now();
        lc.complete();
        assert!(
            started.elapsed() < Duration::from_millis(250),
            "complete() blocked for {:?}",
            started.elapsed()
        );
        assert!(lc.is_complete());

        first.join().unwrap();
        assert_eq!(rec.completions(), 1);
    }

    #[test]
    fn will_change_precedes_mutation_while_another_thread_delivers() {
        let lc = Arc::new(TaskLifecycle::new());

        // Holds the delivery role on the marking thread for a while.
        let (delivering_tx, delivering_rx) = std::sync::mpsc::channel();
        lc.subscribe(Arc::new(move |event: &LifecycleEvent| {
            if let LifecycleEvent::DidChange {
                to: LifecycleState::Running,
                ..
            } = event
            {
                delivering_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(300));
            }
        }));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let weak = Arc::downgrade(&lc);
        let sink = Arc::clone(&seen);
        lc.subscribe(Arc::new(move |event: &LifecycleEvent| {
            if let LifecycleEvent::WillChange {
                target: LifecycleState::Completed,
                ..
            } = event
                && let Some(lc) = weak.upgrade()
            {
                sink.lock().unwrap().push(lc.state());
            }
        }));

        let marker = {
            let lc = Arc::clone(&lc);
            thread::spawn(move || lc.mark_running().unwrap())
        };
        delivering_rx.recv().unwrap();

        lc.complete();
        assert_eq!(*seen.lock().unwrap(), vec![LifecycleState::Running]);
        assert!(lc.is_complete());

        assert!(marker.join().unwrap());
    }

    #[test]
    fn thousand_threads_completing_fire_exactly_one_notification() {
        const THREADS: usize = 1000;

        let lc = Arc::new(TaskLifecycle::new());
        let rec = Arc::new(Recorder::default());
        lc.subscribe(rec.clone());
        lc.mark_running().unwrap();

        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lc = Arc::clone(&lc);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    lc.complete();
                    // No stale read once our own complete() has returned.
                    assert!(lc.is_complete());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(lc.state(), LifecycleState::Completed);
        assert_eq!(rec.completions(), 1);
    }

    #[test]
    fn concurrent_begin_and_complete_only_move_forward() {
        for _ in 0..200 {
            let lc = Arc::new(TaskLifecycle::new());
            let rec = Arc::new(Recorder::default());
            lc.subscribe(rec.clone());

            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let lc = Arc::clone(&lc);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        if i % 2 == 0 {
                            let _ = lc.mark_running();
                        } else {
                            lc.complete();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            let seq = rec.applied();
            assert!(is_legal_sequence(&seq), "illegal sequence: {seq:?}");
            assert_eq!(seq.last(), Some(&LifecycleState::Completed));
            assert!(lc.is_complete());
        }
    }

    #[test]
    fn completion_is_visible_to_other_threads() {
        for _ in 0..500 {
            let lc = Arc::new(TaskLifecycle::new());
            lc.mark_running().unwrap();

            let (tx, rx) = std::sync::mpsc::channel();
            let completer = {
                let lc = Arc::clone(&lc);
                thread::spawn(move || {
                    lc.complete();
                    tx.send(()).unwrap();
                })
            };
            let reader = {
                let lc = Arc::clone(&lc);
                thread::spawn(move || {
                    rx.recv().unwrap();
                    assert!(lc.is_complete());
                })
            };
            completer.join().unwrap();
            reader.join().unwrap();
        }
    }

    #[test]
    fn delayed_completion_keeps_running_until_it_fires() {
        let lc = Arc::new(TaskLifecycle::new());
        lc.mark_running().unwrap();

        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let timer = {
            let lc = Arc::clone(&lc);
            thread::spawn(move || {
                rx.recv().unwrap();
                lc.complete();
            })
        };

        for _ in 0..5 {
            thread::sleep(Duration::from_millis(5));
            assert!(lc.is_running());
            assert!(!lc.is_complete());
        }

        tx.send(()).unwrap();
        timer.join().unwrap();
        assert!(!lc.is_running());
        assert!(lc.is_complete());
    }

    #[tokio::test]
    async fn wait_complete_resolves_after_complete() {
        let lc = Arc::new(TaskLifecycle::new());
        lc.mark_running().unwrap();

        let waiter = {
            let lc = Arc::clone(&lc);
            tokio::spawn(async move { lc.wait_complete().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        lc.complete();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn watch_state_sees_latest_state() {
        let lc = TaskLifecycle::new();
        let rx = lc.watch_state();
        assert_eq!(*rx.borrow(), LifecycleState::Initialized);

        lc.mark_running().unwrap();
        assert_eq!(*rx.borrow(), LifecycleState::Running);

        lc.complete();
        assert_eq!(*rx.borrow(), LifecycleState::Completed);
    }
}
