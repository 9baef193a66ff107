use crate::reactor::{Reactor, TimerToken};
use crate::runtime::Handle;

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::trace;

/// The reactor entry currently standing for a timer.
struct Entry {
    id: u64,
    token: TimerToken,
}

struct State {
    /// When the timer expires; `None` while disarmed.
    deadline: Option<Instant>,
    /// At most one live reactor entry. It may be earlier than
    /// `deadline`, in which case it reschedules itself when it fires.
    entry: Option<Entry>,
    next_entry: u64,
}

struct Inner {
    reactor: Arc<dyn Reactor>,
    period: Duration,
    on_expiry: Box<dyn Fn() + Send + Sync>,
    state: Mutex<State>,
}

/// A restartable one-shot timer.
///
/// Each [`restart`](Self::restart) pushes the expiry back to one period
/// from now; when a period passes without a restart, the expiry callback
/// runs once on a worker. Used for per-connection inactivity timeouts.
///
/// Restarting only moves the stored deadline. The reactor holds a single
/// entry per timer, which moves itself forward when it fires early.
///
/// Dropping the timer cancels a pending expiry.
pub struct Timer {
    inner: Arc<Inner>,
}

impl Timer {
    /// Creates a disarmed timer.
    pub fn new<F>(handle: &Handle, period: Duration, on_expiry: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_reactor(handle.reactor.clone(), period, on_expiry)
    }

    pub(crate) fn with_reactor<F>(reactor: Arc<dyn Reactor>, period: Duration, on_expiry: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                reactor,
                period,
                on_expiry: Box::new(on_expiry),
                state: Mutex::new(State {
                    deadline: None,
                    entry: None,
                    next_entry: 0,
                }),
            }),
        }
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    /// Arms the timer for one period from now, replacing any pending
    /// expiry.
    pub fn restart(&self) {
        let mut state = self.inner.state.lock().unwrap();

        let deadline = Instant::now() + self.inner.period;
        state.deadline = Some(deadline);

        if state.entry.is_none() {
            schedule(&self.inner, &mut state, deadline);
        }
    }

    /// Disarms the timer. A later `restart` arms it again.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock().unwrap();

        state.deadline = None;
        if let Some(entry) = state.entry.take() {
            entry.token.cancel();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().unwrap().deadline.is_some()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn schedule(inner: &Arc<Inner>, state: &mut State, deadline: Instant) {
    let id = state.next_entry;
    state.next_entry += 1;

    let weak = Arc::downgrade(inner);
    let token = inner
        .reactor
        .schedule(deadline, Box::new(move || expire(weak, id)));

    state.entry = Some(Entry { id, token });
}

fn expire(inner: Weak<Inner>, id: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    {
        let mut state = inner.state.lock().unwrap();
        if state.entry.as_ref().map(|entry| entry.id) != Some(id) {
            return;
        }
        state.entry = None;

        let Some(deadline) = state.deadline else {
            return;
        };
        if deadline > Instant::now() {
            schedule(&inner, &mut state, deadline);
            return;
        }
        state.deadline = None;
    }

    trace!(period = ?inner.period, "timer expired");
    (inner.on_expiry)();
}

#[cfg(test)]
mod tests {
    use super::Timer;
    use crate::reactor::{
        Callback, IoRequest, ListenCallback, Model, RawHandle, Reactor, TimerCallback, TimerToken,
        WaitToken,
    };

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Keeps scheduled timers in a list; tests fire them by hand.
    #[derive(Default)]
    struct ManualTimers {
        entries: Mutex<Vec<(Instant, TimerCallback, TimerToken)>>,
    }

    impl ManualTimers {
        fn live(&self) -> usize {
            let entries = self.entries.lock().unwrap();
            entries.iter().filter(|(_, _, token)| !token.is_cancelled()).count()
        }

        fn scheduled(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        /// Runs every live entry that is due.
        fn fire_due(&self) {
            let now = Instant::now();
            let due: Vec<_> = {
                let mut entries = self.entries.lock().unwrap();
                let (due, pending) = entries
                    .drain(..)
                    .partition(|(deadline, _, token)| *deadline <= now && !token.is_cancelled());
                *entries = pending;
                due
            };

            for (_, callback, _) in due {
                callback();
            }
        }
    }

    impl Reactor for ManualTimers {
        fn model(&self) -> Model {
            Model::Readiness
        }

        fn wait_readable(&self, _: RawHandle, _: IoRequest, _: Callback) -> WaitToken {
            unreachable!("timers only")
        }

        fn wait_writable(&self, _: RawHandle, _: IoRequest, _: Callback) -> WaitToken {
            unreachable!("timers only")
        }

        fn register_listener(&self, _: RawHandle, _: IoRequest, _: ListenCallback) -> WaitToken {
            unreachable!("timers only")
        }

        fn deregister_listener(&self, _: RawHandle, _: WaitToken) {}

        fn abort_waiter(&self, _: WaitToken) {}

        fn schedule(&self, deadline: Instant, callback: TimerCallback) -> TimerToken {
            let token = TimerToken::new();
            self.entries
                .lock()
                .unwrap()
                .push((deadline, callback, token.clone()));
            token
        }

        fn shutdown(&self) {}
    }

    fn timer(period: Duration) -> (Arc<ManualTimers>, Timer, Arc<AtomicUsize>) {
        let reactor = Arc::new(ManualTimers::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let timer = Timer::with_reactor(reactor.clone(), period, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        (reactor, timer, fired)
    }

    #[test]
    fn restarts_reuse_one_reactor_entry() {
        let (reactor, timer, fired) = timer(Duration::from_millis(20));

        for _ in 0..1000 {
            timer.restart();
        }
        assert_eq!(reactor.scheduled(), 1);

        // The entry fires before the latest deadline and moves forward.
        thread::sleep(Duration::from_millis(25));
        timer.restart();
        reactor.fire_due();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(reactor.live(), 1);

        thread::sleep(Duration::from_millis(25));
        reactor.fire_due();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(reactor.live(), 0);
        assert!(!timer.is_armed());
    }

    #[test]
    fn cancel_drops_the_entry() {
        let (reactor, timer, fired) = timer(Duration::from_millis(5));

        timer.restart();
        timer.cancel();
        assert_eq!(reactor.live(), 0);

        thread::sleep(Duration::from_millis(10));
        reactor.fire_due();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        timer.restart();
        assert_eq!(reactor.live(), 1);
    }
}
