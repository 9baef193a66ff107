use crate::reactor::TimerToken;
use crate::runtime::Handle;
use crate::utils::{Fired, Signal};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Creates a future that completes after `duration`, on the current
/// runtime (see [`Handle::current`]).
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
///
/// sleep(Duration::from_millis(10)).await;
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    sleep_with(&Handle::current(), duration)
}

/// Like [`sleep`], with the timer registered on `handle`'s reactor.
pub fn sleep_with(handle: &Handle, duration: Duration) -> Sleep {
    sleep_until(handle, Instant::now() + duration)
}

/// Creates a future that completes once `deadline` has passed.
pub fn sleep_until(handle: &Handle, deadline: Instant) -> Sleep {
    Sleep {
        handle: handle.clone(),
        deadline,
        pending: None,
    }
}

struct Registration {
    token: TimerToken,
    fired: Fired,
}

/// A future that completes once a deadline is reached.
///
/// The timer is registered with the reactor on first poll and cancelled
/// if the future is dropped before completing.
pub struct Sleep {
    handle: Handle,
    deadline: Instant,
    pending: Option<Registration>,
}

impl Sleep {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if Instant::now() >= this.deadline {
            return Poll::Ready(());
        }

        let deadline = this.deadline;
        let reactor = &this.handle.reactor;
        let registration = this.pending.get_or_insert_with(|| {
            let signal = Arc::new(Signal::new());
            let fired = signal.wait();
            let token = reactor.schedule(
                deadline,
                Box::new(move || {
                    signal.fire();
                }),
            );

            Registration { token, fired }
        });

        Pin::new(&mut registration.fired).poll(cx)
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(registration) = &self.pending {
            registration.token.cancel();
        }
    }
}
