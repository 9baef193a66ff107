use super::command::{Command, Direction};
use super::event::Event;
use super::poller::{Interest, Poller, Waker};
use super::timer::{TimerEntry, TimerToken, Timers};
use super::{
    Callback, IoRequest, ListenCallback, Model, Notification, RawHandle, Reactor, TimerCallback,
    WaitToken,
};
use crate::runtime::Scheduler;
use crate::utils::Slab;

use std::collections::HashMap;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, trace, warn};

/// Readiness backend over `epoll` / `kqueue`.
///
/// All registration state lives on the reactor thread. Other threads
/// talk to it through a command channel and wake its poller after every
/// command.
pub(crate) struct ReadinessReactor {
    sender: Mutex<Sender<Command>>,
    waker: Arc<Waker>,
    next_token: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ReadinessReactor {
    /// Spawns the reactor thread.
    pub(crate) fn start(scheduler: Scheduler) -> io::Result<Arc<Self>> {
        let poller = Poller::new()?;
        let waker = poller.waker();
        let (sender, receiver) = channel();

        let core = Core {
            receiver,
            sender: sender.clone(),
            waker: waker.clone(),
            poller,
            events: Vec::with_capacity(256),
            timers: Timers::default(),
            registrations: Slab::with_capacity(64),
            by_handle: HashMap::new(),
            by_token: HashMap::new(),
            scheduler,
        };

        let thread = thread::Builder::new()
            .name("filament-reactor".into())
            .spawn(move || core.run())?;

        debug!("readiness reactor started");

        Ok(Arc::new(Self {
            sender: Mutex::new(sender),
            waker,
            next_token: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        }))
    }

    fn send(&self, command: Command) {
        let _ = self.sender.lock().unwrap().send(command);
        self.waker.wake();
    }

    fn token(&self) -> WaitToken {
        WaitToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn wait(&self, handle: RawHandle, direction: Direction, callback: Callback) -> WaitToken {
        let token = self.token();
        self.send(Command::Wait {
            handle,
            direction,
            token,
            callback,
        });
        token
    }
}

impl Reactor for ReadinessReactor {
    fn model(&self) -> Model {
        Model::Readiness
    }

    fn wait_readable(&self, handle: RawHandle, _: IoRequest, callback: Callback) -> WaitToken {
        self.wait(handle, Direction::Read, callback)
    }

    fn wait_writable(&self, handle: RawHandle, _: IoRequest, callback: Callback) -> WaitToken {
        self.wait(handle, Direction::Write, callback)
    }

    fn register_listener(
        &self,
        handle: RawHandle,
        _: IoRequest,
        callback: ListenCallback,
    ) -> WaitToken {
        let token = self.token();
        self.send(Command::Listen {
            handle,
            token,
            callback,
        });
        token
    }

    fn deregister_listener(&self, handle: RawHandle, token: WaitToken) {
        self.send(Command::Unlisten { handle, token });
    }

    fn abort_waiter(&self, token: WaitToken) {
        self.send(Command::Abort { token });
    }

    fn schedule(&self, deadline: Instant, callback: TimerCallback) -> TimerToken {
        let token = TimerToken::new();
        self.send(Command::SetTimer {
            deadline,
            callback,
            token: token.clone(),
        });
        token
    }

    fn shutdown(&self) {
        self.send(Command::Shutdown);

        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }

        debug!("readiness reactor stopped");
    }
}

struct Waiter {
    token: WaitToken,
    callback: Callback,
}

struct Listening {
    token: WaitToken,
    callback: ListenCallback,

    /// Cleared while a delivery is in flight.
    armed: bool,
}

/// Everything waiting on one OS handle.
struct Registration {
    handle: RawHandle,
    read: Option<Waiter>,
    write: Option<Waiter>,
    listener: Option<Listening>,

    /// Interest currently installed in the poller.
    registered: Interest,
}

impl Registration {
    fn desired(&self) -> Interest {
        Interest {
            read: self.read.is_some() || self.listener.as_ref().is_some_and(|l| l.armed),
            write: self.write.is_some(),
        }
    }

    fn is_idle(&self) -> bool {
        self.read.is_none() && self.write.is_none() && self.listener.is_none()
    }
}

/// Reactor state, owned by the reactor thread.
struct Core {
    receiver: Receiver<Command>,

    /// Used by listener deliveries to re-arm themselves.
    sender: Sender<Command>,
    waker: Arc<Waker>,

    poller: Poller,
    events: Vec<Event>,
    timers: Timers,

    registrations: Slab<Registration>,
    by_handle: HashMap<RawHandle, usize>,
    by_token: HashMap<WaitToken, usize>,

    scheduler: Scheduler,
}

impl Core {
    fn run(mut self) {
        loop {
            loop {
                match self.receiver.try_recv() {
                    Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => return,
                    Ok(command) => self.apply(command),
                    Err(TryRecvError::Empty) => break,
                }
            }

            let timeout = self.timers.next_timeout(Instant::now());
            let mut events = mem::take(&mut self.events);

            if let Err(err) = self.poller.poll(&mut events, timeout) {
                error!(%err, "poller failed, reactor exiting");
                return;
            }

            for event in events.drain(..) {
                self.handle_event(event);
            }
            self.events = events;

            for callback in self.timers.expired(Instant::now()) {
                self.scheduler.dispatch(callback);
            }
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Wait {
                handle,
                direction,
                token,
                callback,
            } => {
                let key = self.entry(handle);
                let registration = &mut self.registrations[key];

                let slot = match direction {
                    Direction::Read => &mut registration.read,
                    Direction::Write => &mut registration.write,
                };

                if let Some(previous) = slot.replace(Waiter { token, callback }) {
                    warn!(handle, ?direction, "replacing an outstanding waiter");
                    self.by_token.remove(&previous.token);
                }

                trace!(handle, ?direction, ?token, "wait registered");
                self.by_token.insert(token, key);
                self.sync(key);
            }

            Command::Listen {
                handle,
                token,
                callback,
            } => {
                let key = self.entry(handle);
                self.registrations[key].listener = Some(Listening {
                    token,
                    callback,
                    armed: true,
                });

                trace!(handle, ?token, "listener registered");
                self.by_token.insert(token, key);
                self.sync(key);
            }

            Command::Unlisten { handle, token } => {
                if let Some(key) = self.by_token.remove(&token) {
                    let registration = &mut self.registrations[key];
                    if registration.listener.as_ref().is_some_and(|l| l.token == token) {
                        registration.listener = None;
                    }

                    trace!(handle, ?token, "listener deregistered");
                    self.sync(key);
                }
            }

            Command::Rearm { token } => {
                if let Some(&key) = self.by_token.get(&token) {
                    if let Some(listener) = self.registrations[key].listener.as_mut() {
                        if listener.token == token {
                            listener.armed = true;
                        }
                    }
                    self.sync(key);
                }
            }

            Command::Abort { token } => {
                if let Some(key) = self.by_token.remove(&token) {
                    let registration = &mut self.registrations[key];

                    if registration.read.as_ref().is_some_and(|w| w.token == token) {
                        registration.read = None;
                    } else if registration.write.as_ref().is_some_and(|w| w.token == token) {
                        registration.write = None;
                    } else if registration.listener.as_ref().is_some_and(|l| l.token == token) {
                        registration.listener = None;
                    }

                    trace!(?token, "waiter aborted");
                    self.sync(key);
                }
            }

            Command::SetTimer {
                deadline,
                callback,
                token,
            } => self.timers.push(TimerEntry {
                deadline,
                callback,
                token,
            }),

            Command::Shutdown => {}
        }
    }

    /// Returns the registration for `handle`, creating an empty one.
    fn entry(&mut self, handle: RawHandle) -> usize {
        if let Some(&key) = self.by_handle.get(&handle) {
            return key;
        }

        let key = self.registrations.insert(Registration {
            handle,
            read: None,
            write: None,
            listener: None,
            registered: Interest::NONE,
        });
        self.by_handle.insert(handle, key);
        key
    }

    fn handle_event(&mut self, event: Event) {
        let Some(registration) = self.registrations.get_mut(event.token) else {
            return;
        };

        if event.readable {
            if let Some(waiter) = registration.read.take() {
                self.by_token.remove(&waiter.token);
                self.scheduler
                    .dispatch(move || (waiter.callback)(Notification::Ready));
            }

            if let Some(listener) = registration.listener.as_mut() {
                if listener.armed {
                    listener.armed = false;

                    let callback = listener.callback.clone();
                    let token = listener.token;
                    let sender = self.sender.clone();
                    let waker = self.waker.clone();

                    self.scheduler.dispatch(move || {
                        callback(Notification::Ready);
                        let _ = sender.send(Command::Rearm { token });
                        waker.wake();
                    });
                }
            }
        }

        if event.writable {
            if let Some(waiter) = registration.write.take() {
                self.by_token.remove(&waiter.token);
                self.scheduler
                    .dispatch(move || (waiter.callback)(Notification::Ready));
            }
        }

        self.sync(event.token);
    }

    /// Brings the poller's interest in line with the live waiters, and
    /// drops the registration once nothing waits on it.
    fn sync(&mut self, key: usize) {
        let Some(registration) = self.registrations.get_mut(key) else {
            return;
        };

        let desired = registration.desired();
        let handle = registration.handle;

        if desired != registration.registered {
            let result = if desired.is_empty() {
                self.poller.deregister(handle);
                Ok(())
            } else if registration.registered.is_empty() {
                self.poller.register(handle, key, desired)
            } else {
                self.poller.reregister(handle, key, desired)
            };

            match result {
                Ok(()) => registration.registered = desired,
                Err(err) => {
                    warn!(handle, %err, "poller registration failed");
                    registration.registered = Interest::NONE;
                    self.fail(key, err);
                }
            }
        }

        if self.registrations[key].is_idle() {
            if let Some(registration) = self.registrations.remove(key) {
                if !registration.registered.is_empty() {
                    self.poller.deregister(registration.handle);
                }
                self.by_handle.remove(&registration.handle);

                trace!(
                    handle = registration.handle,
                    live = self.registrations.len(),
                    "registration dropped"
                );
            }
        }
    }

    /// Delivers a registration failure to everything waiting on `key`.
    fn fail(&mut self, key: usize, err: io::Error) {
        let registration = &mut self.registrations[key];
        let kind = err.kind();
        let message = err.to_string();

        let waiters = [registration.read.take(), registration.write.take()];
        let listener = registration.listener.take();

        for waiter in waiters.into_iter().flatten() {
            self.by_token.remove(&waiter.token);
            let err = io::Error::new(kind, message.clone());
            self.scheduler
                .dispatch(move || (waiter.callback)(Notification::Failed(err)));
        }

        if let Some(listener) = listener {
            self.by_token.remove(&listener.token);
            let err = io::Error::new(kind, message);
            self.scheduler
                .dispatch(move || (listener.callback)(Notification::Failed(err)));
        }
    }
}
