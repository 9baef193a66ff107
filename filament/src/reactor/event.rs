/// Readiness reported by the poller for one registration.
///
/// Error and hang-up conditions are folded into both flags so that every
/// waiter on the handle gets to observe the failure through its own
/// syscall.
pub(crate) struct Event {
    /// Slab index of the registration.
    pub(crate) token: usize,

    pub(crate) readable: bool,

    pub(crate) writable: bool,
}
