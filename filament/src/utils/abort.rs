use std::sync::atomic::{AtomicU8, Ordering};

/// Bit set once an abort has been requested.
const ABORT_REQUESTED: u8 = 0b01;

/// Bit set while an OS-level step is in flight.
const STARTED: u8 = 0b10;

/// Two-bit cancellation state shared by a request and its aborter.
///
/// Whichever of "start an OS step" and "request abort" happens second is
/// the one that must issue the cancel. Both transitions are a single
/// `fetch_or`, so exactly one side observes the other's bit and the
/// cancel primitive runs exactly once per started step.
pub(crate) struct AbortState {
    bits: AtomicU8,
}

impl AbortState {
    pub(crate) const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
        }
    }

    /// Marks an OS step as started.
    ///
    /// Returns `true` if an abort was already requested, in which case
    /// the caller must cancel the step it just issued.
    pub(crate) fn start(&self) -> bool {
        self.bits.fetch_or(STARTED, Ordering::AcqRel) & ABORT_REQUESTED != 0
    }

    /// Marks the in-flight step as finished.
    pub(crate) fn settle(&self) {
        self.bits.fetch_and(!STARTED, Ordering::AcqRel);
    }

    /// Requests an abort.
    ///
    /// Returns `true` if a step is in flight and this call is the first
    /// abort request, in which case the caller must cancel that step.
    pub(crate) fn request_abort(&self) -> bool {
        let previous = self.bits.fetch_or(ABORT_REQUESTED, Ordering::AcqRel);
        previous & STARTED != 0 && previous & ABORT_REQUESTED == 0
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.bits.load(Ordering::Acquire) & ABORT_REQUESTED != 0
    }
}

#[cfg(test)]
mod tests {
    use super::AbortState;

    #[test]
    fn abort_after_start_cancels_once() {
        let state = AbortState::new();

        assert!(!state.start());
        assert!(state.request_abort());
        assert!(!state.request_abort());
        assert!(state.is_aborted());
    }

    #[test]
    fn start_after_abort_cancels_immediately() {
        let state = AbortState::new();

        assert!(!state.request_abort());
        assert!(state.start());
    }

    #[test]
    fn settled_step_needs_no_cancel() {
        let state = AbortState::new();

        assert!(!state.start());
        state.settle();
        assert!(!state.request_abort());
    }
}
