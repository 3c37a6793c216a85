//! Shared session state for the output threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// How the send thread has been asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// No stop requested.
    #[default]
    Running,

    /// Exit as soon as the send thread wakes.
    Immediate,

    /// Keep sending until the queue is empty, a packet reaches the
    /// deadline, or the drain runs out of time.
    Drain {
        /// Host system-clock deadline in microseconds.
        deadline_usec: i64,

        /// Hard limit on the drain.
        give_up_at: Instant,
    },
}

/// Stop request plus deadline. A zero deadline means immediate.
#[derive(Debug, Default)]
pub struct StopSignal {
    mode: Mutex<StopMode>,
}

impl StopSignal {
    /// Record a stop request.
    ///
    /// A timed request is ignored once any stop is pending; an immediate
    /// request always wins. Returns whether the request took effect.
    pub fn request(&self, deadline_usec: i64, max_drain: Duration) -> bool {
        let mut mode = self.mode.lock();

        if deadline_usec <= 0 {
            *mode = StopMode::Immediate;
            return true;
        }

        if *mode != StopMode::Running {
            return false;
        }

        *mode = StopMode::Drain {
            deadline_usec,
            give_up_at: Instant::now() + max_drain,
        };
        true
    }

    pub fn mode(&self) -> StopMode {
        *self.mode.lock()
    }

    pub fn is_requested(&self) -> bool {
        self.mode() != StopMode::Running
    }

    pub fn is_immediate(&self) -> bool {
        self.mode() == StopMode::Immediate
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.mode(), StopMode::Drain { .. })
    }

    /// Whether a draining send thread should stop before sending a packet
    /// stamped `system_dts_usec`.
    pub fn drain_finished(&self, system_dts_usec: i64) -> bool {
        match self.mode() {
            StopMode::Running => false,
            StopMode::Immediate => true,
            StopMode::Drain {
                deadline_usec,
                give_up_at,
            } => system_dts_usec >= deadline_usec || Instant::now() >= give_up_at,
        }
    }

    pub fn reset(&self) {
        *self.mode.lock() = StopMode::Running;
    }
}

/// Counting wake signal from producers to the send thread.
#[derive(Debug)]
pub struct WakeSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for WakeSignal {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }
}

impl WakeSignal {
    /// Add one wake-up.
    pub fn post(&self) {
        let _ = self.tx.send(());
    }

    /// Block until a wake-up is available and consume it.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }

    /// Discard pending wake-ups.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Flags and counters shared by the connect, status and send threads.
///
/// Byte and frame counters live for the whole output. Everything else is
/// reset by [`begin_attempt`](Self::begin_attempt).
#[derive(Debug, Default)]
pub struct SessionState {
    connecting: AtomicBool,
    active: AtomicBool,
    disconnected: AtomicBool,
    stop_signaled: AtomicBool,
    capture_open: AtomicBool,
    bytes_sent: AtomicU64,
    frames_sent: AtomicU64,
    pub stop: StopSignal,
    pub wake: WakeSignal,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear connection-scoped state for a new attempt.
    pub fn begin_attempt(&self) {
        self.disconnected.store(false, Ordering::SeqCst);
        self.stop_signaled.store(false, Ordering::SeqCst);
        self.capture_open.store(false, Ordering::SeqCst);
        self.stop.reset();
        self.wake.clear();
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    pub fn set_connecting(&self, connecting: bool) {
        self.connecting.store(connecting, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn set_disconnected(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Claim the single stop signal of this attempt.
    pub fn claim_stop_signal(&self) -> bool {
        !self.stop_signaled.swap(true, Ordering::SeqCst)
    }

    /// Open the capture bracket. Returns false if already open.
    pub fn open_capture(&self) -> bool {
        !self.capture_open.swap(true, Ordering::SeqCst)
    }

    /// Close the capture bracket. Returns false if it was not open.
    pub fn close_capture(&self) -> bool {
        self.capture_open.swap(false, Ordering::SeqCst)
    }

    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_modes() {
        let stop = StopSignal::default();
        assert!(!stop.is_requested());
        assert!(!stop.drain_finished(i64::MAX));

        assert!(stop.request(5_000_000, Duration::from_secs(5)));
        assert!(stop.is_draining());
        assert!(!stop.drain_finished(4_999_999));
        assert!(stop.drain_finished(5_000_000));

        // A second timed stop is ignored; an immediate one upgrades.
        assert!(!stop.request(9_000_000, Duration::from_secs(5)));
        assert!(stop.request(0, Duration::from_secs(5)));
        assert!(stop.is_immediate());
        assert!(stop.drain_finished(0));

        stop.reset();
        assert_eq!(stop.mode(), StopMode::Running);
    }

    #[test]
    fn test_drain_gives_up() {
        let stop = StopSignal::default();
        stop.request(i64::MAX, Duration::ZERO);
        assert!(stop.drain_finished(0));
    }

    #[test]
    fn test_wake_signal_counts() {
        let wake = WakeSignal::default();
        wake.post();
        wake.post();
        wake.wait();
        wake.wait();

        wake.post();
        wake.clear();
        assert!(wake.rx.try_recv().is_err());
    }

    #[test]
    fn test_once_guards_reset_per_attempt() {
        let session = SessionState::new();
        session.add_bytes_sent(100);
        session.record_frame_sent();

        assert!(session.claim_stop_signal());
        assert!(!session.claim_stop_signal());
        assert!(session.open_capture());
        assert!(!session.open_capture());
        assert!(session.close_capture());
        assert!(!session.close_capture());
        session.set_disconnected();

        session.begin_attempt();
        assert!(session.claim_stop_signal());
        assert!(!session.is_disconnected());
        assert_eq!(session.bytes_sent(), 100);
        assert_eq!(session.frames_sent(), 1);
    }
}
