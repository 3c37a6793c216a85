//! Packet queue and drop policy.
//!
//! The queue is the only buffer between the encoders and the send thread.
//! When the media span waiting in it grows past the drop threshold, every
//! queued video packet that is not keyframe-equivalent is discarded and the
//! highest discarded priority becomes an admission watermark for new video.
//! Audio is never dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use streamout_encoder::{EncodedPacket, NalPriority};

/// Below this many buffered packets the drop policy is not evaluated.
pub const MIN_PACKETS_FOR_DROP: usize = 5;

#[derive(Debug, Default)]
struct QueueState {
    packets: VecDeque<EncodedPacket>,

    /// DTS of the most recently accepted packet.
    last_dts_usec: i64,

    /// DTS of the last packet walked by a drop pass.
    min_drop_dts_usec: i64,

    /// Video below this priority is refused.
    min_priority: NalPriority,
}

impl QueueState {
    fn check_drop(&mut self, threshold_usec: i64) -> u64 {
        if self.packets.len() < MIN_PACKETS_FOR_DROP {
            return 0;
        }

        let first_dts = match self.packets.front() {
            Some(first) => first.dts_usec,
            None => return 0,
        };

        // Frames were just dropped.
        if first_dts < self.min_drop_dts_usec {
            return 0;
        }

        let span_usec = self.last_dts_usec.saturating_sub(first_dts);
        if span_usec <= threshold_usec {
            return 0;
        }

        let dropped = self.drop_pass();
        debug!(span_usec, dropped, "Dropped queued frames");
        dropped
    }

    fn drop_pass(&mut self) -> u64 {
        let before = self.packets.len();
        let mut watermark = NalPriority::Disposable;
        let mut last_walked = self.min_drop_dts_usec;

        self.packets.retain(|packet| {
            last_walked = packet.dts_usec;
            if packet.is_audio() || packet.drop_priority == NalPriority::Highest {
                return true;
            }
            watermark = watermark.max(packet.drop_priority);
            false
        });

        self.min_priority = watermark;
        self.min_drop_dts_usec = last_walked;

        debug!(
            before,
            after = self.packets.len(),
            watermark = ?watermark,
            "Drop pass"
        );
        (before - self.packets.len()) as u64
    }
}

/// Thread-safe FIFO of encoded packets with the drop policy applied on
/// every enqueue.
#[derive(Debug)]
pub struct PacketQueue {
    state: Mutex<QueueState>,
    drop_threshold_usec: i64,
    dropped_frames: AtomicU64,
}

impl PacketQueue {
    /// Create an empty queue.
    pub fn new(drop_threshold_usec: i64) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            drop_threshold_usec,
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Evaluate the drop policy, then admit or refuse the packet.
    ///
    /// Returns whether the packet was queued. Refused video counts as a
    /// dropped frame.
    pub fn enqueue(&self, packet: EncodedPacket) -> bool {
        let mut state = self.state.lock();

        let dropped = state.check_drop(self.drop_threshold_usec);
        if dropped > 0 {
            self.dropped_frames.fetch_add(dropped, Ordering::Relaxed);
        }

        if packet.is_video() {
            if packet.drop_priority < state.min_priority {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            state.min_priority = NalPriority::Disposable;
        }

        state.last_dts_usec = packet.dts_usec;
        state.packets.push_back(packet);
        true
    }

    /// Remove and return the oldest packet.
    pub fn dequeue_front(&self) -> Option<EncodedPacket> {
        self.state.lock().packets.pop_front()
    }

    /// Clone of the oldest packet, left in place.
    pub fn peek_front(&self) -> Option<EncodedPacket> {
        self.state.lock().packets.front().cloned()
    }

    /// Release every queued packet. Returns how many were released.
    pub fn drain(&self) -> usize {
        let mut state = self.state.lock();
        let released = state.packets.len();
        state.packets.clear();
        released
    }

    /// Drain and clear drop bookkeeping for a new connection attempt.
    /// The dropped-frame count is kept.
    pub fn reset(&self) -> usize {
        let mut state = self.state.lock();
        let released = state.packets.len();
        *state = QueueState::default();
        released
    }

    pub fn len(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().packets.is_empty()
    }

    /// Current admission watermark.
    pub fn min_priority(&self) -> NalPriority {
        self.state.lock().min_priority
    }

    /// DTS recorded by the last drop pass.
    pub fn last_drop_dts_usec(&self) -> i64 {
        self.state.lock().min_drop_dts_usec
    }

    /// Frames dropped or refused over the life of the queue.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn drop_threshold_usec(&self) -> i64 {
        self.drop_threshold_usec
    }
}
