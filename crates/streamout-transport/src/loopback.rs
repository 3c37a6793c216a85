//! In-process ingest client.
//!
//! `LoopbackClient` accepts everything it is sent, optionally at a capped
//! bandwidth, and reports status through the same queue a network client
//! would. Its behavior is scriptable so it doubles as a dry-run sink for the
//! host and as a test double.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use streamout_encoder::PacketKind;
use tracing::{debug, info, trace};

use crate::client::{
    EventKind, EventReason, IngestClient, IngestConnector, IngestParams, SpeedTestResult,
    StatusMessage,
};
use crate::status::IngestStatus;

/// Scripted behavior of a loopback client.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Status returned by the connector's `create`.
    pub create_status: IngestStatus,

    /// Status returned by `connect`.
    pub connect_status: IngestStatus,

    /// How long `connect` takes before answering.
    pub connect_delay: Duration,

    /// Fail the N-th send call (1-based).
    pub fail_send_on_call: Option<usize>,

    /// Status reported by the failing send.
    pub send_failure: IngestStatus,

    /// Bandwidth cap in kbps. `None` accepts data instantly.
    pub max_kbps: Option<u32>,

    /// Status returned by `speed_test`.
    pub speed_test_status: IngestStatus,

    /// Keep a copy of every sent unit.
    pub record_sends: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            create_status: IngestStatus::Success,
            connect_status: IngestStatus::Success,
            connect_delay: Duration::ZERO,
            fail_send_on_call: None,
            send_failure: IngestStatus::SocketNotConnected,
            max_kbps: None,
            speed_test_status: IngestStatus::Success,
            record_sends: false,
        }
    }
}

/// A unit accepted by the loopback client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentUnit {
    pub kind: PacketKind,
    pub dts_usec: i64,
    pub data: Bytes,
    pub end_of_unit: bool,
}

#[derive(Debug, Default)]
struct LoopbackState {
    connected: bool,
    destroyed: bool,
    bytes_accepted: u64,
    throttle_start: Option<Instant>,
    sent: Vec<SentUnit>,
}

/// Ingest client that keeps everything in process.
pub struct LoopbackClient {
    config: LoopbackConfig,
    params: Mutex<IngestParams>,
    state: Mutex<LoopbackState>,
    send_calls: AtomicUsize,
    status_tx: Sender<StatusMessage>,
    status_rx: Receiver<StatusMessage>,
}

impl LoopbackClient {
    /// Create a client for the given parameters.
    pub fn new(params: IngestParams, config: LoopbackConfig) -> Self {
        let (status_tx, status_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            params: Mutex::new(params),
            state: Mutex::new(LoopbackState::default()),
            send_calls: AtomicUsize::new(0),
            status_tx,
            status_rx,
        }
    }

    /// Queue a status message as if the remote side had produced it.
    pub fn inject(&self, message: StatusMessage) {
        let _ = self.status_tx.send(message);
    }

    /// Simulate the ingest dropping the session.
    pub fn remote_disconnect(&self) {
        self.state.lock().connected = false;
        self.inject(StatusMessage::Event {
            kind: EventKind::Disconnected,
            reason: EventReason::NoMedia,
            error_code: IngestStatus::NoMediaTimeout,
        });
    }

    /// Number of `send` calls so far, failed ones included.
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Total bytes accepted.
    pub fn bytes_accepted(&self) -> u64 {
        self.state.lock().bytes_accepted
    }

    /// Recorded units, if recording is enabled.
    pub fn sent_units(&self) -> Vec<SentUnit> {
        self.state.lock().sent.clone()
    }

    /// Current parameters, including any pushed with `update_params`.
    pub fn params(&self) -> IngestParams {
        self.params.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// How long to hold the caller so the cap is respected.
    fn throttle_delay(&self, state: &mut LoopbackState) -> Option<Duration> {
        let kbps = self.config.max_kbps.filter(|kbps| *kbps > 0)?;
        let started = *state.throttle_start.get_or_insert_with(Instant::now);
        let due = Duration::from_secs_f64(state.bytes_accepted as f64 * 8.0 / (kbps as f64 * 1000.0));
        due.checked_sub(started.elapsed())
    }
}

impl IngestClient for LoopbackClient {
    fn connect(&self) -> Result<(), IngestStatus> {
        if !self.config.connect_delay.is_zero() {
            thread::sleep(self.config.connect_delay);
        }
        if !self.config.connect_status.is_success() {
            debug!(status = %self.config.connect_status, "Loopback connect refused");
            return Err(self.config.connect_status);
        }

        let mut state = self.state.lock();
        if state.destroyed {
            return Err(IngestStatus::NotInitialized);
        }
        if state.connected {
            return Err(IngestStatus::AlreadyConnected);
        }
        state.connected = true;
        drop(state);

        info!(host = %self.params.lock().ingest_hostname, "Loopback connected");
        self.inject(StatusMessage::Event {
            kind: EventKind::Connected,
            reason: EventReason::None,
            error_code: IngestStatus::Success,
        });
        Ok(())
    }

    fn send(
        &self,
        kind: PacketKind,
        dts_usec: i64,
        data: &[u8],
        end_of_unit: bool,
    ) -> Result<usize, IngestStatus> {
        let call = self.send_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.config.fail_send_on_call == Some(call) {
            debug!(call, "Loopback send failing as scripted");
            return Err(self.config.send_failure);
        }

        let delay = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(IngestStatus::NotConnected);
            }
            state.bytes_accepted += data.len() as u64;
            if self.config.record_sends {
                state.sent.push(SentUnit {
                    kind,
                    dts_usec,
                    data: Bytes::copy_from_slice(data),
                    end_of_unit,
                });
            }
            self.throttle_delay(&mut state)
        };

        trace!(len = data.len(), dts_usec, end_of_unit, "Loopback accepted unit");

        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        Ok(data.len())
    }

    fn disconnect(&self) -> Result<(), IngestStatus> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(IngestStatus::NotInitialized);
        }
        state.connected = false;
        drop(state);

        debug!("Loopback disconnected");
        self.inject(StatusMessage::Event {
            kind: EventKind::Disconnected,
            reason: EventReason::ApiRequest,
            error_code: IngestStatus::UserDisconnect,
        });
        Ok(())
    }

    fn destroy(&self) -> Result<(), IngestStatus> {
        let mut state = self.state.lock();
        state.connected = false;
        state.destroyed = true;
        Ok(())
    }

    fn poll_status(&self, timeout: Duration) -> Result<StatusMessage, IngestStatus> {
        if self.state.lock().destroyed {
            return Err(IngestStatus::NotInitialized);
        }

        match self.status_rx.recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => Err(IngestStatus::StatusTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(IngestStatus::NotInitialized),
        }
    }

    fn speed_test(
        &self,
        target_kbps: u32,
        duration: Duration,
    ) -> Result<SpeedTestResult, IngestStatus> {
        if !self.config.speed_test_status.is_success() {
            return Err(self.config.speed_test_status);
        }

        let peak_kbps = self
            .config
            .max_kbps
            .map_or(target_kbps, |cap| cap.min(target_kbps));
        let packets_sent = (duration.as_millis() as u32).max(1);

        Ok(SpeedTestResult {
            peak_kbps,
            starting_rtt_ms: 1,
            ending_rtt_ms: 1,
            packets_sent,
            packets_lost: 0,
        })
    }

    fn update_params(&self, params: &IngestParams) -> Result<(), IngestStatus> {
        *self.params.lock() = params.clone();
        Ok(())
    }
}

/// Connector that hands out loopback clients and remembers them.
#[derive(Default)]
pub struct LoopbackConnector {
    config: LoopbackConfig,
    clients: Mutex<Vec<Arc<LoopbackClient>>>,
}

impl LoopbackConnector {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Every client created so far, oldest first.
    pub fn clients(&self) -> Vec<Arc<LoopbackClient>> {
        self.clients.lock().clone()
    }

    /// The most recently created client.
    pub fn last_client(&self) -> Option<Arc<LoopbackClient>> {
        self.clients.lock().last().cloned()
    }
}

impl IngestConnector for LoopbackConnector {
    fn create(&self, params: &IngestParams) -> Result<Arc<dyn IngestClient>, IngestStatus> {
        if !self.config.create_status.is_success() {
            return Err(self.config.create_status);
        }

        let client = Arc::new(LoopbackClient::new(params.clone(), self.config.clone()));
        self.clients.lock().push(Arc::clone(&client));
        Ok(client)
    }
}
