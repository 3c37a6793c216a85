//! Ingest output.
//!
//! One output owns one streaming session at a time. `start` spawns a
//! connect thread; once the ingest accepts the connection the connect
//! thread starts a status thread, which watches the client's status queue,
//! and a send thread, which drains the packet queue into the client.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use streamout_encoder::{EncodedPacket, HeaderSource, PacketKind};
use streamout_ipc::{OutputConfig, OutputEvent, OutputState, StopReason};
use streamout_transport::{
    classify_status, IngestClient, IngestConnector, IngestParams, IngestStatus, PayloadMode,
    StatusAction, TransportError, TransportResult, UnitExtractor,
};

use crate::error::OutputError;
use crate::metrics::{log_status, OutputStats};
use crate::queue::PacketQueue;
use crate::session::SessionState;
use crate::OutputResult;

/// Streams encoded packets to an ingest server.
pub struct IngestOutput {
    inner: Arc<Inner>,
}

struct Inner {
    config: OutputConfig,
    connector: Arc<dyn IngestConnector>,
    headers: Arc<dyn HeaderSource>,
    event_tx: Sender<OutputEvent>,
    queue: PacketQueue,
    session: SessionState,
    extractor: UnitExtractor,
    state: RwLock<OutputState>,

    /// Measured or configured peak bitrate, kept across reconnects.
    peak_kbps: Mutex<Option<u32>>,

    connect_thread: Mutex<Option<JoinHandle<()>>>,
    status_thread: Mutex<Option<JoinHandle<()>>>,
    send_thread: Mutex<Option<JoinHandle<()>>>,
}

impl IngestOutput {
    /// Create an idle output.
    ///
    /// The host must keep draining the receiving end of `event_tx`: the
    /// terminal `Stopped` event waits for room rather than being dropped.
    pub fn new(
        config: OutputConfig,
        connector: Arc<dyn IngestConnector>,
        headers: Arc<dyn HeaderSource>,
        event_tx: Sender<OutputEvent>,
    ) -> Self {
        let queue = PacketQueue::new(config.drop_threshold_usec());
        let extractor = UnitExtractor::new(config.max_units_per_access_unit);
        let peak_kbps = Mutex::new(config.peak_bitrate_kbps);

        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                headers,
                event_tx,
                queue,
                session: SessionState::new(),
                extractor,
                state: RwLock::new(OutputState::Idle),
                peak_kbps,
                connect_thread: Mutex::new(None),
                status_thread: Mutex::new(None),
                send_thread: Mutex::new(None),
            }),
        }
    }

    /// Begin a connection attempt.
    ///
    /// Returns once the connect thread is running. The outcome of the
    /// attempt is reported through events.
    #[instrument(name = "output_start", skip(self))]
    pub fn start(&self) -> OutputResult<()> {
        let inner = &self.inner;

        if inner.session.is_connecting() || inner.session.is_active() {
            return Err(OutputError::AlreadyStarted);
        }
        inner.config.validate()?;

        // Reap the threads of the previous attempt.
        inner.join_workers();

        inner.session.begin_attempt();
        let released = inner.queue.reset();
        if released > 0 {
            debug!(released, "Released packets from previous session");
        }

        inner.session.set_connecting(true);
        inner.transition_to(OutputState::Connecting);

        let worker = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name("streamout-connect".to_string())
            .spawn(move || worker.run_connect());

        match spawned {
            Ok(handle) => {
                *inner.connect_thread.lock() = Some(handle);
                Ok(())
            }
            Err(source) => {
                inner.session.set_connecting(false);
                inner.transition_to(OutputState::Idle);
                Err(OutputError::ThreadSpawn {
                    name: "connect",
                    source,
                })
            }
        }
    }

    /// Request a stop.
    ///
    /// A zero deadline stops immediately. Otherwise queued packets keep
    /// going out until the queue is empty or a packet's system timestamp
    /// reaches `deadline_usec`, bounded by the configured shutdown time.
    #[instrument(name = "output_stop", skip(self))]
    pub fn stop(&self, deadline_usec: i64) {
        let inner = &self.inner;
        let max_drain = Duration::from_secs(inner.config.max_shutdown_time_secs);

        if !inner.session.stop.request(deadline_usec, max_drain) {
            debug!("Stop already pending");
            return;
        }

        if inner.session.is_connecting() {
            let handle = inner.connect_thread.lock().take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("Connect thread panicked");
                }
            }
        }

        if inner.session.is_active() {
            info!(deadline_usec, "Stopping stream");
            inner.transition_to(OutputState::Draining);
            inner.session.wake.post();
        } else {
            inner.signal_stopped(StopReason::User);
        }
    }

    /// Queue a packet for sending. Returns whether it was accepted.
    pub fn submit_packet(&self, packet: EncodedPacket) -> bool {
        let inner = &self.inner;

        if inner.session.is_disconnected() || !inner.session.is_active() {
            return false;
        }
        if packet.is_empty() {
            warn!(dts_usec = packet.dts_usec, "Ignoring empty packet");
            return false;
        }

        let accepted = inner.queue.enqueue(packet);
        if accepted {
            inner.session.wake.post();
        }
        accepted
    }

    /// Bytes accepted by the ingest over the life of the output.
    pub fn total_bytes_sent(&self) -> u64 {
        self.inner.session.bytes_sent()
    }

    /// Video frames dropped over the life of the output.
    pub fn dropped_frame_count(&self) -> u64 {
        self.inner.queue.dropped_frames()
    }

    /// Video frames fully sent over the life of the output.
    pub fn frames_sent(&self) -> u64 {
        self.inner.session.frames_sent()
    }

    pub fn queued_packets(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn state(&self) -> OutputState {
        *self.inner.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.inner.session.is_active()
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.session.is_disconnected()
    }

    /// Peak bitrate in use, if known.
    pub fn peak_kbps(&self) -> Option<u32> {
        *self.inner.peak_kbps.lock()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> OutputStats {
        OutputStats {
            bytes_sent: self.total_bytes_sent(),
            frames_sent: self.frames_sent(),
            dropped_frames: self.dropped_frame_count(),
            queued_packets: self.queued_packets(),
        }
    }
}

impl Drop for IngestOutput {
    fn drop(&mut self) {
        let inner = &self.inner;
        if inner.session.is_connecting() || inner.session.is_active() {
            inner.session.stop.request(0, Duration::ZERO);
            inner.session.wake.post();
        }
        inner.join_workers();
    }
}

impl Inner {
    #[instrument(name = "connect_thread", skip(self))]
    fn run_connect(self: Arc<Self>) {
        info!(host = %self.config.host(), "Connecting to ingest");

        match self.try_connect() {
            Ok(()) => {
                self.session.set_connecting(false);
            }
            Err(reason) => {
                info!(host = %self.config.host(), reason = %reason.message(), "Connection failed");
                self.session.set_connecting(false);
                self.transition_to(OutputState::Idle);
                self.signal_stopped(reason);
            }
        }
    }

    fn try_connect(self: &Arc<Self>) -> Result<(), StopReason> {
        let params = self.ingest_params();

        let client = self.connector.create(&params).map_err(|status| {
            let error = TransportError::Create(status);
            warn!(%error, "Failed to create ingest client");
            stop_reason(&error)
        })?;

        if let Err(status) = client.connect() {
            let error = TransportError::Connect(status);
            warn!(%error, outcome = ?error.output_code(), "Ingest connect failed");
            let _ = client.destroy();
            return Err(stop_reason(&error));
        }
        info!(host = %params.ingest_hostname, "Connected to ingest");

        if self.peak_kbps.lock().is_none() {
            self.measure_peak(client.as_ref(), &params);
        }

        if self.session.stop.is_requested() {
            info!("Stop requested while connecting");
            release_client(client.as_ref());
            return Err(StopReason::User);
        }

        let worker = Arc::clone(self);
        let status_client = Arc::clone(&client);
        let status = thread::Builder::new()
            .name("streamout-status".to_string())
            .spawn(move || worker.run_status(status_client));
        match status {
            Ok(handle) => *self.status_thread.lock() = Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn status thread");
                release_client(client.as_ref());
                return Err(stop_reason(&TransportError::Connect(IngestStatus::InternalError)));
            }
        }

        let worker = Arc::clone(self);
        let send_client = Arc::clone(&client);
        let send = thread::Builder::new()
            .name("streamout-send".to_string())
            .spawn(move || worker.run_send(send_client));
        match send {
            Ok(handle) => *self.send_thread.lock() = Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn send thread");
                self.session.set_disconnected();
                release_client(client.as_ref());
                return Err(stop_reason(&TransportError::Connect(IngestStatus::InternalError)));
            }
        }

        self.session.set_active(true);
        self.transition_to(OutputState::Active);
        self.begin_capture();
        Ok(())
    }

    fn ingest_params(&self) -> IngestParams {
        let bind_ip = match self.config.bind_ip.trim() {
            "" | "default" => None,
            ip => Some(ip.to_string()),
        };
        let peak_kbps = self.peak_kbps.lock().unwrap_or(0);

        IngestParams::new(self.config.host(), self.config.stream_key.clone())
            .with_credentials(self.config.username.clone(), self.config.password.clone())
            .with_vendor(
                self.config.vendor_name.clone(),
                self.config.vendor_version.clone(),
            )
            .with_peak_kbps(peak_kbps)
            .with_bind_ip(bind_ip)
    }

    fn measure_peak(&self, client: &dyn IngestClient, params: &IngestParams) {
        let duration = Duration::from_millis(self.config.speed_test_duration_ms);

        match client.speed_test(self.config.speed_test_kbps, duration) {
            Ok(result) => {
                info!(
                    peak_kbps = result.peak_kbps,
                    starting_rtt_ms = result.starting_rtt_ms,
                    ending_rtt_ms = result.ending_rtt_ms,
                    "Speed test completed, {:.2}% packets lost",
                    result.loss_percent()
                );
                *self.peak_kbps.lock() = Some(result.peak_kbps);

                let updated = params.clone().with_peak_kbps(result.peak_kbps);
                if let Err(status) = client.update_params(&updated) {
                    warn!(%status, "Failed to update ingest params");
                }
            }
            Err(status) => warn!(%status, "Speed test failed"),
        }
    }

    #[instrument(name = "status_thread", skip_all)]
    fn run_status(self: Arc<Self>, client: Arc<dyn IngestClient>) {
        let timeout = Duration::from_millis(self.config.status_poll_timeout_ms);

        while self.should_poll_status() {
            let polled = client.poll_status(timeout);
            match classify_status(&polled) {
                StatusAction::Continue => {
                    if let Ok(message) = &polled {
                        log_status(message);
                    }
                }
                StatusAction::Exit => break,
                StatusAction::Reconnect => {
                    self.session.set_disconnected();
                    self.session.wake.post();
                    break;
                }
            }
        }

        debug!("Status thread exited");
    }

    fn should_poll_status(&self) -> bool {
        (self.session.is_connecting() || self.session.is_active())
            && !self.session.is_disconnected()
            && !self.session.stop.is_immediate()
    }

    #[instrument(name = "send_thread", skip_all)]
    fn run_send(self: Arc<Self>, client: Arc<dyn IngestClient>) {
        loop {
            self.session.wake.wait();

            if self.session.stop.is_immediate() || self.session.is_disconnected() {
                break;
            }

            let packet = match self.queue.dequeue_front() {
                Some(packet) => packet,
                None if self.session.stop.is_draining() => break,
                None => continue,
            };

            if self.session.stop.drain_finished(packet.system_dts_usec) {
                debug!(
                    system_dts_usec = packet.system_dts_usec,
                    "Drain reached stop deadline"
                );
                break;
            }

            if packet.is_video() && packet.is_keyframe {
                match self.send_headers(client.as_ref(), &packet) {
                    Ok(()) => {}
                    Err(TransportError::Extract(e)) => {
                        warn!(error = %e, "Could not split stream header");
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to send stream header");
                        self.session.set_disconnected();
                        break;
                    }
                }
            }

            match self.send_packet(client.as_ref(), &packet) {
                Ok(()) => {}
                Err(TransportError::Extract(e)) => {
                    warn!(error = %e, dts_usec = packet.dts_usec, "Abandoning packet");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to send packet");
                    self.session.set_disconnected();
                    break;
                }
            }
        }

        self.finish_session(client.as_ref());
    }

    fn send_headers(&self, client: &dyn IngestClient, packet: &EncodedPacket) -> TransportResult<()> {
        let header = match self.headers.video_header(packet.track_index) {
            Some(header) => header,
            None => {
                debug!(track = packet.track_index, "No video header available");
                return Ok(());
            }
        };

        let extraction = self
            .extractor
            .extract(&header, PayloadMode::Header, packet.dts_usec)?;
        for unit in &extraction.units {
            let sent = client
                .send(PacketKind::Video, unit.dts_usec, unit.data, false)
                .map_err(TransportError::Send)?;
            self.session.add_bytes_sent(sent as u64);
        }

        trace!(units = extraction.units.len(), "Sent stream header");
        Ok(())
    }

    fn send_packet(&self, client: &dyn IngestClient, packet: &EncodedPacket) -> TransportResult<()> {
        match packet.kind {
            PacketKind::Video => {
                let extraction =
                    self.extractor
                        .extract(&packet.payload, PayloadMode::Data, packet.dts_usec)?;
                for unit in &extraction.units {
                    let sent = client
                        .send(
                            PacketKind::Video,
                            unit.dts_usec,
                            unit.data,
                            unit.end_of_access_unit,
                        )
                        .map_err(TransportError::Send)?;
                    self.session.add_bytes_sent(sent as u64);
                    if unit.end_of_access_unit {
                        self.session.record_frame_sent();
                    }
                }
            }
            PacketKind::Audio => {
                let sent = client
                    .send(PacketKind::Audio, packet.dts_usec, &packet.payload, false)
                    .map_err(TransportError::Send)?;
                self.session.add_bytes_sent(sent as u64);
            }
        }

        Ok(())
    }

    fn finish_session(&self, client: &dyn IngestClient) {
        let reason = if self.session.is_disconnected() {
            info!(host = %self.config.host(), "Disconnected from ingest");
            StopReason::Disconnected
        } else {
            info!("User stopped the stream");
            StopReason::User
        };

        release_client(client);

        let released = self.queue.drain();
        if released > 0 {
            debug!(released, "Released unsent packets");
        }

        self.session.set_active(false);
        self.transition_to(OutputState::Idle);
        self.end_capture();
        self.signal_stopped(reason);
    }

    fn begin_capture(&self) {
        if self.session.open_capture() {
            self.send_event(OutputEvent::BeginCapture);
        }
    }

    fn end_capture(&self) {
        if self.session.close_capture() {
            self.send_event(OutputEvent::EndCapture);
        }
    }

    /// Emit the attempt's terminal event. Blocks while the event channel is
    /// full; fails only once the host has dropped its receiver.
    fn signal_stopped(&self, reason: StopReason) {
        if self.session.claim_stop_signal() {
            info!(reason = %reason.message(), "Output stopped");
            if self.event_tx.send(OutputEvent::Stopped(reason)).is_err() {
                debug!("Event receiver closed before stop was reported");
            }
        }
    }

    fn join_workers(&self) {
        let workers = [
            ("connect", &self.connect_thread),
            ("status", &self.status_thread),
            ("send", &self.send_thread),
        ];

        for (name, slot) in workers {
            let handle = slot.lock().take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!(thread = name, "Worker thread panicked");
                }
            }
        }
    }

    fn transition_to(&self, new_state: OutputState) {
        let previous = std::mem::replace(&mut *self.state.write(), new_state);
        if previous == new_state {
            return;
        }

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(OutputEvent::StateChanged {
            previous,
            current: new_state,
        });
    }

    fn send_event(&self, event: OutputEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

/// Stop reason for a failed connection attempt.
fn stop_reason(error: &TransportError) -> StopReason {
    match error {
        TransportError::Create(_) => StopReason::BadInput,
        TransportError::Connect(status) => StopReason::ConnectFailed {
            code: status.code(),
            description: status.description().to_string(),
            outcome: error.output_code(),
        },
        TransportError::Send(_) | TransportError::Extract(_) => StopReason::Disconnected,
    }
}

fn release_client(client: &dyn IngestClient) {
    if let Err(status) = client.disconnect() {
        debug!(%status, "Ingest disconnect failed");
    }
    if let Err(status) = client.destroy() {
        debug!(%status, "Ingest destroy failed");
    }
}
