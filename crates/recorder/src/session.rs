//! RecordingSession - 一次录制
//!
//! Each stream gets its own consumption task: receive → reorder → encode.
//! A slow encoder only backs up its own stream. `stop` signals every task,
//! lets them drain what is already queued, then waits (bounded by the stop
//! grace period) for the encoders to close.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, SecondsFormat};
use contracts::{EncodingError, FrameEncoder, FrameEnvelope, SessionState, StreamKey};
use observability::RunningStats;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use transport::RecordingReceiver;

use crate::encoders::{file_name, StreamEncoder};
use crate::error::{RecorderError, Result};
use crate::manifest::{write_manifest, SessionFailure, SessionReport, StreamReport};
use crate::reorder::{Ordered, ReorderBuffer};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn timestamp(at: DateTime<Local>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, false)
}

#[derive(Debug, Default)]
struct StreamCounters {
    frames_written: AtomicU64,
    dropped_frames: AtomicU64,
    drop_events: AtomicU64,
    late_frames: AtomicU64,
    backlog: AtomicU64,
}

/// Live view of one recorded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProgress {
    pub stream: StreamKey,
    pub frames_written: u64,
    pub dropped_frames: u64,
    pub drop_events: u64,
    pub late_frames: u64,
    /// Frames queued but not yet encoded
    pub backlog: u64,
}

/// State shared between the session owner, its stream tasks and the `Recorder`
pub(crate) struct SessionShared {
    state: Mutex<SessionState>,
    failure: Mutex<Option<(StreamKey, Arc<EncodingError>)>>,
    stop: watch::Sender<bool>,
    /// Stream tasks that have not yet dropped their encoder
    running: AtomicUsize,
}

impl SessionShared {
    fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            state: Mutex::new(SessionState::Active),
            failure: Mutex::new(None),
            stop,
            running: AtomicUsize::new(0),
        }
    }

    /// Stream tasks still holding an encoder, including aborted ones not yet dropped
    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Failed is final
    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != SessionState::Failed {
            *state = next;
        }
    }

    fn signal_stop(&self) {
        self.stop.send_replace(true);
    }

    /// Record an encoder failure; the first one wins and stops the whole session
    fn fail(&self, stream: StreamKey, error: EncodingError) {
        {
            let mut failure = lock(&self.failure);
            if failure.is_none() {
                *failure = Some((stream, Arc::new(error)));
            }
        }
        *lock(&self.state) = SessionState::Failed;
        self.signal_stop();
    }

    fn failure(&self) -> Option<(StreamKey, Arc<EncodingError>)> {
        lock(&self.failure).clone()
    }
}

/// Counts a stream task as running until dropped
struct RunningGuard(Arc<SessionShared>);

impl RunningGuard {
    fn enter(shared: &Arc<SessionShared>) -> Self {
        shared.running.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(shared))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One stream's encoder plus ordering and bookkeeping
struct StreamRecorder {
    stream: StreamKey,
    encoder: StreamEncoder,
    reorder: ReorderBuffer,
    counters: Arc<StreamCounters>,
    latency: RunningStats,
    first_sequence: Option<u64>,
    last_sequence: Option<u64>,
}

impl StreamRecorder {
    async fn run(
        &mut self,
        receiver: &RecordingReceiver,
        stop: &mut watch::Receiver<bool>,
    ) -> std::result::Result<(), EncodingError> {
        loop {
            let stopping = *stop.borrow_and_update();
            if stopping {
                break;
            }
            let envelope = tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = receiver.receive() => match received {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(error = %e, "recording source ended");
                        break;
                    }
                },
            };
            self.accept(envelope).await?;
            self.update_backlog(receiver);
        }

        // everything queued before the stop signal still gets written
        while let Ok(Some(envelope)) = receiver.try_receive() {
            self.accept(envelope).await?;
        }
        let rest = self.reorder.finish();
        self.write_ordered(rest).await?;
        self.update_backlog(receiver);
        self.encoder.flush().await
    }

    async fn accept(&mut self, envelope: FrameEnvelope) -> std::result::Result<(), EncodingError> {
        let ordered = self.reorder.push(envelope);
        self.write_ordered(ordered).await
    }

    async fn write_ordered(&mut self, items: Vec<Ordered>) -> std::result::Result<(), EncodingError> {
        for item in items {
            match item {
                Ordered::Frame(envelope) => {
                    let started = Instant::now();
                    self.encoder.write(&envelope).await?;
                    let latency_ms = started.elapsed().as_secs_f64() * 1e3;
                    self.latency.push(latency_ms);
                    observability::record_encode_latency_ms(self.encoder.name(), latency_ms);

                    self.first_sequence.get_or_insert(envelope.sequence);
                    self.last_sequence = Some(envelope.sequence);
                    self.counters.frames_written.fetch_add(1, Ordering::Relaxed);
                }
                Ordered::Gap { first, missing } => {
                    warn!(stream = %self.stream, first, missing, "sequence gap in recording");
                    observability::record_recording_dropped(self.stream.stream.as_str(), missing);
                }
            }
        }

        let stats = self.reorder.stats();
        self.counters.dropped_frames.store(stats.dropped_frames, Ordering::Relaxed);
        self.counters.drop_events.store(stats.drop_events, Ordering::Relaxed);
        self.counters.late_frames.store(stats.late_frames, Ordering::Relaxed);
        Ok(())
    }

    fn update_backlog(&self, receiver: &RecordingReceiver) {
        let backlog = receiver.backlog();
        self.counters.backlog.store(backlog as u64, Ordering::Relaxed);
        observability::record_recording_backlog(self.stream.stream.as_str(), backlog);
    }

    fn report(&self) -> StreamReport {
        let stats = self.reorder.stats();
        StreamReport {
            stream: self.stream,
            file: file_name(self.stream.stream).to_string(),
            frames_written: self.encoder.frames_written(),
            dropped_frames: stats.dropped_frames,
            drop_events: stats.drop_events,
            late_frames: stats.late_frames,
            first_sequence: self.first_sequence,
            last_sequence: self.last_sequence,
            encode_latency_ms: self.latency.summary(),
        }
    }
}

#[instrument(name = "recording_stream", skip_all, fields(stream = %recorder.stream))]
async fn record_stream(
    mut recorder: StreamRecorder,
    receiver: RecordingReceiver,
    shared: Arc<SessionShared>,
    mut stop: watch::Receiver<bool>,
    running: RunningGuard,
) -> StreamReport {
    debug!("recording stream started");
    let result = recorder.run(&receiver, &mut stop).await;
    // release the producer; nothing more will be read
    receiver.close();

    match result {
        Ok(()) => {
            if let Err(e) = recorder.encoder.close().await {
                error!(error = %e, "closing encoder failed");
                shared.fail(recorder.stream, e);
            }
        }
        Err(e) => {
            error!(error = %e, "encoder failed, stopping session");
            shared.fail(recorder.stream, e);
            if let Err(e) = recorder.encoder.close().await {
                warn!(error = %e, "best-effort close after failure also failed");
            }
        }
    }

    let report = recorder.report();
    debug!(frames = report.frames_written, dropped = report.dropped_frames, "recording stream finished");
    // encoder (and its ffmpeg child) goes first
    drop(recorder);
    drop(running);
    report
}

struct StreamSlot {
    stream: StreamKey,
    counters: Arc<StreamCounters>,
    task: Option<JoinHandle<StreamReport>>,
}

impl StreamSlot {
    /// Report from the live counters when the task produced none
    fn counters_report(&self) -> StreamReport {
        StreamReport {
            stream: self.stream,
            file: file_name(self.stream.stream).to_string(),
            frames_written: self.counters.frames_written.load(Ordering::Relaxed),
            dropped_frames: self.counters.dropped_frames.load(Ordering::Relaxed),
            drop_events: self.counters.drop_events.load(Ordering::Relaxed),
            late_frames: self.counters.late_frames.load(Ordering::Relaxed),
            first_sequence: None,
            last_sequence: None,
            encode_latency_ms: Default::default(),
        }
    }
}

/// An active (or finished) recording
///
/// Owns the session directory and one encoder task per stream. Dropping an
/// unstopped session signals the tasks to finish on their own.
pub struct RecordingSession {
    directory: PathBuf,
    started_at: DateTime<Local>,
    stop_grace: Duration,
    shared: Arc<SessionShared>,
    slots: Vec<StreamSlot>,
    report: Option<SessionReport>,
    /// Final manifest could not be written
    manifest_error: Option<String>,
    liveness: Arc<()>,
}

impl RecordingSession {
    /// Write the initial manifest and spawn one task per stream
    pub(crate) fn spawn(
        directory: PathBuf,
        started_at: DateTime<Local>,
        reorder_window: usize,
        stop_grace: Duration,
        streams: Vec<(StreamKey, RecordingReceiver, StreamEncoder)>,
    ) -> Result<Self> {
        let shared = Arc::new(SessionShared::new());
        let initial = SessionReport {
            directory: directory.clone(),
            started_at: timestamp(started_at),
            finished_at: None,
            state: SessionState::Active,
            streams: Vec::new(),
            failure: None,
        };
        write_manifest(&directory, &initial)?;

        let slots = streams
            .into_iter()
            .map(|(stream, receiver, encoder)| {
                let counters = Arc::new(StreamCounters::default());
                let recorder = StreamRecorder {
                    stream,
                    encoder,
                    reorder: ReorderBuffer::new(reorder_window),
                    counters: Arc::clone(&counters),
                    latency: RunningStats::default(),
                    first_sequence: None,
                    last_sequence: None,
                };
                let task = tokio::spawn(record_stream(
                    recorder,
                    receiver,
                    Arc::clone(&shared),
                    shared.stop.subscribe(),
                    RunningGuard::enter(&shared),
                ));
                StreamSlot {
                    stream,
                    counters,
                    task: Some(task),
                }
            })
            .collect();

        info!(dir = %directory.display(), "recording session started");
        Ok(Self {
            directory,
            started_at,
            stop_grace,
            shared,
            slots,
            report: None,
            manifest_error: None,
            liveness: Arc::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn streams(&self) -> Vec<StreamKey> {
        self.slots.iter().map(|slot| slot.stream).collect()
    }

    /// Final report, available once stopped
    pub fn report(&self) -> Option<&SessionReport> {
        self.report.as_ref()
    }

    pub fn progress(&self) -> Vec<StreamProgress> {
        self.slots
            .iter()
            .map(|slot| StreamProgress {
                stream: slot.stream,
                frames_written: slot.counters.frames_written.load(Ordering::Relaxed),
                dropped_frames: slot.counters.dropped_frames.load(Ordering::Relaxed),
                drop_events: slot.counters.drop_events.load(Ordering::Relaxed),
                late_frames: slot.counters.late_frames.load(Ordering::Relaxed),
                backlog: slot.counters.backlog.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// First encoder failure, if any
    pub fn failure(&self) -> Option<RecorderError> {
        self.shared
            .failure()
            .map(|(stream, source)| RecorderError::StreamFailed { stream, source })
    }

    pub(crate) fn shared(&self) -> Arc<SessionShared> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn liveness(&self) -> Weak<()> {
        Arc::downgrade(&self.liveness)
    }

    /// Stop recording and finalize every file
    ///
    /// Repeated calls return the first outcome without touching the files again.
    ///
    /// # Errors
    /// - `StreamFailed` when any encoder failed
    /// - `Manifest` when every stream finished but `session.json` could not be written
    ///
    /// In both cases the session is `Failed` and the report is still available
    /// through [`RecordingSession::report`].
    pub async fn stop(&mut self) -> Result<SessionReport> {
        let report = match &self.report {
            Some(report) => report.clone(),
            None => {
                let report = self.finish().await;
                self.report = Some(report.clone());
                report
            }
        };
        if let Some(error) = self.failure() {
            return Err(error);
        }
        match &self.manifest_error {
            Some(message) => Err(RecorderError::Manifest(message.clone())),
            None => Ok(report),
        }
    }

    #[instrument(name = "recording_session_stop", skip(self), fields(dir = %self.directory.display()))]
    async fn finish(&mut self) -> SessionReport {
        self.shared.set_state(SessionState::Stopping);
        self.shared.signal_stop();

        let deadline = tokio::time::Instant::now() + self.stop_grace;
        let mut streams = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            let Some(mut task) = slot.task.take() else {
                streams.push(slot.counters_report());
                continue;
            };
            let report = match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    error!(stream = %slot.stream, error = %e, "recording task aborted");
                    self.shared.fail(
                        slot.stream,
                        EncodingError::encoder(slot.stream.stream.as_str(), format!("task failed: {e}")),
                    );
                    slot.counters_report()
                }
                Err(_) => {
                    // dropping the task drops the encoder (and kills ffmpeg)
                    task.abort();
                    let _ = task.await;
                    warn!(
                        stream = %slot.stream,
                        grace_ms = self.stop_grace.as_millis() as u64,
                        "stream did not finish in time, encoder force-closed"
                    );
                    self.shared.fail(
                        slot.stream,
                        EncodingError::encoder(
                            slot.stream.stream.as_str(),
                            "not finalized within the stop grace period",
                        ),
                    );
                    slot.counters_report()
                }
            };
            streams.push(report);
        }

        self.shared.set_state(SessionState::Closed);
        let state = self.shared.state();
        let mut report = SessionReport {
            directory: self.directory.clone(),
            started_at: timestamp(self.started_at),
            finished_at: Some(timestamp(Local::now())),
            state,
            streams,
            failure: self.shared.failure().map(|(stream, e)| SessionFailure {
                stream,
                message: e.to_string(),
            }),
        };
        if let Err(e) = write_manifest(&self.directory, &report) {
            error!(error = %e, "failed to write final session manifest");
            self.shared.set_state(SessionState::Failed);
            report.state = SessionState::Failed;
            self.manifest_error = Some(e.to_string());
        }
        info!(
            state = ?report.state,
            frames = report.streams.iter().map(|s| s.frames_written).sum::<u64>(),
            dropped = report.total_dropped(),
            "recording session finished"
        );
        report
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.report.is_none() {
            self.shared.set_state(SessionState::Stopping);
            self.shared.signal_stop();
        }
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("directory", &self.directory)
            .field("state", &self.state())
            .field("streams", &self.streams())
            .finish()
    }
}
