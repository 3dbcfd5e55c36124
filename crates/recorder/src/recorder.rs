//! Recorder - 录制会话的唯一入口
//!
//! Holds at most one live session. The session itself is an owned value the
//! caller keeps and passes back to `stop`.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Weak};

use chrono::Local;
use contracts::{RecorderConfig, SessionState, StateError, StreamKey};
use tracing::{info, instrument, warn};
use transport::RecordingSource;

use crate::encoders::StreamEncoder;
use crate::error::{RecorderError, Result};
use crate::manifest::{create_session_dir, SessionReport};
use crate::session::{RecordingSession, SessionShared};

struct ActiveSession {
    alive: Weak<()>,
    shared: Arc<SessionShared>,
}

pub struct Recorder {
    config: RecorderConfig,
    last: Option<ActiveSession>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self { config, last: None }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// State of the most recent session, `Idle` before the first one
    pub fn state(&self) -> SessionState {
        self.last
            .as_ref()
            .map_or(SessionState::Idle, |last| last.shared.state())
    }

    /// A session is live or its stream tasks are still closing encoders
    ///
    /// A dropped or failed session keeps the recorder busy until every stream
    /// task has released its encoder.
    pub fn is_busy(&self) -> bool {
        self.last.as_ref().is_some_and(|last| {
            last.shared.running() > 0
                || (last.alive.strong_count() > 0 && !last.shared.state().is_terminal())
        })
    }

    /// Start recording `streams` into a new directory under `output_root`
    /// (the configured root when `None`)
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// - `State(AlreadyActive)` while another session is live or still draining
    /// - `Subscribe` when a stream cannot be subscribed; nothing is created on disk
    /// - `Open` / `Io` when the directory or an encoder cannot be created
    #[instrument(name = "recorder_start", skip(self, source, streams), fields(streams = streams.len()))]
    pub fn start<S>(
        &mut self,
        source: &S,
        streams: &[StreamKey],
        output_root: Option<&Path>,
    ) -> Result<RecordingSession>
    where
        S: RecordingSource + ?Sized,
    {
        if self.is_busy() {
            return Err(StateError::AlreadyActive.into());
        }
        let streams: BTreeSet<StreamKey> = streams.iter().copied().collect();
        if streams.is_empty() {
            return Err(RecorderError::NoStreams);
        }

        // subscribe first; a refusal leaves nothing behind
        let mut receivers = Vec::with_capacity(streams.len());
        for &stream in &streams {
            let receiver = source
                .subscribe_for_recording(stream)
                .map_err(|source| RecorderError::Subscribe { stream, source })?;
            receivers.push((stream, receiver));
        }

        let started_at = Local::now();
        let root = output_root.unwrap_or(&self.config.output_root);
        let directory = create_session_dir(root, &started_at)?;

        let mut parts = Vec::with_capacity(receivers.len());
        for (stream, receiver) in receivers {
            match StreamEncoder::open(stream.stream, &directory, &self.config) {
                Ok(encoder) => parts.push((stream, receiver, encoder)),
                Err(source) => {
                    if let Err(e) = std::fs::remove_dir_all(&directory) {
                        warn!(dir = %directory.display(), error = %e, "failed to remove session directory");
                    }
                    return Err(RecorderError::Open { stream, source });
                }
            }
        }

        let session = RecordingSession::spawn(
            directory,
            started_at,
            self.config.reorder_window,
            self.config.stop_grace(),
            parts,
        )?;
        info!(
            dir = %session.directory().display(),
            streams = ?session.streams(),
            "recorder started"
        );
        self.last = Some(ActiveSession {
            alive: session.liveness(),
            shared: session.shared(),
        });
        Ok(session)
    }

    /// Stop a session; see [`RecordingSession::stop`]
    pub async fn stop(&self, session: &mut RecordingSession) -> Result<SessionReport> {
        session.stop().await
    }
}
