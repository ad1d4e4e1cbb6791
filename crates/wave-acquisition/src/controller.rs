//! Session state machine driving a [`DeviceBackend`].
//!
//! ```text
//! Idle --configure--> Configured --start--> Running --stop--> Stopped
//!                                              |
//!                                              +--(fatal error)--> Error
//! Stopped | Error --configure--> Configured      any --close--> Idle
//! ```
//!
//! While running, the backend belongs to the worker thread. It comes back
//! to the controller when the worker exits, either on `stop()` or after a
//! fatal error, and is closed here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use wave_core::config::WaveConfig;
use wave_core::{
    limits, BackendCapabilities, DeviceBackend, RetryPolicy, WaveError, WaveResult,
};
use wave_calibration::CalibrationPoint;

use crate::calibration::capture_calibration_point;
use crate::events::{AcquisitionEvent, EVENT_CHANNEL_CAPACITY};
use crate::ring_buffer::{BufferSnapshot, RingBuffer};
use crate::session::{AcquisitionSession, SessionConfig, SessionState};
use crate::worker::{self, WorkerContext};

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Box<dyn DeviceBackend>>,
}

/// Owns one backend and at most one session.
pub struct AcquisitionController {
    backend: Option<Box<dyn DeviceBackend>>,
    backend_name: String,
    policy: RetryPolicy,
    session: Arc<Mutex<Option<AcquisitionSession>>>,
    ring: Option<Arc<RingBuffer>>,
    events: broadcast::Sender<AcquisitionEvent>,
    worker: Option<Worker>,
}

impl AcquisitionController {
    /// Controller over `backend` with the default retry policy.
    pub fn new(backend: Box<dyn DeviceBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend_name: backend.name().to_string(),
            backend: Some(backend),
            policy: RetryPolicy::default(),
            session: Arc::new(Mutex::new(None)),
            ring: None,
            events,
            worker: None,
        }
    }

    /// Controller using the retry settings from `config`.
    pub fn with_config(backend: Box<dyn DeviceBackend>, config: &WaveConfig) -> Self {
        Self::new(backend).with_retry_policy(config.retry.policy())
    }

    /// Replace the retry policy used by future sessions.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.session
            .lock()
            .as_ref()
            .map_or(SessionState::Idle, |s| s.state)
    }

    /// Copy of the session metadata, if there is a session.
    pub fn session(&self) -> Option<AcquisitionSession> {
        self.session.lock().clone()
    }

    /// Receive data and state notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.events.subscribe()
    }

    /// The session's ring buffer, for cursor-based consumers.
    pub fn buffer(&self) -> Option<Arc<RingBuffer>> {
        self.ring.clone()
    }

    /// Owned copy of everything captured so far.
    pub fn snapshot(&self) -> Option<BufferSnapshot> {
        self.ring.as_ref().map(|r| r.snapshot())
    }

    /// Capabilities of the backend, opening it briefly if needed.
    pub fn capabilities(&mut self) -> WaveResult<BackendCapabilities> {
        let name = self.backend_name.clone();
        self.open_capabilities()?.ok_or_else(|| {
            WaveError::HardwareUnavailable(format!(
                "Backend '{}' is claimed elsewhere or unreachable",
                name
            ))
        })
    }

    /// `None` when the backend is present but cannot be opened right now.
    fn open_capabilities(&mut self) -> WaveResult<Option<BackendCapabilities>> {
        self.reclaim_backend();
        let backend = self.backend_mut("query capabilities")?;
        if !backend.is_available() {
            return Err(WaveError::HardwareUnavailable(format!(
                "Backend '{}' driver layer not present",
                backend.name()
            )));
        }
        if backend.is_open() {
            return Ok(Some(backend.capabilities()));
        }
        if backend.open() {
            let caps = backend.capabilities();
            backend.close();
            Ok(Some(caps))
        } else {
            Ok(None)
        }
    }

    /// Validate `config` against the backend and create a session.
    pub fn configure(&mut self, config: SessionConfig) -> WaveResult<AcquisitionSession> {
        self.reclaim_backend();
        let state = self.state();
        if !matches!(
            state,
            SessionState::Idle | SessionState::Stopped | SessionState::Error
        ) {
            return Err(WaveError::InvalidState {
                operation: "configure",
                state: state.to_string(),
            });
        }

        config.validate()?;
        match self.open_capabilities()? {
            Some(caps) => {
                caps.validate_channels(&config.channels)?;
                caps.validate_rate(config.sample_rate)?;
            }
            // The opened backend validates again in start()
            None => warn!(
                backend = %self.backend_name,
                "Backend could not be opened, deferring capability checks to start"
            ),
        }

        let ring = RingBuffer::new(config.channels.len(), config.ring_capacity)?;
        let session = AcquisitionSession::new(&config);

        info!(
            session_id = %session.id,
            backend = %self.backend_name,
            n_channels = config.channels.len(),
            sample_rate = config.sample_rate,
            buffer_size = config.buffer_size,
            ring_capacity = config.ring_capacity,
            "Configured acquisition session"
        );

        self.ring = Some(Arc::new(ring));
        *self.session.lock() = Some(session.clone());
        self.publish_state(&session);
        Ok(session)
    }

    /// Open the backend and launch the acquisition worker.
    pub fn start(&mut self) -> WaveResult<()> {
        let state = self.state();
        if state != SessionState::Configured {
            return Err(WaveError::InvalidState {
                operation: "start",
                state: state.to_string(),
            });
        }
        let Some(session) = self.session() else {
            return Err(WaveError::InvalidState {
                operation: "start",
                state: state.to_string(),
            });
        };
        let ring = self
            .ring
            .clone()
            .ok_or_else(|| WaveError::config("Session has no ring buffer"))?;

        let mut backend = self
            .backend
            .take()
            .ok_or_else(|| WaveError::HardwareUnavailable("Backend was lost".to_string()))?;

        let prepared = Self::prepare_backend(backend.as_mut(), &session);
        let actual_rate = match prepared {
            Ok(rate) => rate,
            Err(e) => {
                backend.close();
                self.backend = Some(backend);
                self.enter_error(&e);
                return Err(e);
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            session_id: session.id,
            session: Arc::clone(&self.session),
            ring,
            events: self.events.clone(),
            stop: Arc::clone(&stop),
            policy: self.policy.clone(),
            cadence: limits::cadence(session.buffer_size, actual_rate),
            sample_rate: actual_rate,
        };

        let session = {
            let mut guard = self.session.lock();
            let Some(session) = guard.as_mut() else {
                return Err(WaveError::config("Session closed during start"));
            };
            session.actual_sample_rate = Some(actual_rate);
            session.started_at = Some(chrono::Utc::now());
            session.state = SessionState::Running;
            session.clone()
        };

        let spawned = thread::Builder::new()
            .name("wave-acquisition".to_string())
            .spawn(move || worker::run(backend, ctx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let err = WaveError::Io(e);
                self.backend = None;
                self.enter_error(&err);
                return Err(err);
            }
        };
        self.worker = Some(Worker { stop, handle });

        info!(
            session_id = %session.id,
            backend = %self.backend_name,
            requested_rate = session.sample_rate,
            actual_rate,
            "Started acquisition"
        );
        self.publish_state(&session);
        Ok(())
    }

    /// Stop the worker, close the backend and finalize metadata.
    ///
    /// From `Error` this only reclaims and closes the backend; the session
    /// keeps its error state.
    pub fn stop(&mut self) -> WaveResult<AcquisitionSession> {
        let state = self.state();
        if !matches!(state, SessionState::Running | SessionState::Error) {
            return Err(WaveError::InvalidState {
                operation: "stop",
                state: state.to_string(),
            });
        }

        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            self.join(worker);
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.close();
        }

        let session = {
            let mut guard = self.session.lock();
            let Some(session) = guard.as_mut() else {
                return Err(WaveError::InvalidState {
                    operation: "stop",
                    state: SessionState::Idle.to_string(),
                });
            };
            if let Some(ring) = &self.ring {
                session.total_samples = ring.total_frames();
                session.overflow_count = ring.overflow_count();
            }
            if session.state == SessionState::Running {
                session.state = SessionState::Stopped;
                session.stopped_at = Some(chrono::Utc::now());
            }
            session.clone()
        };

        info!(
            session_id = %session.id,
            total_samples = session.total_samples,
            overflow_count = session.overflow_count,
            duration_s = session.duration().map(|d| d.as_secs_f64()),
            state = %session.state,
            "Stopped acquisition"
        );
        if session.overflow_count > 0 {
            warn!(
                session_id = %session.id,
                overflow_count = session.overflow_count,
                "Session overwrote unread frames"
            );
        }
        self.publish_state(&session);
        Ok(session)
    }

    /// Destroy the session and return to `Idle`.
    pub fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            self.join(worker);
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.close();
        }
        if let Some(session) = self.session.lock().take() {
            debug!(session_id = %session.id, "Closed acquisition session");
        }
        self.ring = None;
    }

    /// Average `n_average` software-timed reads of a configured channel
    /// into a calibration point. Not available while running.
    pub fn capture_calibration_point(
        &mut self,
        channel_index: usize,
        reference: f64,
        n_average: usize,
    ) -> WaveResult<CalibrationPoint> {
        self.reclaim_backend();
        let state = self.state();
        let channels = match (state, self.session()) {
            (SessionState::Running, _) | (SessionState::Idle, _) | (_, None) => {
                return Err(WaveError::InvalidState {
                    operation: "capture a calibration point",
                    state: state.to_string(),
                })
            }
            (_, Some(session)) => session.channels,
        };
        let policy = self.policy.clone();
        let backend = self.backend_mut("capture a calibration point")?;

        let opened_here = !backend.is_open();
        if opened_here && !backend.open() {
            return Err(WaveError::HardwareUnavailable(format!(
                "Backend '{}' could not be opened",
                backend.name()
            )));
        }
        let result = backend.configure_channels(&channels).and_then(|()| {
            capture_calibration_point(&mut **backend, channel_index, reference, n_average, &policy)
        });
        if opened_here {
            backend.close();
        }
        result
    }

    fn prepare_backend(
        backend: &mut dyn DeviceBackend,
        session: &AcquisitionSession,
    ) -> WaveResult<f64> {
        if !backend.is_available() {
            return Err(WaveError::HardwareUnavailable(format!(
                "Backend '{}' driver layer not present",
                backend.name()
            )));
        }
        if !backend.open() {
            return Err(WaveError::HardwareUnavailable(format!(
                "Backend '{}' is claimed elsewhere or unreachable",
                backend.name()
            )));
        }
        backend.configure_channels(&session.channels)?;
        backend.configure_acquisition(session.sample_rate, session.buffer_size)?;
        backend.start()?;
        Ok(backend
            .actual_sample_rate()
            .unwrap_or(session.sample_rate))
    }

    fn backend_mut(&mut self, operation: &'static str) -> WaveResult<&mut Box<dyn DeviceBackend>> {
        let state = self.state();
        self.backend.as_mut().ok_or(WaveError::InvalidState {
            operation,
            state: state.to_string(),
        })
    }

    /// Take the backend back from a worker that exited on its own.
    fn reclaim_backend(&mut self) {
        let finished = self
            .worker
            .as_ref()
            .is_some_and(|w| w.handle.is_finished());
        if finished {
            if let Some(worker) = self.worker.take() {
                self.join(worker);
            }
            if let Some(backend) = self.backend.as_mut() {
                backend.close();
            }
        }
    }

    fn join(&mut self, worker: Worker) {
        match worker.handle.join() {
            Ok(backend) => self.backend = Some(backend),
            Err(_) => {
                error!(backend = %self.backend_name, "Acquisition worker panicked, backend lost");
                self.enter_error(&WaveError::HardwareUnavailable(
                    "Acquisition worker panicked".to_string(),
                ));
            }
        }
    }

    fn enter_error(&self, err: &WaveError) {
        let session = {
            let mut guard = self.session.lock();
            let Some(session) = guard.as_mut() else {
                return;
            };
            session.state = SessionState::Error;
            session.last_error = Some(err.to_string());
            session.stopped_at = Some(chrono::Utc::now());
            session.clone()
        };
        error!(session_id = %session.id, error = %err, "Session entered error state");
        self.publish_state(&session);
    }

    fn publish_state(&self, session: &AcquisitionSession) {
        let _ = self.events.send(AcquisitionEvent::StateChanged {
            session_id: session.id,
            state: session.state,
        });
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("backend", &self.backend_name)
            .field("state", &self.state())
            .field("worker", &self.worker.is_some())
            .finish()
    }
}
