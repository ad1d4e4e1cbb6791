//! The acquisition loop.
//!
//! Runs on its own thread and owns the backend until it exits, then hands it
//! back through the join handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use wave_core::{DeviceBackend, FailureTracker, RetryDecision, RetryPolicy, SampleBlock, WaveError};

use crate::events::{AcquisitionEvent, DataAvailable};
use crate::ring_buffer::RingBuffer;
use crate::session::{AcquisitionSession, SessionState};

/// Sleep granularity while waiting for the next tick.
const STOP_POLL: Duration = Duration::from_millis(5);

pub(crate) struct WorkerContext {
    pub session_id: Uuid,
    pub session: Arc<Mutex<Option<AcquisitionSession>>>,
    pub ring: Arc<RingBuffer>,
    pub events: broadcast::Sender<AcquisitionEvent>,
    pub stop: Arc<AtomicBool>,
    pub policy: RetryPolicy,
    pub cadence: Duration,
    pub sample_rate: f64,
}

impl WorkerContext {
    fn deliver(&self, block: &SampleBlock) -> Result<(), WaveError> {
        if block.is_empty() {
            return Ok(());
        }
        let outcome = self.ring.append_block(block, self.sample_rate)?;
        let total_samples = self.ring.total_frames();
        let overflow_count = self.ring.overflow_count();

        if let Some(session) = self.session.lock().as_mut() {
            session.total_samples = total_samples;
            session.overflow_count = overflow_count;
        }

        trace!(
            scans = outcome.appended,
            total_samples,
            "Appended scans to ring buffer"
        );

        let timestamps = (0..outcome.appended)
            .map(|i| (outcome.first_sequence + i) as f64 / self.sample_rate)
            .collect();
        // No receivers is fine
        let _ = self
            .events
            .send(AcquisitionEvent::DataAvailable(DataAvailable {
                session_id: self.session_id,
                first_sequence: outcome.first_sequence,
                timestamps,
                total_samples,
                overflow_count,
            }));
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleep until `deadline`, waking early if asked to stop.
    fn wait_until(&self, deadline: Instant) {
        loop {
            if self.stopped() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
    }

    fn fail(&self, backend: &mut dyn DeviceBackend, err: WaveError) {
        error!(
            session_id = %self.session_id,
            backend = backend.name(),
            error = %err,
            "Acquisition failed"
        );

        if let Err(e) = backend.stop() {
            warn!(error = %e, "Backend stop failed after acquisition error");
        } else if let Ok(block) = backend.read() {
            if let Err(e) = self.deliver(&block) {
                warn!(error = %e, "Could not keep flushed scans");
            }
        }

        if let Some(session) = self.session.lock().as_mut() {
            session.state = SessionState::Error;
            session.last_error = Some(err.to_string());
            session.stopped_at = Some(chrono::Utc::now());
        }
        let _ = self.events.send(AcquisitionEvent::StateChanged {
            session_id: self.session_id,
            state: SessionState::Error,
        });
    }

    /// Final read, stop, then read what the stop flushed.
    fn drain(&self, backend: &mut dyn DeviceBackend) {
        match backend.read() {
            Ok(block) => self.keep(&block),
            Err(e) => warn!(error = %e, "Final read before stop failed"),
        }
        if let Err(e) = backend.stop() {
            warn!(error = %e, "Backend stop failed");
        }
        match backend.read() {
            Ok(block) => self.keep(&block),
            Err(e) => warn!(error = %e, "Reading flushed scans failed"),
        }
    }

    fn keep(&self, block: &SampleBlock) {
        if let Err(e) = self.deliver(block) {
            warn!(error = %e, "Dropped scans that did not fit the ring layout");
        }
    }
}

/// Loop body. Returns the backend when the loop ends, for any reason.
pub(crate) fn run(
    mut backend: Box<dyn DeviceBackend>,
    ctx: WorkerContext,
) -> Box<dyn DeviceBackend> {
    let mut tracker = FailureTracker::new(ctx.policy.clone());
    let mut next_tick = Instant::now() + ctx.cadence;

    debug!(
        session_id = %ctx.session_id,
        cadence_ms = ctx.cadence.as_secs_f64() * 1e3,
        "Acquisition worker started"
    );

    loop {
        if ctx.stopped() {
            break;
        }

        match backend.read() {
            Ok(block) => {
                tracker.record_success();
                if let Err(e) = ctx.deliver(&block) {
                    ctx.fail(backend.as_mut(), e);
                    return backend;
                }
            }
            Err(e) => match tracker.record_error(e) {
                RetryDecision::NoData => {}
                RetryDecision::Retry(delay) => {
                    ctx.wait_until(Instant::now() + delay);
                    continue;
                }
                RetryDecision::Escalate(err) => {
                    ctx.fail(backend.as_mut(), err);
                    return backend;
                }
            },
        }

        ctx.wait_until(next_tick);
        next_tick += ctx.cadence;
        let now = Instant::now();
        if next_tick < now {
            // Fell behind; resynchronise instead of bursting
            next_tick = now + ctx.cadence;
        }
    }

    ctx.drain(backend.as_mut());
    info!(
        session_id = %ctx.session_id,
        total_samples = ctx.ring.total_frames(),
        failures = tracker.total_failures(),
        timeouts = tracker.total_timeouts(),
        "Acquisition worker stopped"
    );
    backend
}
