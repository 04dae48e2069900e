//! Lifecycle of one recording: `Idle → Recording → Finished`.
//!
//! The session is a plain state machine. It owns its [`ActivitySessionState`]
//! and mutates it only from its own handlers; the runtime feeds those
//! handlers from a single event channel, so nothing here needs a lock.
//!
//! Platform resources (the fix subscription and the tick timer) are held as
//! [`SubscriptionGuard`]s. Every way out of `Recording` (finish, auto-abort,
//! cancel, or dropping the session) releases them.

use std::sync::Arc;
use std::time::Duration;

use stride_protocol::{ConnectionKind, SaveMethod};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{EngineConfig, SessionConfig, ValidationConfig};
use crate::error::{Result, StrideError};
use crate::filter::{Rejection, SampleFilter};
use crate::geo;
use crate::platform::{PermissionStatus, SessionPlatform, SubscriptionGuard};
use crate::signals::{SessionFlags, SpeedWatch};
use crate::storage::{self, KeyValueStore, SESSION_KEY};
use crate::types::{ActivitySessionState, PendingActivity, RoutePoint, Sample};
use crate::validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Recording,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AbortReason {
    /// Instantaneous speed stayed above the hard ceiling.
    VehicleSpeed { speed_mps: f64 },
}

/// How a session left `Recording`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEnd {
    Completed,
    Aborted(AbortReason),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixOutcome {
    Accepted { delta_km: f64 },
    Rejected(Rejection),
    /// Arrived while not recording; dropped.
    Ignored,
    AutoAborted(AbortReason),
}

/// Read-only projection published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub distance_km: f64,
    pub elapsed_seconds: u64,
    pub route_len: usize,
    pub flags: SessionFlags,
    pub end: Option<SessionEnd>,
}

impl SessionView {
    pub fn idle() -> Self {
        Self {
            phase: SessionPhase::Idle,
            distance_km: 0.0,
            elapsed_seconds: 0,
            route_len: 0,
            flags: SessionFlags::default(),
            end: None,
        }
    }
}

impl Default for SessionView {
    fn default() -> Self {
        Self::idle()
    }
}

pub struct ActivitySession {
    config: SessionConfig,
    validation: ValidationConfig,
    filter: SampleFilter,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,

    phase: SessionPhase,
    state: ActivitySessionState,
    end: Option<SessionEnd>,
    flags: SessionFlags,
    speed_watch: SpeedWatch,
    over_speed_fixes: u32,

    /// Monotonic reading when recording (re)started.
    started_mono: Duration,
    /// Seconds already recorded before a resume.
    elapsed_base: u64,
    last_snapshot_mono: Duration,
    last_accept_mono: Duration,

    guards: Vec<SubscriptionGuard>,
}

impl ActivitySession {
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>, store: Arc<dyn KeyValueStore>) -> Self {
        let started_at = clock.wall();
        Self {
            speed_watch: SpeedWatch::new(
                config.session.speed_watch_window,
                config.session.speed_watch_kmh,
            ),
            config: config.session.clone(),
            validation: config.validation.clone(),
            filter: SampleFilter::new(&config.filter),
            clock,
            store,
            phase: SessionPhase::Idle,
            state: ActivitySessionState::new(started_at),
            end: None,
            flags: SessionFlags::default(),
            over_speed_fixes: 0,
            started_mono: Duration::ZERO,
            elapsed_base: 0,
            last_snapshot_mono: Duration::ZERO,
            last_accept_mono: Duration::ZERO,
            guards: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn state(&self) -> &ActivitySessionState {
        &self.state
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn end(&self) -> Option<SessionEnd> {
        self.end
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            distance_km: self.state.total_distance_km,
            elapsed_seconds: self.state.elapsed_seconds,
            route_len: self.state.route.len(),
            flags: self.flags,
            end: self.end,
        }
    }

    /// Begins a fresh recording.
    ///
    /// Fails with [`StrideError::PermissionDenied`] without acquiring anything
    /// if location access is refused.
    pub fn start(&mut self, platform: &dyn SessionPlatform) -> Result<()> {
        let started_at = self.clock.wall();
        self.begin("start", ActivitySessionState::new(started_at), platform)?;
        info!(started_at = %started_at, "Recording started");
        Ok(())
    }

    /// Continues a recording from a crash snapshot. Elapsed time picks up
    /// from the stored value.
    pub fn resume(&mut self, snapshot: ActivitySessionState, platform: &dyn SessionPlatform) -> Result<()> {
        snapshot
            .check_consistency()
            .map_err(StrideError::InconsistentSnapshot)?;
        let route_len = snapshot.route.len();
        let elapsed = snapshot.elapsed_seconds;
        self.begin("resume", snapshot, platform)?;
        info!(route_len, elapsed_seconds = elapsed, "Recording resumed from snapshot");
        Ok(())
    }

    fn begin(
        &mut self,
        action: &'static str,
        state: ActivitySessionState,
        platform: &dyn SessionPlatform,
    ) -> Result<()> {
        if self.phase != SessionPhase::Idle {
            return Err(StrideError::InvalidTransition {
                action,
                phase: self.phase,
            });
        }

        if platform.location_permission() == PermissionStatus::Denied {
            warn!("Location permission denied; session not started");
            return Err(StrideError::PermissionDenied);
        }

        let fixes = platform.subscribe_fixes()?;
        let ticker = platform.start_ticker(self.config.tick())?;
        self.guards = vec![fixes, ticker];

        let now = self.clock.monotonic();
        self.elapsed_base = state.elapsed_seconds;
        self.state = state;
        self.started_mono = now;
        self.last_accept_mono = now;
        self.last_snapshot_mono = now;
        self.flags = SessionFlags::default();
        self.over_speed_fixes = 0;
        self.speed_watch = SpeedWatch::new(
            self.config.speed_watch_window,
            self.config.speed_watch_kmh,
        );
        self.phase = SessionPhase::Recording;
        self.persist_snapshot();
        Ok(())
    }

    pub fn on_fix(&mut self, sample: &Sample) -> FixOutcome {
        if self.phase != SessionPhase::Recording {
            return FixOutcome::Ignored;
        }

        if let Some(speed_mps) = sample.instant_speed_mps.filter(|s| s.is_finite() && *s >= 0.0) {
            if speed_mps > self.config.abort_speed_mps {
                self.over_speed_fixes += 1;
                if self.over_speed_fixes >= self.config.abort_consecutive_fixes.max(1) {
                    let reason = AbortReason::VehicleSpeed { speed_mps };
                    self.abort(reason);
                    return FixOutcome::AutoAborted(reason);
                }
            } else {
                self.over_speed_fixes = 0;
            }
            self.flags.speed_too_high = self.speed_watch.push(speed_mps);
        }

        let last = self.state.last_accepted_position.as_ref();
        if let Err(rejection) = self.filter.check(sample, last) {
            debug!(?rejection, "Fix rejected");
            return FixOutcome::Rejected(rejection);
        }

        let delta_km = last.map(|last| geo::accumulate(last, sample)).unwrap_or(0.0);
        let point = RoutePoint::from(sample);
        self.state.total_distance_km += delta_km;
        self.state.route.push(point.clone());
        self.state.last_accepted_position = Some(point);

        self.last_accept_mono = self.clock.monotonic();
        self.flags.signal_lost = false;
        self.flags.inactive = false;

        debug!(
            delta_km,
            total_km = self.state.total_distance_km,
            route_len = self.state.route.len(),
            "Fix accepted"
        );
        FixOutcome::Accepted { delta_km }
    }

    /// Refreshes elapsed time and flags, and snapshots when due. Returns
    /// false if the session is not recording.
    pub fn on_tick(&mut self) -> bool {
        if self.phase != SessionPhase::Recording {
            return false;
        }

        let now = self.refresh_elapsed();

        let quiet = now.saturating_sub(self.last_accept_mono);
        let signal_lost = quiet >= self.config.signal_timeout();
        if signal_lost && !self.flags.signal_lost {
            warn!(quiet_secs = quiet.as_secs(), "No accepted fix; signal lost");
        }
        self.flags.signal_lost = signal_lost;
        self.flags.inactive = quiet >= self.config.inactivity_timeout();

        if now.saturating_sub(self.last_snapshot_mono) >= self.config.snapshot_interval() {
            self.persist_snapshot();
            self.last_snapshot_mono = now;
        }
        true
    }

    /// Ends the recording and produces its record. The final state stays
    /// in the snapshot: the caller discards it once the record is queued.
    pub fn finish(&mut self, connection: ConnectionKind) -> Result<PendingActivity> {
        if self.phase != SessionPhase::Recording {
            return Err(StrideError::InvalidTransition {
                action: "finish",
                phase: self.phase,
            });
        }

        self.refresh_elapsed();
        self.close(SessionEnd::Completed);

        let distance_km = self.state.total_distance_km;
        let duration_sec = self.state.elapsed_seconds;
        let evaluation = validator::evaluate(distance_km, duration_sec, &self.validation);

        let record = PendingActivity {
            id: PendingActivity::new_id(),
            distance_km,
            duration_sec,
            route: self.state.route.clone(),
            occurred_at: self.clock.wall(),
            connection_at_save: connection,
            save_method: SaveMethod::for_connection(connection),
            status: evaluation.status,
            invalid_reason: evaluation.invalid_reason,
            avg_speed_kmh: evaluation.avg_speed_kmh,
        };

        info!(
            id = %record.id,
            distance_km,
            duration_sec,
            status = record.status.as_str(),
            reason = record.invalid_reason.map(|r| r.as_str()),
            "Recording finished"
        );
        Ok(record)
    }

    /// Stops recording and throws the progress away.
    pub fn cancel(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Recording {
            return Err(StrideError::InvalidTransition {
                action: "cancel",
                phase: self.phase,
            });
        }
        self.close(SessionEnd::Cancelled);
        info!("Recording cancelled");
        Ok(())
    }

    fn abort(&mut self, reason: AbortReason) {
        self.close(SessionEnd::Aborted(reason));
        warn!(?reason, "Recording auto-aborted; nothing will be saved");
    }

    fn close(&mut self, end: SessionEnd) {
        for guard in self.guards.drain(..) {
            guard.release();
        }
        self.phase = SessionPhase::Finished;
        self.end = Some(end);
        match end {
            SessionEnd::Completed => self.persist_snapshot(),
            SessionEnd::Aborted(_) | SessionEnd::Cancelled => {
                if let Err(err) = discard_snapshot(self.store.as_ref()) {
                    warn!(error = %err, "Failed to clear session snapshot");
                }
            }
        }
    }

    fn refresh_elapsed(&mut self) -> Duration {
        let now = self.clock.monotonic();
        let elapsed = self.elapsed_base + now.saturating_sub(self.started_mono).as_secs();
        self.state.elapsed_seconds = self.state.elapsed_seconds.max(elapsed);
        now
    }

    fn persist_snapshot(&self) {
        if let Err(err) = storage::save_json(self.store.as_ref(), SESSION_KEY, &self.state) {
            warn!(error = %err, "Failed to write session snapshot");
        }
    }
}

/// The snapshot left behind by a session that never finished, if any.
pub fn load_snapshot(store: &dyn KeyValueStore) -> Option<ActivitySessionState> {
    storage::load_json(store, SESSION_KEY)
}

pub fn discard_snapshot(store: &dyn KeyValueStore) -> Result<()> {
    store.remove(SESSION_KEY)
}
