//! Engine instance: one session actor, one sync scheduler, and the watchers
//! that feed them.
//!
//! All session mutation happens on the actor task, which drains a single
//! event channel carrying fixes, ticks and commands. Sync passes are started
//! by [`SyncTrigger`]s from the connectivity watcher, the periodic timer, the
//! actor (after a record is queued) and explicit requests.
//!
//! ```text
//! LocationProvider ─┐
//! ticker ───────────┼─► events ─► SessionActor ─► SyncEngine.enqueue
//! StrideEngine ─────┘                  │
//!                                      └─► triggers ─► scheduler ─► SyncEngine.sync
//! NetworkMonitor ─► watcher ─► triggers
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{Result, StrideError};
use crate::network::{self, NetworkMonitor};
use crate::platform::{LocationProvider, PermissionStatus, SessionPlatform, SubscriptionGuard};
use crate::remote::ActivitySink;
use crate::session::{self, ActivitySession, FixOutcome, SessionPhase, SessionView};
use crate::storage::KeyValueStore;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::types::{ActivitySessionState, PendingActivity, Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    NetworkRestored,
    RecordQueued,
    Periodic,
    Explicit,
}

/// Capabilities the host supplies to an engine.
pub struct EngineDeps {
    pub store: Arc<dyn KeyValueStore>,
    pub location: Arc<dyn LocationProvider>,
    pub network: Arc<dyn NetworkMonitor>,
    pub sink: Arc<dyn ActivitySink>,
    pub clock: Arc<dyn Clock>,
    pub user_id: String,
}

enum SessionEvent {
    Fix {
        generation: u64,
        sample: Sample,
    },
    Tick {
        generation: u64,
    },
    Start {
        resume: Option<ActivitySessionState>,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<PendingActivity>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<()>>,
    },
    DiscardSnapshot {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Wires a session to the location provider and a tokio ticker, tagging
/// every event with the session's generation so stragglers from an earlier
/// session are dropped.
struct RuntimePlatform<'a> {
    location: &'a dyn LocationProvider,
    events: &'a mpsc::UnboundedSender<SessionEvent>,
    generation: u64,
}

impl SessionPlatform for RuntimePlatform<'_> {
    fn location_permission(&self) -> PermissionStatus {
        self.location.permission()
    }

    fn subscribe_fixes(&self) -> Result<SubscriptionGuard> {
        let events = self.events.clone();
        let generation = self.generation;
        self.location.watch(Box::new(move |sample| {
            let _ = events.send(SessionEvent::Fix { generation, sample });
        }))
    }

    fn start_ticker(&self, period: Duration) -> Result<SubscriptionGuard> {
        let events = self.events.clone();
        let generation = self.generation;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if events.send(SessionEvent::Tick { generation }).is_err() {
                    break;
                }
            }
        });
        Ok(SubscriptionGuard::new("ticker", move || task.abort()))
    }
}

struct SessionActor {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    location: Arc<dyn LocationProvider>,
    network: Arc<dyn NetworkMonitor>,
    sync: Arc<SyncEngine>,
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    events: mpsc::UnboundedSender<SessionEvent>,
    view: watch::Sender<SessionView>,
    session: Option<ActivitySession>,
    generation: u64,
}

impl SessionActor {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        // Dropping the session releases its subscriptions; the snapshot is
        // left in place for recovery.
        if let Some(session) = self.session.take() {
            if session.phase() == SessionPhase::Recording {
                info!("Engine stopping with a live recording; snapshot kept");
            }
        }
        self.publish();
        debug!("Session actor stopped");
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Fix { generation, sample } => {
                if generation != self.generation {
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    if let FixOutcome::AutoAborted(reason) = session.on_fix(&sample) {
                        info!(?reason, "Session discarded by speed guard");
                    }
                }
                self.publish();
            }
            SessionEvent::Tick { generation } => {
                if generation != self.generation {
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.on_tick();
                }
                self.publish();
            }
            // Observers see the new view before the caller gets its reply.
            SessionEvent::Start { resume, reply } => {
                let result = self.start(resume);
                self.publish();
                let _ = reply.send(result);
            }
            SessionEvent::Stop { reply } => {
                let result = self.stop();
                self.publish();
                let _ = reply.send(result);
            }
            SessionEvent::Cancel { reply } => {
                let result = match self.session.as_mut() {
                    Some(session) => session.cancel(),
                    None => Err(StrideError::InvalidTransition {
                        action: "cancel",
                        phase: SessionPhase::Idle,
                    }),
                };
                self.publish();
                let _ = reply.send(result);
            }
            SessionEvent::DiscardSnapshot { reply } => {
                let _ = reply.send(self.discard_snapshot());
            }
        }
    }

    fn current_phase(&self) -> SessionPhase {
        self.session
            .as_ref()
            .map(|s| s.phase())
            .unwrap_or(SessionPhase::Idle)
    }

    fn start(&mut self, resume: Option<ActivitySessionState>) -> Result<()> {
        let action = if resume.is_some() { "resume" } else { "start" };
        if self.current_phase() == SessionPhase::Recording {
            return Err(StrideError::InvalidTransition {
                action,
                phase: SessionPhase::Recording,
            });
        }

        if resume.is_none() && session::load_snapshot(self.store.as_ref()).is_some() {
            warn!("Start refused: an interrupted recording is still on disk");
            return Err(StrideError::UnrecoveredSnapshot);
        }

        self.generation += 1;
        let mut session = ActivitySession::new(&self.config, self.clock.clone(), self.store.clone());
        let platform = RuntimePlatform {
            location: self.location.as_ref(),
            events: &self.events,
            generation: self.generation,
        };
        match resume {
            Some(snapshot) => session.resume(snapshot, &platform)?,
            None => session.start(&platform)?,
        }
        self.session = Some(session);
        Ok(())
    }

    fn stop(&mut self) -> Result<PendingActivity> {
        let connection = self.network.current().connection_kind();
        let record = match self.session.as_mut() {
            Some(session) => session.finish(connection)?,
            None => {
                return Err(StrideError::InvalidTransition {
                    action: "finish",
                    phase: SessionPhase::Idle,
                })
            }
        };

        // The snapshot outlives the session until the record is durable.
        if let Err(err) = self.sync.enqueue(record.clone()) {
            error!(id = %record.id, error = %err, "Failed to queue finished activity; snapshot kept");
            return Err(StrideError::NotQueued {
                record: Box::new(record),
                source: Box::new(err),
            });
        }
        if let Err(err) = session::discard_snapshot(self.store.as_ref()) {
            warn!(id = %record.id, error = %err, "Failed to clear session snapshot");
        }

        if self.network.current().is_usable() {
            let _ = self.triggers.send(SyncTrigger::RecordQueued);
        }
        Ok(record)
    }

    fn discard_snapshot(&mut self) -> Result<()> {
        let phase = self.current_phase();
        if phase == SessionPhase::Recording {
            return Err(StrideError::InvalidTransition {
                action: "discard the snapshot of",
                phase,
            });
        }
        session::discard_snapshot(self.store.as_ref())?;
        info!("Discarded session snapshot");
        Ok(())
    }

    fn publish(&self) {
        let next = self
            .session
            .as_ref()
            .map(ActivitySession::view)
            .unwrap_or_default();
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn run_scheduler(
    sync: Arc<SyncEngine>,
    mut triggers: mpsc::UnboundedReceiver<SyncTrigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let trigger = tokio::select! {
            _ = shutdown.changed() => break,
            trigger = triggers.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
        };

        // Anything that piled up during the last pass is covered by this one.
        let mut coalesced = 0usize;
        while triggers.try_recv().is_ok() {
            coalesced += 1;
        }

        let outcome = sync.sync().await;
        debug!(?trigger, coalesced, ?outcome, "Sync trigger handled");
    }
    debug!("Sync scheduler stopped");
}

async fn watch_connectivity(
    mut rx: watch::Receiver<network::ConnectivityState>,
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut previous = *rx.borrow_and_update();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *rx.borrow_and_update();
                if network::is_restored(previous, next) {
                    info!(kind = ?next.kind, "Connectivity restored; scheduling sync");
                    let _ = triggers.send(SyncTrigger::NetworkRestored);
                }
                previous = next;
            }
        }
    }
}

async fn run_periodic(
    period: Duration,
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                if triggers.send(SyncTrigger::Periodic).is_err() {
                    break;
                }
            }
        }
    }
}

/// A running engine. Must be created inside a tokio runtime.
pub struct StrideEngine {
    events: mpsc::UnboundedSender<SessionEvent>,
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    view: watch::Receiver<SessionView>,
    sync: Arc<SyncEngine>,
    store: Arc<dyn KeyValueStore>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl StrideEngine {
    pub fn init(config: EngineConfig, deps: EngineDeps) -> Self {
        let sync = Arc::new(SyncEngine::new(
            deps.user_id,
            deps.store.clone(),
            deps.sink,
            deps.network.clone(),
            &config.sync,
        ));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (triggers_tx, triggers_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SessionView::idle());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let periodic = config.sync.periodic_interval();
        let actor = SessionActor {
            config,
            clock: deps.clock,
            store: deps.store.clone(),
            location: deps.location,
            network: deps.network.clone(),
            sync: sync.clone(),
            triggers: triggers_tx.clone(),
            events: events_tx.clone(),
            view: view_tx,
            session: None,
            generation: 0,
        };

        let mut tasks = vec![
            tokio::spawn(actor.run(events_rx, shutdown_rx.clone())),
            tokio::spawn(run_scheduler(sync.clone(), triggers_rx, shutdown_rx.clone())),
            tokio::spawn(watch_connectivity(
                deps.network.subscribe(),
                triggers_tx.clone(),
                shutdown_rx.clone(),
            )),
        ];
        if let Some(period) = periodic {
            tasks.push(tokio::spawn(run_periodic(
                period,
                triggers_tx.clone(),
                shutdown_rx,
            )));
        }

        let _ = triggers_tx.send(SyncTrigger::Startup);
        info!(user_id = %sync.user_id(), pending = sync.pending_len(), "Engine started");

        Self {
            events: events_tx,
            triggers: triggers_tx,
            view: view_rx,
            sync,
            store: deps.store,
            shutdown: shutdown_tx,
            tasks,
        }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> SessionEvent) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(make(reply))
            .map_err(|_| StrideError::EngineStopped)?;
        rx.await.map_err(|_| StrideError::EngineStopped)?
    }

    pub async fn start_session(&self) -> Result<()> {
        self.call(|reply| SessionEvent::Start { resume: None, reply }).await
    }

    pub async fn resume_session(&self, snapshot: ActivitySessionState) -> Result<()> {
        self.call(|reply| SessionEvent::Start {
            resume: Some(snapshot),
            reply,
        })
        .await
    }

    /// Finishes the recording and queues its record. The record is only
    /// returned once it is durably queued. If queueing fails the error
    /// carries the record and the final snapshot stays on disk.
    pub async fn stop_session(&self) -> Result<PendingActivity> {
        self.call(|reply| SessionEvent::Stop { reply }).await
    }

    pub async fn cancel_session(&self) -> Result<()> {
        self.call(|reply| SessionEvent::Cancel { reply }).await
    }

    /// Snapshot left by a recording that never finished.
    pub fn recovered_snapshot(&self) -> Option<ActivitySessionState> {
        session::load_snapshot(self.store.as_ref())
    }

    pub async fn discard_snapshot(&self) -> Result<()> {
        self.call(|reply| SessionEvent::DiscardSnapshot { reply }).await
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Queues a sync pass on the scheduler and returns immediately.
    pub fn request_sync(&self) {
        if self.triggers.send(SyncTrigger::Explicit).is_err() {
            warn!("Sync requested after shutdown");
        }
    }

    /// Runs a pass on the caller's task and reports what it did.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.sync.sync().await
    }

    pub fn pending(&self) -> Vec<PendingActivity> {
        self.sync.pending()
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Stops every task and waits for them. A live recording has its
    /// subscriptions released and keeps its snapshot.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "Engine task ended abnormally");
            }
        }
        info!("Engine stopped");
    }
}
