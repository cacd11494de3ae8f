//! The poll-diff-render loop a display surface runs against the backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, warn};

use super::rotation::Rotation;
use super::tracker::ArrivalTracker;
use super::view::SurfaceView;
use crate::backend::Backend;
use crate::model::Turn;
use crate::surface::SurfaceConfig;
use crate::telemetry::metrics;
use crate::telemetry::spans::surface_poll_span;

/// Receives a surface's renders. Called synchronously from the engine's
/// tasks, one callback at a time and without any engine lock held, so an
/// observer may call [`SurfaceHandle::view`] or [`SurfaceHandle::stop`].
/// Implementations should hand work off rather than block.
pub trait SurfaceObserver: Send + Sync + 'static {
    /// A poll succeeded and produced a new view.
    fn on_snapshot(&self, view: &SurfaceView);

    /// Turns that entered the called set for the first time this session.
    /// Never called with an empty slice.
    fn on_new_arrivals(&self, arrivals: &[Turn]);

    /// The rotation timer moved the featured entry.
    fn on_featured(&self, _turn: &Turn) {}
}

struct Shared {
    alive: bool,
    in_flight: bool,
    seq: u64,
    view: SurfaceView,
    tracker: ArrivalTracker,
    rotation: Rotation,
}

struct Context {
    backend: Arc<dyn Backend>,
    config: SurfaceConfig,
    observer: Arc<dyn SurfaceObserver>,
    shared: Mutex<Shared>,
    /// Held for the duration of every observer callback.
    gate: Mutex<()>,
    /// Thread currently inside a callback, if any.
    notifier: Mutex<Option<ThreadId>>,
}

impl Context {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one observer callback unless the surface has been stopped.
    fn notify(&self, callback: impl FnOnce(&dyn SurfaceObserver)) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.lock().alive {
            return false;
        }
        self.set_notifier(Some(thread::current().id()));
        callback(self.observer.as_ref());
        self.set_notifier(None);
        true
    }

    fn set_notifier(&self, id: Option<ThreadId>) {
        *self.notifier.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Wait for a callback on another thread to return. A no-op when called
    /// from inside a callback.
    fn drain_callbacks(&self) {
        let current = thread::current().id();
        let inside = *self.notifier.lock().unwrap_or_else(PoisonError::into_inner) == Some(current);
        if !inside {
            drop(self.gate.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }
}

/// One surface's synchronization engine. Each instance owns its own
/// baseline; two engines never share arrival state.
pub struct SyncEngine {
    backend: Arc<dyn Backend>,
    config: SurfaceConfig,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn Backend>, config: SurfaceConfig) -> Self {
        Self { backend, config }
    }

    /// Spawn the poll ticker (and the rotation ticker, if configured).
    /// The first poll is issued immediately.
    pub fn start(self, observer: Arc<dyn SurfaceObserver>) -> SurfaceHandle {
        let ctx = Arc::new(Context {
            backend: self.backend,
            config: self.config,
            observer,
            shared: Mutex::new(Shared {
                alive: true,
                in_flight: false,
                seq: 0,
                view: SurfaceView::empty(),
                tracker: ArrivalTracker::new(),
                rotation: Rotation::new(),
            }),
            gate: Mutex::new(()),
            notifier: Mutex::new(None),
        });
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut tasks = vec![tokio::spawn(poll_loop(Arc::clone(&ctx), stop_rx.clone()))];
        if ctx.config.rotation_interval().is_some() {
            tasks.push(tokio::spawn(rotation_loop(Arc::clone(&ctx), stop_rx)));
        }

        info!(
            surface = %ctx.config.name,
            filter = ?ctx.config.filter,
            poll_interval_secs = ctx.config.poll_interval_secs,
            rotation_interval_secs = ?ctx.config.rotation_interval_secs,
            "surface started"
        );

        SurfaceHandle {
            ctx,
            stop_tx,
            tasks,
        }
    }
}

/// Cancellation handle for a running surface. Dropping it stops the surface.
pub struct SurfaceHandle {
    ctx: Arc<Context>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SurfaceHandle {
    /// Stop both timers. No observer callback fires after this returns; a
    /// fetch already in flight completes but its result is discarded.
    pub fn stop(&self) {
        {
            let mut shared = self.ctx.lock();
            if !shared.alive {
                return;
            }
            shared.alive = false;
        }
        self.ctx.drain_callbacks();
        let _ = self.stop_tx.send(true);
        for task in &self.tasks {
            task.abort();
        }
        info!(surface = %self.ctx.config.name, "surface stopped");
    }

    pub fn is_running(&self) -> bool {
        self.ctx.lock().alive
    }

    /// The last successfully rendered view.
    pub fn view(&self) -> SurfaceView {
        self.ctx.lock().view.clone()
    }

    pub fn name(&self) -> &str {
        &self.ctx.config.name
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(ctx: Arc<Context>, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(ctx.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let seq = {
                    let mut shared = ctx.lock();
                    if !shared.alive {
                        break;
                    }
                    if shared.in_flight {
                        debug!(surface = %ctx.config.name, "previous fetch outstanding, skipping tick");
                        continue;
                    }
                    shared.in_flight = true;
                    shared.seq += 1;
                    shared.seq
                };
                tokio::spawn(poll_once(Arc::clone(&ctx), seq));
            }
        }
    }
}

async fn poll_once(ctx: Arc<Context>, seq: u64) {
    let span = surface_poll_span(&ctx.config.name, seq);
    async {
        let result = ctx
            .backend
            .list_active_turns(ctx.config.filter.server_lane())
            .await;

        let mut shared = ctx.lock();
        shared.in_flight = false;
        let surface = KeyValue::new("surface", ctx.config.name.clone());

        if !shared.alive {
            metrics::surface_polls().add(1, &[surface, KeyValue::new("result", "discarded")]);
            return;
        }

        let turns = match result {
            Ok(turns) => turns,
            Err(e) => {
                metrics::surface_polls().add(1, &[surface, KeyValue::new("result", "error")]);
                warn!(surface = %ctx.config.name, error = %e, "poll failed, keeping last snapshot");
                return;
            }
        };
        tracing::Span::current().record("poll.turns", turns.len() as u64);
        metrics::surface_polls().add(1, &[surface.clone(), KeyValue::new("result", "ok")]);

        let mut view = SurfaceView::build(turns, ctx.config.filter, Utc::now());
        let arrivals = shared.tracker.observe(&view.called);
        shared.rotation.resize(view.called.len());
        if ctx.config.rotation_interval().is_some() {
            view.featured = shared.rotation.current();
        }
        shared.view = view.clone();
        drop(shared);

        if !ctx.notify(|observer| observer.on_snapshot(&view)) {
            return;
        }
        if !arrivals.is_empty() {
            metrics::surface_new_arrivals().add(arrivals.len() as u64, &[surface]);
            if ctx.config.alerts {
                info!(
                    surface = %ctx.config.name,
                    turns = ?arrivals.iter().map(|t| t.key().to_string()).collect::<Vec<_>>(),
                    "new arrivals"
                );
                ctx.notify(|observer| observer.on_new_arrivals(&arrivals));
            }
        }
    }
    .instrument(span)
    .await
}

async fn rotation_loop(ctx: Arc<Context>, mut stop_rx: watch::Receiver<bool>) {
    let Some(period) = ctx.config.rotation_interval() else {
        return;
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let featured = {
                    let mut shared = ctx.lock();
                    if !shared.alive {
                        break;
                    }
                    let Some(index) = shared.rotation.advance() else {
                        continue;
                    };
                    shared.view.featured = Some(index);
                    shared.view.called.get(index).cloned()
                };
                if let Some(turn) = featured {
                    ctx.notify(|observer| observer.on_featured(&turn));
                }
            }
        }
    }
}
