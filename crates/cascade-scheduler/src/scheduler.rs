//! The orchestrator.
//!
//! Routes trigger events onto builders and runs every resulting unit of work
//! as its own task. Units share nothing but the publication gate; a second
//! request for a busy builder queues behind the first.

use crate::config::FleetConfig;
use crate::discovery::PackageDiscoverer;
use crate::executor::{PipelineExecutor, RunContext, RunProgress, cancellable};
use crate::expander::{PipelineExpander, run_context};
use crate::gate::PublicationGate;
use crate::matrix::BuildMatrix;
use crate::pool::WorkerPools;
use crate::schedule::ScheduleBook;
use crate::triggers::{BuildRequest, TriggerEvent, TriggerRouter};

use cascade_core::artifact::PublicationTarget;
use cascade_core::events::{
    BuilderStateChangedPayload, Event, Origin, PackagesDiscoveredPayload, RunCompletedPayload,
    RunQueuedPayload, RunStartedPayload, TriggerEmittedPayload,
};
use cascade_core::pipeline::PipelineKind;
use cascade_core::ports::EventBus;
use cascade_core::run::{BuilderEvent, BuilderId, BuilderState, RunStatus};
use cascade_core::version::classify;
use cascade_core::{Error, Result, RunId, TriggerId};
use cascade_runner::CommandRunner;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of one unit of work.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub builder: BuilderId,
    pub status: RunStatus,
    pub stages_passed: u32,
    pub published: Vec<PublicationTarget>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Verification runs started by one main-branch change, and the releases
/// that follow once every one of them has succeeded.
struct VerificationBatch {
    remaining: AtomicUsize,
    failed: AtomicBool,
    releases: Vec<BuildRequest>,
}

impl VerificationBatch {
    fn new(verifications: &[BuildRequest]) -> Self {
        Self {
            remaining: AtomicUsize::new(verifications.len()),
            failed: AtomicBool::new(false),
            releases: TriggerRouter::releases_following(verifications),
        }
    }

    /// Record one finished verification. Returns the releases when this was
    /// the last one and none failed.
    fn finish(&self, succeeded: bool) -> Option<&[BuildRequest]> {
        if !succeeded {
            self.failed.store(true, Ordering::SeqCst);
        }
        let last = self.remaining.fetch_sub(1, Ordering::SeqCst) == 1;
        (last && !self.failed.load(Ordering::SeqCst)).then_some(self.releases.as_slice())
    }
}

/// The orchestrator service.
pub struct Orchestrator {
    matrix: BuildMatrix,
    router: TriggerRouter,
    expander: PipelineExpander,
    discoverer: PackageDiscoverer,
    executor: PipelineExecutor,
    pools: WorkerPools,
    event_bus: Arc<dyn EventBus>,
    workspace_root: PathBuf,
    release_after_verification: bool,
    builder_slots: Mutex<HashMap<BuilderId, Arc<Mutex<()>>>>,
    states: RwLock<HashMap<BuilderId, BuilderState>>,
    active: RwLock<HashMap<RunId, watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<RunSummary>>>,
}

impl Orchestrator {
    pub fn new(
        config: &FleetConfig,
        runner: Arc<dyn CommandRunner>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        let gate = PublicationGate::new(&config.publication_lock);
        let executor = PipelineExecutor::new(
            Arc::clone(&runner),
            gate,
            Arc::clone(&event_bus),
            config.publish_dir.clone(),
        );

        Self {
            matrix: BuildMatrix::from_config(config),
            router: TriggerRouter::new(&config.main_branch),
            expander: PipelineExpander::from_config(config),
            discoverer: PackageDiscoverer::new(runner, config.commands.discover.clone()),
            executor,
            pools: WorkerPools::from_config(config),
            event_bus,
            workspace_root: config.workspace_root.clone(),
            release_after_verification: config.release_after_verification,
            builder_slots: Mutex::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn matrix(&self) -> &BuildMatrix {
        &self.matrix
    }

    pub fn gate(&self) -> &PublicationGate {
        self.executor.gate()
    }

    /// Route a trigger event and start every resulting unit of work.
    pub async fn handle_trigger(self: &Arc<Self>, event: TriggerEvent) -> Result<Vec<RunId>> {
        let requests = self.router.route(&self.matrix, &event)?;
        if requests.is_empty() {
            info!(trigger = ?event.trigger_type(), "Trigger matched no builders");
        }

        let batch = self.verification_batch(&event, &requests).map(Arc::new);

        let mut run_ids = Vec::with_capacity(requests.len());
        for request in requests {
            match self.dispatch_with(request, batch.clone()).await {
                Ok(run_id) => run_ids.push(run_id),
                Err(e) => {
                    if let Some(batch) = &batch {
                        batch.finish(false);
                    }
                    return Err(e);
                }
            }
        }
        Ok(run_ids)
    }

    fn verification_batch(
        &self,
        event: &TriggerEvent,
        requests: &[BuildRequest],
    ) -> Option<VerificationBatch> {
        let follows = self.release_after_verification
            && matches!(event, TriggerEvent::Push { .. })
            && !requests.is_empty()
            && requests
                .iter()
                .all(|r| r.builder.kind == PipelineKind::Verification);
        follows.then(|| VerificationBatch::new(requests))
    }

    /// Queue one request. Returns immediately; the run proceeds on its own task.
    pub async fn dispatch(self: &Arc<Self>, request: BuildRequest) -> Result<RunId> {
        self.dispatch_with(request, None).await
    }

    async fn dispatch_with(
        self: &Arc<Self>,
        request: BuildRequest,
        batch: Option<Arc<VerificationBatch>>,
    ) -> Result<RunId> {
        if self.matrix.get(&request.builder).is_none() {
            return Err(Error::BuilderNotFound(request.builder.name()));
        }

        let run_id = RunId::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active.write().await.insert(run_id, cancel_tx);

        self.event_bus
            .publish(Event::RunQueued(RunQueuedPayload {
                run_id,
                builder: request.builder.clone(),
                trigger: request.trigger,
                source_ref: request.source_ref.clone(),
                full_build: request.full_build,
                origin: request.origin.clone(),
                queued_at: chrono::Utc::now(),
            }))
            .await?;

        info!(
            run_id = %run_id,
            builder = %request.builder,
            source_ref = %request.source_ref,
            full_build = request.full_build,
            "Run queued"
        );

        let handle = self.spawn_unit(run_id, request, cancel_rx, batch);
        self.tasks.lock().await.push(handle);
        Ok(run_id)
    }

    fn spawn_unit(
        self: &Arc<Self>,
        run_id: RunId,
        request: BuildRequest,
        cancel: watch::Receiver<bool>,
        batch: Option<Arc<VerificationBatch>>,
    ) -> JoinHandle<RunSummary> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_unit(run_id, request, cancel, batch).await })
    }

    /// Ask a queued or running unit of work to stop. Returns false if the run
    /// is unknown or already finished.
    pub async fn cancel(&self, run_id: RunId) -> bool {
        match self.active.read().await.get(&run_id) {
            Some(tx) => {
                warn!(run_id = %run_id, "Cancelling run");
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub async fn builder_state(&self, builder: &BuilderId) -> BuilderState {
        self.states
            .read()
            .await
            .get(builder)
            .copied()
            .unwrap_or_default()
    }

    pub async fn active_runs(&self) -> Vec<RunId> {
        self.active.read().await.keys().copied().collect()
    }

    /// Wait until every unit of work, including those started by cascades
    /// while waiting, has finished.
    pub async fn wait_idle(&self) -> Vec<RunSummary> {
        let mut summaries = Vec::new();
        loop {
            let handles = std::mem::take(&mut *self.tasks.lock().await);
            if handles.is_empty() {
                return summaries;
            }
            for handle in handles {
                match handle.await {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => error!(error = %e, "Run task aborted"),
                }
            }
        }
    }

    /// Fire cron schedules until `shutdown` flips or its sender is dropped.
    pub async fn run_schedules(
        self: &Arc<Self>,
        book: &ScheduleBook,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut last = chrono::Utc::now();

        loop {
            let Some(next) = book.next_fire(last) else {
                info!("No schedules to run");
                return Ok(());
            };
            let wait = (next - chrono::Utc::now()).to_std().unwrap_or_default();
            info!(next = %next, "Waiting for next scheduled build");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Schedule loop stopping");
                        return Ok(());
                    }
                    continue;
                }
            }

            let now = chrono::Utc::now();
            for trigger in book.due_between(last, now) {
                if let TriggerEvent::Scheduled { schedule, architecture } = &trigger {
                    info!(schedule = %schedule, arch = %architecture, "Schedule fired");
                }
                if let Err(e) = self.handle_trigger(trigger).await {
                    warn!(error = %e, "Scheduled trigger failed");
                }
            }
            last = now;
        }
    }

    async fn run_unit(
        self: Arc<Self>,
        run_id: RunId,
        request: BuildRequest,
        cancel: watch::Receiver<bool>,
        batch: Option<Arc<VerificationBatch>>,
    ) -> RunSummary {
        let started = Instant::now();
        let builder = request.builder.clone();

        let slot = self.builder_slot(&builder).await;
        let mut progress = RunProgress::default();
        let turn = cancellable(&cancel, "queued", async move { Ok(slot.lock_owned().await) }).await;
        let result = match turn {
            Ok(_turn) => {
                self.run_on_worker(run_id, &request, cancel, &mut progress)
                    .await
            }
            Err(e) => Err(e),
        };

        let status = match &result {
            Ok(()) => RunStatus::Success,
            Err(Error::Cancelled { .. }) => RunStatus::Cancelled,
            Err(_) => RunStatus::Failure,
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let error = result.as_ref().err().map(|e| e.to_string());

        match &error {
            None => info!(run_id = %run_id, builder = %builder, duration_ms, "Run succeeded"),
            Some(e) => warn!(run_id = %run_id, builder = %builder, status = ?status, error = %e, "Run did not succeed"),
        }

        if let Err(e) = self
            .event_bus
            .publish(Event::RunCompleted(RunCompletedPayload {
                run_id,
                builder: builder.clone(),
                status,
                duration_ms,
                stages_passed: progress.stages_passed,
                error: error.clone(),
                completed_at: chrono::Utc::now(),
            }))
            .await
        {
            warn!(run_id = %run_id, error = %e, "Failed to publish run completion");
        }

        if status.is_success() && builder.kind == PipelineKind::Release && request.full_build {
            self.cascade(run_id, &request).await;
        }

        if let Some(batch) = &batch
            && let Some(releases) = batch.finish(status.is_success())
        {
            info!(run_id = %run_id, repository = %builder.repository, "Verification passed, starting releases");
            for release in releases.to_vec() {
                if let Err(e) = self.dispatch(release).await {
                    error!(repository = %builder.repository, error = %e, "Failed to dispatch release");
                }
            }
        }

        self.active.write().await.remove(&run_id);

        RunSummary {
            run_id,
            builder,
            status,
            stages_passed: progress.stages_passed,
            published: progress.published,
            error,
            duration_ms,
        }
    }

    /// Lease a worker, run the pipeline, and drive the builder state machine.
    async fn run_on_worker(
        &self,
        run_id: RunId,
        request: &BuildRequest,
        cancel: watch::Receiver<bool>,
        progress: &mut RunProgress,
    ) -> Result<()> {
        let builder = &request.builder;
        let pool = self.pools.get(builder.architecture)?;
        let lease = cancellable(&cancel, "queued", pool.acquire()).await?;

        self.transition(builder, run_id, BuilderEvent::Started).await?;
        self.event_bus
            .publish(Event::RunStarted(RunStartedPayload {
                run_id,
                builder: builder.clone(),
                worker: lease.worker().to_string(),
                started_at: chrono::Utc::now(),
            }))
            .await?;
        info!(run_id = %run_id, builder = %builder, worker = %lease.worker(), "Run started");

        let result = self
            .run_pipeline(run_id, request, lease.worker(), cancel, progress)
            .await;

        let outcome = if result.is_ok() {
            BuilderEvent::Succeeded
        } else {
            BuilderEvent::Failed
        };
        self.transition(builder, run_id, outcome).await?;

        result
    }

    async fn run_pipeline(
        &self,
        run_id: RunId,
        request: &BuildRequest,
        worker: &str,
        cancel: watch::Receiver<bool>,
        progress: &mut RunProgress,
    ) -> Result<()> {
        let builder = &request.builder;
        let spec = self
            .matrix
            .get(builder)
            .ok_or_else(|| Error::BuilderNotFound(builder.name()))?;

        let build_dir = self
            .workspace_root
            .join(worker)
            .join(builder.name())
            .join("build");
        self.executor.prepare_workspace(&build_dir).await?;

        let ctx = RunContext {
            run_id,
            builder: builder.clone(),
            build_dir: build_dir.clone(),
            variables: run_context(&spec.repository, &request.source_ref, builder.architecture),
            cancel,
        };

        match builder.kind {
            PipelineKind::Verification => {
                let groups = self.expander.verification(&ctx.variables);
                self.executor.execute(&ctx, &groups, progress).await
            }
            PipelineKind::Release => {
                let prelude = self.expander.release_prelude(&ctx.variables);
                self.executor
                    .execute(&ctx, std::slice::from_ref(&prelude), progress)
                    .await?;

                let packages = cancellable(
                    &ctx.cancel,
                    "discover",
                    self.discoverer.discover(&build_dir, &ctx.variables),
                )
                .await?;
                info!(run_id = %run_id, builder = %builder, count = packages.len(), "Packages discovered");

                self.event_bus
                    .publish(Event::PackagesDiscovered(PackagesDiscoveredPayload {
                        run_id,
                        builder: builder.clone(),
                        packages: packages.clone(),
                    }))
                    .await?;

                let groups = self.expander.expand(&packages, &ctx.variables);
                self.executor.execute(&ctx, &groups, progress).await
            }
        }
    }

    /// Emit and dispatch a trigger for every downstream release builder.
    async fn cascade(self: &Arc<Self>, run_id: RunId, request: &BuildRequest) {
        let source = &request.builder;
        let origin = request.origin.clone().unwrap_or_else(|| Origin {
            repository: source.repository.clone(),
            source_ref: request.source_ref.clone(),
            version: classify(&request.source_ref).version(),
        });

        for target in self.matrix.downstream(source) {
            info!(run_id = %run_id, source = %source, target = %target, "Cascading release");

            let emitted = self
                .event_bus
                .publish(Event::TriggerEmitted(TriggerEmittedPayload {
                    trigger_id: TriggerId::new(),
                    source_run: run_id,
                    source: source.clone(),
                    target: target.clone(),
                    full_build: true,
                    origin: origin.clone(),
                    emitted_at: chrono::Utc::now(),
                }))
                .await;
            if let Err(e) = emitted {
                warn!(target = %target, error = %e, "Failed to publish trigger event");
            }

            let trigger = TriggerEvent::Cascade {
                triggerable: target.triggerable_name(),
                full_build: true,
                origin: origin.clone(),
            };
            if let Err(e) = self.handle_trigger(trigger).await {
                error!(target = %target, error = %e, "Failed to dispatch cascade");
            }
        }
    }

    async fn builder_slot(&self, builder: &BuilderId) -> Arc<Mutex<()>> {
        let mut slots = self.builder_slots.lock().await;
        Arc::clone(slots.entry(builder.clone()).or_default())
    }

    async fn transition(
        &self,
        builder: &BuilderId,
        run_id: RunId,
        event: BuilderEvent,
    ) -> Result<BuilderState> {
        let (from, to) = {
            let mut states = self.states.write().await;
            let state = states.entry(builder.clone()).or_default();
            let from = *state;
            let to = from.apply(builder.kind, event)?;
            *state = to;
            (from, to)
        };

        self.event_bus
            .publish(Event::BuilderStateChanged(BuilderStateChangedPayload {
                builder: builder.clone(),
                run_id,
                event,
                from,
                to,
            }))
            .await?;
        Ok(to)
    }
}
