use network::{Task, TaskKind};
use rand::Rng;
use rcmgr::{ResourceManager, ResourceScope, ResourceScopeSpan, ScopeStat};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::context::{Collaborators, ExecutorContext};
use crate::error::{ExecutorError, Result};
use crate::gc;
use crate::metrics::ExecutorMetrics;
use crate::receive::handle_receive_piece_task;
use crate::replicate::handle_replicate_piece_task;
use crate::reporter::{ManagerReporter, ReportOutcome, TaskReporter};
use crate::seal::handle_seal_object_task;

pub const EXECUTOR_MODULE_NAME: &str = "executor";

/// Log the saturation message once per this many skipped ticks.
const OVER_LIMIT_LOG_EVERY: u64 = 60;

/// Tasks currently running, per kind.
#[derive(Default)]
struct TaskCounters {
    asking: AtomicI64,
    replicate: AtomicI64,
    seal: AtomicI64,
    receive: AtomicI64,
    gc_object: AtomicI64,
    gc_zombie: AtomicI64,
    gc_meta: AtomicI64,
    gc_bucket_migration: AtomicI64,
    gc_stale_version: AtomicI64,
}

impl TaskCounters {
    fn for_kind(&self, kind: &TaskKind) -> &AtomicI64 {
        match kind {
            TaskKind::Replicate(_) => &self.replicate,
            TaskKind::Seal(_) => &self.seal,
            TaskKind::ReceiveConfirm(_) => &self.receive,
            TaskKind::GcObject(_) => &self.gc_object,
            TaskKind::GcZombie(_) => &self.gc_zombie,
            TaskKind::GcMeta(_) => &self.gc_meta,
            TaskKind::GcBucketMigration(_) => &self.gc_bucket_migration,
            TaskKind::GcStaleVersion(_) => &self.gc_stale_version,
        }
    }
}

/// Decrements a counter when dropped, so panicking workers still give back their slot.
struct CounterGuard<'a>(&'a AtomicI64);

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicI64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ExecutorInner {
    ctx: ExecutorContext,
    resource_manager: ResourceManager,
    scope: Mutex<Option<ResourceScope>>,
    reporter: Arc<dyn TaskReporter>,
    executing: AtomicI64,
    counters: TaskCounters,
    shutdown: watch::Sender<bool>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Pulls background tasks from the manager and runs them under a resource budget.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, deps: Collaborators) -> Result<Self> {
        let metrics = Arc::new(ExecutorMetrics::new()?);
        let reporter = Arc::new(ManagerReporter::new(deps.manager.clone(), metrics.clone()));
        Self::with_reporter(config, deps, metrics, reporter)
    }

    /// Builds an executor that reports through `reporter` instead of the manager client.
    pub fn with_reporter(
        config: ExecutorConfig,
        deps: Collaborators,
        metrics: Arc<ExecutorMetrics>,
        reporter: Arc<dyn TaskReporter>,
    ) -> Result<Self> {
        config.validate()?;
        let resource_manager = ResourceManager::new(config.clone().into());
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                ctx: ExecutorContext::new(config, deps, metrics),
                resource_manager,
                scope: Mutex::new(None),
                reporter,
                executing: AtomicI64::new(0),
                counters: TaskCounters::default(),
                shutdown,
                dispatcher: tokio::sync::Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        EXECUTOR_MODULE_NAME
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.ctx.config
    }

    pub fn metrics(&self) -> &ExecutorMetrics {
        &self.inner.ctx.metrics
    }

    pub fn resource_scope(&self) -> Option<ResourceScope> {
        self.inner.current_scope().ok()
    }

    pub async fn sp_id(&self) -> Result<u32> {
        self.inner.ctx.sp_id().await
    }

    /// Opens the executor's resource scope and starts the dispatch loop.
    pub async fn start(&self) -> Result<()> {
        let mut dispatcher = self.inner.dispatcher.lock().await;
        if dispatcher.is_some() {
            return Err(ExecutorError::InvalidConfig("executor already started".to_string()));
        }

        let scope = self.inner.resource_manager.open_service(EXECUTOR_MODULE_NAME);
        info!("Opened resource scope {} with limit {}", scope.name(), scope.limit());
        *self.inner.lock_scope() = Some(scope);

        self.inner.shutdown.send_replace(false);
        let shutdown = self.inner.shutdown.subscribe();
        let inner = self.inner.clone();
        *dispatcher = Some(tokio::spawn(async move { inner.dispatch_loop(shutdown).await }));
        info!(
            "Executor started, max {} concurrent tasks, asking every {:?}",
            self.inner.ctx.config.max_execute_number,
            self.inner.ctx.config.ask_task_interval()
        );
        Ok(())
    }

    /// Stops asking for work, waits for running workers, then releases the scope.
    pub async fn stop(&self) -> Result<()> {
        self.inner.shutdown.send_replace(true);
        if let Some(handle) = self.inner.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Dispatch loop ended abnormally: {}", e);
            }
        }
        if let Some(scope) = self.inner.lock_scope().take() {
            scope.release();
            info!("Released resource scope {}", scope.name());
        }
        info!("Executor stopped");
        Ok(())
    }

    /// Runs one worker cycle: asks the manager for a task, executes it and
    /// reports the result. Returns the final task, or `None` when the manager
    /// had nothing to hand out.
    pub async fn ask_task(&self) -> Result<Option<Task>> {
        self.inner.ask_task().await
    }

    /// Runs a task that was obtained out of band. Cancellation comes back as
    /// `Err(Canceled)`; other failures are returned without touching `task.error`.
    pub async fn execute_task(&self, task: &mut Task) -> Result<()> {
        self.inner.execute(task).await
    }

    pub async fn report_task(&self, task: &Task) -> ReportOutcome {
        self.inner.reporter.report(task).await
    }

    pub fn reserve_resource(&self, stat: &ScopeStat) -> Result<ResourceScopeSpan> {
        let scope = self.inner.current_scope()?;
        let mut span = scope.begin_span()?;
        span.reserve(stat)?;
        Ok(span)
    }

    pub fn release_resource(&self, span: ResourceScopeSpan) {
        span.done();
    }

    pub fn executing(&self) -> i64 {
        self.inner.executing.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> String {
        self.inner.statistics()
    }
}

impl ExecutorInner {
    fn lock_scope(&self) -> std::sync::MutexGuard<'_, Option<ResourceScope>> {
        self.scope.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_scope(&self) -> Result<ResourceScope> {
        self.lock_scope()
            .clone()
            .ok_or_else(|| rcmgr::RcmgrError::ScopeClosed(EXECUTOR_MODULE_NAME.to_string()).into())
    }

    async fn dispatch_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let config = &self.ctx.config;
        let mut ask_ticker = tokio::time::interval(config.ask_task_interval());
        ask_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats_ticker = tokio::time::interval(config.statistics_output_interval());
        stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let max = config.max_execute_number;
        let mut workers = JoinSet::new();
        let mut over_limit_ticks: u64 = 0;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ask_ticker.tick() => {
                    let executing = self.executing.load(Ordering::SeqCst);
                    self.ctx.metrics.max_task_number.set(max);
                    self.ctx.metrics.running_task_number.set(executing);
                    if executing >= max {
                        over_limit_ticks += 1;
                        if over_limit_ticks % OVER_LIMIT_LOG_EVERY == 1 {
                            debug!("Asking task is over limit, executing[{}], max[{}]", executing, max);
                        }
                        continue;
                    }
                    over_limit_ticks = 0;

                    self.executing.fetch_add(1, Ordering::SeqCst);
                    let inner = self.clone();
                    workers.spawn(async move {
                        let _slot = ExecutingSlot(inner.clone());
                        if let Err(e) = inner.ask_task().await {
                            debug!("Worker finished with error: {}", e);
                        }
                    });
                }
                _ = stats_ticker.tick() => {
                    info!("{}", self.statistics());
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        error!("Worker panicked: {}", e);
                    }
                }
            }
        }

        info!("Dispatch loop stopping, waiting for {} workers", workers.len());
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker panicked: {}", e);
            }
        }
    }

    async fn ask_task(&self) -> Result<Option<Task>> {
        let scope = self.current_scope()?;
        let metrics = &self.ctx.metrics;

        let mut task = {
            let _asking = CounterGuard::enter(&self.counters.asking);
            let remaining = scope.remaining();
            metrics.observe_remaining(&remaining);
            match self.ctx.deps.manager.ask_task(&remaining).await {
                Ok(task) => {
                    metrics.ask_task_counter.with_label_values(&["task"]).inc();
                    task
                }
                Err(e) if e.is_no_task() => {
                    metrics.ask_task_counter.with_label_values(&["none"]).inc();
                    return Ok(None);
                }
                Err(e) => {
                    metrics.ask_task_counter.with_label_values(&["error"]).inc();
                    warn!("Failed to ask task: {}", e);
                    let interval_ms = self.ctx.config.ask_task_interval_ms;
                    let backoff = rand::thread_rng().gen_range(0..=interval_ms);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    return Err(e.into());
                }
            }
        };

        let mut span = match scope.begin_span() {
            Ok(span) => span,
            Err(e) => {
                warn!("Failed to open resource span for task {}: {}", task.key, e);
                return Err(e.into());
            }
        };
        let estimate = task.estimate_limit();
        if let Err(e) = span.reserve(&estimate) {
            warn!("Failed to reserve {} for task {}: {}", estimate, task.key, e);
            return Err(e.into());
        }
        debug!("Reserved {} for task {} (span {})", estimate, task.key, span.id());

        let kind = task.kind_name();
        let start = Instant::now();
        let result = {
            let _running = CounterGuard::enter(self.counters.for_kind(&task.kind));
            self.execute(&mut task).await
        };
        metrics.task_time.with_label_values(&[kind]).observe(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                metrics.task_counter.with_label_values(&[kind, "success"]).inc();
                info!("Finished {} task {}", kind, task.key);
            }
            Err(ExecutorError::Canceled) => {
                metrics.task_counter.with_label_values(&[kind, "canceled"]).inc();
                task.canceled = true;
                info!("Task {} canceled, stopping", task.key);
            }
            Err(e) => {
                metrics.task_counter.with_label_values(&[kind, "failure"]).inc();
                error!("Failed to execute {} task {}: {}", kind, task.key, e);
                task.set_error(e.code(), e.to_string());
            }
        }

        if !task.canceled {
            self.reporter.report(&task).await;
        }
        span.done();
        Ok(Some(task))
    }

    async fn execute(&self, task: &mut Task) -> Result<()> {
        let ctx = &self.ctx;
        let reporter = self.reporter.as_ref();
        debug!("Executing {} task {}", task.kind_name(), task.key);
        match task.kind {
            TaskKind::Replicate(_) => handle_replicate_piece_task(ctx, reporter, task).await,
            TaskKind::Seal(_) => handle_seal_object_task(ctx, task).await,
            TaskKind::ReceiveConfirm(_) => handle_receive_piece_task(ctx, task).await,
            TaskKind::GcObject(_) => gc::handle_gc_object_task(ctx, reporter, task).await,
            TaskKind::GcZombie(_) => gc::handle_gc_zombie_piece_task(ctx, reporter, task).await,
            TaskKind::GcMeta(_) => gc::handle_gc_meta_task(ctx, task).await,
            TaskKind::GcBucketMigration(_) => gc::handle_gc_bucket_migration_task(ctx, reporter, task).await,
            TaskKind::GcStaleVersion(_) => gc::handle_gc_stale_version_object_task(ctx, task).await,
        }
    }

    fn statistics(&self) -> String {
        let c = &self.counters;
        let load = |counter: &AtomicI64| counter.load(Ordering::SeqCst);
        format!(
            "maxAsk[{}], asking[{}], replicate[{}], seal[{}], receive[{}], gcObject[{}], gcZombie[{}], gcMeta[{}], gcBucketMigration[{}], gcStaleVersion[{}]",
            self.ctx.config.max_execute_number,
            load(&c.asking),
            load(&c.replicate),
            load(&c.seal),
            load(&c.receive),
            load(&c.gc_object),
            load(&c.gc_zombie),
            load(&c.gc_meta),
            load(&c.gc_bucket_migration),
            load(&c.gc_stale_version),
        )
    }
}

/// Gives back a dispatch slot when the worker ends, however it ends.
struct ExecutingSlot(Arc<ExecutorInner>);

impl Drop for ExecutingSlot {
    fn drop(&mut self) {
        self.0.executing.fetch_sub(1, Ordering::SeqCst);
    }
}
