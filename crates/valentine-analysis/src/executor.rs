//! The concurrent analysis executor.
//!
//! Two runtimes cooperate:
//!
//! - the I/O runtime runs a single task that enumerates targets, waits for
//!   admission, loads each target and runs format detection;
//! - the CPU runtime (N workers) evaluates the enabled rules of every
//!   detected class and hands the entity over to the combined phase.
//!
//! Each loaded target holds an [`AdmissionPermit`] until its CPU task ends.
//! After enumeration the I/O task waits until every permit is released, which
//! is the barrier in front of the combined phase.
//!
//! Cancellation is cooperative: the stop token is checked before a target is
//! admitted, after detection, before every rule class and between rules. Work
//! already started runs to completion and its reports are kept.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use valentine_core::cache::ValueCache;
use valentine_core::entity::{FileEntity, SubjectEntity, ENTITY_TAG};
use valentine_core::messages::{self, arg};
use valentine_core::progress::{ProgressReport, ProgressState};
use valentine_core::provider::{AsyncValueProvider, ValueProvider};
use valentine_core::report::{CommonReport, EntityReport, NamedArg, ReportFactory, ReportLevel};
use valentine_core::selector::RuleSelector;
use valentine_core::shared::SharedValueProvider;
use valentine_core::time::TimeTracker;
use valentine_core::value::make_value;
use valentine_core::{panic_message, RuleClassMask};

use crate::admission::{AdmissionControl, AdmissionPermit};
use crate::context::CombinedContext;
use crate::enumerator::{enumerate_target, TargetEntry};
use crate::plan::AnalysisPlan;
use crate::registry::EngineRegistry;
use crate::{AnalysisError, AnalysisResult};

// ---------------------------------------------------------------------------
// StopHandle
// ---------------------------------------------------------------------------

/// Requests a cooperative stop of a running analysis.
#[derive(Clone)]
pub struct StopHandle {
    token: CancellationToken,
    interrupted: Arc<AtomicBool>,
    report: Arc<dyn CommonReport>,
}

impl StopHandle {
    /// Requests a stop. Only the first request is logged.
    pub fn stop(&self) {
        if self.interrupted.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("stop requested");
        self.report
            .log(ReportLevel::Info, messages::EXPLICIT_STOP_REQUESTED, &[]);
        self.token.cancel();
    }

    /// Returns `true` once a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// ConcurrentExecutor
// ---------------------------------------------------------------------------

/// What a finished run leaves behind besides its reports.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Start, end and duration of the run.
    pub time: TimeTracker,
    /// Largest admitted weight observed at once.
    pub peak_weight: u64,
}

struct ExecutorState {
    plan: Arc<AnalysisPlan>,
    registry: Arc<EngineRegistry>,
    reports: Arc<dyn ReportFactory>,
    common: Arc<dyn CommonReport>,
    progress: Option<Arc<dyn ProgressReport>>,
    shared: Arc<SharedValueProvider>,
    admission: Arc<AdmissionControl>,
    combined: Option<CombinedContext>,
    stop: CancellationToken,
}

/// Runs one analysis plan over an I/O pool and a CPU pool.
pub struct ConcurrentExecutor {
    state: Arc<ExecutorState>,
    stop: StopHandle,
}

impl ConcurrentExecutor {
    /// Prepares a run: builds the shared value provider and resolves the
    /// values of the combined phase.
    ///
    /// # Errors
    ///
    /// Fails if the plan is invalid, two shared generators provide the same
    /// tag, or the combined generators form a cycle.
    pub fn new(
        plan: Arc<AnalysisPlan>,
        registry: Arc<EngineRegistry>,
        reports: Arc<dyn ReportFactory>,
        progress: Option<Arc<dyn ProgressReport>>,
    ) -> AnalysisResult<Self> {
        plan.validate()?;
        let common = reports.common_report();
        let shared = Arc::new(registry.shared_provider(common.clone())?);
        let combined = CombinedContext::prepare(&plan, &registry, common.as_ref())?;
        let admission = AdmissionControl::new(plan.preload_limit.limit());
        let token = CancellationToken::new();

        let stop = StopHandle {
            token: token.clone(),
            interrupted: Arc::new(AtomicBool::new(false)),
            report: common.clone(),
        };
        let state = ExecutorState {
            plan,
            registry,
            reports,
            common,
            progress,
            shared,
            admission,
            combined,
            stop: token,
        };
        Ok(Self {
            state: Arc::new(state),
            stop,
        })
    }

    /// A handle that stops this run.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The run-level report sink.
    #[must_use]
    pub fn common_report(&self) -> &Arc<dyn CommonReport> {
        &self.state.common
    }

    /// Runs the plan to completion (or to a requested stop), blocking the
    /// calling thread. Must not be called from within an async runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Runtime`] if a thread pool cannot be started.
    pub fn run(self) -> AnalysisResult<ExecutionOutcome> {
        let threads = self.state.plan.worker_threads();
        let cpu = build_runtime("cpu", "valentine-cpu", threads)?;
        let io = build_runtime("io", "valentine-io", 1)?;

        let mut time = TimeTracker::new();
        time.start();
        info!(
            threads,
            preload_limit = %self.state.plan.preload_limit,
            combined = self.state.combined.is_some(),
            "analysis started"
        );

        let state = self.state.clone();
        let stop = self.stop.clone();
        let cpu_handle = cpu.handle().clone();
        let signals = state.plan.signal_cancellation;
        io.block_on(async move {
            let watcher = signals.then(|| tokio::spawn(watch_signals(stop)));
            state.io_task(&cpu_handle).await;
            if let Some(watcher) = watcher {
                watcher.abort();
            }
        });

        time.stop(self.stop.is_stopped());
        let peak_weight = self.state.admission.peak();
        info!(
            duration_ms = u64::try_from(time.duration().as_millis()).unwrap_or(u64::MAX),
            peak_weight,
            interrupted = time.is_interrupted(),
            "analysis finished"
        );
        Ok(ExecutionOutcome { time, peak_weight })
    }
}

fn build_runtime(pool: &'static str, name: &str, workers: usize) -> AnalysisResult<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(workers.max(1))
        .thread_name(name)
        .enable_all()
        .build()
        .map_err(|source| AnalysisError::Runtime { pool, source })
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

impl ExecutorState {
    fn report_progress(&self, entity: Option<&dyn SubjectEntity>, state: ProgressState) {
        if let Some(progress) = &self.progress {
            progress.report_progress(entity, state);
        }
    }

    async fn io_task(self: &Arc<Self>, cpu: &Handle) {
        'targets: for target in &self.plan.targets {
            let root = self.plan.resolve_path(&target.path);
            let selector = self.plan.selector_for(target);
            for entry in enumerate_target(&root, target) {
                if self.stop.is_cancelled() {
                    break 'targets;
                }
                match entry {
                    TargetEntry::File { path, size } => {
                        self.load_target(path, size, &selector, cpu).await;
                    }
                    TargetEntry::Filtered(path) => {
                        let entity = FileEntity::new(path, 0);
                        self.report_progress(Some(&entity), ProgressState::TargetSkippedFiltered);
                    }
                    TargetEntry::Inaccessible { path, error } => {
                        self.common.log(
                            ReportLevel::Critical,
                            messages::INACCESSIBLE_ENTITY,
                            &path_args(&path, error),
                        );
                    }
                    TargetEntry::DirectoryError { path, error } => {
                        self.common.log(
                            ReportLevel::Error,
                            messages::TARGET_ENUMERATION_ERROR,
                            &path_args(&path, error),
                        );
                    }
                }
            }
        }

        // Every CPU task holds its permit until it ends.
        self.admission.wait_idle().await;
        self.on_all_tasks_complete(cpu).await;
    }

    async fn load_target(
        self: &Arc<Self>,
        path: PathBuf,
        size: u64,
        selector: &Arc<RuleSelector>,
        cpu: &Handle,
    ) {
        let entity: Arc<dyn SubjectEntity> = Arc::new(FileEntity::new(path, size));
        let weight = self.plan.preload_limit.weight(entity.as_ref());
        // A stop requested while waiting wins over a permit freed at the same time.
        let permit = tokio::select! {
            biased;
            () = self.stop.cancelled() => None,
            permit = self.admission.admit(weight) => permit,
        };
        let Some(permit) = permit else {
            return;
        };

        self.report_progress(Some(entity.as_ref()), ProgressState::LoadStarted);
        let report = self.reports.entity_report(&entity);
        let mut cache = ValueCache::new();
        let detected = AssertUnwindSafe(self.registry.detector().detect(&entity, &mut cache))
            .catch_unwind()
            .await;
        let mask = match detected {
            Ok(Ok(mask)) => mask,
            Ok(Err(err)) => {
                return entity_load_failed(entity.as_ref(), report.as_ref(), err.to_string());
            }
            Err(payload) => {
                return entity_load_failed(
                    entity.as_ref(),
                    report.as_ref(),
                    panic_message(payload.as_ref()),
                );
            }
        };
        if mask.is_empty() {
            debug!(path = %entity.path().display(), "no rule class detected");
            self.report_progress(Some(entity.as_ref()), ProgressState::TargetSkippedUnsupported);
            return;
        }

        cache.set(ENTITY_TAG, Some(make_value(entity.clone())));
        self.report_progress(Some(entity.as_ref()), ProgressState::Loaded);
        if self.stop.is_cancelled() {
            return;
        }

        cpu.spawn(self.clone().cpu_task(LoadedTarget {
            entity,
            report,
            cache,
            mask,
            selector: selector.clone(),
            permit,
        }));
    }

    async fn cpu_task(self: Arc<Self>, target: LoadedTarget) {
        let LoadedTarget {
            entity,
            report,
            cache,
            mask,
            selector,
            permit,
        } = target;
        self.report_progress(Some(entity.as_ref()), ProgressState::AnalysisStarted);

        let provider = AsyncValueProvider::new(
            ValueProvider::new(cache, mask, self.registry.generators().clone(), report.clone()),
            self.shared.clone(),
        );
        let analysis = self.analyze(entity.clone(), provider, report.clone(), selector, mask);
        if let Err(payload) = AssertUnwindSafe(analysis).catch_unwind().await {
            let failure = panic_message(payload.as_ref());
            warn!(path = %entity.path().display(), error = %failure, "entity processing failed");
            report.log(
                ReportLevel::Critical,
                messages::ENTITY_PROCESSING_ERROR,
                &[NamedArg::new(arg::EXCEPTION, failure)],
            );
        }

        self.report_progress(Some(entity.as_ref()), ProgressState::AnalysisCompleted);
        drop(permit);
    }

    async fn analyze(
        &self,
        entity: Arc<dyn SubjectEntity>,
        mut provider: AsyncValueProvider,
        report: Arc<dyn EntityReport>,
        selector: Arc<RuleSelector>,
        mask: RuleClassMask,
    ) {
        for class in mask.iter() {
            if self.stop.is_cancelled() {
                return;
            }
            let rules = self.registry.rules().get_enabled_rules(class, &selector);
            debug!(path = %entity.path().display(), %class, rules = rules.len(), "running rules");
            if !rules.run(&mut provider, &selector, &self.stop).await {
                return;
            }
        }

        if let Some(combined) = &self.combined {
            combined
                .store_values(entity, provider, report, selector, mask)
                .await;
        }
    }

    async fn on_all_tasks_complete(self: &Arc<Self>, cpu: &Handle) {
        if self.stop.is_cancelled() {
            return;
        }
        self.report_progress(None, ProgressState::CombinedAnalysisStarted);
        if self.combined.is_some() {
            let state = self.clone();
            let result = cpu
                .spawn_blocking(move || {
                    if let Some(combined) = &state.combined {
                        if !combined.run(&state.registry, &state.common, &state.stop) {
                            debug!("combined analysis stopped early");
                        }
                    }
                })
                .await;
            if let Err(err) = result {
                let failure = if err.is_panic() {
                    panic_message(err.into_panic().as_ref())
                } else {
                    err.to_string()
                };
                warn!(error = %failure, "combined analysis failed");
                self.common.log(
                    ReportLevel::Critical,
                    messages::ANALYSIS_EXCEPTION,
                    &[NamedArg::new(arg::EXCEPTION, failure)],
                );
            }
        }
        self.report_progress(None, ProgressState::CombinedAnalysisCompleted);
    }
}

struct LoadedTarget {
    entity: Arc<dyn SubjectEntity>,
    report: Arc<dyn EntityReport>,
    cache: ValueCache,
    mask: RuleClassMask,
    selector: Arc<RuleSelector>,
    permit: AdmissionPermit,
}

fn path_args(path: &std::path::Path, error: String) -> [NamedArg; 2] {
    [
        NamedArg::new(arg::PATH, path.display().to_string()),
        NamedArg::new(arg::EXCEPTION, error),
    ]
}

fn entity_load_failed(entity: &dyn SubjectEntity, report: &dyn EntityReport, failure: String) {
    warn!(path = %entity.path().display(), error = %failure, "format detection failed");
    report.log(
        ReportLevel::Error,
        messages::ENTITY_LOAD_EXCEPTION,
        &[NamedArg::new(arg::EXCEPTION, failure)],
    );
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

async fn watch_signals(stop: StopHandle) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "cannot listen for Ctrl-C");
                return;
            }
        }
        () = terminate() => {}
    }
    info!("stop signal received");
    stop.stop();
}
