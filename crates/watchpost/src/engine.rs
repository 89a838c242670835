//! The engine: enumerates (check, target environment) pairs, consults
//! strategies and cache, dispatches execution, and post-processes results.
//!
//! Runtime failures never abort a poll; every one of them is recovered into
//! an UNKNOWN result so the emitted stream is always well-formed. Only
//! registration-time configuration errors abort startup, and they are
//! aggregated so one run surfaces every problem.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::cache::Cache;
use crate::check::{CacheForSpec, Check, CheckFunction, CheckKind, CheckRegistry, CheckSpec};
use crate::datasource::DatasourceRegistry;
use crate::duration::{parse_duration, CacheFor};
use crate::environment::{Environment, EnvironmentRegistry};
use crate::error::{ConfigurationError, ConfigurationErrors};
use crate::error_handlers::ErrorHandlerContext;
use crate::executor::{Executor, ExecutorConfig, Job, JobHandle, JobKey};
use crate::hostname::{
    resolve_piggyback_host, HostnameContext, HostnameStrategy, NO_PIGGYBACK,
};
use crate::result::{CheckResult, CheckState, ExecutionResult};
use crate::scheduling::{
    aggregate, detect_conflicts, DetectImpossibleCombination, ScheduleContext, SchedulingDecision,
    SchedulingStrategy,
};
use crate::storage::{MemoryStorage, Storage};

/// Per-poll knobs, mirrored by the `run-checks` CLI flags.
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub use_cache: bool,
    pub filter_prefix: Option<String>,
    pub filter_contains: Option<String>,
    pub kind: Option<CheckKind>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            filter_prefix: None,
            filter_contains: None,
            kind: None,
        }
    }
}

/// Assembles and validates an [`Engine`].
pub struct EngineBuilder {
    environments: Vec<Environment>,
    execution_environment: Option<String>,
    datasources: DatasourceRegistry,
    specs: Vec<CheckSpec>,
    storage: Option<Arc<dyn Storage>>,
    default_strategies: Vec<Arc<dyn SchedulingStrategy>>,
    default_hostname: Option<HostnameStrategy>,
    default_cache_for: Option<Duration>,
    rfc1123: bool,
    executor_config: ExecutorConfig,
    check_deadline: Option<Duration>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            environments: Vec::new(),
            execution_environment: None,
            datasources: DatasourceRegistry::new(),
            specs: Vec::new(),
            storage: None,
            default_strategies: vec![Arc::new(DetectImpossibleCombination::new())],
            default_hostname: None,
            default_cache_for: None,
            rfc1123: true,
            executor_config: ExecutorConfig::default(),
            check_deadline: None,
        }
    }

    pub fn environment(mut self, env: Environment) -> Self {
        self.environments.push(env);
        self
    }

    /// Name of the environment this engine instance runs in.
    pub fn execution_environment(mut self, name: impl Into<String>) -> Self {
        self.execution_environment = Some(name.into());
        self
    }

    pub fn datasources_mut(&mut self) -> &mut DatasourceRegistry {
        &mut self.datasources
    }

    pub fn check(mut self, spec: CheckSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Storage backing the result cache. Defaults to an in-memory tier.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Add an engine-wide default strategy, applied to every check.
    pub fn default_strategy(mut self, strategy: Arc<dyn SchedulingStrategy>) -> Self {
        self.default_strategies.push(strategy);
        self
    }

    pub fn default_hostname(mut self, strategy: HostnameStrategy) -> Self {
        self.default_hostname = Some(strategy);
        self
    }

    /// TTL for checks that do not declare `cache_for` themselves.
    pub fn default_cache_for(mut self, ttl: Duration) -> Self {
        self.default_cache_for = Some(ttl);
        self
    }

    /// Toggle RFC1123 hostname coercion (on by default).
    pub fn rfc1123(mut self, enabled: bool) -> Self {
        self.rfc1123 = enabled;
        self
    }

    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// Soft deadline attached to every submission.
    pub fn check_deadline(mut self, deadline: Duration) -> Self {
        self.check_deadline = Some(deadline);
        self
    }

    /// Validate everything and start the engine.
    ///
    /// Must be called from within a tokio runtime; the executor spawns its
    /// worker pool here. All configuration defects are aggregated into one
    /// error.
    pub fn build(self) -> Result<Engine, ConfigurationErrors> {
        let mut errors = ConfigurationErrors::new();

        let mut environments = EnvironmentRegistry::new();
        for env in self.environments {
            if let Err(e) = environments.insert(env) {
                errors.push(e);
            }
        }

        let execution_environment = match &self.execution_environment {
            Some(name) => match environments.get(name) {
                Some(env) => Some(env.clone()),
                None => {
                    errors.push(ConfigurationError::UnknownExecutionEnvironment {
                        name: name.clone(),
                    });
                    None
                }
            },
            None => {
                errors.push(ConfigurationError::UnknownExecutionEnvironment {
                    name: "(not set)".to_string(),
                });
                None
            }
        };

        let mut seen_ids = HashSet::new();
        let mut checks = Vec::with_capacity(self.specs.len());

        for spec in self.specs {
            let check_id = spec.id.clone();

            if !seen_ids.insert(check_id.clone()) {
                errors.push(ConfigurationError::DuplicateCheck {
                    check: check_id.to_string(),
                });
                continue;
            }

            if spec.target_environments.is_empty() {
                errors.push(ConfigurationError::NoTargetEnvironments {
                    check: check_id.to_string(),
                });
                continue;
            }

            let mut targets = Vec::with_capacity(spec.target_environments.len());
            let mut targets_ok = true;
            for name in &spec.target_environments {
                match environments.get(name) {
                    Some(env) => targets.push(env.clone()),
                    None => {
                        targets_ok = false;
                        errors.push(ConfigurationError::UnknownTargetEnvironment {
                            check: check_id.to_string(),
                            environment: name.clone(),
                        });
                    }
                }
            }

            let cache_for = match &spec.cache_for {
                CacheForSpec::Disabled => CacheFor::Disabled,
                CacheForSpec::Value(d) => CacheFor::Ttl(*d),
                CacheForSpec::Text(text) => match parse_duration(check_id.as_str(), text) {
                    Ok(d) => CacheFor::Ttl(d),
                    Err(e) => {
                        errors.push(e);
                        CacheFor::Disabled
                    }
                },
                CacheForSpec::Unset => self
                    .default_cache_for
                    .map(CacheFor::Ttl)
                    .unwrap_or(CacheFor::Disabled),
            };

            let (plan, inherited) = match self.datasources.resolve_plan(&check_id, &spec.params) {
                Ok(resolved) => resolved,
                Err(errs) => {
                    errors.extend(errs);
                    continue;
                }
            };

            // Effective set: the check's own strategies plus everything its
            // datasources and factories declared. Engine defaults stay on
            // the engine and join at decision time.
            let mut strategies = spec.strategies;
            strategies.extend(inherited);

            if targets_ok {
                let mut with_defaults = strategies.clone();
                with_defaults.extend(self.default_strategies.iter().cloned());
                if let Err(e) = detect_conflicts(&check_id, &with_defaults, &targets, &environments)
                {
                    errors.push(e);
                    continue;
                }
            } else {
                continue;
            }

            checks.push(Arc::new(Check::new(
                check_id,
                spec.service_name,
                spec.service_labels,
                targets,
                cache_for,
                spec.hostname,
                strategies,
                spec.error_handlers,
                plan,
                spec.function,
            )));
        }

        errors.into_result()?;

        let execution_environment =
            execution_environment.expect("validated together with the error list");

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn Storage>);

        info!(
            checks = checks.len(),
            environments = environments.len(),
            execution_environment = execution_environment.name(),
            "Engine configuration validated"
        );

        Ok(Engine {
            checks: CheckRegistry::new(checks),
            datasources: Arc::new(self.datasources),
            environments,
            execution_environment,
            default_strategies: self.default_strategies,
            default_hostname: self.default_hostname,
            rfc1123: self.rfc1123,
            cache: Cache::new(storage),
            executor: Executor::new(self.executor_config),
            check_deadline: self.check_deadline,
        })
    }
}

enum Pending {
    Ready(Vec<ExecutionResult>),
    InFlight {
        handle: JobHandle,
        check: Arc<Check>,
        environment: Environment,
        key: JobKey,
        cache_ttl: Option<Duration>,
    },
}

/// The top-level orchestrator.
pub struct Engine {
    checks: CheckRegistry,
    datasources: Arc<DatasourceRegistry>,
    environments: EnvironmentRegistry,
    execution_environment: Environment,
    default_strategies: Vec<Arc<dyn SchedulingStrategy>>,
    default_hostname: Option<HostnameStrategy>,
    rfc1123: bool,
    cache: Cache,
    executor: Executor,
    check_deadline: Option<Duration>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn checks(&self) -> &CheckRegistry {
        &self.checks
    }

    pub fn environments(&self) -> &EnvironmentRegistry {
        &self.environments
    }

    pub fn execution_environment(&self) -> &Environment {
        &self.execution_environment
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// One full poll with default options.
    pub async fn poll(&self) -> Vec<ExecutionResult> {
        self.poll_with(&PollOptions::default()).await
    }

    /// One full poll: enumerate, decide, execute, post-process.
    ///
    /// Results are emitted in stable enumeration order of
    /// (check, target environment), with error-handler expansions preserving
    /// their expansion order.
    pub async fn poll_with(&self, opts: &PollOptions) -> Vec<ExecutionResult> {
        let started = Instant::now();
        let mut pending = Vec::new();

        for check in self.checks.iter() {
            if let Some(prefix) = &opts.filter_prefix {
                if !check.id().as_str().starts_with(prefix.as_str()) {
                    continue;
                }
            }
            if let Some(needle) = &opts.filter_contains {
                if !check.id().as_str().contains(needle.as_str()) {
                    continue;
                }
            }
            if let Some(kind) = opts.kind {
                if check.kind() != kind {
                    continue;
                }
            }

            for environment in check.target_environments() {
                pending.push(self.dispatch_pair(check, environment, opts).await);
            }
        }

        let mut emitted = Vec::new();
        for entry in pending {
            match entry {
                Pending::Ready(results) => emitted.extend(results),
                Pending::InFlight {
                    handle,
                    check,
                    environment,
                    key,
                    cache_ttl,
                } => {
                    let outcome = handle.outcome().await;
                    match outcome.as_ref() {
                        Ok(returned) => {
                            let results = self.finalize_success(
                                &check,
                                &environment,
                                returned.clone().into_results(),
                            );
                            if let (true, Some(ttl)) = (opts.use_cache, cache_ttl) {
                                self.cache.store(&key.to_string(), &results, ttl).await;
                            }
                            emitted.extend(results);
                        }
                        Err(error) => {
                            debug!(key = %key, error = %error, "Check execution failed");
                            emitted.extend(self.failure_results(
                                &check,
                                &environment,
                                &error.to_string(),
                            ));
                        }
                    }
                }
            }
        }

        debug!(
            results = emitted.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Poll finished"
        );
        emitted
    }

    async fn dispatch_pair(
        &self,
        check: &Arc<Check>,
        environment: &Environment,
        opts: &PollOptions,
    ) -> Pending {
        let ctx = ScheduleContext {
            check_id: check.id(),
            execution_environment: &self.execution_environment,
            target_environment: environment,
        };
        // Schedule is the bottom of the order, so folding the two groups
        // separately equals aggregating their union.
        let decision = aggregate(check.strategies(), &ctx)
            .max(aggregate(&self.default_strategies, &ctx));

        let key = JobKey::new(check.id().clone(), environment.name());
        let cache_ttl = check.cache_for().ttl();
        let cache_usable = opts.use_cache && cache_ttl.is_some();

        match decision {
            SchedulingDecision::DontSchedule => {
                trace!(key = %key, "Not scheduled in this execution environment");
                Pending::Ready(Vec::new())
            }
            SchedulingDecision::Skip => {
                if cache_usable {
                    if let Some(entry) = self
                        .cache
                        .get::<Vec<ExecutionResult>>(&key.to_string(), true)
                        .await
                    {
                        trace!(key = %key, expired = entry.expired, "Skip served from cache");
                        return Pending::Ready(entry.value);
                    }
                }
                Pending::Ready(vec![self.skip_result(check, environment)])
            }
            SchedulingDecision::Schedule => {
                if cache_usable {
                    if let Some(entry) = self
                        .cache
                        .get::<Vec<ExecutionResult>>(&key.to_string(), false)
                        .await
                    {
                        trace!(key = %key, expired = entry.expired, "Served from cache");
                        return Pending::Ready(entry.value);
                    }
                }

                let injected = match self.datasources.instantiate(check.plan(), environment) {
                    Ok(injected) => injected,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Dependency resolution failed");
                        return Pending::Ready(self.failure_results(
                            check,
                            environment,
                            &e.to_string(),
                        ));
                    }
                };

                let job = match check.function() {
                    CheckFunction::Sync(f) => {
                        let f = f.clone();
                        Job::Sync(Box::new(move || f(injected)))
                    }
                    CheckFunction::Async(f) => Job::Async(f(injected)),
                };

                match self.executor.submit(key.clone(), job, self.check_deadline) {
                    Ok(handle) => Pending::InFlight {
                        handle,
                        check: check.clone(),
                        environment: environment.clone(),
                        key,
                        cache_ttl,
                    },
                    Err(e) => {
                        warn!(key = %key, error = %e, "Submission rejected");
                        Pending::Ready(self.failure_results(check, environment, &e.to_string()))
                    }
                }
            }
        }
    }

    /// Convert user-level results into fully resolved service records.
    fn finalize_success(
        &self,
        check: &Check,
        environment: &Environment,
        results: Vec<CheckResult>,
    ) -> Vec<ExecutionResult> {
        results
            .into_iter()
            .map(|r| self.to_execution_result(check, environment, r))
            .collect()
    }

    fn to_execution_result(
        &self,
        check: &Check,
        environment: &Environment,
        result: CheckResult,
    ) -> ExecutionResult {
        let service_name = match &result.name_suffix {
            Some(suffix) => format!("{}{}", check.service_name(), suffix),
            None => check.service_name().to_string(),
        };

        let ctx = HostnameContext {
            check_id: check.id(),
            service_name: &service_name,
            environment,
        };
        let resolved = resolve_piggyback_host(
            result.hostname.as_deref(),
            check.hostname_strategy(),
            self.default_hostname.as_ref(),
            &ctx,
            self.rfc1123,
        );

        match resolved {
            Ok(piggyback_host) => ExecutionResult {
                check_id: check.id().clone(),
                piggyback_host,
                service_name,
                service_labels: check.service_labels().clone(),
                environment: environment.name().to_string(),
                state: result.state,
                summary: result.summary,
                details: result.details.map(|d| d.render()).unwrap_or_default(),
                metrics: result.metrics,
            },
            Err(e) => ExecutionResult {
                check_id: check.id().clone(),
                piggyback_host: NO_PIGGYBACK.to_string(),
                service_name,
                service_labels: check.service_labels().clone(),
                environment: environment.name().to_string(),
                state: CheckState::Unknown,
                summary: "Hostname resolution failed".to_string(),
                details: e.to_string(),
                metrics: Vec::new(),
            },
        }
    }

    /// The catastrophic-failure path: one UNKNOWN result, expanded by the
    /// check's error handlers in declared order.
    fn failure_results(
        &self,
        check: &Check,
        environment: &Environment,
        error: &str,
    ) -> Vec<ExecutionResult> {
        let base = CheckResult::unknown("Check execution failed").with_details(error);
        let mut results = vec![self.to_execution_result(check, environment, base)];

        let ctx = ErrorHandlerContext {
            check_id: check.id(),
            environment,
        };
        for handler in check.error_handlers() {
            let current = std::mem::take(&mut results);
            match catch_unwind(AssertUnwindSafe(|| handler.apply(&ctx, current))) {
                Ok(next) => results = next,
                Err(_) => {
                    warn!(
                        check = %check.id(),
                        handler = handler.describe(),
                        "Error handler panicked"
                    );
                    let fallback = CheckResult::unknown("Error handler failed")
                        .with_details(format!("handler {} panicked", handler.describe()));
                    results = vec![self.to_execution_result(check, environment, fallback)];
                    break;
                }
            }
        }
        results
    }

    /// SKIP with no cached entry: a synthetic UNKNOWN so downstream always
    /// sees the service.
    fn skip_result(&self, check: &Check, environment: &Environment) -> ExecutionResult {
        let base = CheckResult::unknown("Skipped in this execution environment").with_details(
            format!(
                "Scheduling decided SKIP for `{}` against `{}` and no cached result is available",
                check.id(),
                environment.name()
            ),
        );
        self.to_execution_result(check, environment, base)
    }

    /// Resolved piggyback hostname for every (check, target environment)
    /// pair, as printed by `get-check-hostnames`.
    pub fn resolved_hostnames(&self) -> Vec<(String, String, String)> {
        let mut out = Vec::new();
        for check in self.checks.iter() {
            for environment in check.target_environments() {
                let ctx = HostnameContext {
                    check_id: check.id(),
                    service_name: check.service_name(),
                    environment,
                };
                let host = match resolve_piggyback_host(
                    None,
                    check.hostname_strategy(),
                    self.default_hostname.as_ref(),
                    &ctx,
                    self.rfc1123,
                ) {
                    Ok(host) => host,
                    Err(e) => format!("<unresolvable: {e}>"),
                };
                out.push((
                    check.id().to_string(),
                    environment.name().to_string(),
                    host,
                ));
            }
        }
        out
    }

    /// Stop the executor and drop memoized datasource instances.
    pub async fn shutdown(&self, drain: bool) {
        self.executor.shutdown(drain).await;
        self.datasources.clear_instances();
        info!("Engine stopped");
    }
}
