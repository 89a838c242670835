//! Check descriptors and the check registry.
//!
//! Registration is explicit: a [`CheckSpec`] names the function, its
//! metadata and its parameter list, and the engine builder normalizes specs
//! into immutable [`Check`] descriptors at startup.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::datasource::{Injected, ParamSpec, SignaturePlan};
use crate::duration::CacheFor;
use crate::environment::Environment;
use crate::error::CheckError;
use crate::error_handlers::ErrorHandler;
use crate::hostname::HostnameStrategy;
use crate::result::{CheckId, CheckResult, CheckResultBuilder};
use crate::scheduling::SchedulingStrategy;

/// What a check function hands back.
///
/// The shape is a tagged value rather than runtime introspection: a single
/// result, a builder to finalize, or an already-ordered sequence (lazy
/// producers drain into `Many` at the boundary).
#[derive(Debug, Clone)]
pub enum CheckReturn {
    Single(CheckResult),
    Builder(CheckResultBuilder),
    Many(Vec<CheckResult>),
}

impl CheckReturn {
    /// Normalize to an ordered sequence of results.
    pub fn into_results(self) -> Vec<CheckResult> {
        match self {
            CheckReturn::Single(result) => vec![result],
            CheckReturn::Builder(builder) => vec![builder.build()],
            CheckReturn::Many(results) => results,
        }
    }
}

impl From<CheckResult> for CheckReturn {
    fn from(result: CheckResult) -> Self {
        CheckReturn::Single(result)
    }
}

impl From<CheckResultBuilder> for CheckReturn {
    fn from(builder: CheckResultBuilder) -> Self {
        CheckReturn::Builder(builder)
    }
}

impl From<Vec<CheckResult>> for CheckReturn {
    fn from(results: Vec<CheckResult>) -> Self {
        CheckReturn::Many(results)
    }
}

pub type CheckOutput = Result<CheckReturn, CheckError>;

type SyncCheckFn = dyn Fn(Injected) -> CheckOutput + Send + Sync;
type AsyncCheckFn = dyn Fn(Injected) -> BoxFuture<'static, CheckOutput> + Send + Sync;

/// The user callable, dispatched to the matching executor back-end.
#[derive(Clone)]
pub enum CheckFunction {
    Sync(Arc<SyncCheckFn>),
    Async(Arc<AsyncCheckFn>),
}

impl CheckFunction {
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckFunction::Sync(_) => CheckKind::Sync,
            CheckFunction::Async(_) => CheckKind::Async,
        }
    }
}

/// Whether a check body runs on the worker pool or the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Sync,
    Async,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Sync => write!(f, "sync"),
            CheckKind::Async => write!(f, "async"),
        }
    }
}

pub(crate) enum CacheForSpec {
    Unset,
    Disabled,
    Text(String),
    Value(Duration),
}

/// Declaration of one check: the function plus all metadata the engine
/// needs to schedule, execute and render it.
pub struct CheckSpec {
    pub(crate) id: CheckId,
    pub(crate) service_name: String,
    pub(crate) service_labels: BTreeMap<String, String>,
    pub(crate) target_environments: Vec<String>,
    pub(crate) cache_for: CacheForSpec,
    pub(crate) hostname: Option<HostnameStrategy>,
    pub(crate) strategies: Vec<Arc<dyn SchedulingStrategy>>,
    pub(crate) error_handlers: Vec<Arc<dyn ErrorHandler>>,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) function: CheckFunction,
}

impl CheckSpec {
    /// Declare a synchronous check; the body runs on the worker pool.
    pub fn sync<F>(id: impl Into<CheckId>, service_name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Injected) -> CheckOutput + Send + Sync + 'static,
    {
        Self::new(id, service_name, CheckFunction::Sync(Arc::new(function)))
    }

    /// Declare an asynchronous check; the body runs as a task on the event
    /// loop.
    pub fn r#async<F>(id: impl Into<CheckId>, service_name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Injected) -> BoxFuture<'static, CheckOutput> + Send + Sync + 'static,
    {
        Self::new(id, service_name, CheckFunction::Async(Arc::new(function)))
    }

    pub fn new(
        id: impl Into<CheckId>,
        service_name: impl Into<String>,
        function: CheckFunction,
    ) -> Self {
        Self {
            id: id.into(),
            service_name: service_name.into(),
            service_labels: BTreeMap::new(),
            target_environments: Vec::new(),
            cache_for: CacheForSpec::Unset,
            hostname: None,
            strategies: Vec::new(),
            error_handlers: Vec::new(),
            params: Vec::new(),
            function,
        }
    }

    pub fn service_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.service_labels.insert(key.into(), value.into());
        self
    }

    /// Declare the environments this check observes, in order. Must not end
    /// up empty.
    pub fn target_environments<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_environments = names.into_iter().map(Into::into).collect();
        self
    }

    /// Cache results for a textual duration (`30s`, `5m`, `2h`, `1d`).
    pub fn cache_for(mut self, duration: impl Into<String>) -> Self {
        self.cache_for = CacheForSpec::Text(duration.into());
        self
    }

    /// Cache results for an already-typed duration.
    pub fn cache_for_duration(mut self, duration: Duration) -> Self {
        self.cache_for = CacheForSpec::Value(duration);
        self
    }

    /// Never cache this check's results.
    pub fn no_cache(mut self) -> Self {
        self.cache_for = CacheForSpec::Disabled;
        self
    }

    pub fn hostname(mut self, strategy: HostnameStrategy) -> Self {
        self.hostname = Some(strategy);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn SchedulingStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handlers.push(handler);
        self
    }

    /// Append one parameter to the callable signature. Order matters: the
    /// engine injects values positionally.
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }
}

/// An immutable, fully resolved check descriptor.
pub struct Check {
    id: CheckId,
    service_name: String,
    service_labels: BTreeMap<String, String>,
    target_environments: Vec<Environment>,
    cache_for: CacheFor,
    hostname: Option<HostnameStrategy>,
    /// Own strategies plus those inherited from datasources and factories.
    strategies: Vec<Arc<dyn SchedulingStrategy>>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
    plan: SignaturePlan,
    function: CheckFunction,
}

impl Check {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: CheckId,
        service_name: String,
        service_labels: BTreeMap<String, String>,
        target_environments: Vec<Environment>,
        cache_for: CacheFor,
        hostname: Option<HostnameStrategy>,
        strategies: Vec<Arc<dyn SchedulingStrategy>>,
        error_handlers: Vec<Arc<dyn ErrorHandler>>,
        plan: SignaturePlan,
        function: CheckFunction,
    ) -> Self {
        Self {
            id,
            service_name,
            service_labels,
            target_environments,
            cache_for,
            hostname,
            strategies,
            error_handlers,
            plan,
            function,
        }
    }

    pub fn id(&self) -> &CheckId {
        &self.id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_labels(&self) -> &BTreeMap<String, String> {
        &self.service_labels
    }

    pub fn target_environments(&self) -> &[Environment] {
        &self.target_environments
    }

    pub fn cache_for(&self) -> CacheFor {
        self.cache_for
    }

    pub fn hostname_strategy(&self) -> Option<&HostnameStrategy> {
        self.hostname.as_ref()
    }

    pub fn strategies(&self) -> &[Arc<dyn SchedulingStrategy>] {
        &self.strategies
    }

    pub fn error_handlers(&self) -> &[Arc<dyn ErrorHandler>] {
        &self.error_handlers
    }

    pub fn plan(&self) -> &SignaturePlan {
        &self.plan
    }

    pub fn function(&self) -> &CheckFunction {
        &self.function
    }

    pub fn kind(&self) -> CheckKind {
        self.function.kind()
    }

    /// `{id}(param: Type, ...)` as printed by `list-checks`.
    pub fn signature_line(&self) -> String {
        let params: Vec<String> = self
            .plan
            .parameters()
            .map(|(name, ty)| format!("{name}: {ty}"))
            .collect();
        format!("{}({})", self.id, params.join(", "))
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("service_name", &self.service_name)
            .field("targets", &self.target_environments.len())
            .field("kind", &self.kind())
            .finish()
    }
}

/// All registered checks, in registration order.
#[derive(Default)]
pub struct CheckRegistry {
    checks: Vec<Arc<Check>>,
}

impl CheckRegistry {
    pub(crate) fn new(checks: Vec<Arc<Check>>) -> Self {
        Self { checks }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Check>> {
        self.checks.iter()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn get(&self, id: &CheckId) -> Option<&Arc<Check>> {
        self.checks.iter().find(|c| c.id() == id)
    }

    /// Checks whose id starts with `prefix`.
    pub fn filter_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Arc<Check>> {
        self.checks
            .iter()
            .filter(move |c| c.id().as_str().starts_with(prefix))
    }

    /// Checks whose id contains `needle`.
    pub fn filter_contains<'a>(&'a self, needle: &'a str) -> impl Iterator<Item = &'a Arc<Check>> {
        self.checks
            .iter()
            .filter(move |c| c.id().as_str().contains(needle))
    }
}
