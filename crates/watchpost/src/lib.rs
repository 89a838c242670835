//! Watchpost - monitoring framework core
//!
//! Watchpost turns user-authored check functions into a streaming feed of
//! service-status records consumable by a Checkmk agent. This crate is the
//! execution engine; the HTTP surface, output formatter and CLI live in
//! `watchpost-server`.
//!
//! # Architecture
//!
//! - **Engine**: enumerates (check, target environment) pairs, consults
//!   scheduling strategies and the cache, dispatches execution, resolves
//!   hostnames, applies error handlers
//! - **Executor**: key-deduplicating dispatcher over a worker-thread pool
//!   (sync checks) and the tokio runtime (async checks)
//! - **Cache**: TTL policy with return-expired-once semantics over layered
//!   storage back-ends
//! - **Registries**: environments, datasources (with dependency injection
//!   plans), checks
//!
//! # Failure model
//!
//! Configuration errors abort startup, aggregated into one report. Every
//! runtime failure becomes an UNKNOWN result; the output stream is always
//! well-formed.

pub mod cache;
pub mod check;
pub mod datasource;
pub mod duration;
pub mod engine;
pub mod environment;
pub mod error;
pub mod error_handlers;
pub mod executor;
pub mod hostname;
pub mod result;
pub mod scheduling;
pub mod storage;

pub use cache::{Cache, CacheEntry};
pub use check::{Check, CheckFunction, CheckKind, CheckOutput, CheckRegistry, CheckReturn, CheckSpec};
pub use datasource::{
    Datasource, DatasourceFactory, DatasourceRegistry, FactoryArgs, Injected, ParamSpec,
};
pub use duration::{parse_duration, CacheFor};
pub use engine::{Engine, EngineBuilder, PollOptions};
pub use environment::{Environment, EnvironmentRegistry};
pub use error::{CheckError, ConfigurationError, ConfigurationErrors};
pub use error_handlers::{ErrorHandler, ExpandByHostname, ExpandByNameSuffix};
pub use executor::{
    ErroredJob, Executor, ExecutorConfig, ExecutorStatistics, Job, JobError, JobKey, SubmitError,
};
pub use hostname::{rfc1123_coerce, HostnameResolver, HostnameStrategy, NO_PIGGYBACK};
pub use result::{
    Boundaries, CheckId, CheckResult, CheckResultBuilder, CheckState, Details, ExecutionResult,
    Metric, Thresholds,
};
pub use scheduling::{
    DetectImpossibleCombination, MustRunAgainstGivenTargetEnvironment,
    MustRunInGivenExecutionEnvironment, MustRunInTargetEnvironment, ScheduleContext,
    SchedulingDecision, SchedulingStrategy,
};
pub use storage::{ChainedStorage, DiskStorage, MemoryStorage, Storage, StorageError, StoredEntry};
