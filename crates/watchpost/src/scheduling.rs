//! Scheduling strategies: who runs what, where.
//!
//! A strategy answers one question per (check, execution environment, target
//! environment) triple. The effective decision for a check is the maximum
//! vote under the total order `Schedule < Skip < DontSchedule` — the
//! strictest strategy wins.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::environment::{Environment, EnvironmentRegistry};
use crate::error::ConfigurationError;
use crate::result::CheckId;

/// Outcome of consulting the strategies for one (check, target) pair.
///
/// Ordered so that `max` picks the strictest decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchedulingDecision {
    /// Run the check here.
    Schedule,
    /// Do not run here, but another engine instance is expected to; emit
    /// cached results when available.
    Skip,
    /// This pair is not observed from here at all.
    DontSchedule,
}

impl fmt::Display for SchedulingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingDecision::Schedule => write!(f, "SCHEDULE"),
            SchedulingDecision::Skip => write!(f, "SKIP"),
            SchedulingDecision::DontSchedule => write!(f, "DONT_SCHEDULE"),
        }
    }
}

/// Inputs to one scheduling decision.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleContext<'a> {
    pub check_id: &'a CheckId,
    pub execution_environment: &'a Environment,
    pub target_environment: &'a Environment,
}

/// A rule mapping (check, execution env, target env) to a decision.
///
/// `decide` may abstain by returning `None`; an abstaining strategy takes no
/// part in aggregation. All built-in strategies are pure functions of their
/// inputs.
pub trait SchedulingStrategy: Send + Sync + std::fmt::Debug {
    /// Human-readable form used in conflict diagnostics.
    fn describe(&self) -> String;

    fn decide(&self, ctx: &ScheduleContext<'_>) -> Option<SchedulingDecision>;
}

/// Maximum vote under the total order; no votes means `Schedule`.
pub fn aggregate(
    strategies: &[Arc<dyn SchedulingStrategy>],
    ctx: &ScheduleContext<'_>,
) -> SchedulingDecision {
    strategies
        .iter()
        .filter_map(|s| s.decide(ctx))
        .max()
        .unwrap_or(SchedulingDecision::Schedule)
}

/// Schedule only when the engine runs in one of the given environments.
#[derive(Debug, Clone)]
pub struct MustRunInGivenExecutionEnvironment {
    environments: BTreeSet<String>,
}

impl MustRunInGivenExecutionEnvironment {
    pub fn new<I, S>(environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            environments: environments.into_iter().map(Into::into).collect(),
        }
    }
}

impl SchedulingStrategy for MustRunInGivenExecutionEnvironment {
    fn describe(&self) -> String {
        format!(
            "MustRunInGivenExecutionEnvironment({})",
            self.environments.iter().cloned().collect::<Vec<_>>().join(", ")
        )
    }

    fn decide(&self, ctx: &ScheduleContext<'_>) -> Option<SchedulingDecision> {
        if self.environments.contains(ctx.execution_environment.name()) {
            Some(SchedulingDecision::Schedule)
        } else {
            Some(SchedulingDecision::DontSchedule)
        }
    }
}

/// Schedule only against the given target environments.
#[derive(Debug, Clone)]
pub struct MustRunAgainstGivenTargetEnvironment {
    environments: BTreeSet<String>,
}

impl MustRunAgainstGivenTargetEnvironment {
    pub fn new<I, S>(environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            environments: environments.into_iter().map(Into::into).collect(),
        }
    }
}

impl SchedulingStrategy for MustRunAgainstGivenTargetEnvironment {
    fn describe(&self) -> String {
        format!(
            "MustRunAgainstGivenTargetEnvironment({})",
            self.environments.iter().cloned().collect::<Vec<_>>().join(", ")
        )
    }

    fn decide(&self, ctx: &ScheduleContext<'_>) -> Option<SchedulingDecision> {
        if self.environments.contains(ctx.target_environment.name()) {
            Some(SchedulingDecision::Schedule)
        } else {
            Some(SchedulingDecision::DontSchedule)
        }
    }
}

/// Schedule only when the engine runs inside the environment it observes.
#[derive(Debug, Clone, Default)]
pub struct MustRunInTargetEnvironment;

impl MustRunInTargetEnvironment {
    pub fn new() -> Self {
        Self
    }
}

impl SchedulingStrategy for MustRunInTargetEnvironment {
    fn describe(&self) -> String {
        "MustRunInTargetEnvironment".to_string()
    }

    fn decide(&self, ctx: &ScheduleContext<'_>) -> Option<SchedulingDecision> {
        if ctx.execution_environment == ctx.target_environment {
            Some(SchedulingDecision::Schedule)
        } else {
            Some(SchedulingDecision::DontSchedule)
        }
    }
}

/// Startup-only analysis marker: never votes at runtime, but its presence in
/// the engine defaults keeps the impossible-combination analysis on.
#[derive(Debug, Clone, Default)]
pub struct DetectImpossibleCombination;

impl DetectImpossibleCombination {
    pub fn new() -> Self {
        Self
    }
}

impl SchedulingStrategy for DetectImpossibleCombination {
    fn describe(&self) -> String {
        "DetectImpossibleCombination".to_string()
    }

    fn decide(&self, _ctx: &ScheduleContext<'_>) -> Option<SchedulingDecision> {
        None
    }
}

/// Verify that every declared (check, target) pair is satisfiable by at
/// least one registered execution environment.
///
/// Runs once at engine startup; an empty intersection is a fatal
/// configuration error naming the check, the target environment, and the
/// strategies that conflict.
pub fn detect_conflicts(
    check_id: &CheckId,
    strategies: &[Arc<dyn SchedulingStrategy>],
    target_environments: &[Environment],
    environments: &EnvironmentRegistry,
) -> Result<(), ConfigurationError> {
    for target in target_environments {
        let satisfiable = environments.iter().any(|candidate| {
            let ctx = ScheduleContext {
                check_id,
                execution_environment: candidate,
                target_environment: target,
            };
            aggregate(strategies, &ctx) == SchedulingDecision::Schedule
        });

        if !satisfiable {
            let described: Vec<String> = strategies.iter().map(|s| s.describe()).collect();
            return Err(ConfigurationError::ImpossibleCombination {
                check: check_id.to_string(),
                environment: target.name().to_string(),
                strategies: described.join(", "),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(
        check_id: &'a CheckId,
        execution: &'a Environment,
        target: &'a Environment,
    ) -> ScheduleContext<'a> {
        ScheduleContext {
            check_id,
            execution_environment: execution,
            target_environment: target,
        }
    }

    #[test]
    fn decision_order_is_strictest_last() {
        assert!(SchedulingDecision::Schedule < SchedulingDecision::Skip);
        assert!(SchedulingDecision::Skip < SchedulingDecision::DontSchedule);
    }

    #[test]
    fn aggregate_picks_strictest_vote() {
        let id = CheckId::new("tests.check");
        let prod = Environment::new("prod");
        let staging = Environment::new("staging");

        let strategies: Vec<Arc<dyn SchedulingStrategy>> = vec![
            Arc::new(MustRunInGivenExecutionEnvironment::new(["prod"])),
            Arc::new(MustRunInTargetEnvironment::new()),
        ];

        // Execution env prod, target staging: first says Schedule, second
        // says DontSchedule; strictest wins.
        let decision = aggregate(&strategies, &ctx(&id, &prod, &staging));
        assert_eq!(decision, SchedulingDecision::DontSchedule);

        let decision = aggregate(&strategies, &ctx(&id, &prod, &prod));
        assert_eq!(decision, SchedulingDecision::Schedule);
    }

    #[test]
    fn no_votes_means_schedule() {
        let id = CheckId::new("tests.check");
        let prod = Environment::new("prod");
        let strategies: Vec<Arc<dyn SchedulingStrategy>> =
            vec![Arc::new(DetectImpossibleCombination::new())];
        assert_eq!(
            aggregate(&strategies, &ctx(&id, &prod, &prod)),
            SchedulingDecision::Schedule
        );
    }

    #[test]
    fn conflicting_execution_environments_are_detected() {
        let id = CheckId::new("tests.check");
        let mut environments = EnvironmentRegistry::new();
        environments.insert(Environment::new("a")).unwrap();
        environments.insert(Environment::new("b")).unwrap();

        let strategies: Vec<Arc<dyn SchedulingStrategy>> = vec![
            Arc::new(MustRunInGivenExecutionEnvironment::new(["a"])),
            Arc::new(MustRunInGivenExecutionEnvironment::new(["b"])),
        ];
        let targets = vec![Environment::new("a")];

        let err = detect_conflicts(&id, &strategies, &targets, &environments).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("MustRunInGivenExecutionEnvironment(a)"));
        assert!(rendered.contains("MustRunInGivenExecutionEnvironment(b)"));
    }

    #[test]
    fn satisfiable_combination_passes() {
        let id = CheckId::new("tests.check");
        let mut environments = EnvironmentRegistry::new();
        environments.insert(Environment::new("prod")).unwrap();
        environments.insert(Environment::new("staging")).unwrap();

        let strategies: Vec<Arc<dyn SchedulingStrategy>> =
            vec![Arc::new(MustRunInTargetEnvironment::new())];
        let targets = vec![Environment::new("prod"), Environment::new("staging")];

        assert!(detect_conflicts(&id, &strategies, &targets, &environments).is_ok());
    }
}
