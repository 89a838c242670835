//! Error handlers: expanding catastrophic failures into the full set of
//! services that were expected.
//!
//! When a check throws before yielding anything, a single UNKNOWN result
//! would under-report: a multi-host or multi-service check should alert on
//! every service it normally produces. Handlers run in declared order, each
//! replacing the current result list; they compose multiplicatively.

use std::sync::Arc;

use crate::environment::Environment;
use crate::result::{CheckId, ExecutionResult};

/// Context passed to every handler invocation.
#[derive(Debug, Clone, Copy)]
pub struct ErrorHandlerContext<'a> {
    pub check_id: &'a CheckId,
    pub environment: &'a Environment,
}

/// Transforms the result list produced for a check that threw.
pub trait ErrorHandler: Send + Sync {
    fn describe(&self) -> String;

    fn apply(
        &self,
        ctx: &ErrorHandlerContext<'_>,
        results: Vec<ExecutionResult>,
    ) -> Vec<ExecutionResult>;
}

/// Duplicate each result once per host, routing a copy to every piggyback
/// host the check would normally cover.
pub struct ExpandByHostname {
    hosts: Vec<String>,
}

impl ExpandByHostname {
    pub fn new<I, S>(hosts: I) -> Arc<dyn ErrorHandler>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        })
    }
}

impl ErrorHandler for ExpandByHostname {
    fn describe(&self) -> String {
        format!("expand_by_hostname({})", self.hosts.join(", "))
    }

    fn apply(
        &self,
        _ctx: &ErrorHandlerContext<'_>,
        results: Vec<ExecutionResult>,
    ) -> Vec<ExecutionResult> {
        let mut expanded = Vec::with_capacity(results.len() * self.hosts.len());
        for result in results {
            for host in &self.hosts {
                let mut copy = result.clone();
                copy.piggyback_host = host.clone();
                expanded.push(copy);
            }
        }
        expanded
    }
}

/// Duplicate each result once per suffix, appended to the service name.
pub struct ExpandByNameSuffix {
    suffixes: Vec<String>,
}

impl ExpandByNameSuffix {
    pub fn new<I, S>(suffixes: I) -> Arc<dyn ErrorHandler>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        })
    }
}

impl ErrorHandler for ExpandByNameSuffix {
    fn describe(&self) -> String {
        format!("expand_by_name_suffix({})", self.suffixes.join(", "))
    }

    fn apply(
        &self,
        _ctx: &ErrorHandlerContext<'_>,
        results: Vec<ExecutionResult>,
    ) -> Vec<ExecutionResult> {
        let mut expanded = Vec::with_capacity(results.len() * self.suffixes.len());
        for result in results {
            for suffix in &self.suffixes {
                let mut copy = result.clone();
                copy.service_name = format!("{}{}", copy.service_name, suffix);
                expanded.push(copy);
            }
        }
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::CheckState;
    use std::collections::BTreeMap;

    fn unknown_result() -> ExecutionResult {
        ExecutionResult {
            check_id: CheckId::new("tests.check"),
            piggyback_host: "original".to_string(),
            service_name: "Backend".to_string(),
            service_labels: BTreeMap::new(),
            environment: "prod".to_string(),
            state: CheckState::Unknown,
            summary: "check failed".to_string(),
            details: "boom".to_string(),
            metrics: Vec::new(),
        }
    }

    #[test]
    fn expand_by_hostname_multiplies_per_host() {
        let id = CheckId::new("tests.check");
        let env = Environment::new("prod");
        let handler = ExpandByHostname::new(["h1", "h2", "h3"]);

        let ctx = ErrorHandlerContext {
            check_id: &id,
            environment: &env,
        };
        let expanded = handler.apply(&ctx, vec![unknown_result()]);

        assert_eq!(expanded.len(), 3);
        let hosts: Vec<&str> = expanded.iter().map(|r| r.piggyback_host.as_str()).collect();
        assert_eq!(hosts, vec!["h1", "h2", "h3"]);
        for result in &expanded {
            assert_eq!(result.state, CheckState::Unknown);
            assert_eq!(result.summary, "check failed");
        }
    }

    #[test]
    fn handlers_compose_multiplicatively() {
        let id = CheckId::new("tests.check");
        let env = Environment::new("prod");
        let by_host = ExpandByHostname::new(["h1", "h2"]);
        let by_suffix = ExpandByNameSuffix::new([" disk", " memory", " load"]);

        let ctx = ErrorHandlerContext {
            check_id: &id,
            environment: &env,
        };
        let step1 = by_host.apply(&ctx, vec![unknown_result()]);
        let step2 = by_suffix.apply(&ctx, step1);

        assert_eq!(step2.len(), 6);
        assert_eq!(step2[0].piggyback_host, "h1");
        assert_eq!(step2[0].service_name, "Backend disk");
        assert_eq!(step2[5].piggyback_host, "h2");
        assert_eq!(step2[5].service_name, "Backend load");
    }
}
