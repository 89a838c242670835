//! Check result types and structures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Service state as reported to Checkmk.
///
/// The numeric values are the Checkmk wire values. Severity ordering for
/// aggregation is a separate total order (`OK < WARN < UNKNOWN < CRIT`) and
/// is exposed through [`CheckState::severity`] and [`CheckState::worst`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckState {
    /// Service is healthy
    Ok,
    /// Service is degraded
    Warn,
    /// Service is broken
    Crit,
    /// Service state could not be determined
    Unknown,
}

impl CheckState {
    /// Numeric value written to the agent output.
    pub fn wire_value(self) -> u8 {
        match self {
            CheckState::Ok => 0,
            CheckState::Warn => 1,
            CheckState::Crit => 2,
            CheckState::Unknown => 3,
        }
    }

    /// Rank under the severity total order: `Ok < Warn < Unknown < Crit`.
    pub fn severity(self) -> u8 {
        match self {
            CheckState::Ok => 0,
            CheckState::Warn => 1,
            CheckState::Unknown => 2,
            CheckState::Crit => 3,
        }
    }

    /// The more severe of two states.
    pub fn worst(self, other: CheckState) -> CheckState {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckState::Ok => write!(f, "OK"),
            CheckState::Warn => write!(f, "WARN"),
            CheckState::Crit => write!(f, "CRIT"),
            CheckState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Warn/crit levels attached to a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warn: f64,
    pub crit: f64,
}

/// Min/max boundaries attached to a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boundaries {
    pub min: f64,
    pub max: f64,
}

/// A single performance value emitted alongside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub levels: Option<Thresholds>,
    pub boundaries: Option<Boundaries>,
    pub unit: Option<String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            levels: None,
            boundaries: None,
            unit: None,
        }
    }

    pub fn with_levels(mut self, warn: f64, crit: f64) -> Self {
        self.levels = Some(Thresholds { warn, crit });
        self
    }

    pub fn with_boundaries(mut self, min: f64, max: f64) -> Self {
        self.boundaries = Some(Boundaries { min, max });
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Free-form detail block of a [`CheckResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Details {
    Text(String),
    Fields(BTreeMap<String, String>),
}

impl Details {
    /// Render to the single string form carried by an execution result.
    pub fn render(&self) -> String {
        match self {
            Details::Text(s) => s.clone(),
            Details::Fields(map) => {
                let mut out = String::new();
                for (k, v) in map {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(k);
                    out.push_str(": ");
                    out.push_str(v);
                }
                out
            }
        }
    }
}

impl From<String> for Details {
    fn from(s: String) -> Self {
        Details::Text(s)
    }
}

impl From<&str> for Details {
    fn from(s: &str) -> Self {
        Details::Text(s.to_string())
    }
}

impl From<BTreeMap<String, String>> for Details {
    fn from(map: BTreeMap<String, String>) -> Self {
        Details::Fields(map)
    }
}

/// The result a check function hands back to the engine.
///
/// Everything environment-specific (piggyback host, service labels) is
/// resolved later by the engine; the check only describes what it observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub state: CheckState,
    pub summary: String,
    pub details: Option<Details>,
    /// Appended to the service name, separating one check into several
    /// services.
    pub name_suffix: Option<String>,
    /// Overrides every other hostname source for this result.
    pub hostname: Option<String>,
    pub metrics: Vec<Metric>,
}

impl CheckResult {
    pub fn new(state: CheckState, summary: impl Into<String>) -> Self {
        Self {
            state,
            summary: summary.into(),
            details: None,
            name_suffix: None,
            hostname: None,
            metrics: Vec::new(),
        }
    }

    /// Create an OK result
    pub fn ok(summary: impl Into<String>) -> Self {
        Self::new(CheckState::Ok, summary)
    }

    /// Create a WARN result
    pub fn warn(summary: impl Into<String>) -> Self {
        Self::new(CheckState::Warn, summary)
    }

    /// Create a CRIT result
    pub fn crit(summary: impl Into<String>) -> Self {
        Self::new(CheckState::Crit, summary)
    }

    /// Create an UNKNOWN result
    pub fn unknown(summary: impl Into<String>) -> Self {
        Self::new(CheckState::Unknown, summary)
    }

    pub fn with_details(mut self, details: impl Into<Details>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.name_suffix = Some(suffix.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }
}

/// Stable identifier of a registered check (module-qualified path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckId(String);

impl CheckId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A fully resolved service record, ready for the output formatter.
///
/// This is also the value cached between polls, so it round-trips through
/// serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Originating check.
    pub check_id: CheckId,
    /// Checkmk host this service is attached to, or
    /// [`crate::hostname::NO_PIGGYBACK`].
    pub piggyback_host: String,
    pub service_name: String,
    pub service_labels: BTreeMap<String, String>,
    pub environment: String,
    pub state: CheckState,
    pub summary: String,
    pub details: String,
    pub metrics: Vec<Metric>,
}

/// Accumulator for checks that probe several conditions and fold them into
/// one service.
///
/// The final state is the severity maximum over all recorded parts; the
/// summary is `ok_summary` when that state is OK and `fail_summary`
/// otherwise.
#[derive(Debug, Clone)]
pub struct CheckResultBuilder {
    ok_summary: String,
    fail_summary: String,
    base_details: Option<String>,
    name_suffix: Option<String>,
    hostname: Option<String>,
    parts: Vec<(CheckState, String)>,
    metrics: Vec<Metric>,
}

impl CheckResultBuilder {
    pub fn new(ok_summary: impl Into<String>, fail_summary: impl Into<String>) -> Self {
        Self {
            ok_summary: ok_summary.into(),
            fail_summary: fail_summary.into(),
            base_details: None,
            name_suffix: None,
            hostname: None,
            parts: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub fn ok(mut self, msg: impl Into<String>) -> Self {
        self.parts.push((CheckState::Ok, msg.into()));
        self
    }

    pub fn warn(mut self, msg: impl Into<String>) -> Self {
        self.parts.push((CheckState::Warn, msg.into()));
        self
    }

    pub fn crit(mut self, msg: impl Into<String>) -> Self {
        self.parts.push((CheckState::Crit, msg.into()));
        self
    }

    pub fn unknown(mut self, msg: impl Into<String>) -> Self {
        self.parts.push((CheckState::Unknown, msg.into()));
        self
    }

    pub fn details(mut self, base: impl Into<String>) -> Self {
        self.base_details = Some(base.into());
        self
    }

    pub fn name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.name_suffix = Some(suffix.into());
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Fold the accumulated parts into a single result.
    pub fn build(self) -> CheckResult {
        let state = self
            .parts
            .iter()
            .fold(CheckState::Ok, |acc, (s, _)| acc.worst(*s));

        let summary = if state == CheckState::Ok {
            self.ok_summary
        } else {
            self.fail_summary
        };

        // Non-OK messages make up the detail bullets; OK messages only count
        // when nothing went wrong.
        let non_ok: Vec<&(CheckState, String)> = self
            .parts
            .iter()
            .filter(|(s, _)| *s != CheckState::Ok)
            .collect();
        let listed: Vec<String> = if non_ok.is_empty() {
            self.parts
                .iter()
                .map(|(s, m)| format!("- [{s}] {m}"))
                .collect()
        } else {
            non_ok.iter().map(|(s, m)| format!("- [{s}] {m}")).collect()
        };

        let mut details = self.base_details.unwrap_or_default();
        if !listed.is_empty() {
            if !details.is_empty() {
                details.push('\n');
            }
            details.push_str(&listed.join("\n"));
        }

        let mut result = CheckResult::new(state, summary);
        if !details.is_empty() {
            result.details = Some(Details::Text(details));
        }
        result.name_suffix = self.name_suffix;
        result.hostname = self.hostname;
        result.metrics = self.metrics;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_match_checkmk() {
        assert_eq!(CheckState::Ok.wire_value(), 0);
        assert_eq!(CheckState::Warn.wire_value(), 1);
        assert_eq!(CheckState::Crit.wire_value(), 2);
        assert_eq!(CheckState::Unknown.wire_value(), 3);
    }

    #[test]
    fn severity_order_puts_crit_above_unknown() {
        assert!(CheckState::Crit.severity() > CheckState::Unknown.severity());
        assert!(CheckState::Unknown.severity() > CheckState::Warn.severity());
        assert!(CheckState::Warn.severity() > CheckState::Ok.severity());
        assert_eq!(CheckState::Warn.worst(CheckState::Unknown), CheckState::Unknown);
        assert_eq!(CheckState::Crit.worst(CheckState::Unknown), CheckState::Crit);
    }

    #[test]
    fn builder_folds_to_worst_state() {
        let result = CheckResultBuilder::new("all good", "something failed")
            .ok("disk fine")
            .warn("memory tight")
            .crit("backend down")
            .build();

        assert_eq!(result.state, CheckState::Crit);
        assert_eq!(result.summary, "something failed");
        let details = result.details.unwrap().render();
        assert!(details.contains("- [WARN] memory tight"));
        assert!(details.contains("- [CRIT] backend down"));
        assert!(!details.contains("disk fine"));
    }

    #[test]
    fn builder_with_only_ok_parts_lists_them() {
        let result = CheckResultBuilder::new("all good", "something failed")
            .ok("disk fine")
            .ok("memory fine")
            .build();

        assert_eq!(result.state, CheckState::Ok);
        assert_eq!(result.summary, "all good");
        let details = result.details.unwrap().render();
        assert!(details.contains("- [OK] disk fine"));
        assert!(details.contains("- [OK] memory fine"));
    }

    #[test]
    fn builder_aggregation_is_idempotent() {
        let once = CheckResultBuilder::new("ok", "fail").warn("slow").build();
        let twice = CheckResultBuilder::new("ok", "fail")
            .warn("slow")
            .warn("slow")
            .build();
        assert_eq!(once.state, twice.state);
        assert_eq!(once.summary, twice.summary);
    }

    #[test]
    fn builder_prepends_base_details() {
        let result = CheckResultBuilder::new("ok", "fail")
            .details("endpoint https://example.test")
            .crit("timeout")
            .build();
        let details = result.details.unwrap().render();
        assert!(details.starts_with("endpoint https://example.test\n"));
    }

    #[test]
    fn details_fields_render_as_lines() {
        let mut map = BTreeMap::new();
        map.insert("region".to_string(), "eu-west-1".to_string());
        map.insert("shard".to_string(), "7".to_string());
        let rendered = Details::Fields(map).render();
        assert_eq!(rendered, "region: eu-west-1\nshard: 7");
    }
}
