//! Checkmk piggyback output rendering.
//!
//! Results are grouped by piggyback host in first-emission order. Each
//! group becomes one piggyback section holding local-check records:
//!
//! ```text
//! <<<<host>>>>
//! <<<local:sep(0)>>>
//! 0 "Service Name" metric=1;2;3 summary
//! <<<<>>>>
//! ```
//!
//! The no-piggyback sentinel host omits the `<<<<...>>>>` framing. Details
//! ride inside the record joined by the two-character `\n` escape, which
//! Checkmk renders as a newline.

use watchpost::{ExecutionResult, Metric, NO_PIGGYBACK};

/// Render the full agent payload.
pub fn render(results: &[ExecutionResult]) -> String {
    render_chunks(results).concat()
}

/// Render one chunk per host group, in first-emission order. Streaming the
/// chunks in sequence is byte-identical to [`render`].
pub fn render_chunks(results: &[ExecutionResult]) -> Vec<String> {
    let mut order: Vec<&str> = Vec::new();
    for result in results {
        if !order.contains(&result.piggyback_host.as_str()) {
            order.push(&result.piggyback_host);
        }
    }

    order
        .into_iter()
        .map(|host| {
            let mut chunk = String::new();
            if host != NO_PIGGYBACK {
                chunk.push_str("<<<<");
                chunk.push_str(host);
                chunk.push_str(">>>>\n");
            }
            chunk.push_str("<<<local:sep(0)>>>\n");
            for result in results.iter().filter(|r| r.piggyback_host == host) {
                chunk.push_str(&render_record(result));
                chunk.push('\n');
            }
            if host != NO_PIGGYBACK {
                chunk.push_str("<<<<>>>>\n");
            }
            chunk
        })
        .collect()
}

fn render_record(result: &ExecutionResult) -> String {
    let metrics = if result.metrics.is_empty() {
        "-".to_string()
    } else {
        result
            .metrics
            .iter()
            .map(render_metric)
            .collect::<Vec<_>>()
            .join("|")
    };

    let mut record = format!(
        "{} \"{}\" {} {}",
        result.state.wire_value(),
        result.service_name,
        metrics,
        result.summary
    );
    if !result.details.is_empty() {
        record.push_str("\\n");
        record.push_str(&result.details.replace('\n', "\\n"));
    }
    record
}

fn render_metric(metric: &Metric) -> String {
    let mut out = format!("{}={}", metric.name, metric.value);
    match (&metric.levels, &metric.boundaries) {
        (Some(levels), Some(bounds)) => {
            out.push_str(&format!(
                ";{};{};{};{}",
                levels.warn, levels.crit, bounds.min, bounds.max
            ));
        }
        (Some(levels), None) => {
            out.push_str(&format!(";{};{}", levels.warn, levels.crit));
        }
        (None, Some(bounds)) => {
            out.push_str(&format!(";;;{};{}", bounds.min, bounds.max));
        }
        (None, None) => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use watchpost::{CheckId, CheckState};

    fn result(host: &str, service: &str, state: CheckState) -> ExecutionResult {
        ExecutionResult {
            check_id: CheckId::new("tests.render"),
            piggyback_host: host.to_string(),
            service_name: service.to_string(),
            service_labels: BTreeMap::new(),
            environment: "prod".to_string(),
            state,
            summary: "all good".to_string(),
            details: String::new(),
            metrics: Vec::new(),
        }
    }

    #[test]
    fn single_host_section() {
        let results = vec![result("web-1", "Disk", CheckState::Ok)];
        assert_eq!(
            render(&results),
            "<<<<web-1>>>>\n<<<local:sep(0)>>>\n0 \"Disk\" - all good\n<<<<>>>>\n"
        );
    }

    #[test]
    fn groups_preserve_first_emission_order() {
        let results = vec![
            result("web-1", "Disk", CheckState::Ok),
            result("web-2", "Disk", CheckState::Warn),
            result("web-1", "Memory", CheckState::Ok),
        ];
        let rendered = render(&results);

        let web1 = rendered.find("<<<<web-1>>>>").unwrap();
        let web2 = rendered.find("<<<<web-2>>>>").unwrap();
        assert!(web1 < web2);
        // Both web-1 records live in the one web-1 section.
        let web1_chunk = &rendered[web1..web2];
        assert!(web1_chunk.contains("\"Disk\""));
        assert!(web1_chunk.contains("\"Memory\""));
    }

    #[test]
    fn no_piggyback_sentinel_is_unframed() {
        let results = vec![result(NO_PIGGYBACK, "Engine Health", CheckState::Ok)];
        assert_eq!(
            render(&results),
            "<<<local:sep(0)>>>\n0 \"Engine Health\" - all good\n"
        );
    }

    #[test]
    fn metrics_render_with_levels_and_boundaries() {
        let mut r = result("web-1", "Latency", CheckState::Warn);
        r.metrics = vec![
            watchpost::Metric::new("latency_ms", 250.0)
                .with_levels(200.0, 500.0)
                .with_boundaries(0.0, 1000.0),
            watchpost::Metric::new("requests", 42.0),
        ];
        let rendered = render(&[r]);
        assert!(rendered.contains("latency_ms=250;200;500;0;1000|requests=42"));
    }

    #[test]
    fn details_are_escaped_into_the_record() {
        let mut r = result("web-1", "Backend", CheckState::Unknown);
        r.summary = "check failed".to_string();
        r.details = "first line\nsecond line".to_string();
        let rendered = render(&[r]);
        assert!(rendered.contains("3 \"Backend\" - check failed\\nfirst line\\nsecond line\n"));
    }

    #[test]
    fn state_wire_values_appear_verbatim() {
        for (state, wire) in [
            (CheckState::Ok, "0 "),
            (CheckState::Warn, "1 "),
            (CheckState::Crit, "2 "),
            (CheckState::Unknown, "3 "),
        ] {
            let rendered = render(&[result("h", "S", state)]);
            assert!(rendered.contains(&format!("\n{wire}\"S\"")), "{state}: {rendered}");
        }
    }

    #[test]
    fn chunks_concatenate_to_the_full_payload() {
        let results = vec![
            result("web-1", "Disk", CheckState::Ok),
            result(NO_PIGGYBACK, "Engine Health", CheckState::Ok),
            result("web-2", "Disk", CheckState::Crit),
        ];
        assert_eq!(render_chunks(&results).concat(), render(&results));
        assert_eq!(render_chunks(&results).len(), 3);
    }
}
