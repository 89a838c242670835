//! Piggyback hostname resolution.
//!
//! Every emitted result needs a resolved piggyback host. Resolution walks a
//! hierarchy: result override, check-level strategy, environment default,
//! engine default, and finally a synthesized `{service_name}-{env_name}`.

use std::fmt;
use std::sync::Arc;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::environment::Environment;
use crate::result::CheckId;

/// Sentinel host: the service is emitted without piggyback framing.
pub const NO_PIGGYBACK: &str = "no-piggyback";

/// Inputs available to hostname strategies.
#[derive(Debug, Clone, Copy)]
pub struct HostnameContext<'a> {
    pub check_id: &'a CheckId,
    pub service_name: &'a str,
    pub environment: &'a Environment,
}

/// A reusable hostname resolution rule.
pub trait HostnameResolver: Send + Sync {
    fn resolve(&self, ctx: &HostnameContext<'_>) -> Option<String>;
}

/// How a check (or the engine) derives piggyback hostnames.
#[derive(Clone)]
pub enum HostnameStrategy {
    /// A fixed hostname.
    Static(String),
    /// A template over `{service_name}`, `{environment}` and `{check_id}`.
    Template(String),
    /// An arbitrary function of the context.
    Callable(Arc<dyn Fn(&HostnameContext<'_>) -> Option<String> + Send + Sync>),
    /// A reusable resolver object.
    Resolver(Arc<dyn HostnameResolver>),
}

impl HostnameStrategy {
    pub fn stat(hostname: impl Into<String>) -> Self {
        HostnameStrategy::Static(hostname.into())
    }

    pub fn template(template: impl Into<String>) -> Self {
        HostnameStrategy::Template(template.into())
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&HostnameContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        HostnameStrategy::Callable(Arc::new(f))
    }

    fn render(&self, ctx: &HostnameContext<'_>) -> Option<String> {
        match self {
            HostnameStrategy::Static(s) => Some(s.clone()),
            HostnameStrategy::Template(t) => Some(render_template(t, ctx)),
            HostnameStrategy::Callable(f) => f(ctx),
            HostnameStrategy::Resolver(r) => r.resolve(ctx),
        }
    }
}

impl fmt::Debug for HostnameStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostnameStrategy::Static(s) => f.debug_tuple("Static").field(s).finish(),
            HostnameStrategy::Template(t) => f.debug_tuple("Template").field(t).finish(),
            HostnameStrategy::Callable(_) => f.write_str("Callable(..)"),
            HostnameStrategy::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

fn render_template(template: &str, ctx: &HostnameContext<'_>) -> String {
    template
        .replace("{service_name}", ctx.service_name)
        .replace("{environment}", ctx.environment.name())
        .replace("{check_id}", ctx.check_id.as_str())
}

/// Resolution yielded an empty hostname and coercion is disabled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("hostname for service `{service}` in `{environment}` resolved to an empty string")]
pub struct HostnameResolutionError {
    pub service: String,
    pub environment: String,
}

/// Walk the hierarchy and produce the piggyback host for one result.
///
/// With coercion enabled an empty outcome falls back to the synthesized
/// default; with coercion disabled it is a per-result error.
pub fn resolve_piggyback_host(
    result_override: Option<&str>,
    check_strategy: Option<&HostnameStrategy>,
    engine_default: Option<&HostnameStrategy>,
    ctx: &HostnameContext<'_>,
    coerce: bool,
) -> Result<String, HostnameResolutionError> {
    let raw = result_override
        .map(str::to_string)
        .or_else(|| check_strategy.and_then(|s| s.render(ctx)))
        .or_else(|| ctx.environment.hostname().map(str::to_string))
        .or_else(|| engine_default.and_then(|s| s.render(ctx)))
        .unwrap_or_else(|| synthesized(ctx));

    // The sentinel opts out of piggyback framing and is never coerced.
    if raw == NO_PIGGYBACK {
        return Ok(raw);
    }

    let resolved = if coerce { rfc1123_coerce(&raw) } else { raw };
    if resolved.is_empty() {
        if coerce {
            return Ok(rfc1123_coerce(&synthesized(ctx)));
        }
        return Err(HostnameResolutionError {
            service: ctx.service_name.to_string(),
            environment: ctx.environment.name().to_string(),
        });
    }
    Ok(resolved)
}

fn synthesized(ctx: &HostnameContext<'_>) -> String {
    format!("{}-{}", ctx.service_name, ctx.environment.name())
}

/// Coerce a string into an RFC1123-compatible hostname.
///
/// Lowercases, folds Unicode to ASCII (NFKD, combining marks stripped),
/// replaces anything outside `[a-z0-9-.]` with `-`, trims each dot label of
/// leading/trailing `-` and cuts it to 63 characters, collapses empty
/// labels, and clamps the total to 253 characters. Idempotent.
pub fn rfc1123_coerce(input: &str) -> String {
    let folded: String = input
        .to_lowercase()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut out = String::new();
    for raw in folded.split('.') {
        let mut label = raw.trim_matches('-');
        if label.len() > 63 {
            label = label[..63].trim_matches('-');
        }
        if label.is_empty() {
            continue;
        }
        let sep = usize::from(!out.is_empty());
        if out.len() + sep + label.len() > 253 {
            break;
        }
        if sep == 1 {
            out.push('.');
        }
        out.push_str(label);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(
        check_id: &'a CheckId,
        service: &'a str,
        environment: &'a Environment,
    ) -> HostnameContext<'a> {
        HostnameContext {
            check_id,
            service_name: service,
            environment,
        }
    }

    #[test]
    fn coercion_basics() {
        assert_eq!(rfc1123_coerce("API.Example.COM"), "api.example.com");
        assert_eq!(rfc1123_coerce("my host_name"), "my-host-name");
        assert_eq!(rfc1123_coerce("Münster.test"), "munster.test");
        assert_eq!(rfc1123_coerce("-lead.trail-"), "lead.trail");
        assert_eq!(rfc1123_coerce("a..b"), "a.b");
    }

    #[test]
    fn coercion_clamps_labels_and_total() {
        let long_label = "x".repeat(80);
        let coerced = rfc1123_coerce(&long_label);
        assert_eq!(coerced.len(), 63);

        let many_labels = vec!["label"; 60].join(".");
        let coerced = rfc1123_coerce(&many_labels);
        assert!(coerced.len() <= 253);
        assert!(!coerced.ends_with('.'));
    }

    #[test]
    fn coercion_is_idempotent() {
        let long = "x".repeat(300);
        for input in [
            "API.Example.COM",
            "my host_name",
            "Münster.test",
            long.as_str(),
            "--..--",
            "ünïcödé.hosts!",
        ] {
            let once = rfc1123_coerce(input);
            assert_eq!(rfc1123_coerce(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn all_dashes_coerce_to_empty() {
        assert_eq!(rfc1123_coerce("--..--"), "");
        assert_eq!(rfc1123_coerce("..."), "");
    }

    #[test]
    fn hierarchy_prefers_result_override() {
        let id = CheckId::new("tests.check");
        let env = Environment::new("prod").with_hostname("env-host");
        let strategy = HostnameStrategy::stat("check-host");

        let host = resolve_piggyback_host(
            Some("override-host"),
            Some(&strategy),
            None,
            &ctx(&id, "My Service", &env),
            true,
        )
        .unwrap();
        assert_eq!(host, "override-host");
    }

    #[test]
    fn hierarchy_falls_back_to_environment_then_synthesized() {
        let id = CheckId::new("tests.check");
        let with_host = Environment::new("prod").with_hostname("Env-Host");
        let without_host = Environment::new("prod");

        let host =
            resolve_piggyback_host(None, None, None, &ctx(&id, "My Service", &with_host), true)
                .unwrap();
        assert_eq!(host, "env-host");

        let host =
            resolve_piggyback_host(None, None, None, &ctx(&id, "My Service", &without_host), true)
                .unwrap();
        assert_eq!(host, "my-service-prod");
    }

    #[test]
    fn template_renders_context() {
        let id = CheckId::new("tests.check");
        let env = Environment::new("staging");
        let strategy = HostnameStrategy::template("{service_name}.{environment}.internal");

        let host =
            resolve_piggyback_host(None, Some(&strategy), None, &ctx(&id, "db", &env), true)
                .unwrap();
        assert_eq!(host, "db.staging.internal");
    }

    #[test]
    fn empty_resolution_errors_without_coercion() {
        let id = CheckId::new("tests.check");
        let env = Environment::new("prod");
        let strategy = HostnameStrategy::stat("");

        let err = resolve_piggyback_host(
            None,
            Some(&strategy),
            None,
            &ctx(&id, "svc", &env),
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("svc"));
    }

    #[test]
    fn empty_resolution_falls_back_with_coercion() {
        let id = CheckId::new("tests.check");
        let env = Environment::new("prod");
        let strategy = HostnameStrategy::stat("--");

        let host = resolve_piggyback_host(
            None,
            Some(&strategy),
            None,
            &ctx(&id, "svc", &env),
            true,
        )
        .unwrap();
        assert_eq!(host, "svc-prod");
    }

    #[test]
    fn sentinel_is_passed_through() {
        let id = CheckId::new("tests.check");
        let env = Environment::new("prod");
        let strategy = HostnameStrategy::stat(NO_PIGGYBACK);

        let host =
            resolve_piggyback_host(None, Some(&strategy), None, &ctx(&id, "svc", &env), true)
                .unwrap();
        assert_eq!(host, NO_PIGGYBACK);
    }
}
