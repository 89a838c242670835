//! Built-in probe checks.
//!
//! The shipped binary feeds a Checkmk agent without any user code: the
//! configuration file declares TCP and HTTP probes, which are registered
//! here as ordinary Watchpost checks backed by two shared datasources.

use futures::future::BoxFuture;
use std::any::Any;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use watchpost::{
    CheckError, CheckOutput, CheckResultBuilder, CheckSpec, Datasource, Metric, ParamSpec,
};

use crate::config::{ProbeKind, ProbeSettings};

/// TCP connect probe datasource.
#[derive(Debug, Default)]
pub struct TcpProbe;

impl TcpProbe {
    pub fn new() -> Self {
        Self
    }

    /// Connect to `address`, returning the connect latency.
    pub async fn connect(&self, address: &str, timeout: Duration) -> Result<Duration, CheckError> {
        let start = Instant::now();
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address)).await {
            Ok(Ok(_stream)) => {
                let latency = start.elapsed();
                debug!(address, latency_ms = latency.as_millis(), "TCP probe connected");
                Ok(latency)
            }
            Ok(Err(e)) => {
                warn!(address, error = %e, "TCP probe failed");
                Err(CheckError::failed(format!("connect to {address} failed: {e}")))
            }
            Err(_) => {
                warn!(address, "TCP probe timed out");
                Err(CheckError::unavailable(format!(
                    "connect to {address} timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}

impl Datasource for TcpProbe {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// HTTP endpoint probe datasource. One shared client for all probes.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, CheckError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(CheckError::failed)?;
        Ok(Self { client })
    }

    /// Issue one request, returning the status code and latency.
    pub async fn fetch(
        &self,
        method: &str,
        url: &str,
        timeout: Duration,
    ) -> Result<(u16, Duration), CheckError> {
        let method = method
            .parse::<reqwest::Method>()
            .map_err(|_| CheckError::failed(format!("invalid HTTP method `{method}`")))?;

        let start = Instant::now();
        let request = self.client.request(method, url).timeout(timeout);
        match request.send().await {
            Ok(response) => {
                let latency = start.elapsed();
                let status = response.status().as_u16();
                debug!(url, status, latency_ms = latency.as_millis(), "HTTP probe responded");
                Ok((status, latency))
            }
            Err(e) if e.is_timeout() => {
                warn!(url, "HTTP probe timed out");
                Err(CheckError::unavailable(format!(
                    "request to {url} timed out after {}ms",
                    timeout.as_millis()
                )))
            }
            Err(e) => {
                warn!(url, error = %e, "HTTP probe failed");
                Err(CheckError::failed(format!("request to {url} failed: {e}")))
            }
        }
    }
}

impl Datasource for HttpProbe {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Turn one probe declaration into a registered check.
pub fn probe_check(settings: &ProbeSettings) -> CheckSpec {
    let id = format!("watchpost.probes.{}", settings.name);
    let service = settings
        .service
        .clone()
        .unwrap_or_else(|| settings.name.clone());

    let spec = match &settings.kind {
        ProbeKind::Tcp { address } => {
            let address = address.clone();
            let timeout = settings.timeout;
            CheckSpec::r#async(id.as_str(), service, move |injected| {
                let address = address.clone();
                let fut: BoxFuture<'static, CheckOutput> = Box::pin(async move {
                    let probe = injected
                        .datasource::<TcpProbe>(0)
                        .ok_or_else(|| CheckError::failed("tcp probe datasource missing"))?;
                    let latency = probe.connect(&address, timeout).await?;
                    let builder =
                        CheckResultBuilder::new("port reachable", "port unreachable")
                            .ok(format!("connected to {address}"))
                            .metric(
                                Metric::new("connect_time_ms", latency.as_millis() as f64)
                                    .with_unit("ms"),
                            );
                    Ok(builder.into())
                });
                fut
            })
            .param(ParamSpec::datasource::<TcpProbe>("probe"))
        }
        ProbeKind::Http {
            url,
            method,
            expected_codes,
        } => {
            let url = url.clone();
            let method = method.clone();
            let expected = expected_codes.clone();
            let timeout = settings.timeout;
            CheckSpec::r#async(id.as_str(), service, move |injected| {
                let url = url.clone();
                let method = method.clone();
                let expected = expected.clone();
                let fut: BoxFuture<'static, CheckOutput> = Box::pin(async move {
                    let probe = injected
                        .datasource::<HttpProbe>(0)
                        .ok_or_else(|| CheckError::failed("http probe datasource missing"))?;
                    let (status, latency) = probe.fetch(&method, &url, timeout).await?;

                    let mut builder =
                        CheckResultBuilder::new("endpoint healthy", "endpoint unhealthy")
                            .details(format!("{method} {url}"))
                            .metric(
                                Metric::new("response_time_ms", latency.as_millis() as f64)
                                    .with_unit("ms"),
                            );
                    if expected.is_empty() || expected.contains(&status) {
                        builder = builder.ok(format!("status {status}"));
                    } else {
                        builder = builder.crit(format!(
                            "unexpected status {status} (expected one of {expected:?})"
                        ));
                    }
                    Ok(builder.into())
                });
                fut
            })
            .param(ParamSpec::datasource::<HttpProbe>("probe"))
        }
    };

    let spec = spec.target_environments(settings.target_environments.clone());
    match &settings.cache_for {
        Some(ttl) => spec.cache_for(ttl.clone()),
        None => spec,
    }
}
