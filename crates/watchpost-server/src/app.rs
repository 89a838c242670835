//! Engine assembly from the server configuration.

use std::sync::Arc;

use watchpost::{
    ChainedStorage, ConfigurationErrors, DiskStorage, Engine, Environment, ExecutorConfig,
    HostnameStrategy, MemoryStorage, Storage,
};

use crate::config::Config;
use crate::probes::{probe_check, HttpProbe, TcpProbe};

/// Build and validate the engine described by `config`.
///
/// Must be called from within a tokio runtime (the executor spawns its
/// worker pool during the build).
pub fn build_engine(config: &Config) -> Result<Engine, ConfigurationErrors> {
    let mut builder = Engine::builder()
        .execution_environment(&config.engine.execution_environment)
        .rfc1123(config.engine.rfc1123);

    for env in &config.environments {
        let mut environment = Environment::new(&env.name);
        if let Some(hostname) = &env.hostname {
            environment = environment.with_hostname(hostname);
        }
        for (key, value) in &env.metadata {
            environment = environment.with_metadata(key, value);
        }
        builder = builder.environment(environment);
    }

    if let Some(workers) = config.engine.workers {
        builder = builder.executor_config(ExecutorConfig {
            workers,
            ..ExecutorConfig::default()
        });
    }
    if let Some(ttl) = config.engine.default_cache_for {
        builder = builder.default_cache_for(ttl);
    }
    if let Some(deadline) = config.engine.check_deadline {
        builder = builder.check_deadline(deadline);
    }

    // Hosts without an explicit mapping land on a predictable name.
    builder = builder.default_hostname(HostnameStrategy::template("{service_name}-{environment}"));

    let storage: Arc<dyn Storage> = match &config.cache.directory {
        Some(dir) => Arc::new(ChainedStorage::new(vec![
            Arc::new(MemoryStorage::new()) as Arc<dyn Storage>,
            Arc::new(DiskStorage::new(dir.clone())) as Arc<dyn Storage>,
        ])),
        None => Arc::new(MemoryStorage::new()),
    };
    builder = builder.storage(storage);

    builder.datasources_mut().register(|| Ok(TcpProbe::new()));
    builder.datasources_mut().register(HttpProbe::new);

    for probe in &config.probes {
        builder = builder.check(probe_check(probe));
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use validator::Validate;

    fn config_from(yaml: &str) -> Config {
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        config
    }

    #[tokio::test]
    async fn default_config_builds_an_empty_engine() {
        let engine = build_engine(&Config::default()).expect("default engine should build");
        assert!(engine.checks().is_empty());
        assert!(engine.poll().await.is_empty());
        engine.shutdown(true).await;
    }

    #[tokio::test]
    async fn probes_become_checks() {
        let config = config_from(
            r#"
engine:
  execution_environment: prod

environments:
  - name: prod
    hostname: gateway-host
  - name: staging

probes:
  - name: gateway
    type: tcp
    address: "127.0.0.1:443"
    target_environments: [prod]
  - name: api
    type: http
    url: "https://api.example.test/health"
    target_environments: [prod, staging]
"#,
        );

        let engine = build_engine(&config).expect("engine should build");
        assert_eq!(engine.checks().len(), 2);

        let ids: Vec<String> = engine
            .checks()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert!(ids.contains(&"watchpost.probes.gateway".to_string()));
        assert!(ids.contains(&"watchpost.probes.api".to_string()));

        engine.shutdown(true).await;
    }

    #[tokio::test]
    async fn unknown_target_environment_fails_the_build() {
        let config = config_from(
            r#"
engine:
  execution_environment: prod

environments:
  - name: prod

probes:
  - name: gateway
    type: tcp
    address: "127.0.0.1:443"
    target_environments: [qa]
"#,
        );

        let errors = build_engine(&config).err().expect("build must fail");
        assert!(errors.to_string().contains("qa"));
    }
}
