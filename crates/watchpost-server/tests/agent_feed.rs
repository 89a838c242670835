//! End-to-end: engine poll rendered as a Checkmk agent payload.

use watchpost::{
    CheckResult, CheckSpec, Engine, Environment, ExpandByHostname, HostnameStrategy, Metric,
    NO_PIGGYBACK,
};
use watchpost_server::output;

fn feed_engine() -> Engine {
    let disk = CheckSpec::sync("app.checks.disk", "Disk", |_| {
        Ok(CheckResult::ok("4.2 GiB free")
            .with_metric(Metric::new("free_gb", 4.2).with_levels(2.0, 1.0))
            .into())
    })
    .no_cache()
    .target_environments(["prod"]);

    let engine_health = CheckSpec::sync("app.checks.self", "Engine Health", |_| {
        Ok(CheckResult::ok("engine alive").into())
    })
    .no_cache()
    .target_environments(["prod"])
    .hostname(HostnameStrategy::stat(NO_PIGGYBACK));

    let broken = CheckSpec::sync("app.checks.cluster", "Cluster", |_| {
        Err(watchpost::CheckError::failed("api unreachable"))
    })
    .no_cache()
    .target_environments(["prod"])
    .error_handler(ExpandByHostname::new(["node-1", "node-2"]));

    Engine::builder()
        .environment(Environment::new("prod").with_hostname("prod-host"))
        .execution_environment("prod")
        .check(disk)
        .check(engine_health)
        .check(broken)
        .build()
        .expect("engine should build")
}

#[tokio::test]
async fn full_feed_renders_every_section() {
    let engine = feed_engine();
    let results = engine.poll().await;
    let payload = output::render(&results);

    // Disk lands on the environment hostname, framed.
    assert!(payload.contains("<<<<prod-host>>>>"));
    assert!(payload.contains("0 \"Disk\" free_gb=4.2;2;1 4.2 GiB free"));

    // The self check opted out of piggyback framing.
    let unframed = payload
        .split("<<<<>>>>")
        .any(|section| section.contains("\"Engine Health\"") && !section.contains("<<<<prod-host"));
    assert!(unframed, "engine health must be outside piggyback framing:\n{payload}");

    // The throwing check expanded to both nodes as UNKNOWN.
    assert!(payload.contains("<<<<node-1>>>>"));
    assert!(payload.contains("<<<<node-2>>>>"));
    assert_eq!(payload.matches("3 \"Cluster\"").count(), 2);
    assert!(payload.contains("api unreachable"));

    engine.shutdown(true).await;
}

#[tokio::test]
async fn feed_is_stable_across_polls() {
    let engine = feed_engine();
    let first = output::render(&engine.poll().await);
    let second = output::render(&engine.poll().await);
    assert_eq!(first, second);
    engine.shutdown(true).await;
}
