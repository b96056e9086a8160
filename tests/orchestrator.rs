//! End-to-end runs of the orchestrator against a fake resolver.

use std::sync::Arc;
use std::time::Duration;

use node_cache::lifecycle::SignalEvent;
use node_cache::{App, ExitReason};
use tokio::sync::mpsc;

mod common;
use common::{wait_until, MemoryInterfaceBackend, MemoryRuleBackend, Resolver, TestEnv};

const RUN_TIMEOUT: Duration = Duration::from_secs(15);

struct Running {
    signals: mpsc::Sender<SignalEvent>,
    handle: tokio::task::JoinHandle<ExitReason>,
    rules: Arc<MemoryRuleBackend>,
    interface: Arc<MemoryInterfaceBackend>,
}

fn launch(env: &TestEnv) -> Running {
    let rules = Arc::new(MemoryRuleBackend::default());
    let interface = Arc::new(MemoryInterfaceBackend::default());
    let (signals, rx) = mpsc::channel(4);

    let app = App::new(env.settings.clone(), rules.clone(), interface.clone());
    let handle = tokio::spawn(app.run(rx));

    Running {
        signals,
        handle,
        rules,
        interface,
    }
}

async fn exit_reason(handle: tokio::task::JoinHandle<ExitReason>) -> ExitReason {
    tokio::time::timeout(RUN_TIMEOUT, handle)
        .await
        .expect("app did not exit in time")
        .expect("app task panicked")
}

#[tokio::test]
async fn test_terminate_tears_down_network() {
    let env = TestEnv::new(Resolver::Running);
    let run = launch(&env);

    let pid_path = env.settings.resolver.pid_path.clone();
    assert!(wait_until(RUN_TIMEOUT, || pid_path.exists()).await);
    assert_eq!(run.rules.len(), 12);
    let (name, addresses) = run.interface.current().expect("interface set up");
    assert_eq!(name, "nodelocaldns");
    assert_eq!(addresses, env.settings.network.bind_addresses);

    let rendered = env.rendered();
    assert!(rendered.contains("interface: 169.254.25.10@5353"));
    assert!(rendered.contains("cache-max-ttl: 60"));

    run.signals.send(SignalEvent::Terminate).await.unwrap();
    assert_eq!(exit_reason(run.handle).await, ExitReason::Terminated);
    assert!(run.rules.is_empty());
    assert!(run.interface.current().is_none());
}

#[tokio::test]
async fn test_resolver_exit_ends_run() {
    let env = TestEnv::new(Resolver::Crashing);
    let run = launch(&env);

    let reason = exit_reason(run.handle).await;
    assert_eq!(reason, ExitReason::ResolverExited);
    assert_eq!(reason.code(), 2);
    assert!(run.rules.is_empty());
    assert!(run.interface.current().is_none());
}

#[tokio::test]
async fn test_rejected_configuration_fails_startup() {
    let env = TestEnv::new(Resolver::Invalid);
    let run = launch(&env);

    let reason = exit_reason(run.handle).await;
    assert_eq!(reason, ExitReason::StartupFailed);
    assert_eq!(reason.code(), 1);
    // rules installed before launch are still removed
    assert!(run.rules.is_empty());
    assert!(run.interface.current().is_none());
}

#[tokio::test]
async fn test_missing_template_fails_startup() {
    let env = TestEnv::new(Resolver::Running);
    std::fs::remove_file(&env.settings.resolver.template_path).unwrap();
    let run = launch(&env);

    assert_eq!(exit_reason(run.handle).await, ExitReason::StartupFailed);
    assert!(!env.settings.resolver.pid_path.exists());
    assert!(run.rules.is_empty());
}

#[tokio::test]
async fn test_config_change_rerenders_and_reloads() {
    let env = TestEnv::new(Resolver::Running);
    let run = launch(&env);

    let pid_path = env.settings.resolver.pid_path.clone();
    assert!(wait_until(RUN_TIMEOUT, || pid_path.exists()).await);

    std::fs::write(&env.settings.sync.config_file, "cache:\n  maxTTL: 300\n").unwrap();
    assert!(wait_until(RUN_TIMEOUT, || env.rendered().contains("cache-max-ttl: 300")).await);
    assert!(wait_until(RUN_TIMEOUT, || env.reloads() >= 1).await);

    run.signals.send(SignalEvent::Terminate).await.unwrap();
    assert_eq!(exit_reason(run.handle).await, ExitReason::Terminated);
}

#[tokio::test]
async fn test_reload_signal_picks_up_new_template() {
    let env = TestEnv::new(Resolver::Running);
    let run = launch(&env);

    let pid_path = env.settings.resolver.pid_path.clone();
    assert!(wait_until(RUN_TIMEOUT, || pid_path.exists()).await);

    std::fs::write(
        &env.settings.resolver.template_path,
        "server:\n    cache-max-ttl: {{ cache.maxTTL }}\n    # reloaded\n",
    )
    .unwrap();
    run.signals.send(SignalEvent::Reload).await.unwrap();

    assert!(wait_until(RUN_TIMEOUT, || env.rendered().contains("# reloaded")).await);
    assert!(env.rendered().contains("cache-max-ttl: 60"));
    assert!(wait_until(RUN_TIMEOUT, || env.reloads() >= 1).await);

    run.signals.send(SignalEvent::Terminate).await.unwrap();
    assert_eq!(exit_reason(run.handle).await, ExitReason::Terminated);
}

#[tokio::test]
async fn test_healthz_while_running() {
    let env = TestEnv::new(Resolver::Running);
    let run = launch(&env);

    let pid_path = env.settings.resolver.pid_path.clone();
    assert!(wait_until(RUN_TIMEOUT, || pid_path.exists()).await);

    let url = format!("http://127.0.0.1:{}/healthz", env.settings.health.port);
    let client = reqwest::Client::new();
    let mut body = None;
    for _ in 0..100 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status() == 200 {
                body = Some(resp.json::<serde_json::Value>().await.unwrap());
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let body = body.expect("healthz never reported healthy");
    assert_eq!(body["healthy"], true);
    let names: Vec<_> = body["components"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["cacheapp", "nanny"]);

    run.signals.send(SignalEvent::Terminate).await.unwrap();
    assert_eq!(exit_reason(run.handle).await, ExitReason::Terminated);
}
