//! Integration tests for the termfleet engine
//!
//! Every scenario runs the real resolver, builder, scheduler and run loop
//! against the recording protocol, so no network access is needed.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use termfleet::config::EngineConfig;
use termfleet::domain::{BindingSet, HostRecord, Priority};
use termfleet::engine::{CancelToken, Engine, EngineHandle, RunOptions};
use termfleet::pipeline::PipelineBuilder;
use termfleet::protocol::testing::{RecordingProtocol, SessionEvent};
use termfleet::protocol::{ConnectOptions, Credentials, ProtocolModule, ProtocolRegistry, Session};
use termfleet::scheduler::{JobEvent, JobEventKind, Scheduler, SchedulerConfig};
use termfleet::script::{ScriptSource, TemplateCompiler};
use tempfile::TempDir;

fn registry(protocol: &RecordingProtocol) -> ProtocolRegistry {
    ProtocolRegistry::uniform(Arc::new(protocol.clone()))
}

fn engine_with(protocol: &RecordingProtocol, config: EngineConfig) -> Engine {
    Engine::new(config, registry(protocol))
}

fn engine(protocol: &RecordingProtocol) -> Engine {
    engine_with(protocol, EngineConfig::default())
}

fn options(connections: usize) -> RunOptions {
    RunOptions {
        connections,
        ..Default::default()
    }
}

// =============================================================================
// Round trip
// =============================================================================

#[tokio::test]
async fn test_host_file_round_trip() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let hosts = temp_dir.path().join("hosts.txt");
    fs::write(&hosts, "r1.example.com\n\nssh://alice@r2.example.com:2222\n").unwrap();

    let telnet = RecordingProtocol::new();
    let ssh = RecordingProtocol::new();
    let mut registry = ProtocolRegistry::new();
    registry.register("telnet", Arc::new(telnet.clone()), None);
    registry.register("ssh", Arc::new(ssh.clone()), None);
    registry.register("ssh1", Arc::new(ssh.clone()), Some(1));
    registry.register("ssh2", Arc::new(ssh.clone()), Some(2));

    let mut engine = Engine::new(EngineConfig::default(), registry);
    engine.add_hosts_from_file(&hosts).unwrap();
    engine.load("show version").unwrap();

    let report = engine.run(&options(1), &CancelToken::new()).await.unwrap();

    assert_eq!(report.hosts, 2);
    assert_eq!(report.submitted, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 0);
    assert!(!report.interrupted);

    assert_eq!(telnet.opened_hosts(), vec!["r1.example.com"]);
    assert_eq!(ssh.opened_hosts(), vec!["r2.example.com"]);

    let events = ssh.events();
    assert_eq!(
        events[0],
        SessionEvent::Open {
            host: "r2.example.com".into(),
            options: ConnectOptions {
                port: Some(2222),
                echo: true,
                auto_verify: None,
                ssh_version: None,
            },
        }
    );
    match &events[1] {
        SessionEvent::Authenticate { credentials, wait, .. } => {
            assert_eq!(credentials.username(), Some("alice"));
            assert!(*wait);
        }
        other => panic!("expected authentication, got {other:?}"),
    }
    assert_eq!(ssh.commands("r2.example.com"), vec!["show version"]);
    assert_eq!(ssh.close_count("r2.example.com"), 1);
}

// =============================================================================
// Variables
// =============================================================================

#[tokio::test]
async fn test_host_table_accumulates_values() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let table = temp_dir.path().join("hosts.csv");
    fs::write(&table, "hostname\tregion\nr1\tus-east\nr1\tus-west\n").unwrap();

    let protocol = RecordingProtocol::new();
    let mut engine = engine(&protocol);
    engine.add_hosts_from_table(&table).unwrap();
    engine.load("{{#each region}}show route {{this}}\n{{/each}}").unwrap();

    let report = engine.run(&options(1), &CancelToken::new()).await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(
        protocol.commands("r1"),
        vec!["show route us-east", "show route us-west"]
    );
}

#[tokio::test]
async fn test_binding_precedence() {
    let protocol = RecordingProtocol::new();
    let mut engine = engine(&protocol);
    engine.define("v", vec!["global".into()]);
    engine.define("only_global", vec!["g".into()]);
    engine.add_host("r1?v=url&hostname=alias").unwrap();
    engine.add_host("r2").unwrap();
    engine.define_host("r1", "v", vec!["host".into()]);
    engine.define_host("r2", "v", vec!["host".into()]);
    engine.load("echo {{v}} {{hostname}} {{only_global}}").unwrap();

    engine.run(&options(1), &CancelToken::new()).await.unwrap();

    // The connection still targets the parsed host
    assert_eq!(protocol.commands("r1"), vec!["echo url alias g"]);
    assert_eq!(protocol.commands("r2"), vec!["echo host r2 g"]);
}

#[tokio::test]
async fn test_domain_suffix_and_credentials() {
    let protocol = RecordingProtocol::new();
    let config = EngineConfig {
        domain: "lab.net".into(),
        ..Default::default()
    };
    let mut engine = engine_with(&protocol, config);
    engine.add_hosts(["r1", "core.example.com"]).unwrap();
    engine.load("show {{hostname}}").unwrap();

    let run_options = RunOptions {
        user: Some("admin".into()),
        password: Some("secret".into()),
        ..options(2)
    };
    engine.run(&run_options, &CancelToken::new()).await.unwrap();

    assert_eq!(protocol.commands("r1.lab.net"), vec!["show r1.lab.net"]);
    assert_eq!(protocol.commands("core.example.com"), vec!["show core.example.com"]);

    let auth: Vec<Credentials> = protocol
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Authenticate { credentials, .. } => Some(credentials),
            _ => None,
        })
        .collect();
    assert_eq!(auth.len(), 2);
    assert!(auth.iter().all(|c| *c
        == Credentials::Password {
            username: Some("admin".into()),
            password: Some("secret".into()),
        }));

    // Two connections: no echo by default
    assert!(protocol.events().iter().all(|event| match event {
        SessionEvent::Open { options, .. } => !options.echo,
        _ => true,
    }));
}

// =============================================================================
// Skips and failures
// =============================================================================

#[tokio::test]
async fn test_no_prompt_sends_commands() {
    let protocol = RecordingProtocol::new();
    let mut engine = engine(&protocol);
    engine.add_host("r1").unwrap();
    engine.load("show version\nshow clock").unwrap();

    let options = RunOptions {
        no_prompt: true,
        ..Default::default()
    };
    let report = engine.run(&options, &CancelToken::new()).await.unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(protocol.sent("r1"), vec!["show version", "show clock"]);
    assert!(protocol.commands("r1").is_empty());
}

#[tokio::test]
async fn test_unsupported_protocol_is_skipped() {
    let protocol = RecordingProtocol::new();
    let mut engine = engine(&protocol);
    engine.add_hosts(["ftp://x.example.com", "r1"]).unwrap();
    engine.load("show version").unwrap();

    let report = engine.run(&options(1), &CancelToken::new()).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.submitted, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(protocol.opened_hosts(), vec!["r1"]);
}

#[tokio::test]
async fn test_close_runs_once_when_execute_fails() {
    let protocol = RecordingProtocol::new().fail_execute_on("r1");
    let mut engine = engine(&protocol);
    engine.add_hosts(["r1", "r2"]).unwrap();
    engine.load("show version\nshow clock").unwrap();

    let report = engine.run(&options(1), &CancelToken::new()).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(protocol.commands("r1"), vec!["show version"]);
    assert_eq!(protocol.close_count("r1"), 1);
    assert_eq!(protocol.close_count("r2"), 1);
}

#[tokio::test]
async fn test_failure_writes_host_logs() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let logdir = temp_dir.path().join("logs");
    let protocol = RecordingProtocol::new().fail_execute_on("r2");
    let config = EngineConfig {
        logdir: Some(logdir.clone()),
        ..Default::default()
    };
    let mut engine = engine_with(&protocol, config);
    engine.add_hosts(["r1", "r2"]).unwrap();
    engine.load("show version").unwrap();

    engine.run(&options(1), &CancelToken::new()).await.unwrap();

    let transcript = fs::read_to_string(logdir.join("r1.log")).unwrap();
    assert!(transcript.contains("show version"));
    assert!(!logdir.join("r1.log.error").exists());
    let error = fs::read_to_string(logdir.join("r2.log.error")).unwrap();
    assert!(error.contains("injected failure"));
}

// =============================================================================
// Scheduling
// =============================================================================

#[tokio::test]
async fn test_backpressure_bounds_pending_jobs() {
    let protocol = RecordingProtocol::new().with_execute_delay(Duration::from_millis(30));
    let mut engine = engine(&protocol);
    engine.add_hosts((1..=6).map(|i| format!("h{i}"))).unwrap();
    engine.load("show version").unwrap();

    let report = engine.run(&options(1), &CancelToken::new()).await.unwrap();
    let stats = engine.scheduler().stats().await;

    assert_eq!(report.completed, 6);
    assert!(stats.peak_pending <= 2, "peak pending was {}", stats.peak_pending);
    assert_eq!(stats.peak_running, 1);
    assert_eq!(protocol.opened_hosts(), vec!["h1", "h2", "h3", "h4", "h5", "h6"]);
}

#[tokio::test]
async fn test_tier_order_through_builder() {
    let protocol = RecordingProtocol::new();
    let builder = PipelineBuilder::new(registry(&protocol), Arc::new(TemplateCompiler::default()), "");
    let source = ScriptSource::new("show version", None);
    let scheduler = Arc::new(Scheduler::new(SchedulerConfig::with_max_concurrent(1)));

    for (host, priority) in [("j1", None), ("j2", Some("high")), ("j3", Some("force")), ("j4", Some("force"))] {
        let record = HostRecord::parse(host, "telnet").unwrap();
        let run_options = RunOptions {
            priority: priority.map(String::from),
            ..Default::default()
        };
        let built = builder
            .build(&record, BindingSet::new(), &source, EngineHandle::detached(), &run_options)
            .unwrap();
        scheduler.submit(Box::new(built.pipeline), built.priority).await;
    }

    scheduler.start().await.unwrap();
    scheduler.shutdown(true).await;

    assert_eq!(protocol.opened_hosts(), vec!["j3", "j4", "j2", "j1"]);
    assert_eq!(Priority::from_option(Some("force")), Priority::Forced);
}

// =============================================================================
// Interrupts
// =============================================================================

#[tokio::test]
async fn test_interrupt_reports_unfinished_jobs() {
    let protocol = RecordingProtocol::new().with_execute_delay(Duration::from_millis(300));
    let mut engine = engine(&protocol);
    engine.add_hosts(["h1", "h2", "h3", "h4"]).unwrap();
    engine.load("show version").unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    engine.scheduler().subscribe(Arc::new(move |event: &JobEvent| {
        if event.kind == JobEventKind::Started {
            trigger.trigger();
        }
    }));

    let report = tokio::time::timeout(Duration::from_secs(5), engine.run(&options(1), &cancel))
        .await
        .expect("run should stop promptly")
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.unfinished, 3);
    assert!(report.submitted < 4);

    // Only the first host ever ran, and it released its session
    for host in ["h2", "h3", "h4"] {
        assert!(!protocol.opened_hosts().contains(&host.to_string()));
    }
    for host in protocol.opened_hosts() {
        assert_eq!(protocol.close_count(&host), 1);
    }
}

#[tokio::test]
async fn test_interrupted_jobs_do_not_leak_into_next_run() {
    let protocol = RecordingProtocol::new().with_execute_delay(Duration::from_millis(200));
    let mut engine = engine(&protocol);
    engine.add_hosts(["h1", "h2", "h3", "h4"]).unwrap();
    engine.load("show version").unwrap();

    let first_cancel = CancelToken::new();
    let trigger = first_cancel.clone();
    engine.scheduler().subscribe(Arc::new(move |event: &JobEvent| {
        if event.kind == JobEventKind::Started {
            trigger.trigger();
        }
    }));

    let first = tokio::time::timeout(Duration::from_secs(5), engine.run(&options(2), &first_cancel))
        .await
        .expect("run should stop promptly")
        .unwrap();
    assert!(first.interrupted);
    assert!(first.completed + first.failed <= first.submitted);
    assert_eq!(engine.scheduler().queue_state().await.queued, 0);
    let opened_before = protocol.opened_hosts().len();

    let second = engine.run(&options(2), &CancelToken::new()).await.unwrap();

    assert!(!second.interrupted);
    assert_eq!(second.submitted, 4);
    assert_eq!(second.completed + second.failed, second.submitted);
    assert_eq!(protocol.opened_hosts().len(), opened_before + 4);
}

#[tokio::test]
async fn test_cancelled_before_run_submits_nothing() {
    let protocol = RecordingProtocol::new();
    let mut engine = engine(&protocol);
    engine.add_hosts(["h1", "h2"]).unwrap();
    engine.load("show version").unwrap();

    let cancel = CancelToken::new();
    cancel.trigger();
    let report = engine.run(&options(1), &cancel).await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.submitted, 0);
    assert_eq!(report.unfinished, 2);
    assert!(protocol.events().is_empty());
}

// =============================================================================
// Protocol double sanity
// =============================================================================

#[tokio::test]
async fn test_recording_protocol_opens_sessions() {
    let protocol = RecordingProtocol::new();
    let mut session = protocol.open("x", &ConnectOptions::default()).await.unwrap();
    session.send("hello").await.unwrap();
    session.close().await.unwrap();
    assert_eq!(protocol.sent("x"), vec!["hello"]);
}
