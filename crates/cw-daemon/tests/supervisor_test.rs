//! End-to-end supervisor scenarios over scripted surfaces.

use std::sync::Arc;
use std::time::Duration;

use cw_core::config::Config;
use cw_core::shutdown::ShutdownSignal;
use cw_daemon::Supervisor;
use cw_routing::directive::reply_wrapper;
use cw_surface::testing::{InMemoryChannel, ScriptedProvider, ScriptedSurface};
use cw_surface::SurfaceError;

fn fast_config(names: &[&str]) -> Config {
    let mut cfg = Config::default();
    cfg.agents.names = names.iter().map(|s| s.to_string()).collect();
    cfg.supervisor.poll_interval_ms = 10;
    cfg.supervisor.startup_delay_ms = 1;
    cfg.routing.reply_timeout_ms = 300;
    cfg.routing.reply_poll_ms = 5;
    cfg.retry.max_attempts = 2;
    cfg.retry.backoff_ms = 1;
    cfg.recovery.pause_ms = 5;
    cfg
}

/// Run the supervisor for roughly `run_ms`, then shut it down and hand
/// it back for inspection.
async fn run_supervisor(sup: Supervisor, run_ms: u64) -> Supervisor {
    let shutdown = ShutdownSignal::new();
    let sd = shutdown.clone();
    let handle = tokio::spawn(async move {
        let mut sup = sup;
        sup.run(sd).await.unwrap();
        sup
    });
    tokio::time::sleep(Duration::from_millis(run_ms)).await;
    shutdown.trigger();
    handle.await.unwrap()
}

fn directive(target: &str, payload: &str) -> String {
    format!("[ type : private message ; for : {target} ; message : {{ {payload} }} ]")
}

#[tokio::test]
async fn private_message_roundtrip_and_publish() {
    let chatgpt = ScriptedSurface::new("ChatGPT");
    let gemini = ScriptedSurface::new("Gemini");
    let turn = format!("Let me check with Gemini.\n{}", directive("Gemini", "ping"));
    chatgpt.push_frame(&turn, false);
    // First Gemini read is the router's pre-submission baseline.
    gemini.push_frame("", false);
    gemini.push_frames("pong", false, 2);

    let provider = ScriptedProvider::new();
    provider.register(chatgpt.clone());
    provider.register(gemini.clone());
    let channel = InMemoryChannel::new();

    let sup = Supervisor::new(
        fast_config(&["ChatGPT", "Gemini"]),
        provider,
        channel.clone(),
    );
    let sup = run_supervisor(sup, 200).await;

    // The payload crossed once, despite the directive staying visible
    // on the origin surface for every later cycle.
    assert_eq!(gemini.submissions(), vec!["ping"]);
    assert_eq!(chatgpt.submissions(), vec![reply_wrapper("Gemini", "pong")]);

    // Both the directive and the delivered wrapper are in the origin's
    // ledger.
    let processed = sup.processed("ChatGPT").unwrap();
    assert!(processed.contains(&directive("Gemini", "ping")));
    assert!(processed.contains(&reply_wrapper("Gemini", "pong")));

    // Settled turns were published with attribution, directives
    // stripped.
    let writes = channel.writes();
    assert!(writes.contains(&"ChatGPT: Let me check with Gemini.".to_string()));
    assert!(writes.contains(&"Gemini: pong".to_string()));
    assert!(writes.iter().all(|w| !w.contains("ping")));
}

#[tokio::test]
async fn unknown_target_closes_once() {
    let chatgpt = ScriptedSurface::new("ChatGPT");
    chatgpt.push_frame(directive("Ghost", "anyone there?"), false);

    let provider = ScriptedProvider::new();
    provider.register(chatgpt.clone());
    provider.register(ScriptedSurface::new("Gemini"));
    let channel = InMemoryChannel::new();

    let sup = Supervisor::new(
        fast_config(&["ChatGPT", "Gemini"]),
        provider,
        channel,
    );
    run_supervisor(sup, 150).await;

    // Exactly one closure reply across many cycles.
    assert_eq!(
        chatgpt.submissions(),
        vec![reply_wrapper("Ghost", "Error - target not found")]
    );
}

#[tokio::test]
async fn directives_route_while_turn_is_still_generating() {
    let chatgpt = ScriptedSurface::new("ChatGPT");
    let gemini = ScriptedSurface::new("Gemini");
    // The directive is fully rendered but the turn never settles.
    chatgpt.push_frame(
        format!("drafting...\n{}", directive("Gemini", "ping")),
        true,
    );
    gemini.push_frame("", false);
    gemini.push_frames("pong", false, 2);

    let provider = ScriptedProvider::new();
    provider.register(chatgpt.clone());
    provider.register(gemini.clone());
    let channel = InMemoryChannel::new();

    let sup = Supervisor::new(
        fast_config(&["ChatGPT", "Gemini"]),
        provider,
        channel.clone(),
    );
    run_supervisor(sup, 200).await;

    // Routed from the raw snapshot without waiting for the debounce.
    assert_eq!(gemini.submissions(), vec!["ping"]);
    // The generating origin never published.
    assert!(channel
        .writes()
        .iter()
        .all(|w| !w.starts_with("ChatGPT:")));
}

#[tokio::test]
async fn recovery_preserves_processed_ledger() {
    let chatgpt = ScriptedSurface::new("ChatGPT");
    let gemini = ScriptedSurface::new("Gemini");
    chatgpt.push_frame(directive("Gemini", "ping"), false);
    gemini.push_frame("", false);
    // The router's first baseline read finds the session gone.
    gemini.fail_next_read(SurfaceError::Unreachable("session lost".into()));

    let provider = ScriptedProvider::new();
    provider.register(chatgpt.clone());
    provider.register(gemini.clone());
    let channel = InMemoryChannel::new();

    let sup = Supervisor::new(
        fast_config(&["ChatGPT", "Gemini"]),
        provider.clone(),
        channel,
    );
    let sup = run_supervisor(sup, 200).await;

    // Recovery re-opened every surface at least once beyond startup.
    let opens = provider.open_log();
    assert!(opens.len() >= 4, "open log: {opens:?}");

    // The origin got its closure before the crash was handled.
    assert_eq!(
        chatgpt.submissions(),
        vec![reply_wrapper("Gemini", "Error - submission failed")]
    );

    // The ledger survived recovery: the directive is still marked and
    // was never re-dispatched to the target.
    assert!(sup
        .processed("ChatGPT")
        .unwrap()
        .contains(&directive("Gemini", "ping")));
    assert!(gemini.submissions().is_empty());
}

#[tokio::test]
async fn unreachable_flag_triggers_recovery() {
    let gemini = ScriptedSurface::new("Gemini");
    gemini.push_frame("", false);
    // Reads keep succeeding, but the host session is gone.
    gemini.set_reachable(false);

    let provider = ScriptedProvider::new();
    provider.register(gemini.clone());

    let sup = Supervisor::new(
        fast_config(&["Gemini"]),
        provider.clone(),
        InMemoryChannel::new(),
    );
    run_supervisor(sup, 150).await;

    // The flag alone must force teardown and re-open, without any
    // surface operation ever failing.
    let opens = provider.open_log();
    assert!(opens.len() >= 2, "open log: {opens:?}");
}

#[tokio::test]
async fn shutdown_after_inflight_directive_closes_and_defers_rest() {
    let chatgpt = ScriptedSurface::new("ChatGPT");
    let gemini = ScriptedSurface::new("Gemini");
    let deepseek = ScriptedSurface::new("Deepseek");
    let turn = format!(
        "{}\n{}",
        directive("Gemini", "ping"),
        directive("Deepseek", "ping too")
    );
    chatgpt.push_frame(&turn, false);
    // Gemini's reply stays in flight long enough for shutdown to land
    // mid-route.
    gemini.push_frame("", false);
    gemini.push_frames("drafting", true, 10);
    gemini.push_frames("pong", false, 2);

    let provider = ScriptedProvider::new();
    provider.register(chatgpt.clone());
    provider.register(gemini.clone());
    provider.register(deepseek.clone());

    let mut cfg = fast_config(&["ChatGPT", "Gemini", "Deepseek"]);
    cfg.routing.reply_poll_ms = 10;

    let mut sup = Supervisor::new(cfg, provider, InMemoryChannel::new());
    let shutdown = ShutdownSignal::new();
    let sd = shutdown.clone();
    let handle = tokio::spawn(async move { sup.run(sd).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("supervisor did not stop after in-flight route")
        .unwrap()
        .unwrap();

    // The in-flight route finished as a unit: payload over, closure
    // back.
    assert_eq!(gemini.submissions(), vec!["ping"]);
    assert_eq!(chatgpt.submissions(), vec![reply_wrapper("Gemini", "pong")]);
    // The second directive was deferred, not half-routed.
    assert!(deepseek.submissions().is_empty());
}

#[tokio::test]
async fn external_trigger_dispatches_once_and_reply_publishes() {
    let gemini = ScriptedSurface::new("Gemini");
    gemini.push_frame("The summary.", false);

    let provider = ScriptedProvider::new();
    provider.register(gemini.clone());
    let channel = InMemoryChannel::new();
    channel.set("[ Conversation till Gemini's last message : summarize the thread ]");

    let sup = Supervisor::new(fast_config(&["Gemini"]), provider, channel.clone());
    run_supervisor(sup, 150).await;

    // One dispatch per channel edit, not per poll cycle.
    assert_eq!(gemini.submissions(), vec!["summarize the thread"]);
    assert!(channel.writes().contains(&"Gemini: The summary.".to_string()));
}

#[tokio::test]
async fn trigger_to_unknown_agent_writes_closure_to_channel() {
    let gemini = ScriptedSurface::new("Gemini");
    // Keep Gemini quiet so the only channel write is the closure.
    gemini.push_frame("", false);

    let provider = ScriptedProvider::new();
    provider.register(gemini.clone());
    let channel = InMemoryChannel::new();
    channel.set("[ Conversation till Bogus's last message : hello? ]");

    let sup = Supervisor::new(fast_config(&["Gemini"]), provider, channel.clone());
    run_supervisor(sup, 150).await;

    assert!(gemini.submissions().is_empty());
    assert_eq!(
        channel.writes(),
        vec![reply_wrapper("Bogus", "Error - target not found")]
    );
}

#[tokio::test]
async fn shutdown_during_startup_delay_is_prompt() {
    let provider = ScriptedProvider::new();
    provider.register(ScriptedSurface::new("Gemini"));

    let mut cfg = fast_config(&["Gemini"]);
    cfg.supervisor.startup_delay_ms = 60_000;

    let mut sup = Supervisor::new(cfg, provider, InMemoryChannel::new());
    let shutdown = ShutdownSignal::new();
    let sd = shutdown.clone();
    let handle = tokio::spawn(async move { sup.run(sd).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.trigger();

    let result = tokio::time::timeout(Duration::from_millis(500), handle).await;
    assert!(result.is_ok(), "supervisor did not stop promptly");
}
