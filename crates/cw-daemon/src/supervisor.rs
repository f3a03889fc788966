//! The poll loop that keeps the bus alive.
//!
//! Each cycle the supervisor:
//!
//! 1. Checks the shared channel for an externally written trigger and
//!    dispatches it to its target.
//! 2. Observes every agent surface once (snapshot + generation flag),
//!    scans the raw snapshot for new directives, and routes each one
//!    sequentially.
//! 3. Feeds the observation to the agent's stability tracker and, when
//!    a turn settles, publishes the stripped public text to the
//!    channel as `Name: text`.
//!
//! Scanning happens on every snapshot, settled or not, so a directive
//! is picked up as soon as it is fully rendered instead of waiting for
//! the whole turn to debounce.
//!
//! An unreachable surface anywhere in the cycle triggers recovery: all
//! surfaces are torn down, the loop pauses, and surfaces are re-opened
//! through the provider until that succeeds. Stability trackers reset
//! across recovery (the re-opened surfaces start blank) but the
//! processed ledgers survive, so directives handled before the crash
//! are never dispatched twice.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use cw_core::config::Config;
use cw_core::shutdown::ShutdownSignal;
use cw_core::types::ObservedText;
use cw_routing::directive::reply_wrapper;
use cw_routing::router::RoutingConfig;
use cw_routing::{DirectiveParser, ProcessedSet, Router, StabilityTracker};
use cw_surface::retry::{with_retry, RetryPolicy};
use cw_surface::traits::{AgentSurface, SurfaceProvider, TriggerChannel};
use cw_surface::{Result, SurfaceError};

// ---------------------------------------------------------------------------
// CycleReport
// ---------------------------------------------------------------------------

/// What one poll cycle accomplished.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleReport {
    pub triggers_dispatched: usize,
    pub directives_routed: usize,
    pub turns_published: usize,
}

impl CycleReport {
    fn is_quiet(&self) -> bool {
        self.triggers_dispatched == 0 && self.directives_routed == 0 && self.turns_published == 0
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    config: Config,
    provider: Arc<dyn SurfaceProvider>,
    channel: Arc<dyn TriggerChannel>,
    parser: DirectiveParser,
    router: Router,
    retry: RetryPolicy,
    surfaces: HashMap<String, Arc<dyn AgentSurface>>,
    trackers: HashMap<String, StabilityTracker>,
    processed: HashMap<String, ProcessedSet>,
    /// Last public text published per agent, to publish each settled
    /// turn once.
    last_published: HashMap<String, String>,
    /// Channel content as of our last dispatch or write, so external
    /// edits are detected by comparison.
    last_channel: String,
}

impl Supervisor {
    pub fn new(
        config: Config,
        provider: Arc<dyn SurfaceProvider>,
        channel: Arc<dyn TriggerChannel>,
    ) -> Self {
        let parser = DirectiveParser::new(config.agents.names.iter().cloned());
        let retry = RetryPolicy::new(
            config.retry.max_attempts,
            std::time::Duration::from_millis(config.retry.backoff_ms),
        );
        let router = Router::new(
            RoutingConfig {
                reply_timeout: config.routing.reply_timeout(),
                reply_poll: config.routing.reply_poll(),
            },
            retry,
        );
        Self {
            config,
            provider,
            channel,
            parser,
            router,
            retry,
            surfaces: HashMap::new(),
            trackers: HashMap::new(),
            processed: HashMap::new(),
            last_published: HashMap::new(),
            last_channel: String::new(),
        }
    }

    /// Processed ledger for one agent, if surfaces have been opened.
    pub fn processed(&self, agent: &str) -> Option<&ProcessedSet> {
        self.processed.get(agent)
    }

    /// Run until shutdown. Surfaces are opened first, then the loop
    /// starts after the configured startup delay.
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> Result<()> {
        self.open_surfaces().await?;
        info!(
            agents = self.config.agents.names.len(),
            poll_ms = self.config.supervisor.poll_interval_ms,
            "supervisor started"
        );

        let mut rx = shutdown.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(self.config.supervisor.startup_delay()) => {}
            _ = rx.recv() => {
                info!("shutdown during startup delay");
                return Ok(());
            }
        }

        loop {
            if shutdown.is_shutting_down() {
                break;
            }
            match self.cycle(&shutdown).await {
                Ok(report) if report.is_quiet() => {}
                Ok(report) => {
                    debug!(
                        triggers = report.triggers_dispatched,
                        routed = report.directives_routed,
                        published = report.turns_published,
                        "cycle complete"
                    );
                }
                Err(e) if e.is_unreachable() => {
                    error!(error = %e, "surface unreachable, entering recovery");
                    self.recover(&shutdown).await;
                }
                Err(e) => {
                    warn!(error = %e, "cycle failed, will retry next poll");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.supervisor.poll_interval()) => {}
                _ = rx.recv() => break,
            }
        }

        info!("supervisor stopped");
        Ok(())
    }

    async fn open_surfaces(&mut self) -> Result<()> {
        let mut surfaces = HashMap::new();
        for name in &self.config.agents.names {
            let surface = self.provider.open(name).await?;
            surfaces.insert(name.clone(), surface);
        }
        self.surfaces = surfaces;
        for name in &self.config.agents.names {
            self.trackers.insert(name.clone(), StabilityTracker::new());
            self.processed.entry(name.clone()).or_default();
        }
        Ok(())
    }

    /// Tear everything down, pause, and re-open surfaces until that
    /// succeeds or shutdown is requested. Processed ledgers and publish
    /// dedup survive; trackers start fresh.
    async fn recover(&mut self, shutdown: &ShutdownSignal) {
        self.surfaces.clear();
        loop {
            if shutdown.is_shutting_down() {
                return;
            }
            tokio::time::sleep(self.config.recovery.pause()).await;
            match self.open_surfaces().await {
                Ok(()) => {
                    info!("surfaces re-opened, resuming");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "re-open failed, pausing again");
                }
            }
        }
    }

    /// One full pass: trigger channel, then every agent in configured
    /// order. Returns an unreachable error to the caller for recovery;
    /// lesser failures are logged and skipped.
    async fn cycle(&mut self, shutdown: &ShutdownSignal) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        self.check_trigger(&mut report).await?;

        for name in self.config.agents.names.clone() {
            let Some(surface) = self.surfaces.get(&name).cloned() else {
                continue;
            };

            // A surface can keep answering reads after its host session
            // is gone; the reachability flag is authoritative.
            if !surface.is_reachable().await {
                return Err(SurfaceError::Unreachable(format!(
                    "surface for {name} reports unreachable"
                )));
            }

            let text = match with_retry(&self.retry, "observe_rendered", || {
                surface.read_rendered()
            })
            .await
            {
                Ok(text) => text,
                Err(e) if e.is_unreachable() => return Err(e),
                Err(e) => {
                    warn!(agent = %name, error = %e, "snapshot failed, skipping agent");
                    continue;
                }
            };
            let generating = match with_retry(&self.retry, "observe_generating", || {
                surface.is_generating()
            })
            .await
            {
                Ok(flag) => flag,
                Err(e) if e.is_unreachable() => return Err(e),
                // Unknown flag: assume the worst so nothing settles early.
                Err(_) => true,
            };
            let obs = ObservedText::now(&name, text, generating);

            self.route_new_directives(&obs, &mut report, shutdown).await?;
            self.publish_settled_turn(&obs, &mut report).await;
        }

        Ok(report)
    }

    /// Dispatch an externally written trigger, at most once per channel
    /// edit.
    async fn check_trigger(&mut self, report: &mut CycleReport) -> Result<()> {
        let content = match self.channel.read().await {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "channel read failed, skipping trigger check");
                return Ok(());
            }
        };
        if content == self.last_channel || content.is_empty() {
            return Ok(());
        }
        self.last_channel = content.clone();

        let Some(trigger) = self.parser.parse_trigger(&content) else {
            return Ok(());
        };

        let Some(target) = self.surfaces.get(&trigger.target).cloned() else {
            warn!(target = %trigger.target, "trigger addressed to unknown agent");
            let closure = reply_wrapper(&trigger.target, "Error - target not found");
            self.write_channel(&closure).await;
            return Ok(());
        };

        info!(target = %trigger.target, "dispatching external trigger");
        match with_retry(&self.retry, "dispatch_trigger", || {
            target.submit(&trigger.payload)
        })
        .await
        {
            Ok(()) => {
                // Fresh debounce so the target's reply registers as a
                // new settled turn and gets published.
                if let Some(tracker) = self.trackers.get_mut(&trigger.target) {
                    tracker.reset();
                }
                report.triggers_dispatched += 1;
                Ok(())
            }
            Err(e) if e.is_unreachable() => Err(e),
            Err(e) => {
                warn!(target = %trigger.target, error = %e, "trigger dispatch failed");
                Ok(())
            }
        }
    }

    /// Scan one snapshot and route everything new, marking each raw
    /// segment processed before its dispatch.
    ///
    /// Shutdown is observed between directives, never inside one: an
    /// in-flight route always finishes with its closure reply, and
    /// anything still unrouted stays unmarked for a later run.
    async fn route_new_directives(
        &mut self,
        obs: &ObservedText,
        report: &mut CycleReport,
        shutdown: &ShutdownSignal,
    ) -> Result<()> {
        let found = match self.processed.get(&obs.agent) {
            Some(processed) => self.parser.scan(&obs.text, processed),
            None => return Ok(()),
        };

        for directive in found {
            let Some(processed) = self.processed.get_mut(&obs.agent) else {
                return Ok(());
            };
            // Mark first: even if routing dies mid-flight, the request
            // must never fire twice.
            processed.mark(directive.raw.clone());
            let route = self
                .router
                .route(&obs.agent, &directive, &self.surfaces, processed)
                .await?;
            debug!(
                origin = %route.origin,
                target = %route.target,
                outcome = ?route.outcome,
                "directive routed"
            );
            report.directives_routed += 1;

            if shutdown.is_shutting_down() {
                info!(origin = %obs.agent, "shutdown requested, deferring remaining directives");
                break;
            }
        }
        Ok(())
    }

    /// Publish the stripped public text of a newly settled turn.
    async fn publish_settled_turn(&mut self, obs: &ObservedText, report: &mut CycleReport) {
        let settled = {
            let Some(tracker) = self.trackers.get_mut(&obs.agent) else {
                return;
            };
            tracker
                .observe(&obs.text, obs.generating)
                .stable_text()
                .map(str::to_string)
        };
        let Some(settled) = settled else {
            return;
        };

        let public = self.parser.strip(&settled);
        if public.is_empty() {
            return;
        }
        if self.last_published.get(&obs.agent) == Some(&public) {
            return;
        }

        info!(agent = %obs.agent, bytes = public.len(), "publishing settled turn");
        let line = format!("{}: {}", obs.agent, public);
        self.write_channel(&line).await;
        self.last_published.insert(obs.agent.clone(), public);
        report.turns_published += 1;
    }

    async fn write_channel(&mut self, text: &str) {
        match self.channel.write(text).await {
            Ok(()) => {
                // Our own writes are not external edits.
                self.last_channel = text.to_string();
            }
            Err(e) => {
                warn!(error = %e, "channel write failed");
            }
        }
    }
}
