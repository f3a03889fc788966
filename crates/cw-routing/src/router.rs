//! One-hop private message routing.
//!
//! A directive found on an origin surface is carried to its target,
//! the target's settled reply is collected, and a wrapped reply is
//! delivered back to the origin. The hop never recurses: whatever the
//! target's reply contains is delivered verbatim, and any directives
//! inside it are picked up (or not) by the normal per-agent scan on a
//! later poll.
//!
//! Every route closes. Whatever goes wrong — unknown target, failed
//! submission, no settled reply in time — the origin still receives a
//! wrapped reply saying so, so a waiting agent is never left hanging.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use cw_surface::retry::{with_retry, RetryPolicy};
use cw_surface::traits::AgentSurface;
use cw_surface::Result;

use crate::directive::{reply_wrapper, Directive, ProcessedSet};
use crate::stability::StabilityTracker;

// ---------------------------------------------------------------------------
// Config and report
// ---------------------------------------------------------------------------

/// Timing knobs for the reply wait.
#[derive(Debug, Clone, Copy)]
pub struct RoutingConfig {
    /// How long to wait for the target's reply to settle.
    pub reply_timeout: Duration,
    /// Poll interval while waiting for the reply.
    pub reply_poll: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(300),
            reply_poll: Duration::from_secs(1),
        }
    }
}

/// How one routed directive ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOutcome {
    /// The target's settled reply was delivered back to the origin.
    Delivered,
    /// No surface is configured for the addressee.
    TargetNotFound,
    /// The payload could not be submitted to the target.
    SubmitFailed,
    /// The target produced no settled new output within the timeout.
    ReplyTimeout,
}

/// Summary of one completed route, closure reply included.
#[derive(Debug, Clone, Serialize)]
pub struct RouteReport {
    pub origin: String,
    pub target: String,
    pub outcome: RouteOutcome,
    /// The unwrapped reply text delivered to the origin.
    pub reply: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    config: RoutingConfig,
    retry: RetryPolicy,
}

impl Router {
    pub fn new(config: RoutingConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    /// Carry one directive from `origin` to its target and deliver the
    /// wrapped reply back.
    ///
    /// The reply wrapper is marked in the origin's `processed` ledger
    /// before it is submitted, so the bus never routes its own
    /// deliveries when they show up in the origin's rendered output.
    ///
    /// An unreachable surface aborts the route with an error after the
    /// closure reply has been attempted; the caller is expected to run
    /// recovery and must not retry the directive (it is already marked
    /// processed by the caller before this is invoked).
    pub async fn route(
        &self,
        origin: &str,
        directive: &Directive,
        surfaces: &HashMap<String, Arc<dyn AgentSurface>>,
        processed: &mut ProcessedSet,
    ) -> Result<RouteReport> {
        info!(origin, target = %directive.target, "routing private message");

        let Some(target) = surfaces.get(&directive.target) else {
            warn!(origin, target = %directive.target, "directive addressed to unknown agent");
            return self
                .close(
                    origin,
                    directive,
                    surfaces,
                    processed,
                    RouteOutcome::TargetNotFound,
                    "Error - target not found",
                )
                .await;
        };

        // Snapshot the target's current output before submitting, so a
        // previous turn sitting on the surface is never mistaken for
        // the reply.
        let baseline = match with_retry(&self.retry, "read_baseline", || target.read_rendered())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                error!(target = %directive.target, error = %e, "baseline read failed");
                let report = self
                    .close(
                        origin,
                        directive,
                        surfaces,
                        processed,
                        RouteOutcome::SubmitFailed,
                        "Error - submission failed",
                    )
                    .await;
                return if e.is_unreachable() { Err(e) } else { report };
            }
        };

        if let Err(e) =
            with_retry(&self.retry, "submit_payload", || target.submit(&directive.payload)).await
        {
            error!(target = %directive.target, error = %e, "payload submission failed");
            let report = self
                .close(
                    origin,
                    directive,
                    surfaces,
                    processed,
                    RouteOutcome::SubmitFailed,
                    "Error - submission failed",
                )
                .await;
            return if e.is_unreachable() { Err(e) } else { report };
        }

        match self.wait_for_reply(target.as_ref(), &baseline).await {
            Ok(Some(reply)) => {
                self.close(
                    origin,
                    directive,
                    surfaces,
                    processed,
                    RouteOutcome::Delivered,
                    &reply,
                )
                .await
            }
            Ok(None) => {
                warn!(target = %directive.target, "no settled reply within timeout");
                self.close(
                    origin,
                    directive,
                    surfaces,
                    processed,
                    RouteOutcome::ReplyTimeout,
                    "Error - response timeout",
                )
                .await
            }
            Err(e) => {
                error!(target = %directive.target, error = %e, "reply wait aborted");
                let _ = self
                    .close(
                        origin,
                        directive,
                        surfaces,
                        processed,
                        RouteOutcome::ReplyTimeout,
                        "Error - response timeout",
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Poll the target until its output settles on something other
    /// than the pre-submission baseline. `Ok(None)` means timeout.
    async fn wait_for_reply(
        &self,
        target: &dyn AgentSurface,
        baseline: &str,
    ) -> Result<Option<String>> {
        let deadline = Instant::now() + self.config.reply_timeout;
        let mut tracker = StabilityTracker::new();

        loop {
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let text = match with_retry(&self.retry, "read_reply", || target.read_rendered()).await
            {
                Ok(text) => text,
                Err(e) if e.is_unreachable() => return Err(e),
                Err(e) => {
                    // Transient budget exhausted; the deadline still
                    // bounds the overall wait.
                    warn!(error = %e, "reply read failed, continuing to poll");
                    tokio::time::sleep(self.config.reply_poll).await;
                    continue;
                }
            };
            let generating =
                match with_retry(&self.retry, "poll_generating", || target.is_generating()).await {
                    Ok(flag) => flag,
                    Err(e) if e.is_unreachable() => return Err(e),
                    Err(_) => true,
                };

            if let Some(settled) = tracker.observe(&text, generating).stable_text() {
                if settled != baseline {
                    debug!(bytes = settled.len(), "reply settled");
                    return Ok(Some(settled.to_string()));
                }
                // Old turn still on the surface; keep waiting for new
                // output to appear and settle.
                tracker.reset();
            }

            tokio::time::sleep(self.config.reply_poll).await;
        }
    }

    /// Deliver the wrapped closure reply to the origin and build the
    /// report. The wrapper is marked processed before submission.
    async fn close(
        &self,
        origin: &str,
        directive: &Directive,
        surfaces: &HashMap<String, Arc<dyn AgentSurface>>,
        processed: &mut ProcessedSet,
        outcome: RouteOutcome,
        reply: &str,
    ) -> Result<RouteReport> {
        let wrapped = reply_wrapper(&directive.target, reply);
        processed.mark(wrapped.clone());

        let report = RouteReport {
            origin: origin.to_string(),
            target: directive.target.clone(),
            outcome,
            reply: reply.to_string(),
        };

        let Some(origin_surface) = surfaces.get(origin) else {
            error!(origin, "origin surface missing, dropping closure reply");
            return Ok(report);
        };

        if let Err(e) =
            with_retry(&self.retry, "deliver_reply", || origin_surface.submit(&wrapped)).await
        {
            error!(origin, error = %e, "closure reply delivery failed");
            if e.is_unreachable() {
                return Err(e);
            }
            return Ok(report);
        }

        info!(origin, target = %directive.target, outcome = ?outcome, "route closed");
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cw_surface::testing::ScriptedSurface;
    use cw_surface::SurfaceError;

    fn quick_router() -> Router {
        Router::new(
            RoutingConfig {
                reply_timeout: Duration::from_millis(200),
                reply_poll: Duration::from_millis(5),
            },
            RetryPolicy::new(3, Duration::from_millis(1)),
        )
    }

    fn directive_to(target: &str) -> Directive {
        Directive {
            target: target.to_string(),
            payload: "what is 2+2?".to_string(),
            raw: format!("[ type : private message ; for : {target} ; message : {{ what is 2+2? }} ]"),
        }
    }

    fn pair(
        origin: Arc<ScriptedSurface>,
        target: Arc<ScriptedSurface>,
    ) -> HashMap<String, Arc<dyn AgentSurface>> {
        let mut map: HashMap<String, Arc<dyn AgentSurface>> = HashMap::new();
        map.insert(origin.agent_name().to_string(), origin);
        map.insert(target.agent_name().to_string(), target);
        map
    }

    #[tokio::test]
    async fn successful_roundtrip_delivers_wrapped_reply() {
        let origin = ScriptedSurface::new("ChatGPT");
        let target = ScriptedSurface::new("Gemini");
        // Baseline read, then the reply settles over two polls.
        target.push_frame("earlier turn", false);
        target.push_frames("earlier turn\nthe answer is 4", false, 2);

        let surfaces = pair(origin.clone(), target.clone());
        let mut processed = ProcessedSet::new();

        let report = quick_router()
            .route("ChatGPT", &directive_to("Gemini"), &surfaces, &mut processed)
            .await
            .unwrap();

        assert_eq!(report.outcome, RouteOutcome::Delivered);
        assert_eq!(target.submissions(), vec!["what is 2+2?"]);

        let wrapped = reply_wrapper("Gemini", "earlier turn\nthe answer is 4");
        assert_eq!(origin.submissions(), vec![wrapped.clone()]);
        // Marked before delivery: the bus never re-routes its own reply.
        assert!(processed.contains(&wrapped));
    }

    #[tokio::test]
    async fn unknown_target_closes_with_not_found() {
        let origin = ScriptedSurface::new("ChatGPT");
        let surfaces = pair(origin.clone(), ScriptedSurface::new("Gemini"));
        let mut processed = ProcessedSet::new();

        let report = quick_router()
            .route("ChatGPT", &directive_to("Ghost"), &surfaces, &mut processed)
            .await
            .unwrap();

        assert_eq!(report.outcome, RouteOutcome::TargetNotFound);
        assert_eq!(
            origin.submissions(),
            vec![reply_wrapper("Ghost", "Error - target not found")]
        );
    }

    #[tokio::test]
    async fn stale_baseline_is_never_mistaken_for_the_reply() {
        let origin = ScriptedSurface::new("ChatGPT");
        let target = ScriptedSurface::new("Gemini");
        // Baseline, then the same old turn settles twice before new
        // output finally appears.
        target.push_frame("old turn", false);
        target.push_frames("old turn", false, 3);
        target.push_frames("old turn\nfresh reply", false, 2);

        let surfaces = pair(origin.clone(), target.clone());
        let mut processed = ProcessedSet::new();

        let report = quick_router()
            .route("ChatGPT", &directive_to("Gemini"), &surfaces, &mut processed)
            .await
            .unwrap();

        assert_eq!(report.outcome, RouteOutcome::Delivered);
        assert_eq!(report.reply, "old turn\nfresh reply");
    }

    #[tokio::test]
    async fn submission_failure_closes_with_error_reply() {
        let origin = ScriptedSurface::new("ChatGPT");
        let target = ScriptedSurface::new("Gemini");
        target.push_frame("baseline", false);
        for _ in 0..3 {
            target.fail_next_submit(SurfaceError::NotReady("input box".into()));
        }

        let surfaces = pair(origin.clone(), target);
        let mut processed = ProcessedSet::new();

        let report = quick_router()
            .route("ChatGPT", &directive_to("Gemini"), &surfaces, &mut processed)
            .await
            .unwrap();

        assert_eq!(report.outcome, RouteOutcome::SubmitFailed);
        assert_eq!(
            origin.submissions(),
            vec![reply_wrapper("Gemini", "Error - submission failed")]
        );
    }

    #[tokio::test]
    async fn generating_target_times_out_with_closure() {
        let origin = ScriptedSurface::new("ChatGPT");
        let target = ScriptedSurface::new("Gemini");
        target.push_frame("baseline", false);
        // The target never stops generating.
        target.push_frame("half a repl", true);

        let surfaces = pair(origin.clone(), target);
        let mut processed = ProcessedSet::new();

        let report = quick_router()
            .route("ChatGPT", &directive_to("Gemini"), &surfaces, &mut processed)
            .await
            .unwrap();

        assert_eq!(report.outcome, RouteOutcome::ReplyTimeout);
        assert_eq!(
            origin.submissions(),
            vec![reply_wrapper("Gemini", "Error - response timeout")]
        );
    }

    #[tokio::test]
    async fn unreachable_target_closes_then_propagates() {
        let origin = ScriptedSurface::new("ChatGPT");
        let target = ScriptedSurface::new("Gemini");
        target.fail_next_read(SurfaceError::Unreachable("session lost".into()));

        let surfaces = pair(origin.clone(), target);
        let mut processed = ProcessedSet::new();

        let result = quick_router()
            .route("ChatGPT", &directive_to("Gemini"), &surfaces, &mut processed)
            .await;

        assert!(matches!(result, Err(SurfaceError::Unreachable(_))));
        // The origin still got its closure reply before the error
        // surfaced to the caller.
        assert_eq!(
            origin.submissions(),
            vec![reply_wrapper("Gemini", "Error - submission failed")]
        );
    }
}
