use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

// ---------------------------------------------------------------------------
// AgentSurface trait
// ---------------------------------------------------------------------------

/// One agent's observable conversation surface.
///
/// The core never assumes how a surface is implemented (browser
/// automation, file tailing, API polling). It only observes rendered
/// text plus a generation flag, and submits text back.
#[async_trait]
pub trait AgentSurface: Send + Sync {
    /// Configured name of the agent behind this surface.
    fn agent_name(&self) -> &str;

    /// Submit text into the agent's input.
    async fn submit(&self, text: &str) -> Result<()>;

    /// Read the agent's currently rendered output in full.
    async fn read_rendered(&self) -> Result<String>;

    /// Whether the surface reports an in-progress generation.
    async fn is_generating(&self) -> Result<bool>;

    /// Whether the surface (and its host session) is still alive.
    /// A `false` here sends the supervisor into recovery.
    async fn is_reachable(&self) -> bool;
}

// ---------------------------------------------------------------------------
// TriggerChannel trait
// ---------------------------------------------------------------------------

/// The shared external text channel: polled for externally issued
/// routing requests, written with each agent's redacted public output.
#[async_trait]
pub trait TriggerChannel: Send + Sync {
    /// Read the channel's current content.
    async fn read(&self) -> Result<String>;

    /// Replace the channel's content.
    async fn write(&self, text: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SurfaceProvider trait
// ---------------------------------------------------------------------------

/// Opens surfaces by agent name.
///
/// Used once at startup and again whenever recovery recreates the
/// surface set after an unreachable surface.
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn open(&self, agent: &str) -> Result<Arc<dyn AgentSurface>>;
}
