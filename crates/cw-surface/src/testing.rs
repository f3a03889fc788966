//! Scripted surface and channel doubles for driving supervisor and
//! router scenarios in tests without any real agent behind them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Result, SurfaceError};
use crate::traits::{AgentSurface, SurfaceProvider, TriggerChannel};

// ---------------------------------------------------------------------------
// ScriptedSurface
// ---------------------------------------------------------------------------

/// One scripted observation: what `read_rendered` returns and what
/// `is_generating` reports for that same poll.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub text: String,
    pub generating: bool,
}

impl Frame {
    pub fn new(text: impl Into<String>, generating: bool) -> Self {
        Self {
            text: text.into(),
            generating,
        }
    }
}

#[derive(Default)]
struct ScriptState {
    frames: VecDeque<Frame>,
    current: Frame,
    submissions: Vec<String>,
    submit_errors: VecDeque<SurfaceError>,
    read_errors: VecDeque<SurfaceError>,
}

/// An [`AgentSurface`] driven by a pre-loaded script of frames.
///
/// Each `read_rendered` call consumes the next frame (the last frame
/// repeats once the script runs out); the following `is_generating`
/// call reports that same frame's flag. Errors can be queued to fire on
/// upcoming reads/submits, and reachability can be flipped to exercise
/// the recovery path.
pub struct ScriptedSurface {
    name: String,
    state: Mutex<ScriptState>,
    reachable: AtomicBool,
}

impl ScriptedSurface {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(ScriptState::default()),
            reachable: AtomicBool::new(true),
        })
    }

    /// Append one frame to the script.
    pub fn push_frame(&self, text: impl Into<String>, generating: bool) {
        let mut state = self.state.lock().unwrap();
        state.frames.push_back(Frame::new(text, generating));
    }

    /// Append the same frame `n` times.
    pub fn push_frames(&self, text: &str, generating: bool, n: usize) {
        for _ in 0..n {
            self.push_frame(text, generating);
        }
    }

    /// Queue an error for an upcoming `read_rendered` call.
    pub fn fail_next_read(&self, err: SurfaceError) {
        self.state.lock().unwrap().read_errors.push_back(err);
    }

    /// Queue an error for an upcoming `submit` call.
    pub fn fail_next_submit(&self, err: SurfaceError) {
        self.state.lock().unwrap().submit_errors.push_back(err);
    }

    /// Flip the surface's reachability.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Everything submitted so far, in order.
    pub fn submissions(&self) -> Vec<String> {
        self.state.lock().unwrap().submissions.clone()
    }
}

#[async_trait]
impl AgentSurface for ScriptedSurface {
    fn agent_name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.submit_errors.pop_front() {
            return Err(err);
        }
        state.submissions.push(text.to_string());
        Ok(())
    }

    async fn read_rendered(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.read_errors.pop_front() {
            return Err(err);
        }
        if let Some(frame) = state.frames.pop_front() {
            state.current = frame;
        }
        Ok(state.current.text.clone())
    }

    async fn is_generating(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().current.generating)
    }

    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// InMemoryChannel
// ---------------------------------------------------------------------------

/// A [`TriggerChannel`] backed by a string in memory, recording every
/// write for assertions.
#[derive(Default)]
pub struct InMemoryChannel {
    content: Mutex<String>,
    writes: Mutex<Vec<String>>,
}

impl InMemoryChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the channel content directly (simulates an external writer).
    pub fn set(&self, text: impl Into<String>) {
        *self.content.lock().unwrap() = text.into();
    }

    /// All writes the system has made, in order.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TriggerChannel for InMemoryChannel {
    async fn read(&self) -> Result<String> {
        Ok(self.content.lock().unwrap().clone())
    }

    async fn write(&self, text: &str) -> Result<()> {
        *self.content.lock().unwrap() = text.to_string();
        self.writes.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// A [`SurfaceProvider`] serving pre-registered scripted surfaces, and
/// counting opens so recovery behavior can be asserted.
pub struct ScriptedProvider {
    surfaces: Mutex<std::collections::HashMap<String, Arc<ScriptedSurface>>>,
    opens: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            surfaces: Mutex::new(std::collections::HashMap::new()),
            opens: Mutex::new(Vec::new()),
        })
    }

    pub fn register(&self, surface: Arc<ScriptedSurface>) {
        self.surfaces
            .lock()
            .unwrap()
            .insert(surface.agent_name().to_string(), surface);
    }

    /// Agent names passed to `open`, in order (startup + each recovery).
    pub fn open_log(&self) -> Vec<String> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl SurfaceProvider for ScriptedProvider {
    async fn open(&self, agent: &str) -> Result<Arc<dyn AgentSurface>> {
        self.opens.lock().unwrap().push(agent.to_string());
        let surfaces = self.surfaces.lock().unwrap();
        surfaces
            .get(agent)
            .cloned()
            .map(|s| s as Arc<dyn AgentSurface>)
            .ok_or_else(|| SurfaceError::Unreachable(format!("no scripted surface for {agent}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_consumed_in_order_and_last_repeats() {
        let surface = ScriptedSurface::new("A");
        surface.push_frame("one", true);
        surface.push_frame("two", false);

        assert_eq!(surface.read_rendered().await.unwrap(), "one");
        assert!(surface.is_generating().await.unwrap());

        assert_eq!(surface.read_rendered().await.unwrap(), "two");
        assert!(!surface.is_generating().await.unwrap());

        // Script exhausted: last frame repeats.
        assert_eq!(surface.read_rendered().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn queued_errors_fire_once() {
        let surface = ScriptedSurface::new("A");
        surface.push_frame("text", false);
        surface.fail_next_read(SurfaceError::StaleRead("race".into()));

        assert!(surface.read_rendered().await.is_err());
        assert_eq!(surface.read_rendered().await.unwrap(), "text");
    }

    #[tokio::test]
    async fn submissions_are_recorded() {
        let surface = ScriptedSurface::new("A");
        surface.submit("hello").await.unwrap();
        surface.fail_next_submit(SurfaceError::NotReady("input".into()));
        assert!(surface.submit("dropped").await.is_err());
        surface.submit("world").await.unwrap();

        assert_eq!(surface.submissions(), vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn channel_records_writes() {
        let channel = InMemoryChannel::new();
        channel.set("external");
        assert_eq!(channel.read().await.unwrap(), "external");

        channel.write("published").await.unwrap();
        assert_eq!(channel.read().await.unwrap(), "published");
        assert_eq!(channel.writes(), vec!["published"]);
    }

    #[tokio::test]
    async fn provider_serves_registered_surfaces() {
        let provider = ScriptedProvider::new();
        provider.register(ScriptedSurface::new("A"));

        assert!(provider.open("A").await.is_ok());
        assert!(provider.open("B").await.is_err());
        assert_eq!(provider.open_log(), vec!["A", "B"]);
    }
}
