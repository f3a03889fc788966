pub mod error;
pub mod file;
pub mod retry;
pub mod testing;
pub mod traits;

pub use error::{Result, SurfaceError};
pub use retry::{with_retry, RetryPolicy};
pub use traits::{AgentSurface, SurfaceProvider, TriggerChannel};
