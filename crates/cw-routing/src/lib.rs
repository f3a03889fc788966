pub mod directive;
pub mod router;
pub mod stability;

pub use directive::{reply_wrapper, Directive, DirectiveParser, ProcessedSet};
pub use router::{RouteOutcome, RouteReport, Router};
pub use stability::{StabilityState, StabilityTracker};
