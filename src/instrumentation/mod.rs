//! Request instrumentation
//!
//! - [`sanitizer`]: collapses id-like path segments to a placeholder
//! - [`timer`]: monotonic start marks and elapsed time
//! - [`lifecycle`]: one-shot completion hooks per request
//! - [`point`]: metric points for each backend style
//! - [`middleware`]: the tower layer tying it all together

pub mod lifecycle;
pub mod middleware;
pub mod point;
pub mod sanitizer;
pub mod timer;

pub use lifecycle::{
    CompletionHandle, CompletionListener, CompletionOutcome, LifecycleState, RequestObservation,
    Terminal,
};
pub use middleware::{
    Instrumentation, InstrumentationLayer, InstrumentationService, InstrumentedBody,
};
pub use point::{Dimensions, MetricKind, MetricPoint, PointBuilder};
pub use sanitizer::{PathSanitizer, ID_PLACEHOLDER};
pub use timer::{Mark, RequestTimer};
