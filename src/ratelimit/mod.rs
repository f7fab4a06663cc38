//! Rate limiting logic: policies, records, and the decision engine.

mod backend;
mod clock;
mod limiter;
mod policy;
mod record;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::Limiter;
pub use policy::{Algorithm, RateLimitPolicy};
pub use record::{RateLimitRecord, RateLimitResult};
