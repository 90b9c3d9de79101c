pub mod aggregator;
pub mod clock;
pub mod credentials;
pub mod identity;
pub mod lifecycle;
pub mod rate_limiter;
pub mod session;

pub use aggregator::{Aggregator, EventStats, SlotPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::Credentials;
pub use identity::IdentityResolver;
pub use lifecycle::Lifecycle;
pub use rate_limiter::{LoginRateLimiter, RateLimitConfig};
pub use session::SessionManager;
