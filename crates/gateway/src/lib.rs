pub mod client;
pub mod ratelimit;
pub mod simulated;

pub use client::{GatewayConfig, RestGateway};
pub use ratelimit::{BackoffPolicy, CooldownTracker, FixedBackoff};
pub use simulated::SimulatedGateway;
