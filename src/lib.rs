// ABOUTME: Root library of the rose message relay
// ABOUTME: Dispatch loop, channel relay, gateway adapters, HTTP API and metrics over rose-core and rose-agent

pub mod context;
pub mod dispatch;
pub mod gateway;
pub mod metrics;
pub mod relay;
pub mod server;

// Re-export platform-agnostic modules from rose-core
pub use rose_core::config;
pub use rose_core::paths;
pub use rose_core::queue;
pub use rose_core::session;

pub use context::{AppContext, Collaborators};
pub use dispatch::{DispatchLoop, TickReport};
pub use relay::{ChannelRelay, InboundEvent, RelayOutcome, RelaySettings};
