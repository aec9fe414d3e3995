// ABOUTME: Platform-agnostic core of the rose message relay
// ABOUTME: Session storage with the unseen flag, queue operations, channel assignments and config

pub mod assignments;
pub mod config;
pub mod error;
pub mod paths;
pub mod queue;
pub mod session;

pub use assignments::{ChannelAssignment, ChannelAssignmentStore};
pub use config::Config;
pub use error::{Error, Result};
pub use queue::{CreatedSession, QueueService};
pub use session::{History, Message, Participant, SessionStore};
