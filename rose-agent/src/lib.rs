// ABOUTME: Collaborator abstractions for the rose message relay.
// ABOUTME: Agent directory, inference, ticket source and audit event traits with HTTP, stdio and fake implementations.

pub mod backends;
pub mod testing;
pub mod traits;
pub mod types;

pub use traits::{AgentDirectory, EventSink, InferenceBackend, TicketSource};
pub use types::{Agent, ChatTurn, Role, Ticket, TicketStatus};
