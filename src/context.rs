// ABOUTME: Application context built once at startup and shared by server, dispatch loop and relay
// ABOUTME: Holds the queue, assignment store and the four collaborator handles

use anyhow::{Context, Result};
use rose_agent::backends::{AgentManagerClient, ControlPanelEvents, NoopEvents, TicketManagerClient};
use rose_agent::{AgentDirectory, EventSink, InferenceBackend, TicketSource};
use rose_core::{ChannelAssignmentStore, Config, QueueService, SessionStore};
use std::sync::Arc;

/// The external capabilities the relay depends on
#[derive(Clone)]
pub struct Collaborators {
    pub agents: Arc<dyn AgentDirectory>,
    pub inference: Arc<dyn InferenceBackend>,
    pub tickets: Arc<dyn TicketSource>,
    pub events: Arc<dyn EventSink>,
}

impl Collaborators {
    /// HTTP clients (and the configured inference transport) from config
    pub fn from_config(config: &Config) -> Result<Self> {
        let agents = AgentManagerClient::new(
            &config.collaborators.agentmanager_url,
            config.inference.timeout(),
        )?;
        let inference = config
            .inference
            .build(config.inference_base_url())
            .context("Failed to build inference backend")?;
        let tickets = TicketManagerClient::new(&config.collaborators.ticketmanager_url);
        let events: Arc<dyn EventSink> = match &config.collaborators.control_panel_url {
            Some(url) => Arc::new(ControlPanelEvents::new(url)),
            None => Arc::new(NoopEvents),
        };

        Ok(Self {
            agents: Arc::new(agents),
            inference,
            tickets: Arc::new(tickets),
            events,
        })
    }
}

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub queue: QueueService,
    pub assignments: ChannelAssignmentStore,
    pub agents: Arc<dyn AgentDirectory>,
    pub inference: Arc<dyn InferenceBackend>,
    pub tickets: Arc<dyn TicketSource>,
    pub events: Arc<dyn EventSink>,
}

impl AppContext {
    /// Wire a context around an opened store. Creates the assignment table and seeds
    /// it from `[[relay.assignments]]`.
    pub fn new(config: Config, store: SessionStore, collaborators: Collaborators) -> Result<Self> {
        let assignments = ChannelAssignmentStore::new(store.db_connection());
        assignments
            .initialize_schema()
            .context("Failed to create channel assignment table")?;

        for seed in &config.relay.assignments {
            assignments
                .upsert(&seed.community_id, &seed.channel_id, &seed.agent_id)
                .with_context(|| {
                    format!(
                        "Failed to seed assignment for {}/{}",
                        seed.community_id, seed.channel_id
                    )
                })?;
        }

        Ok(Self {
            config: Arc::new(config),
            queue: QueueService::new(store),
            assignments,
            agents: collaborators.agents,
            inference: collaborators.inference,
            tickets: collaborators.tickets,
            events: collaborators.events,
        })
    }

    /// Open the configured database and build real collaborator clients
    pub fn from_config(config: Config) -> Result<Self> {
        let store = SessionStore::open(&config.storage.path)
            .with_context(|| format!("Failed to open session store at {}", config.storage.path))?;
        let collaborators = Collaborators::from_config(&config)?;
        Self::new(config, store, collaborators)
    }
}
