pub mod config;
pub mod error;
pub mod gateway;
pub mod meeting;
pub mod models;
pub mod routes;

use std::sync::Arc;

use config::Config;
use gateway::events::ServerEvent;
use gateway::fanout::GatewayBroadcast;
use meeting::{Meeting, MeetingHub};

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub meeting: MeetingHub,
    pub broadcast: Arc<GatewayBroadcast>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build the meeting and wire its state listener into the gateway fanout.
    pub fn new(config: Config) -> Self {
        let meeting = MeetingHub::new(Meeting::new(config.role_policy()), config.grace_period);
        let broadcast = Arc::new(GatewayBroadcast::new());

        let fanout = broadcast.clone();
        meeting.set_listener(Box::new(move |snapshot| {
            for event in ServerEvent::from_snapshot(snapshot) {
                fanout.dispatch(event);
            }
        }));

        Self {
            meeting,
            broadcast,
            config: Arc::new(config),
        }
    }
}
