//! HTTP API module for health, metrics, status and opportunity endpoints.

pub mod handlers;
pub mod routes;

pub use handlers::{AppState, BotStatus, OpportunityView};
pub use routes::create_router;
