//! HTTP surface of the turn controller
//!
//! - GET /ws/voice?token=... - Upgrade to a voice session
//! - GET /sessions - Connected sessions and their turn state
//! - GET /sessions/:id - One session
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;
mod ws;

pub use routes::create_router;
pub use state::AppState;
