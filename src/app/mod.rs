//! Application wiring

pub mod server;
pub mod state;

pub use state::AppState;
