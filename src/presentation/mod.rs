pub mod config;
pub mod handlers;
pub mod state;

mod auth;
mod error;
mod router;

pub use auth::require_api_key;
pub use error::ApiError;
pub use router::create_router;
pub use state::AppState;
