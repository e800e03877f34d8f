pub mod auth;
pub mod client;
pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod init;
pub mod middleware;
pub mod relay;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use core::*;
pub use errors::app_error::{AppError, AppResult};
pub use errors::auth_error::{AuthError, AuthResult};
pub use relay::SessionRegistry;
pub use state::AppState;
