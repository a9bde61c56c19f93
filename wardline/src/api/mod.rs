//! HTTP and WebSocket surface

pub mod auth;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod ws;

pub use auth::{Claims, JwtAuth};
pub use server::ApiServer;
