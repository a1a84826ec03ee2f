//! HTTP API over the validated proxy pools

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
