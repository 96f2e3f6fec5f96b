//! Dermalens API server library.
//!
//! Exposes config, state, error handling, middleware and routes so the
//! integration tests and the binary entrypoint build the same application.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod state;
