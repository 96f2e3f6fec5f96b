//! Request handlers.
//!
//! Handlers stay thin: they validate input, delegate to the pipeline or the
//! store and map failures via [`AppError`](crate::error::AppError).

pub mod admin;
pub mod inference;
