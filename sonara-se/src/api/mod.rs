//! HTTP API handlers
//!
//! Handlers stay thin: validate, delegate to the engine/resolver/queue,
//! wrap the result in the response envelope.

pub mod auth;
pub mod health;
pub mod recommend;
pub mod track;
