//! HTTP control surface for the agent core.
//!
//! # Endpoints
//!
//! - `GET  /health`             — Liveness probe
//! - `POST /chat`               — Run a message through the chat pipeline
//! - `GET  /missions/:id`       — Fetch a mission's current state
//! - `POST /cron/jobs`          — Create a scheduled job
//! - `GET  /cron/jobs`          — List scheduled jobs
//! - `DELETE /cron/jobs/:id`    — Delete a scheduled job

pub mod routes;

pub use routes::{app_router, AppState};
