//! HTTP trigger surface.
//!
//! Exposes the orchestrator's workflows so an external scheduler, a hospital
//! dashboard or a donor app can start them.
//!
//! # Endpoints
//!
//! - `GET  /health`      — liveness probe
//! - `POST /triggers/*`  — event-driven workflows
//! - `POST /transfers/*` — transfer decisions and the stock sweep
//! - the periodic workflows under `/monitor`, `/emergencies`, `/routes` and
//!   `/shortages`

pub mod routes;

pub use routes::{app_router, AppState};
