//! Request-pipeline interceptors for axum services.
//!
//! The pipeline runs in a fixed order for every protected route:
//!
//! ```text
//! Trace → Credential → Identity → Access → Audit → Handler
//! ```
//!
//! Each stage lives in [`middleware`] and talks to the outside world only through the
//! narrow interfaces in [`services`] (cache, permission store, audit store).
pub mod api;
pub mod app;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod services;
pub mod state;
