//! HTTP API.
//!
//! A JSON surface over the process-wide session and task list. Routes under
//! `/api/todos` and `/api/suggestion` require a signed-in session; everything
//! else is public.

mod auth;
mod routes;
mod settings;
mod todos;
mod types;

pub use routes::{build_router, serve, AppState};
pub use types::*;
