//! # TaskMaster
//!
//! An AI-assisted to-do list backed by Supabase.
//!
//! This library provides:
//! - A session manager that tracks the signed-in identity and keeps its
//!   access token fresh
//! - A task store client that re-fetches the whole list after every write
//! - Task rewrites and suggestions through the Gemini API
//! - An HTTP API exposing all of the above
//!
//! ## Data Flow
//!
//! ```text
//!   SessionManager ──identity──▶ TodoStore ──select/insert/update/delete──▶ PostgREST
//!         │                          │
//!         ▼                          ▼
//!      GoTrue                  Gemini generateContent
//! ```
//!
//! ## Modules
//! - `session`: identity lifecycle, refresh, persisted refresh token
//! - `todo`: task types and the task store client
//! - `supabase`: auth and row access collaborators
//! - `genai`: text generation client and prompts
//! - `api`: axum routes

pub mod api;
pub mod config;
pub mod genai;
pub mod session;
pub mod settings;
pub mod supabase;
pub mod todo;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use session::{SessionManager, SessionState};
pub use todo::TodoStore;
