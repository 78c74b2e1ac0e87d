// Library entry point for tests and the binary

pub mod api_docs;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod setup;
pub mod usage_events;

pub use app::AppState;
