//! HTTP surface.

pub mod dto;
pub mod routes;

pub use routes::{build_router, AppState};
