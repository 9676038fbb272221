//! HTTP surface: dashboard pages plus a small JSON API.

pub mod page;
pub mod routes;

pub use routes::{create_router, ApiError, AppState};
