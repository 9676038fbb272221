//! Coronaboard
//!
//! COVID-19 case dashboard: pulls the CSSE global time series, derives active
//! cases, daily deltas and a reproduction-rate proxy per region, and serves
//! them as inline SVG charts. The binary in `main.rs` wires these modules to an
//! axum server; tests use them directly.

pub mod api;
pub mod charts;
pub mod dates;
pub mod middleware;
pub mod models;
pub mod scrapers;
pub mod signals;
pub mod store;

pub use api::{create_router, AppState};
pub use models::Config;
pub use store::SeriesStore;
