//! Thin `axum` HTTP API façade over `kala-core`'s `JobCache`.

pub mod auth;
pub mod daemon;
pub mod routes;

pub use daemon::serve;
pub use routes::{router, AppState};
