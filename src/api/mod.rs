//! HTTP API modules.

pub mod accounts;
pub mod routes;
pub mod terminal;
pub mod types;

pub use routes::serve;
