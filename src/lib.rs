pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod hooks;
pub mod limits;
pub mod model;
pub mod observability;
pub mod server;
pub mod store;
pub mod wal;
