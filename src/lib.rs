pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod lies;
pub mod metrics;
pub mod replay;
pub mod session;
pub mod stats;
pub mod store;
pub mod timer;
