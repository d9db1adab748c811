pub mod auth;
pub mod config;
pub mod core;
pub mod diagnostics;
pub mod gateway;
pub mod observability;
pub mod server;
