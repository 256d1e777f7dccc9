//! HTTP API: middleware, routes, configuration.

pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod credentials;
pub mod middleware;
