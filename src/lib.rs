pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pricing;
pub mod resolver;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod tracker;
