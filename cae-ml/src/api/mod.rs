//! HTTP API for the worker process

pub mod health;

pub use health::health_routes;
