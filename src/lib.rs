//! Data aggregation and view projection for the pothole detection admin
//! dashboard.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod errors;
pub mod export;
pub mod models;
pub mod projection;
pub mod query;
pub mod source;
