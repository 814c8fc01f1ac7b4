pub mod chart;
pub mod commands;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod forest;
pub mod http_client;
pub mod indicators;
pub mod market_data;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod scaler;
pub mod split;
