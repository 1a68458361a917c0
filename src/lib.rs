pub mod alerts;
pub mod api;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fallback;
pub mod filter;
pub mod interventions;
pub mod logging;
pub mod models;
pub mod report;
pub mod request;
pub mod risk;
pub mod rules;
pub mod stats;
pub mod upload;
