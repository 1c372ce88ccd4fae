//! EKS — Enterprise Knowledge System backend.

pub mod api;
pub mod auth;
pub mod company;
pub mod config;
pub mod error;
pub mod ingest;
pub mod onboarding;
pub mod orgchart;
pub mod server;
pub mod store;
pub mod users;
