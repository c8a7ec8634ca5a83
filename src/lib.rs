//! Customer health scoring, historical CSV ingestion and monthly trend
//! aggregation, plus the Postgres and webhook adapters the CLI drives.

pub mod config;
pub mod db;
pub mod import;
pub mod models;
pub mod notify;
pub mod report;
pub mod scoring;
pub mod survey;
pub mod telemetry;
pub mod trend;
