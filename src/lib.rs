pub mod analysis;
pub mod app;
pub mod config;
pub mod driver;
pub mod error;
pub mod etl;
pub mod geocode;
pub mod infra;
pub mod observability;
pub mod prompt;
