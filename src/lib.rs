pub mod aggregate;
pub mod app;
pub mod catalogue;
pub mod config;
pub mod domain;
pub mod error;
pub mod license;
pub mod output;
pub mod pacing;
pub mod providers;
