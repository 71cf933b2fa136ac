pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod models;
pub mod mutations;
pub mod query;
pub mod scheduler;
pub mod validators;
