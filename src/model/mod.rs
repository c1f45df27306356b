pub mod apperror;
pub mod config;
pub mod models;
