pub mod commands;
pub mod config;
pub mod repository;
pub mod sync;
