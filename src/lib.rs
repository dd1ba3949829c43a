pub mod config;
pub mod provider;
pub mod scoring;
pub mod seed;
pub mod server;
pub mod sqlite_persistence;
pub mod store;
