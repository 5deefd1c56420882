pub mod cache;
pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;
