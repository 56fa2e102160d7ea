pub mod bitmap;
pub mod client;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod eviction;
pub mod geo;
pub mod hyperloglog;
pub mod logging;
pub mod persistence;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod state;
pub mod users;
pub mod value;
