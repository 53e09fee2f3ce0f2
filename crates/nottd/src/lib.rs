//! Nott daemon
//!
//! Configuration, logging setup and the long-running node built on
//! `nott-dht`.

pub mod config;
pub mod item;
pub mod node;

pub use config::Config;
pub use node::Node;
