pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod job;
pub mod kill;
pub mod node;
pub mod script;
pub mod service;
pub mod shutdown;
pub mod strategy;
pub mod workdir;
