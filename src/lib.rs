//! Library crate for netwatch: port scanning, ping and connectivity tests.
pub mod config;
pub mod connectivity;
pub mod errors;
pub mod ping;
pub mod ports;
pub mod prober;
pub mod scanner;
pub mod server;
pub mod types;
pub mod validate;
