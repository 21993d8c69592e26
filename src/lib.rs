//! Library crate for nmap-ollama-dashboard: scan execution, nmap XML
//! normalization, TOON payload encoding, model analysis and the per-client
//! session pipeline behind the web dashboard.
pub mod analysis;
pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod scanner;
pub mod server;
pub mod session;
pub mod toon;
pub mod types;
