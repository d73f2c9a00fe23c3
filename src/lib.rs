//! Library crate for edge-scan-rs: target expansion, probes and the streaming scan orchestrator.
pub mod config;
pub mod latency;
pub mod pool;
pub mod probe;
pub mod scanner;
pub mod server;
pub mod sink;
pub mod targets;
pub mod throughput;
pub mod types;
