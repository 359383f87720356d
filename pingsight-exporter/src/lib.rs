//! Continuous ICMP reachability monitor exposing Prometheus metrics.
//!
//! One prober per configured host sends an echo request every interval and
//! folds each reply into a shared metric registry. An HTTP endpoint renders
//! the registry on every scrape.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ ProberSupervisor │────>│    Registry     │<────│   HTTP Server   │
//! │ (1 task / host)  │     │ (rtt + counts)  │     │   (/metrics)    │
//! └──────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Metrics
//!
//! - `ping_rtt_histogram_seconds{host}`: round-trip latency histogram
//! - `ping_packets_sent{host}`: echo requests sent, as of the latest reply
//! - `ping_packets_srec{host}`: echo replies received
//!
//! Packet loss is the gap between the last two.
//!
//! # Usage
//!
//! ```bash
//! pingsight-exporter --target 8.8.8.8 --target 1.1.1.1
//! pingsight-exporter --config pingsight.json5
//! ```
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod exposition;
pub mod http;
pub mod metrics;
pub mod naming;
pub mod prober;
pub mod registry;
pub mod supervisor;
pub mod transport;

pub use config::ExporterConfig;
pub use http::HttpServer;
pub use metrics::PingMetrics;
pub use prober::{ProbeCounters, Prober};
pub use registry::{Registry, RegistryError, SharedRegistry};
pub use supervisor::ProberSupervisor;
pub use transport::{EchoReply, EchoTransport, IcmpTransport, ProbeError};
