//! Ping metric families: round-trip histogram plus sent/received gauges.

use crate::registry::{GaugeVec, HistogramVec, Registry, RegistryError};

/// Round-trip latency histogram, in seconds.
pub const RTT_HISTOGRAM: &str = "ping_rtt_histogram_seconds";
/// Packets sent by a prober, as last reported on a reply.
pub const PACKETS_SENT: &str = "ping_packets_sent";
/// Packets received by a prober.
pub const PACKETS_RECEIVED: &str = "ping_packets_srec";
/// The only label carried by ping series.
pub const HOST_LABEL: &str = "host";

/// Latency bucket upper bounds in seconds. Not exactly a doubling, but covers
/// a reasonable spread of latencies.
pub const RTT_BUCKETS: [f64; 10] = [0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Handles to the ping metric families, shared by every prober.
#[derive(Debug, Clone)]
pub struct PingMetrics {
    rtt: HistogramVec,
    sent: GaugeVec,
    received: GaugeVec,
}

impl PingMetrics {
    /// Register the ping families in `registry`.
    ///
    /// Fails if any of the names is already taken; callers treat that as fatal.
    pub fn register(registry: &Registry) -> Result<Self, RegistryError> {
        let rtt = registry.register_histogram(
            RTT_HISTOGRAM,
            "ping rtt latency distribution.",
            &[HOST_LABEL],
            &RTT_BUCKETS,
        )?;
        let sent = registry.register_gauge(PACKETS_SENT, "packets sent by pinger", &[HOST_LABEL])?;
        let received =
            registry.register_gauge(PACKETS_RECEIVED, "packets received by pinger", &[HOST_LABEL])?;

        Ok(Self {
            rtt,
            sent,
            received,
        })
    }

    pub fn observe_latency(&self, host: &str, seconds: f64) {
        self.rtt.observe(&[host], seconds);
    }

    pub fn set_sent_count(&self, host: &str, value: u64) {
        self.sent.set(&[host], value as f64);
    }

    pub fn set_received_count(&self, host: &str, value: u64) {
        self.received.set(&[host], value as f64);
    }
}
