//! Per-target prober: send loop plus reply handling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::metrics::PingMetrics;
use crate::transport::{EchoAttempt, EchoReply, EchoSession, EchoTransport, ProbeError};

/// Capacity of the reply channel between a session and its prober.
const REPLY_BUFFER: usize = 256;

/// Running totals of one prober.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeCounters {
    pub sent: u64,
    pub received: u64,
}

/// Probes a single target until shutdown.
///
/// Lifecycle: a prober is created, then [`run`](Prober::run) opens the session.
/// If that fails the prober ends with the error (failed); otherwise it keeps
/// running until the shutdown signal flips and returns its final counters.
pub struct Prober {
    target: String,
    transport: Arc<dyn EchoTransport>,
    metrics: PingMetrics,
    interval: Duration,
    counters: ProbeCounters,
    next_seq: u64,
}

impl Prober {
    pub fn new(
        target: impl Into<String>,
        transport: Arc<dyn EchoTransport>,
        metrics: PingMetrics,
        interval: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            transport,
            metrics,
            interval,
            counters: ProbeCounters::default(),
            next_seq: 0,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run the send/receive loop until `shutdown` turns true.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ProbeCounters, ProbeError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(REPLY_BUFFER);
        let mut session = self.transport.open(&self.target, reply_tx).await?;

        info!(
            host = %self.target,
            addr = %session.addr(),
            interval_ms = self.interval.as_millis() as u64,
            "Prober running"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if *shutdown.borrow() {
            return Ok(self.counters);
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.send_next(session.as_mut()).await;
                }
                Some(reply) = reply_rx.recv() => {
                    self.handle_reply(reply);
                }
            }
        }

        debug!(host = %self.target, "Prober shutting down");
        Ok(self.counters)
    }

    async fn send_next(&mut self, session: &mut dyn EchoSession) {
        let attempt = EchoAttempt { seq: self.next_seq };
        session.send_echo(attempt).await;
        self.next_seq += 1;
        self.counters.sent += 1;
        trace!(host = %self.target, seq = attempt.seq, "Echo sent");
    }

    /// Fold one reply into the registry.
    ///
    /// Replies are handled independently of each other, so reordering on the
    /// network does not matter.
    fn handle_reply(&mut self, reply: EchoReply) {
        let host = reply.addr.to_string();
        trace!(
            bytes = reply.bytes,
            from = %host,
            seq = reply.seq,
            rtt_ms = reply.rtt.as_secs_f64() * 1000.0,
            "Echo reply"
        );

        self.metrics.observe_latency(&host, reply.rtt.as_secs_f64());
        self.counters.received += 1;
        self.metrics.set_sent_count(&host, self.counters.sent);
        self.metrics.set_received_count(&host, self.counters.received);
    }
}
