//! Prober supervisor: one task per target, shared shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::metrics::PingMetrics;
use crate::prober::Prober;
use crate::transport::EchoTransport;

/// Starts and owns the prober tasks.
///
/// Probers are never restarted: a prober that fails to start stays down, and
/// the others keep running.
pub struct ProberSupervisor {
    transport: Arc<dyn EchoTransport>,
    metrics: PingMetrics,
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProberSupervisor {
    pub fn new(transport: Arc<dyn EchoTransport>, metrics: PingMetrics, interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            transport,
            metrics,
            interval,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Start one prober per target and return without waiting on them.
    ///
    /// Duplicate targets get independent probers reporting under the same host.
    pub fn launch_all<S: AsRef<str>>(&mut self, targets: &[S]) -> usize {
        if targets.is_empty() {
            warn!("No targets to probe");
            return 0;
        }

        for target in targets {
            let target = target.as_ref().to_string();
            let prober = Prober::new(
                target.clone(),
                self.transport.clone(),
                self.metrics.clone(),
                self.interval,
            );
            let shutdown = self.shutdown_tx.subscribe();

            self.tasks.push(tokio::spawn(async move {
                match prober.run(shutdown).await {
                    Ok(counters) => {
                        info!(
                            host = %target,
                            sent = counters.sent,
                            received = counters.received,
                            "Prober stopped"
                        );
                    }
                    Err(e) => {
                        error!(host = %target, error = %e, "Prober failed to start");
                    }
                }
            }));
        }

        info!(probers = targets.len(), "Probers launched");
        targets.len()
    }

    /// Receiver that flips to `true` when [`shutdown`](Self::shutdown) is called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Number of probers launched so far.
    pub fn launched(&self) -> usize {
        self.tasks.len()
    }

    /// Number of prober tasks that have not finished.
    pub fn running(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Signal every prober to stop and wait up to `grace` for them.
    ///
    /// Tasks still alive after the grace period are aborted.
    pub async fn shutdown(mut self, grace: Duration) {
        self.shutdown_tx.send_replace(true);

        let mut tasks = std::mem::take(&mut self.tasks);
        let joined = tokio::time::timeout(grace, async {
            for task in tasks.iter_mut() {
                let _ = task.await;
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Probers did not stop in time, aborting"
            );
            for task in &tasks {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{PACKETS_RECEIVED, PACKETS_SENT};
    use crate::registry::Registry;
    use crate::transport::mock::{MockTransport, Script};
    use std::net::{IpAddr, Ipv4Addr};

    fn answer(addr: [u8; 4], replies: usize) -> Script {
        Script::Answer {
            addr: IpAddr::V4(Ipv4Addr::from(addr)),
            rtt: Duration::from_millis(12),
            replies,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_all_isolates_failures() {
        let transport = Arc::new(
            MockTransport::default()
                .with("8.8.8.8", answer([8, 8, 8, 8], 3))
                .with("1.1.1.1", answer([1, 1, 1, 1], 3))
                .with("nowhere.invalid", Script::Unresolvable),
        );
        let registry = Registry::new();
        let metrics = PingMetrics::register(&registry).unwrap();
        let mut supervisor = ProberSupervisor::new(transport, metrics, Duration::from_secs(1));

        let launched = supervisor.launch_all(&["8.8.8.8", "nowhere.invalid", "1.1.1.1"]);
        assert_eq!(launched, 3);

        tokio::time::sleep(Duration::from_secs(5)).await;

        // The failed prober is gone, the other two are still probing.
        assert_eq!(supervisor.launched(), 3);
        assert_eq!(supervisor.running(), 2);

        let snapshot = registry.snapshot();
        for host in ["8.8.8.8", "1.1.1.1"] {
            for family in [PACKETS_SENT, PACKETS_RECEIVED] {
                let value = snapshot
                    .family(family)
                    .and_then(|f| f.series(&[host]))
                    .and_then(|s| s.value.as_gauge());
                assert_eq!(value, Some(3.0), "{} for {}", family, host);
            }
        }
        assert_eq!(snapshot.family(PACKETS_SENT).unwrap().series.len(), 2);

        supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_targets_share_a_label() {
        let transport = Arc::new(MockTransport::default().with("9.9.9.9", answer([9, 9, 9, 9], 2)));
        let registry = Registry::new();
        let metrics = PingMetrics::register(&registry).unwrap();
        let mut supervisor = ProberSupervisor::new(transport, metrics, Duration::from_secs(1));

        supervisor.launch_all(&["9.9.9.9", "9.9.9.9"]);
        tokio::time::sleep(Duration::from_secs(3)).await;

        let snapshot = registry.snapshot();
        let histogram = snapshot
            .family(crate::metrics::RTT_HISTOGRAM)
            .and_then(|f| f.series(&["9.9.9.9"]))
            .and_then(|s| s.value.as_histogram())
            .unwrap();
        assert_eq!(histogram.count, 4);

        supervisor.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_probers() {
        let transport = Arc::new(
            MockTransport::default()
                .with("10.0.0.1", answer([10, 0, 0, 1], 100))
                .with("10.0.0.2", answer([10, 0, 0, 2], 100)),
        );
        let sent_log = transport.sent.clone();
        let registry = Registry::new();
        let metrics = PingMetrics::register(&registry).unwrap();
        let mut supervisor = ProberSupervisor::new(transport, metrics, Duration::from_millis(100));
        let mut signal = supervisor.shutdown_signal();

        supervisor.launch_all(&["10.0.0.1", "10.0.0.2"]);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(supervisor.running(), 2);

        supervisor.shutdown(Duration::from_secs(1)).await;

        signal.changed().await.unwrap();
        assert!(*signal.borrow());

        let sent_at_shutdown = sent_log.lock().clone();
        assert_eq!(sent_at_shutdown["10.0.0.1"].len(), 4);
        assert_eq!(sent_at_shutdown["10.0.0.2"].len(), 4);

        // Several intervals later, nothing new went out.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*sent_log.lock(), sent_at_shutdown);
    }

    #[tokio::test]
    async fn test_launch_all_empty() {
        let registry = Registry::new();
        let metrics = PingMetrics::register(&registry).unwrap();
        let mut supervisor = ProberSupervisor::new(
            Arc::new(MockTransport::default()),
            metrics,
            Duration::from_secs(1),
        );

        let targets: [&str; 0] = [];
        assert_eq!(supervisor.launch_all(&targets), 0);
        assert_eq!(supervisor.running(), 0);
    }
}
