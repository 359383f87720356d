//! Integration tests for the ping exporter.
//!
//! These tests drive real prober tasks over a scripted transport and scrape
//! the result through the HTTP /metrics endpoint.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pingsight_exporter::transport::{EchoAttempt, EchoSession, ReplySink};
use pingsight_exporter::{
    EchoReply, EchoTransport, ExporterConfig, HttpServer, PingMetrics, ProbeError,
    ProberSupervisor, Registry,
};

/// Answers the first `replies` echoes of every known target, drops the rest.
struct ScriptedTransport {
    hosts: Vec<(&'static str, IpAddr)>,
    replies: usize,
}

#[async_trait]
impl EchoTransport for ScriptedTransport {
    async fn open(
        &self,
        target: &str,
        replies: ReplySink,
    ) -> Result<Box<dyn EchoSession>, ProbeError> {
        let addr = self
            .hosts
            .iter()
            .find(|(name, _)| *name == target)
            .map(|(_, addr)| *addr)
            .ok_or_else(|| ProbeError::Resolution {
                host: target.to_string(),
                reason: "no addresses found".to_string(),
            })?;

        Ok(Box::new(ScriptedSession {
            addr,
            remaining: self.replies,
            replies,
        }))
    }
}

struct ScriptedSession {
    addr: IpAddr,
    remaining: usize,
    replies: ReplySink,
}

#[async_trait]
impl EchoSession for ScriptedSession {
    fn addr(&self) -> IpAddr {
        self.addr
    }

    async fn send_echo(&mut self, attempt: EchoAttempt) {
        if self.remaining > 0 {
            self.remaining -= 1;
            let _ = self.replies.try_send(EchoReply {
                addr: self.addr,
                seq: attempt.seq,
                rtt: Duration::from_millis(3),
                bytes: 64,
            });
        }
    }
}

/// Start probers and a metrics server on an ephemeral port.
async fn start_exporter(
    transport: ScriptedTransport,
    targets: &[&str],
) -> (SocketAddr, ProberSupervisor, tokio::task::JoinHandle<()>) {
    let registry = Arc::new(Registry::new());
    let metrics = PingMetrics::register(&registry).unwrap();

    let server = HttpServer::bind(
        registry.clone(),
        "127.0.0.1:0".parse().unwrap(),
        "/metrics".to_string(),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();

    let mut supervisor =
        ProberSupervisor::new(Arc::new(transport), metrics, Duration::from_millis(10));
    supervisor.launch_all(targets);

    let shutdown = supervisor.shutdown_signal();
    let handle = tokio::spawn(async move {
        server.run(shutdown).await.unwrap();
    });

    (addr, supervisor, handle)
}

async fn scrape(addr: SocketAddr) -> String {
    reqwest::get(format!("http://{}/metrics", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap()
}

/// Scrape until every expected line shows up or the deadline passes.
async fn scrape_until(addr: SocketAddr, expected: &[&str]) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let body = scrape(addr).await;
        if expected.iter().all(|line| body.lines().any(|l| l == *line)) {
            return body;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("expected lines never appeared, last scrape:\n{}", body);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_two_hosts_exposed_over_http() {
    let transport = ScriptedTransport {
        hosts: vec![
            ("8.8.8.8", "8.8.8.8".parse().unwrap()),
            ("1.1.1.1", "1.1.1.1".parse().unwrap()),
        ],
        replies: 3,
    };
    let (addr, supervisor, server) = start_exporter(transport, &["8.8.8.8", "1.1.1.1"]).await;

    let body = scrape_until(
        addr,
        &[
            "ping_packets_sent{host=\"1.1.1.1\"} 3",
            "ping_packets_sent{host=\"8.8.8.8\"} 3",
            "ping_packets_srec{host=\"1.1.1.1\"} 3",
            "ping_packets_srec{host=\"8.8.8.8\"} 3",
        ],
    )
    .await;

    let gauge_series = body
        .lines()
        .filter(|l| l.starts_with("ping_packets_sent{") || l.starts_with("ping_packets_srec{"))
        .count();
    assert_eq!(gauge_series, 4);

    assert!(body.contains("# TYPE ping_rtt_histogram_seconds histogram"));
    assert!(body.contains("ping_rtt_histogram_seconds_bucket{host=\"8.8.8.8\",le=\"0.005\"} 3"));
    assert!(body.contains("ping_rtt_histogram_seconds_bucket{host=\"8.8.8.8\",le=\"0.0025\"} 0"));
    assert!(body.contains("ping_rtt_histogram_seconds_count{host=\"1.1.1.1\"} 3"));

    // Histogram family comes first, then sent, then received.
    let rtt = body.find("# HELP ping_rtt_histogram_seconds").unwrap();
    let sent = body.find("# HELP ping_packets_sent").unwrap();
    let received = body.find("# HELP ping_packets_srec").unwrap();
    assert!(rtt < sent && sent < received);

    supervisor.shutdown(Duration::from_secs(1)).await;
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_unresolvable_target_does_not_block_others() {
    let transport = ScriptedTransport {
        hosts: vec![("9.9.9.9", "9.9.9.9".parse().unwrap())],
        replies: 2,
    };
    let (addr, supervisor, server) =
        start_exporter(transport, &["9.9.9.9", "nonexistent.invalid"]).await;

    let body = scrape_until(addr, &["ping_packets_srec{host=\"9.9.9.9\"} 2"]).await;

    assert!(!body.contains("nonexistent.invalid"));
    assert_eq!(supervisor.running(), 1);

    supervisor.shutdown(Duration::from_secs(1)).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
}

#[tokio::test]
async fn test_scrape_content_type() {
    let transport = ScriptedTransport {
        hosts: vec![],
        replies: 0,
    };
    let (addr, supervisor, server) = start_exporter(transport, &["unknown.invalid"]).await;

    let response = reqwest::get(format!("http://{}/metrics", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/plain; version=0.0.4; charset=utf-8"
    );
    // Nothing was ever observed, so no family has a series.
    assert_eq!(response.text().await.unwrap(), "");

    let health: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["series"], 0);

    supervisor.shutdown(Duration::from_secs(1)).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
}

#[test]
fn test_config_file_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pingsight.json5");
    std::fs::write(
        &path,
        r#"{
            // hosts to watch
            targets: ["8.8.8.8", "example.com"],
            probe: { interval_ms: 250 },
            http: { listen: "127.0.0.1:9099" },
        }"#,
    )
    .unwrap();

    let config = ExporterConfig::load_from_file(&path).unwrap();
    assert_eq!(config.targets, vec!["8.8.8.8", "example.com"]);
    assert_eq!(config.probe.interval(), Duration::from_millis(250));
    assert_eq!(config.probe.timeout(), Duration::from_secs(1));
    assert_eq!(config.listen_addr().unwrap().port(), 9099);
}

#[test]
fn test_config_file_missing() {
    let dir = tempfile::tempdir().unwrap();
    let result = ExporterConfig::load_from_file(dir.path().join("absent.json5"));
    assert!(result.is_err());
}
