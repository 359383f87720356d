//! Echo transport seam and its ICMP implementation.
//!
//! A transport opens one [`EchoSession`] per target. The session transmits
//! echo requests on demand and delivers every reply it sees, asynchronously,
//! into the [`ReplySink`] handed over at open time. Requests that never get
//! an answer simply produce no reply.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use surge_ping::{Client, Config, ICMP, IcmpPacket, PingIdentifier, PingSequence, SurgeError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// Errors raised by a probe session.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },
    #[error("Failed to open probe session for {host}: {reason}")]
    SessionOpen { host: String, reason: String },
}

/// A single outbound echo request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoAttempt {
    /// Sequence number, strictly increasing from 0 for one prober.
    pub seq: u64,
}

/// A received echo reply.
#[derive(Debug, Clone, PartialEq)]
pub struct EchoReply {
    pub addr: IpAddr,
    pub seq: u64,
    pub rtt: Duration,
    pub bytes: usize,
}

/// Where a session delivers replies.
pub type ReplySink = mpsc::Sender<EchoReply>;

/// Opens probe sessions.
#[async_trait]
pub trait EchoTransport: Send + Sync {
    /// Resolve `target` and open a session delivering replies into `replies`.
    async fn open(
        &self,
        target: &str,
        replies: ReplySink,
    ) -> Result<Box<dyn EchoSession>, ProbeError>;
}

/// An open probe session against one resolved address.
#[async_trait]
pub trait EchoSession: Send {
    /// The resolved address being probed.
    fn addr(&self) -> IpAddr;

    /// Transmit one echo request. Returns once the request is on its way.
    ///
    /// Transmission failures surface later, from the session, as a missing reply.
    async fn send_echo(&mut self, attempt: EchoAttempt);
}

/// Resolve hostname to IP address.
pub async fn resolve_host(host: &str) -> Result<IpAddr, std::io::Error> {
    // First, try to parse as an IP address directly
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs = tokio::net::lookup_host(format!("{host}:0")).await?;
    addrs
        .into_iter()
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"))
}

/// ICMP echo transport backed by `surge-ping` sockets.
///
/// Opening a session needs raw or datagram ICMP socket privileges.
#[derive(Debug, Clone)]
pub struct IcmpTransport {
    timeout: Duration,
    payload: Arc<[u8]>,
}

impl IcmpTransport {
    /// Create a transport waiting up to `timeout` per echo, with `payload_size` bytes of payload.
    pub fn new(timeout: Duration, payload_size: usize) -> Self {
        Self {
            timeout,
            payload: vec![0u8; payload_size].into(),
        }
    }
}

#[async_trait]
impl EchoTransport for IcmpTransport {
    async fn open(
        &self,
        target: &str,
        replies: ReplySink,
    ) -> Result<Box<dyn EchoSession>, ProbeError> {
        let addr = resolve_host(target)
            .await
            .map_err(|e| ProbeError::Resolution {
                host: target.to_string(),
                reason: e.to_string(),
            })?;

        let client = match addr {
            IpAddr::V4(_) => Client::new(&Config::default()),
            IpAddr::V6(_) => Client::new(&Config::builder().kind(ICMP::V6).build()),
        }
        .map_err(|e| ProbeError::SessionOpen {
            host: target.to_string(),
            reason: e.to_string(),
        })?;

        debug!(host = %target, %addr, "Opened ICMP session");

        Ok(Box::new(IcmpSession {
            client,
            addr,
            ident: PingIdentifier(rand::random()),
            timeout: self.timeout,
            payload: self.payload.clone(),
            replies,
            inflight: JoinSet::new(),
        }))
    }
}

/// One ICMP session. Each echo waits for its reply on its own task; dropping
/// the session aborts whatever is still in flight.
struct IcmpSession {
    client: Client,
    addr: IpAddr,
    ident: PingIdentifier,
    timeout: Duration,
    payload: Arc<[u8]>,
    replies: ReplySink,
    inflight: JoinSet<()>,
}

#[async_trait]
impl EchoSession for IcmpSession {
    fn addr(&self) -> IpAddr {
        self.addr
    }

    async fn send_echo(&mut self, attempt: EchoAttempt) {
        while self.inflight.try_join_next().is_some() {}

        let mut pinger = self.client.pinger(self.addr, self.ident).await;
        pinger.timeout(self.timeout);

        let addr = self.addr;
        let payload = self.payload.clone();
        let replies = self.replies.clone();

        self.inflight.spawn(async move {
            // ICMP sequence numbers are 16 bits on the wire.
            let wire_seq = PingSequence(attempt.seq as u16);
            match pinger.ping(wire_seq, &payload).await {
                Ok((packet, rtt)) => {
                    let bytes = match &packet {
                        IcmpPacket::V4(p) => p.get_size(),
                        IcmpPacket::V6(p) => p.get_size(),
                    };
                    let reply = EchoReply {
                        addr,
                        seq: attempt.seq,
                        rtt,
                        bytes,
                    };
                    // The prober may already be gone.
                    let _ = replies.send(reply).await;
                }
                Err(e) if is_lost_reply(&e) => {
                    trace!(%addr, seq = attempt.seq, "No echo reply");
                }
                Err(e) => {
                    warn!(%addr, seq = attempt.seq, error = %e, "Echo request failed");
                }
            }
        });
    }
}

/// A timeout is ordinary packet loss; anything else is a socket or protocol failure.
fn is_lost_reply(err: &SurgeError) -> bool {
    matches!(err, SurgeError::Timeout { .. })
}
