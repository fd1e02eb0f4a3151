//! Per-connection alarm ingest sessions.
//!
//! A session owns exactly one [`AlarmIngestPipeline`]. It lives as long as
//! the TCP connection; a reconnect gets a fresh session and so a fresh
//! carry-over.

use bytes::BytesMut;
use capadis_wire::{
    AlarmEvent, AlarmIngestPipeline, AlarmSink, PipelineConfig, PipelineStats, RejectedFrame,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::transport::{connect_tcp, Backoff};

/// Configuration for alarm sessions
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Pipeline settings applied to every connection
    pub pipeline: PipelineConfig,
    /// Bytes reserved for each socket read
    pub read_buffer_size: usize,
    /// First reconnect delay after a failed dial
    pub initial_backoff: Duration,
    /// Reconnect delay cap
    pub max_backoff: Duration,
    /// Pause before redialing after an established session ends
    pub reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            read_buffer_size: 4 * 1024,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Statistics for a session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Number of socket reads that returned data
    pub chunks: u64,
    /// Pipeline counters at session end
    pub pipeline: PipelineStats,
}

/// Events emitted by sessions
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection established
    Connected {
        /// Peer socket address
        peer: SocketAddr,
    },
    /// An alarm was decoded
    Alarm {
        /// Peer that reported it
        peer: SocketAddr,
        /// The alarm
        event: AlarmEvent,
    },
    /// A candidate was rejected or the carry-over overflowed
    Rejected {
        /// Peer that sent it
        peer: SocketAddr,
        /// What was rejected and why
        rejected: RejectedFrame,
    },
    /// Connection closed
    Disconnected {
        /// Peer socket address
        peer: SocketAddr,
        /// Final counters
        stats: SessionStats,
    },
}

/// Forwards pipeline output into the session event channel
struct ChannelSink<'a> {
    peer: SocketAddr,
    tx: &'a mpsc::UnboundedSender<SessionEvent>,
}

impl AlarmSink for ChannelSink<'_> {
    fn on_alarm(&mut self, event: AlarmEvent) {
        self.tx
            .send(SessionEvent::Alarm {
                peer: self.peer,
                event,
            })
            .ok();
    }

    fn on_reject(&mut self, rejected: RejectedFrame) {
        self.tx
            .send(SessionEvent::Rejected {
                peer: self.peer,
                rejected,
            })
            .ok();
    }
}

/// Main session implementation
pub struct Session;

impl Session {
    /// Run a session over an established stream until EOF or a read error
    pub async fn run_inbound<S>(
        config: &SessionConfig,
        mut stream: S,
        peer: SocketAddr,
        event_tx: &mpsc::UnboundedSender<SessionEvent>,
    ) -> anyhow::Result<SessionStats>
    where
        S: AsyncRead + Unpin,
    {
        info!("Starting alarm session with {}", peer);
        event_tx.send(SessionEvent::Connected { peer }).ok();

        let mut pipeline = AlarmIngestPipeline::new(config.pipeline);
        let mut read_buffer = BytesMut::with_capacity(config.read_buffer_size);
        let mut stats = SessionStats::default();

        let result = loop {
            read_buffer.clear();
            read_buffer.reserve(config.read_buffer_size);

            match stream.read_buf(&mut read_buffer).await {
                Ok(0) => {
                    info!("Peer {} closed the connection", peer);
                    break Ok(());
                }
                Ok(n) => {
                    stats.bytes_in += n as u64;
                    stats.chunks += 1;
                    debug!("Received {} bytes from {}", n, peer);

                    let mut sink = ChannelSink { peer, tx: event_tx };
                    pipeline.feed_into(&read_buffer, &mut sink);

                    if event_tx.is_closed() {
                        warn!("Event receiver for {} is gone; closing session", peer);
                        break Ok(());
                    }
                }
                Err(e) => {
                    error!("Read error from {}: {}", peer, e);
                    break Err(anyhow::Error::from(e));
                }
            }
        };

        stats.pipeline = pipeline.stats();
        info!("Session with {} ended. Stats: {:?}", peer, stats);

        event_tx
            .send(SessionEvent::Disconnected {
                peer,
                stats: stats.clone(),
            })
            .ok();

        result.map(|()| stats)
    }

    /// Dial `target_addr`, run a session, and redial forever with backoff.
    ///
    /// Returns only once the event receiver has been dropped.
    pub async fn run_outbound(
        config: SessionConfig,
        target_addr: SocketAddr,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> anyhow::Result<()> {
        let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);

        while !event_tx.is_closed() {
            info!("Attempting to connect to {}", target_addr);

            match connect_tcp(target_addr).await {
                Ok(stream) => {
                    info!("TCP connection established to {}", target_addr);
                    backoff.reset();

                    if let Err(e) =
                        Self::run_inbound(&config, stream, target_addr, &event_tx).await
                    {
                        warn!("Session to {} ended with error: {:#}", target_addr, e);
                    }

                    tokio::time::sleep(config.reconnect_delay).await;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Failed to connect to {}: {}; retrying in {:?}",
                        target_addr, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        info!("Stopping outbound session to {}", target_addr);
        Ok(())
    }
}
