//! Alarm controller simulator.
//!
//! Listens like the real controller does and pushes alarm frames to every
//! client that connects. In [`EmitMode::Dirty`] each burst carries several
//! frames with junk between them, cut into separate writes at random
//! offsets, so clients see frames split across reads.

use bytes::{Bytes, BytesMut};
use capadis_wire::{is_sentinel, AlarmEvent, AlarmTimestamp, Frame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// What each tick sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    /// One well-formed frame per write
    Clean,
    /// Several frames with junk bytes, split across writes
    Dirty,
}

impl FromStr for EmitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clean" => Ok(EmitMode::Clean),
            "dirty" => Ok(EmitMode::Dirty),
            other => Err(format!("unknown emit mode: {}", other)),
        }
    }
}

/// Simulator settings
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Time between bursts
    pub interval: Duration,
    /// Burst shape
    pub mode: EmitMode,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            mode: EmitMode::Clean,
        }
    }
}

/// A random alarm from systems 1-10, points 1-2
pub fn random_alarm<R: Rng>(rng: &mut R, time: AlarmTimestamp) -> AlarmEvent {
    AlarmEvent {
        system: rng.gen_range(1..=10),
        point: rng.gen_range(1..=2),
        time,
    }
}

/// Writes for one burst, plus the alarms they carry
pub fn burst<R: Rng>(
    rng: &mut R,
    mode: EmitMode,
    time: AlarmTimestamp,
) -> anyhow::Result<(Vec<Bytes>, Vec<AlarmEvent>)> {
    match mode {
        EmitMode::Clean => {
            let alarm = random_alarm(rng, time);
            Ok((vec![alarm.to_frame()?.to_bytes()], vec![alarm]))
        }
        EmitMode::Dirty => dirty_burst(rng, time),
    }
}

fn dirty_burst<R: Rng>(
    rng: &mut R,
    time: AlarmTimestamp,
) -> anyhow::Result<(Vec<Bytes>, Vec<AlarmEvent>)> {
    let count = rng.gen_range(2..=4);
    let mut stream = BytesMut::new();
    let mut alarms = Vec::with_capacity(count);

    for _ in 0..count {
        let alarm = random_alarm(rng, time);
        let frame: Frame = alarm.to_frame()?;
        frame.encode_into(&mut stream);
        alarms.push(alarm);

        // Junk between frames never contains a sentinel, so it cannot pair up.
        for _ in 0..rng.gen_range(0..=3) {
            let junk = loop {
                let b: u8 = rng.gen();
                if !is_sentinel(b) {
                    break b;
                }
            };
            stream.extend_from_slice(&[junk]);
        }
    }

    let mut cuts: Vec<usize> = (0..rng.gen_range(1..=3))
        .map(|_| rng.gen_range(1..stream.len()))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut stream = stream.freeze();
    let mut writes = Vec::with_capacity(cuts.len() + 1);
    let mut taken = 0;
    for cut in cuts {
        writes.push(stream.split_to(cut - taken));
        taken = cut;
    }
    writes.push(stream);

    Ok((writes, alarms))
}

/// Accept clients forever, feeding each one alarms
pub async fn serve(listener: TcpListener, config: EmitterConfig) -> anyhow::Result<()> {
    info!(
        "Alarm simulator listening on {} ({:?} mode, every {:?})",
        listener.local_addr()?,
        config.mode,
        config.interval
    );

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Simulator client connected from {}", peer);

        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = feed_client(socket, peer, config).await {
                warn!("Simulator client {} dropped: {}", peer, e);
            }
        });
    }
}

async fn feed_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    config: EmitterConfig,
) -> anyhow::Result<()> {
    socket.set_nodelay(true)?;
    let mut rng = StdRng::from_entropy();
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let now = AlarmTimestamp::from(chrono::Local::now().naive_local());
        let (writes, alarms) = burst(&mut rng, config.mode, now)?;

        for write in writes {
            socket.write_all(&write).await?;
            socket.flush().await?;
            debug!("Sent {} bytes to {}", write.len(), peer);
        }
        for alarm in alarms {
            debug!("Simulated alarm {} to {}", alarm, peer);
        }
    }
}
