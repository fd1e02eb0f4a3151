//! TCP dial/listen, per-connection ingest sessions and a device simulator for capadis.
//!
//! Each TCP connection to an alarm controller gets its own [`Session`],
//! which reads chunks off the socket, pushes them through a fresh
//! [`capadis_wire::AlarmIngestPipeline`], and reports what it finds as
//! [`SessionEvent`]s.
//!
//! ## Features
//!
//! - **TCP Transport**: Basic TCP listener and dialer
//! - **Sessions**: One pipeline per connection, events over a channel
//! - **Auto-reconnect**: Outbound sessions redial with exponential backoff
//! - **Simulator**: Serves clean or deliberately fragmented alarm traffic
//!
//! ## Example
//!
//! ```rust,no_run
//! use capadis_session::{Session, SessionConfig, SessionEvent};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let addr = "192.168.1.23:8888".parse()?;
//!
//! tokio::spawn(Session::run_outbound(SessionConfig::default(), addr, tx));
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         SessionEvent::Alarm { event, .. } => println!("ALARM INFO: {}", event),
//!         SessionEvent::Rejected { rejected, .. } => println!("dropped: {}", rejected.reason),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod emitter;
pub mod session;
pub mod transport;

// Re-export main types
pub use emitter::{burst, random_alarm, serve, EmitMode, EmitterConfig};
pub use session::{Session, SessionConfig, SessionEvent, SessionStats};
pub use transport::{connect_tcp, listen_tcp, Backoff};
