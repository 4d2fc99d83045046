//! `tetra-cockpit` – The Training Dashboard Server
//!
//! Boots a lightweight HTTP + WebSocket server (default port `8000`) that:
//!
//! 1. **Serves** the embedded dashboard page and a small JSON API for
//!    session control and model slots.
//!
//! 2. **Bridges** the worker's telemetry channel to every connected browser
//!    tab: a polling task drains the channel on a fixed interval and
//!    broadcasts each message, dropping clients that cannot keep up.
//!
//! 3. **Accepts** JSON commands over the same WebSocket
//!    (`{"command":"pause"}`, `{"command":"set_speed","speed":0.5}`, ...) and
//!    answers each with a `response` message.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tetra_cockpit::CockpitServer;
//! use tetra_runtime::{Supervisor, SupervisorConfig};
//! use tetra_sim::SimBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sup = Arc::new(Supervisor::new(
//!         Arc::new(SimBackend::new()),
//!         SupervisorConfig::default(),
//!     ));
//!     CockpitServer::new(sup)
//!         .run()
//!         .await
//!         .expect("cockpit server failed");
//! }
//! ```

pub mod bridge;
pub mod connections;
pub mod control;
pub mod server;

pub use bridge::TelemetryBridge;
pub use connections::ConnectionManager;
pub use server::{CockpitServer, DEFAULT_PORT};
