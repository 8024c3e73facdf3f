//! Tidepool client: keeps interactive shell sessions of one project behind a
//! single switchable stream.

pub mod config;
pub mod connection;
pub mod error;
pub mod fit;
pub mod keys;
pub mod multiplexer;
pub mod negotiator;
pub mod orchestrator;
pub mod registry;
pub mod summary;
pub mod supervisor;
pub mod surface;
pub mod telemetry;
pub mod transport;

pub use config::{ClientConfig, DEFAULT_SERVER_URL};
pub use connection::{ConnectionState, Ending, Notice, TransportConnection};
pub use error::{ClientError, TransportError};
pub use fit::{FitController, SharedProbe, ViewportProbe};
pub use multiplexer::{MuxEvent, MuxStatus, Multiplexer};
pub use negotiator::ResizeNegotiator;
pub use orchestrator::{Orchestrator, PanelEvent};
pub use registry::{HttpSessionBackend, MemorySessionBackend, SessionBackend};
pub use summary::{SessionSummary, SummaryEntry};
pub use supervisor::{ReconnectPolicy, ReconnectSupervisor};
pub use transport::{Connector, Link, LinkEvent, MockConnector, MockRemote, WebSocketConnector};
