pub mod audio;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod nats;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod transport;

pub use audio::{AudioFile, AudioFrame, CaptureBuffer, PlaybackMode, PlaybackMultiplexer, Recording};
pub use config::Config;
pub use dispatch::{DispatchEvent, Dispatcher};
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use nats::NatsClient;
pub use pipeline::{AssistantTurn, Pipeline, Turn};
pub use protocol::{Command, OutboundMessage};
pub use session::{ConnectionState, Session, SessionConfig, SessionManager, SessionStats};
pub use transport::{link, PeerLink, RemoteEnd, TransportEvent};
