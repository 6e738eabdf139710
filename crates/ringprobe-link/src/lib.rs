//! Device link: transports, envelopes, correlation and the audit trail.

pub mod audit;
pub mod config;
pub mod correlator;
pub mod envelope;
pub mod error;
pub mod session;
pub mod sim;
pub mod transport;

pub use audit::{AuditEntry, AuditLog, Direction};
pub use config::LinkConfig;
pub use correlator::{Ack, Channel, Correlator, Matcher, RequestKey};
pub use envelope::{CommandEnvelope, ResponseEnvelope, ResponseStatus};
pub use error::LinkError;
pub use session::DeviceSession;
pub use sim::{SimProfile, SimulatedLogger};
pub use transport::{BusMessage, DataChannel, LineChannel, MessageBus};
