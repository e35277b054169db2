//! Connection registry: admission, addressing and liveness tracking for
//! persistent client connections.

mod clock;
mod error;
mod id;
mod registry;
mod stats;
mod transport;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AdmitError, RejectReason, SendError};
pub use id::{IdGenerator, RandomIdGenerator, SequentialIdGenerator};
pub use registry::ConnectionRegistry;
pub use stats::{BroadcastReport, RegistryStats, ShutdownReport};
pub use transport::{close_code, Transport, TransportError};
pub use types::{ConnectionId, ConnectionInfo, Metadata, Payload, RegistryOptions, RemovalReason};
