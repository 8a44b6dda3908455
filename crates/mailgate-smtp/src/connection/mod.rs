//! Connection plumbing: command framing, deadlines and the TLS upgrade.

mod deadline;
mod reader;
mod upgrade;

pub use deadline::Deadline;
pub use reader::{CommandReader, Line};
pub use upgrade::{BoxedTransport, NoTls, TlsUpgrader, Transport, Upgrader};
