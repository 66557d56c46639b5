//! Sessions, the session registry, and flow multiplexing.

pub mod flow;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;

pub use flow::{FlowReceiver, FlowWriter};
pub use registry::{SessionRef, SessionRegistry};
pub use session::{Session, SessionClass, SessionId, SessionInner, SessionState};
