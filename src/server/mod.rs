//! The server: reactor loop, dispatch and background sweep.

#[allow(clippy::module_inception)]
pub mod server;

pub use server::{ServerEvent, StrandServer};
