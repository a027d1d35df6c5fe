//! Data plane components
//!
//! Client sessions, the NAT table, and the two packet pipelines around them.

mod device;
mod nat;
mod server;
mod session;

pub use device::{Conn, Device};
pub use nat::{NatGuide, NatIndicator, NatTable, Quintuple, KEEP_ALIVE};
pub use server::Server;
pub use session::{ClientSession, SessionTable};
