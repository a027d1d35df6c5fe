//! Packet capture backends
//!
//! Raw-frame I/O on a named device. The AF_PACKET backend is the production
//! path; tests substitute an in-memory implementation.

mod af_packet;
pub mod filter;

pub use af_packet::AfPacketSocket;
pub use filter::FrameFilter;

use crate::Result;
use std::future::Future;

/// Packet capture backend trait
///
/// Reads block until a frame arrives; writes are atomic per call. All
/// methods take `&self` so one reader task and several writers can share a
/// handle.
pub trait Capture: Send + Sync + 'static {
    /// Receive one frame into the provided buffer, returning its length
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Send one frame
    fn send(&self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Shut the capture down; pending and future reads and writes fail
    fn close(&self);
}
