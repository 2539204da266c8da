//! BEEP channel multiplexing and flow control.
//!
//! beepcore implements the per-channel core of a BEEP peer: frame
//! validation and reassembly, request/reply correlation, and the two
//! flow-control windows of every channel. The session that owns the wire is
//! supplied by the caller through the [`channel::Session`] trait.
//!
//! # Crate Structure
//!
//! - [`frame`]: Frame model, message data streams and the frame slicer
//! - [`channel`]: Channel state machine, windows, listeners and errors
//! - [`loopback`]: In-memory session pair for tests and demos
//! - [`logging`]: `tracing` subscriber setup (behind the `logging` feature)

/// Re-export frame types.
pub mod frame {
    pub use beepcore_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use beepcore_channel::*;
}

#[cfg(feature = "logging")]
pub mod logging;
pub mod loopback;
