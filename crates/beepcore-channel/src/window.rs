//! Flow-control bookkeeping for both directions of a channel.
//!
//! [`LocalWindow`] is the receive side: what the peer may still send us and
//! when freeing buffer space is worth telling the peer about. [`PeerWindow`]
//! is the send side: how many bytes the peer can currently accept.

use crate::error::ProtocolViolation;

/// A receive window advertisement handed to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    pub channel: u32,
    /// Sequence number acknowledged by the previous advertisement.
    pub last_ackno: u64,
    /// Sequence number acknowledged by this advertisement.
    pub recv_sequence: u64,
    /// Buffer usage reported by the previous advertisement.
    pub prev_used: usize,
    /// Buffer usage now.
    pub used: usize,
    /// Receive buffer size.
    pub size: usize,
}

impl WindowUpdate {
    /// Bytes the peer may send beyond `recv_sequence`.
    pub fn available(&self) -> usize {
        self.size.saturating_sub(self.used)
    }
}

/// Receive-side window with advertisement suppression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalWindow {
    size: usize,
    used: usize,
    last_ackno: u64,
    last_used: usize,
}

impl LocalWindow {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            used: 0,
            last_ackno: 0,
            last_used: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Free buffer space.
    pub fn available(&self) -> usize {
        self.size.saturating_sub(self.used)
    }

    /// Account an accepted inbound frame.
    pub fn accept(&mut self, bytes: usize) -> Result<(), ProtocolViolation> {
        let used = self.used.saturating_add(bytes);
        if used > self.size {
            return Err(ProtocolViolation::WindowOverflow {
                used,
                size: self.size,
            });
        }
        self.used = used;
        Ok(())
    }

    /// Return consumed bytes to the window.
    pub fn release(&mut self, bytes: usize) {
        self.used = self.used.saturating_sub(bytes);
    }

    /// Change the buffer size. Returns false (and keeps the old size) when
    /// `size` is below the bytes in use.
    pub fn resize(&mut self, size: usize) -> bool {
        if size < self.used {
            return false;
        }
        self.size = size;
        true
    }

    /// Highest sequence number (exclusive) the peer was last told it may reach.
    pub fn advertised_limit(&self) -> u64 {
        self.last_ackno + self.size.saturating_sub(self.last_used) as u64
    }

    /// Whether the peer has used up all the credit it was last given.
    pub fn is_saturated(&self, recv_sequence: u64) -> bool {
        recv_sequence >= self.advertised_limit()
    }

    /// Whether enough credit has been freed since the last advertisement to
    /// justify a new one. `threshold` is clamped to `1..=size`.
    pub fn update_due(&self, recv_sequence: u64, threshold: usize) -> bool {
        let threshold = threshold.clamp(1, self.size.max(1)) as u64;
        let limit = recv_sequence + self.available() as u64;
        let advertised = self.advertised_limit();
        limit > advertised && limit - advertised >= threshold
    }

    /// The advertisement describing the window as of `recv_sequence`.
    pub fn advertisement(&self, channel: u32, recv_sequence: u64) -> WindowUpdate {
        WindowUpdate {
            channel,
            last_ackno: self.last_ackno,
            recv_sequence,
            prev_used: self.last_used,
            used: self.used,
            size: self.size,
        }
    }

    /// Remember an advertisement the session delivered. Stale updates
    /// (older than the one already recorded) are ignored.
    pub fn record(&mut self, update: &WindowUpdate) {
        if update.recv_sequence >= self.last_ackno {
            self.last_ackno = update.recv_sequence;
            self.last_used = update.used;
        }
    }
}

/// Send-side window: bytes the peer can currently accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerWindow {
    size: usize,
}

impl PeerWindow {
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_open(&self) -> bool {
        self.size > 0
    }

    /// Account bytes just sent.
    pub fn consume(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.size, "sent past the peer window");
        self.size = self.size.saturating_sub(bytes);
    }

    /// Apply the peer's advertisement of `window` bytes starting at `ackno`.
    ///
    /// Returns true when the window went from closed to open.
    pub fn update(
        &mut self,
        ackno: u64,
        window: usize,
        send_sequence: u64,
    ) -> Result<bool, ProtocolViolation> {
        if ackno > send_sequence {
            return Err(ProtocolViolation::AckBeyondSent {
                ackno,
                sent: send_sequence,
            });
        }
        let in_flight = usize::try_from(send_sequence - ackno).unwrap_or(usize::MAX);
        let previous = self.size;
        self.size = window.saturating_sub(in_flight);
        Ok(previous == 0 && self.size > 0)
    }
}
