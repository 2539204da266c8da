//! Channel and numbering limits.
//!
//! Channel 0 is the control channel that carries the greeting and the
//! channel management exchange. Every other channel is created on demand by
//! the session and carries one profile's traffic.

/// The control channel (greeting, channel start/close).
pub const CONTROL: u32 = 0;

/// Largest channel number.
pub const MAX_CHANNEL: u32 = 2_147_483_647;

/// Largest message number; message numbers wrap back to 0 after it.
pub const MAX_MSGNO: u32 = 2_147_483_647;

/// Message number reserved for the greeting exchange on the control channel.
pub const GREETING_MSGNO: u32 = 0;

/// First message number handed out for locally initiated requests.
pub const FIRST_MSGNO: u32 = 1;

/// Default receive window (and assumed peer window) in bytes.
pub const DEFAULT_WINDOW_SIZE: usize = 4096;

/// Returns true for the control channel.
pub fn is_control(number: u32) -> bool {
    number == CONTROL
}

/// Returns true if the channel number is within the legal range.
pub fn is_valid_channel(number: u32) -> bool {
    number <= MAX_CHANNEL
}

/// Returns the message number that follows `msgno`, wrapping at [`MAX_MSGNO`].
pub fn next_msgno(msgno: u32) -> u32 {
    if msgno >= MAX_MSGNO {
        0
    } else {
        msgno + 1
    }
}
