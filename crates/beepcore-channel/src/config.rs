use beepcore_frame::DEFAULT_WINDOW_SIZE;

/// How inbound MSGs reach the channel's message listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Run the listener on the thread that completed the triggering frame or reply.
    Inline,
    /// Run the listener on a per-channel delivery thread, so frame ingestion
    /// never waits on application code.
    #[default]
    Threaded,
}

/// Per-channel flow-control and delivery configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Receive buffer size advertised to the peer. Default: 4096.
    pub receive_window: usize,
    /// Peer window assumed until the peer advertises one. Default: 4096.
    pub peer_window: usize,
    /// Deliver replies on their first frame instead of waiting for the
    /// terminal frame or a saturated window. Default: true.
    pub notify_on_first_frame: bool,
    /// Listener delivery mode. Default: threaded.
    pub delivery_mode: DeliveryMode,
    /// Freed credit needed before a window update is advertised.
    /// Default (`None`): half the receive window.
    pub window_update_threshold: Option<usize>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            receive_window: DEFAULT_WINDOW_SIZE,
            peer_window: DEFAULT_WINDOW_SIZE,
            notify_on_first_frame: true,
            delivery_mode: DeliveryMode::default(),
            window_update_threshold: None,
        }
    }
}

impl ChannelConfig {
    /// Override the receive window.
    pub fn with_receive_window(mut self, size: usize) -> Self {
        self.receive_window = size;
        self
    }

    /// Override the initial peer window.
    pub fn with_peer_window(mut self, size: usize) -> Self {
        self.peer_window = size;
        self
    }

    /// Override the first-frame notification policy.
    pub fn with_notify_on_first_frame(mut self, notify: bool) -> Self {
        self.notify_on_first_frame = notify;
        self
    }

    /// Override the delivery mode.
    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    /// Override the window update threshold.
    pub fn with_window_update_threshold(mut self, bytes: usize) -> Self {
        self.window_update_threshold = Some(bytes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.receive_window, 4096);
        assert_eq!(cfg.peer_window, 4096);
        assert!(cfg.notify_on_first_frame);
        assert_eq!(cfg.delivery_mode, DeliveryMode::Threaded);
        assert!(cfg.window_update_threshold.is_none());
    }

    #[test]
    fn builder_overrides() {
        let cfg = ChannelConfig::default()
            .with_receive_window(100)
            .with_peer_window(50)
            .with_notify_on_first_frame(false)
            .with_delivery_mode(DeliveryMode::Inline)
            .with_window_update_threshold(10);
        assert_eq!(cfg.receive_window, 100);
        assert_eq!(cfg.peer_window, 50);
        assert!(!cfg.notify_on_first_frame);
        assert_eq!(cfg.delivery_mode, DeliveryMode::Inline);
        assert_eq!(cfg.window_update_threshold, Some(10));
    }
}
