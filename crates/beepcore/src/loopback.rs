//! An in-memory session pair.
//!
//! [`pair`] connects two [`LoopbackSession`]s back to back. Each direction
//! is drained by its own pump thread, which posts frames to the receiving
//! side's registered channels and applies window advertisements to them, so
//! a send never runs the receiver's code on the sender's thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use beepcore_channel::{Channel, Session, SessionError, WindowUpdate};
use beepcore_frame::{Frame, MessageType};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

/// Header fields of a frame as it went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentFrame {
    pub channel: u32,
    pub message_type: MessageType,
    pub msgno: u32,
    pub seqno: u64,
    pub size: usize,
    pub last: bool,
}

enum Wire {
    Frame(Frame),
    Seq { channel: u32, ackno: u64, window: usize },
    Shutdown,
}

type Registry = Arc<RwLock<HashMap<u32, Channel>>>;

/// One end of a loopback connection.
pub struct LoopbackSession {
    name: &'static str,
    max_frame_size: usize,
    outbound: Mutex<Sender<Wire>>,
    channels: Registry,
    sent: Mutex<Vec<SentFrame>>,
    close_requests: Mutex<Vec<(u32, u16)>>,
    terminated: Mutex<Option<String>>,
    io_enabled: AtomicBool,
}

impl LoopbackSession {
    /// Route inbound traffic for `channel.number()` to `channel`.
    pub fn register(&self, channel: Channel) {
        self.channels.write().insert(channel.number(), channel);
    }

    pub fn channel(&self, number: u32) -> Option<Channel> {
        self.channels.read().get(&number).cloned()
    }

    /// Every frame this end has sent, in order.
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    /// Close requests made through [`Session::close_channel`].
    pub fn close_requests(&self) -> Vec<(u32, u16)> {
        self.close_requests.lock().clone()
    }

    /// Reason given when a channel terminated this session.
    pub fn terminated(&self) -> Option<String> {
        self.terminated.lock().clone()
    }

    pub fn io_enabled(&self) -> bool {
        self.io_enabled.load(Ordering::SeqCst)
    }

    fn push(&self, wire: Wire) -> Result<(), SessionError> {
        if self.terminated.lock().is_some() {
            return Err(SessionError::Closed);
        }
        self.outbound
            .lock()
            .send(wire)
            .map_err(|_| SessionError::Closed)
    }
}

impl Session for LoopbackSession {
    fn send_frame(&self, frame: Frame) -> Result<(), SessionError> {
        let record = SentFrame {
            channel: frame.channel,
            message_type: frame.message_type,
            msgno: frame.msgno,
            seqno: frame.seqno,
            size: frame.size(),
            last: frame.last,
        };
        self.push(Wire::Frame(frame))?;
        self.sent.lock().push(record);
        Ok(())
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn close_channel(
        &self,
        channel: u32,
        code: u16,
        reason: Option<&str>,
    ) -> Result<(), SessionError> {
        debug!(session = self.name, channel, code, ?reason, "close requested");
        self.close_requests.lock().push((channel, code));
        Ok(())
    }

    fn update_receive_buffer_size(&self, update: &WindowUpdate) -> Result<bool, SessionError> {
        self.push(Wire::Seq {
            channel: update.channel,
            ackno: update.recv_sequence,
            window: update.available(),
        })?;
        Ok(true)
    }

    fn disable_io(&self) {
        self.io_enabled.store(false, Ordering::SeqCst);
    }

    fn terminate(&self, reason: &str) {
        warn!(session = self.name, %reason, "session terminated");
        let _ = self.terminated.lock().get_or_insert_with(|| reason.to_string());
    }
}

/// Two connected sessions and the threads moving traffic between them.
pub struct Loopback {
    pub left: Arc<LoopbackSession>,
    pub right: Arc<LoopbackSession>,
    pumps: Vec<JoinHandle<()>>,
}

/// Connect two sessions that both use `max_frame_size`.
pub fn pair(max_frame_size: usize) -> std::io::Result<Loopback> {
    let (left_tx, left_rx) = mpsc::channel();
    let (right_tx, right_rx) = mpsc::channel();
    let left = Arc::new(session("left", max_frame_size, left_tx));
    let right = Arc::new(session("right", max_frame_size, right_tx));

    let pumps = vec![
        spawn_pump("beep-loopback-l2r", left_rx, Arc::clone(&right.channels))?,
        spawn_pump("beep-loopback-r2l", right_rx, Arc::clone(&left.channels))?,
    ];
    Ok(Loopback { left, right, pumps })
}

impl Loopback {
    /// Stop both pumps and wait for them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.left.outbound.lock().send(Wire::Shutdown);
        let _ = self.right.outbound.lock().send(Wire::Shutdown);
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }
        self.left.channels.write().clear();
        self.right.channels.write().clear();
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn session(name: &'static str, max_frame_size: usize, outbound: Sender<Wire>) -> LoopbackSession {
    LoopbackSession {
        name,
        max_frame_size,
        outbound: Mutex::new(outbound),
        channels: Arc::new(RwLock::new(HashMap::new())),
        sent: Mutex::new(Vec::new()),
        close_requests: Mutex::new(Vec::new()),
        terminated: Mutex::new(None),
        io_enabled: AtomicBool::new(true),
    }
}

fn spawn_pump(
    name: &str,
    inbound: Receiver<Wire>,
    channels: Registry,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || pump(inbound, channels))
}

fn pump(inbound: Receiver<Wire>, channels: Registry) {
    for wire in inbound {
        match wire {
            Wire::Frame(frame) => {
                let number = frame.channel;
                let Some(channel) = channels.read().get(&number).cloned() else {
                    warn!(channel = number, "frame for unknown channel dropped");
                    continue;
                };
                if let Err(err) = channel.post_frame(frame) {
                    warn!(channel = number, error = %err, "frame rejected");
                }
            }
            Wire::Seq {
                channel: number,
                ackno,
                window,
            } => {
                let Some(channel) = channels.read().get(&number).cloned() else {
                    continue;
                };
                if let Err(err) = channel.update_peer_receive_buffer_size(ackno, window) {
                    warn!(channel = number, error = %err, "window update rejected");
                }
            }
            Wire::Shutdown => return,
        }
    }
}
