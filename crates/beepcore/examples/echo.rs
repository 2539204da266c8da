//! Echo over an in-process loopback: one side answers every MSG with its body.
//!
//! Run with:
//!   BEEPCORE_LOG=debug cargo run --example echo
//!
//! The client channel starts with a small peer window so the request is
//! split across several frames and window updates.

use std::io::Read;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use beepcore::channel::{
    Channel, ChannelConfig, ChannelState, ListenerError, Message, MessageListener, MessageMsg,
    ReplyListener,
};
use beepcore::loopback::pair;

const PROFILE: &str = "http://example.org/beep/echo";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    beepcore::logging::init_from_env();

    let link = pair(512)?;

    let client = Channel::new(
        1,
        PROFILE,
        link.left.clone(),
        ChannelConfig::default().with_peer_window(256),
    )?;
    let server = Channel::new(
        1,
        PROFILE,
        link.right.clone(),
        ChannelConfig::default().with_receive_window(256),
    )?;
    for channel in [&client, &server] {
        channel.set_state(ChannelState::Active)?;
    }
    link.left.register(client.clone());
    link.right.register(server.clone());

    let echo: Arc<dyn MessageListener> =
        Arc::new(|msg: MessageMsg| -> Result<(), ListenerError> {
            let mut body = Vec::new();
            msg.stream()
                .clone()
                .read_to_end(&mut body)
                .map_err(|e| ListenerError::Abort(e.to_string()))?;
            eprintln!("server: MSG {} carried {} bytes", msg.msgno(), body.len());
            msg.send_rpy(body)
                .map_err(|e| ListenerError::Abort(e.to_string()))?;
            Ok(())
        });
    server.set_message_listener(Some(echo));

    let (tx, rx) = mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    let replies: Arc<dyn ReplyListener> = Arc::new(move |reply: Message| {
        let mut body = Vec::new();
        if let Some(stream) = reply.stream() {
            let _ = stream.clone().read_to_end(&mut body);
        }
        let _ = tx.lock().send((reply.msgno(), body));
    });

    let request = "ping ".repeat(200);
    let status = client.send_msg(request.clone().into_bytes(), replies)?;
    let (msgno, body) = rx.recv_timeout(Duration::from_secs(5))?;
    eprintln!(
        "client: {:?} for MSG {msgno}, {} bytes, matches: {}",
        status.wait_final(Duration::from_secs(5)),
        body.len(),
        body == request.as_bytes()
    );

    for frame in link.left.sent_frames() {
        eprintln!(
            "  {} {} {} seq={} size={} last={}",
            frame.message_type.as_str(),
            frame.channel,
            frame.msgno,
            frame.seqno,
            frame.size,
            frame.last
        );
    }

    link.shutdown();
    Ok(())
}
