//! Two channels wired back to back through the loopback session.

use std::io::Read;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use beepcore::channel::{
    BeepError, Channel, ChannelConfig, ChannelError, ChannelState, DeliveryStatus, ListenerError,
    Message, MessageListener, MessageMsg, ProtocolViolation, ReplyListener, Session,
};
use beepcore::frame::{Frame, MessageType, OutboundStream};
use beepcore::loopback::{pair, Loopback, LoopbackSession};
use bytes::Bytes;
use parking_lot::Mutex;

const TIMEOUT: Duration = Duration::from_secs(5);

fn open(session: &Arc<LoopbackSession>, config: ChannelConfig) -> Channel {
    let channel = Channel::new(1, "urn:beepcore:test", session.clone(), config).unwrap();
    channel.set_state(ChannelState::Active).unwrap();
    session.register(channel.clone());
    channel
}

fn connected(
    max_frame: usize,
    left: ChannelConfig,
    right: ChannelConfig,
) -> (Loopback, Channel, Channel) {
    beepcore::logging::init_from_env();
    let link = pair(max_frame).unwrap();
    let a = open(&link.left, left);
    let b = open(&link.right, right);
    (link, a, b)
}

fn defaults(max_frame: usize) -> (Loopback, Channel, Channel) {
    connected(max_frame, ChannelConfig::default(), ChannelConfig::default())
}

/// Answers every request with RPY carrying the request body.
fn echo() -> Arc<dyn MessageListener> {
    Arc::new(|msg: MessageMsg| -> Result<(), ListenerError> {
        let mut body = Vec::new();
        msg.stream()
            .clone()
            .read_to_end(&mut body)
            .map_err(|e| ListenerError::Abort(e.to_string()))?;
        msg.send_rpy(body)
            .map_err(|e| ListenerError::Abort(e.to_string()))?;
        Ok(())
    })
}

/// Reply listener that forwards each completed reply body.
fn collect() -> (Arc<dyn ReplyListener>, mpsc::Receiver<(MessageType, Option<u32>, Bytes)>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let listener: Arc<dyn ReplyListener> = Arc::new(move |message: Message| {
        let body = match message.stream() {
            Some(stream) => {
                let mut body = Vec::new();
                let _ = stream.clone().read_to_end(&mut body);
                Bytes::from(body)
            }
            None => Bytes::new(),
        };
        let _ = tx
            .lock()
            .send((message.message_type(), message.ansno(), body));
    });
    (listener, rx)
}

#[test]
fn echo_round_trip() {
    let (_link, a, b) = defaults(4096);
    b.set_message_listener(Some(echo()));

    let (replies, rx) = collect();
    let status = a.send_msg("hello", replies).unwrap();

    let (kind, _, body) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(kind, MessageType::Rpy);
    assert_eq!(body, Bytes::from("hello"));
    assert_eq!(status.wait_final(TIMEOUT), DeliveryStatus::ReplyReceived);
}

#[test]
fn peer_window_bounds_every_frame() {
    let (link, a, b) = connected(
        1000,
        ChannelConfig::default().with_peer_window(100),
        ChannelConfig::default().with_receive_window(100),
    );
    b.set_message_listener(Some(echo()));

    let (replies, rx) = collect();
    let body = vec![0x5au8; 250];
    a.send_msg(body.clone(), replies).unwrap();

    let (_, _, echoed) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(echoed.len(), 250);

    let msg_frames: Vec<_> = link
        .left
        .sent_frames()
        .into_iter()
        .filter(|f| f.message_type == MessageType::Msg)
        .collect();
    assert!(msg_frames.len() >= 3);
    assert_eq!(msg_frames[0].size, 100);
    assert!(msg_frames.iter().all(|f| f.size <= 100));
    assert_eq!(msg_frames.iter().map(|f| f.size).sum::<usize>(), 250);
    assert_eq!(msg_frames.iter().filter(|f| f.last).count(), 1);
    assert!(msg_frames.last().unwrap().last);

    let mut expected_seqno = 0;
    for frame in &msg_frames {
        assert_eq!(frame.seqno, expected_seqno);
        expected_seqno += frame.size as u64;
    }
}

#[test]
fn pipelined_requests_answered_in_order() {
    let (_link, a, b) = defaults(4096);
    b.set_message_listener(Some(echo()));

    let (replies, rx) = collect();
    let statuses: Vec<_> = ["one", "two", "three"]
        .into_iter()
        .map(|body| a.send_msg(body, replies.clone()).unwrap())
        .collect();
    assert_eq!(
        statuses.iter().map(|s| s.msgno()).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let bodies: Vec<_> = (0..3)
        .map(|_| rx.recv_timeout(TIMEOUT).unwrap().2)
        .collect();
    assert_eq!(bodies, vec!["one", "two", "three"]);
    for status in &statuses {
        assert_eq!(status.wait_final(TIMEOUT), DeliveryStatus::ReplyReceived);
    }
}

#[test]
fn requests_reach_listener_one_at_a_time() {
    let (_link, a, b) = defaults(4096);
    let (seen_tx, seen_rx) = mpsc::channel();
    let seen_tx = Mutex::new(seen_tx);
    let held = Arc::new(Mutex::new(Vec::new()));
    let holder = Arc::clone(&held);
    let listener: Arc<dyn MessageListener> =
        Arc::new(move |msg: MessageMsg| -> Result<(), ListenerError> {
            let _ = seen_tx.lock().send(msg.msgno());
            holder.lock().push(msg);
            Ok(())
        });
    b.set_message_listener(Some(listener));

    let (replies, rx) = collect();
    a.send_msg("first", replies.clone()).unwrap();
    a.send_msg("second", replies).unwrap();

    assert_eq!(seen_rx.recv_timeout(TIMEOUT).unwrap(), 1);
    assert!(seen_rx.recv_timeout(Duration::from_millis(200)).is_err());

    let first = held.lock().remove(0);
    first.send_rpy("done").unwrap();
    assert_eq!(seen_rx.recv_timeout(TIMEOUT).unwrap(), 2);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().2, Bytes::from("done"));
}

#[test]
fn answers_precede_nul() {
    let (_link, a, b) = defaults(16);
    let listener: Arc<dyn MessageListener> =
        Arc::new(|msg: MessageMsg| -> Result<(), ListenerError> {
            let abort = |e: ChannelError| ListenerError::Abort(e.to_string());
            for answer in ["alpha answer, long enough to span frames", "beta", "gamma"] {
                msg.send_ans(answer).map_err(abort)?;
            }
            msg.send_nul().map_err(abort)?;
            Ok(())
        });
    b.set_message_listener(Some(listener));

    let (replies, rx) = collect();
    let status = a.send_msg("query", replies).unwrap();

    let received: Vec<_> = (0..4).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
    assert_eq!(
        received,
        vec![
            (
                MessageType::Ans,
                Some(0),
                Bytes::from("alpha answer, long enough to span frames")
            ),
            (MessageType::Ans, Some(1), Bytes::from("beta")),
            (MessageType::Ans, Some(2), Bytes::from("gamma")),
            (MessageType::Nul, None, Bytes::new()),
        ]
    );
    assert_eq!(status.wait_final(TIMEOUT), DeliveryStatus::ReplyReceived);
}

#[test]
fn empty_message_round_trip() {
    let (link, a, b) = defaults(4096);
    b.set_message_listener(Some(echo()));

    let (replies, rx) = collect();
    a.send_msg(OutboundStream::empty(), replies).unwrap();

    let (kind, _, body) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(kind, MessageType::Rpy);
    assert!(body.is_empty());

    let frames = link.left.sent_frames();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].last);
    assert_eq!(frames[0].size, 0);
}

#[test]
fn err_reply_reported() {
    let (_link, a, b) = defaults(4096);
    let listener: Arc<dyn MessageListener> =
        Arc::new(|_: MessageMsg| -> Result<(), ListenerError> {
            Err(BeepError::with_diagnostic(550, "not today").into())
        });
    b.set_message_listener(Some(listener));

    let (replies, rx) = collect();
    let status = a.send_msg("anything", replies).unwrap();
    let (kind, _, body) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(kind, MessageType::Err);
    assert_eq!(body, Bytes::from("<error code='550'>not today</error>"));
    assert_eq!(status.wait_final(TIMEOUT), DeliveryStatus::ErrorReceived);
}

#[test]
fn sequence_gap_terminates_session() {
    let (link, _a, b) = defaults(4096);
    b.set_message_listener(Some(echo()));

    let frame = Frame::new(MessageType::Msg, 1, 1, None, 42, true).with_payload("late");
    let err = b.post_frame(frame).unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(ProtocolViolation::SequenceMismatch {
            expected: 0,
            actual: 42
        })
    ));
    assert_eq!(b.state(), ChannelState::Aborted);
    assert!(link.right.terminated().is_some());
    let nul = Frame::new(MessageType::Nul, 1, 1, None, 0, true);
    assert!(link.right.send_frame(nul).is_err());
}

#[test]
fn control_channels_exchange_greetings() {
    beepcore::logging::init_from_env();
    let link = pair(4096).unwrap();

    let (left_greeting, left_rx) = collect();
    let (right_greeting, right_rx) = collect();
    let left = Channel::new_control(link.left.clone(), ChannelConfig::default(), left_greeting);
    let right =
        Channel::new_control(link.right.clone(), ChannelConfig::default(), right_greeting);
    link.left.register(left.clone());
    link.right.register(right.clone());

    left.current_request()
        .unwrap()
        .send_rpy("<greeting from='left' />")
        .unwrap();
    right
        .current_request()
        .unwrap()
        .send_rpy("<greeting from='right' />")
        .unwrap();

    assert_eq!(
        left_rx.recv_timeout(TIMEOUT).unwrap().2,
        Bytes::from("<greeting from='right' />")
    );
    assert_eq!(
        right_rx.recv_timeout(TIMEOUT).unwrap().2,
        Bytes::from("<greeting from='left' />")
    );

    right.set_message_listener(Some(echo()));
    let (replies, rx) = collect();
    let status = left.send_msg("<start number='1' />", replies).unwrap();
    assert_eq!(status.msgno(), 1);
    assert_eq!(
        rx.recv_timeout(TIMEOUT).unwrap().2,
        Bytes::from("<start number='1' />")
    );
}
