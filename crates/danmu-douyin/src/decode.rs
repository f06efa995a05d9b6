//! Push frame decoding: envelope, gzip, message batch, typed payloads.

use std::io::Read;

use flate2::read::GzDecoder;
use prost::Message as _;

use danmu_core::error::DecodeError;
use danmu_core::event::{
    normalize_timestamp_ms, Chat, EventBody, EventKind, Gift, Like, LiveEvent, Member, Social,
    User,
};

use crate::gift;
use crate::proto;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on an inflated message batch.
pub const MAX_INFLATED: u64 = 8 * 1024 * 1024;

pub const PAYLOAD_TYPE_ACK: &str = "ack";
pub const PAYLOAD_TYPE_HEARTBEAT: &str = "hb";

/// Heartbeat frame written on the push socket.
pub fn heartbeat_frame() -> Vec<u8> {
    proto::PushFrame {
        payload_type: PAYLOAD_TYPE_HEARTBEAT.into(),
        ..Default::default()
    }
    .encode_to_vec()
}

/// Ack for a frame whose batch asked for one.
pub fn ack_frame(frame: &proto::PushFrame, response: &proto::Response) -> Option<Vec<u8>> {
    response.need_ack.then(|| {
        proto::PushFrame {
            log_id: frame.log_id,
            payload_type: PAYLOAD_TYPE_ACK.into(),
            payload: response.internal_ext.as_bytes().to_vec(),
            ..Default::default()
        }
        .encode_to_vec()
    })
}

pub fn push_frame(raw: &[u8]) -> Result<proto::PushFrame, DecodeError> {
    proto::PushFrame::decode(raw).map_err(|e| DecodeError::Frame(e.to_string()))
}

/// Inflate and decode a frame's message batch.
pub fn response(frame: &proto::PushFrame) -> Result<proto::Response, DecodeError> {
    let gzipped =
        frame.header("compress_type") == Some("gzip") || frame.payload.starts_with(&GZIP_MAGIC);
    let decoded = if gzipped {
        let out = inflate(&frame.payload, MAX_INFLATED)?;
        proto::Response::decode(out.as_slice())
    } else {
        proto::Response::decode(frame.payload.as_slice())
    };
    decoded.map_err(|e| DecodeError::Frame(format!("response: {e}")))
}

fn inflate(gzipped: &[u8], limit: u64) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(gzipped.len() * 2);
    GzDecoder::new(gzipped)
        .take(limit + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Decompress(e.to_string()))?;
    if out.len() as u64 > limit {
        return Err(DecodeError::Decompress(format!(
            "inflated payload exceeds {limit} bytes"
        )));
    }
    Ok(out)
}

/// Normalise one wire message.
pub fn event(msg: &proto::Message) -> Result<LiveEvent, DecodeError> {
    let payload = msg.payload.as_slice();
    let bad = |e: prost::DecodeError| DecodeError::Payload {
        method: msg.method.clone(),
        reason: e.to_string(),
    };

    let (common, body) = match EventKind::from_method(&msg.method) {
        EventKind::Chat => {
            let m = proto::ChatMessage::decode(payload).map_err(bad)?;
            let body = EventBody::Chat(Chat {
                user: user(m.user.as_ref()),
                content: m.content,
                event_time_ms: timestamp_ms(m.event_time),
            });
            (m.common, body)
        }
        EventKind::Gift => {
            let m = proto::GiftMessage::decode(payload).map_err(bad)?;
            let body = EventBody::Gift(gift_event(&m));
            (m.common, body)
        }
        EventKind::Like => {
            let m = proto::LikeMessage::decode(payload).map_err(bad)?;
            let body = EventBody::Like(Like {
                user: user(m.user.as_ref()),
                count: m.count,
                total: m.total,
            });
            (m.common, body)
        }
        EventKind::Member => {
            let m = proto::MemberMessage::decode(payload).map_err(bad)?;
            let body = EventBody::Member(Member {
                user: user(m.user.as_ref()),
                member_count: m.member_count,
            });
            (m.common, body)
        }
        EventKind::Social => {
            let m = proto::SocialMessage::decode(payload).map_err(bad)?;
            let body = EventBody::Social(Social {
                user: user(m.user.as_ref()),
                action: m.action,
                follow_count: m.follow_count,
            });
            (m.common, body)
        }
        EventKind::Unknown => (
            None,
            EventBody::Unknown {
                payload: msg.payload.clone(),
            },
        ),
    };

    Ok(LiveEvent {
        msg_id: msg.msg_id as u64,
        method: msg.method.clone(),
        room_id: common.as_ref().map_or(0, |c| c.room_id),
        created_at_ms: common.as_ref().and_then(|c| timestamp_ms(c.create_time)),
        body,
    })
}

fn gift_event(m: &proto::GiftMessage) -> Gift {
    let detail = m.gift.clone().unwrap_or_default();
    let combo = m
        .common
        .as_ref()
        .and_then(|c| c.display_text.as_ref())
        .and_then(gift::combo_from_display)
        .or((m.combo_count > 0).then_some(m.combo_count));

    Gift {
        user: user(m.user.as_ref()),
        to_user: m.to_user.as_ref().map(|u| user(Some(u))),
        gift_id: m.gift_id,
        diamond_count: u64::from(detail.diamond_count) + gift::diamond_bonus(&detail.name),
        gift_name: detail.name,
        repeat_count: m.repeat_count,
        combo_count: combo,
        repeat_end: m.repeat_end == 1,
        describe: m
            .common
            .as_ref()
            .map(|c| c.describe.clone())
            .unwrap_or_default(),
        image_url: detail.image.and_then(|i| i.url_list.into_iter().next()),
    }
}

fn user(u: Option<&proto::User>) -> User {
    u.map(|u| User {
        id: u.id,
        display_id: u.display_id.clone(),
        nickname: u.nick_name.clone(),
    })
    .unwrap_or_default()
}

/// Zero means the platform left the field unset.
fn timestamp_ms(ts: u64) -> Option<u64> {
    (ts > 0).then(|| normalize_timestamp_ms(ts))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    pub(crate) fn wire(method: &str, msg_id: i64, payload: impl prost::Message) -> proto::Message {
        proto::Message {
            method: method.into(),
            payload: payload.encode_to_vec(),
            msg_id,
            msg_type: 0,
        }
    }

    pub(crate) fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    pub(crate) fn frame(messages: Vec<proto::Message>, need_ack: bool) -> proto::PushFrame {
        let response = proto::Response {
            messages_list: messages,
            internal_ext: "ext-cursor".into(),
            need_ack,
            ..Default::default()
        };
        proto::PushFrame {
            log_id: 99,
            headers_list: vec![proto::PushHeader {
                key: "compress_type".into(),
                value: "gzip".into(),
            }],
            payload_type: "msg".into(),
            payload: gzip(&response.encode_to_vec()),
            ..Default::default()
        }
    }

    fn speaker() -> proto::User {
        proto::User {
            id: 7,
            nick_name: "alice".into(),
            display_id: "alice01".into(),
            ..Default::default()
        }
    }

    #[test]
    fn chat_message_with_seconds_timestamp() {
        let msg = wire(
            "WebcastChatMessage",
            11,
            proto::ChatMessage {
                common: Some(proto::Common {
                    room_id: 555,
                    ..Default::default()
                }),
                user: Some(speaker()),
                content: "hello".into(),
                event_time: 1_700_000_000,
            },
        );
        let ev = event(&msg).unwrap();
        assert_eq!(ev.msg_id, 11);
        assert_eq!(ev.room_id, 555);
        let EventBody::Chat(chat) = ev.body.clone() else {
            panic!("expected chat");
        };
        assert_eq!(chat.user.nickname, "alice");
        assert_eq!(chat.content, "hello");
        assert_eq!(chat.event_time_ms, Some(1_700_000_000_000));
        assert_eq!(ev.created_at_ms, None);
    }

    #[test]
    fn member_message_keeps_creation_time() {
        let msg = wire(
            "WebcastMemberMessage",
            13,
            proto::MemberMessage {
                common: Some(proto::Common {
                    room_id: 555,
                    create_time: 1_700_000_456_789,
                    ..Default::default()
                }),
                user: Some(speaker()),
                member_count: 321,
            },
        );
        let ev = event(&msg).unwrap();
        assert_eq!(ev.room_id, 555);
        assert_eq!(ev.created_at_ms, Some(1_700_000_456_789));
        let EventBody::Member(m) = ev.body else {
            panic!("expected member");
        };
        assert_eq!(m.member_count, 321);
        assert_eq!(m.user.display_id, "alice01");
    }

    #[test]
    fn gift_message_is_enriched() {
        let msg = wire(
            "WebcastGiftMessage",
            12,
            proto::GiftMessage {
                common: Some(proto::Common {
                    create_time: 1_700_000_123,
                    describe: "alice: 送出 钻石火箭".into(),
                    display_text: Some(proto::Text {
                        default_pattern: "{0:user}{1:gift}{2:string}".into(),
                        pieces: ["alice", "钻石火箭", "x2"]
                            .iter()
                            .map(|s| proto::TextPiece {
                                r#type: 1,
                                string_value: (*s).into(),
                            })
                            .collect(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                gift_id: 3,
                repeat_count: 1,
                user: Some(speaker()),
                repeat_end: 1,
                gift: Some(proto::GiftStruct {
                    name: "钻石火箭".into(),
                    diamond_count: 0,
                    image: Some(proto::Image {
                        url_list: vec!["https://img/1.png".into(), "https://img/2.png".into()],
                        uri: String::new(),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let ev = event(&msg).unwrap();
        assert_eq!(ev.created_at_ms, Some(1_700_000_123_000));
        let EventBody::Gift(g) = ev.body else {
            panic!("expected gift");
        };
        assert_eq!(g.diamond_count, 10001);
        assert_eq!(g.combo_count, Some(2));
        assert_eq!(g.total_diamonds(), 20002);
        assert!(g.repeat_end);
        assert!(g.to_user.is_none());
        assert_eq!(g.image_url.as_deref(), Some("https://img/1.png"));
        assert_eq!(g.describe, "alice: 送出 钻石火箭");
    }

    #[test]
    fn unknown_method_keeps_payload() {
        let msg = proto::Message {
            method: "WebcastRoomStatsMessage".into(),
            payload: vec![1, 2, 3],
            msg_id: 5,
            msg_type: 0,
        };
        let ev = event(&msg).unwrap();
        assert_eq!(ev.body, EventBody::Unknown { payload: vec![1, 2, 3] });
    }

    #[test]
    fn malformed_payload_names_method() {
        let msg = proto::Message {
            method: "WebcastLikeMessage".into(),
            payload: vec![0xff, 0xff, 0xff],
            msg_id: 5,
            msg_type: 0,
        };
        match event(&msg) {
            Err(DecodeError::Payload { method, .. }) => assert_eq!(method, "WebcastLikeMessage"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn gzipped_response_and_ack() {
        let f = frame(vec![wire("WebcastLikeMessage", 1, proto::LikeMessage::default())], true);
        let parsed = push_frame(&f.encode_to_vec()).unwrap();
        let resp = response(&parsed).unwrap();
        assert_eq!(resp.messages_list.len(), 1);

        let ack = proto::PushFrame::decode(ack_frame(&parsed, &resp).unwrap().as_slice()).unwrap();
        assert_eq!(ack.log_id, 99);
        assert_eq!(ack.payload_type, "ack");
        assert_eq!(ack.payload, b"ext-cursor");
    }

    #[test]
    fn no_ack_unless_requested() {
        let f = frame(vec![], false);
        let resp = response(&f).unwrap();
        assert!(ack_frame(&f, &resp).is_none());
    }

    #[test]
    fn corrupt_gzip_is_a_decompress_error() {
        let f = proto::PushFrame {
            headers_list: vec![proto::PushHeader {
                key: "compress_type".into(),
                value: "gzip".into(),
            }],
            payload: vec![0x1f, 0x8b, 0, 0, 1],
            ..Default::default()
        };
        assert!(matches!(response(&f), Err(DecodeError::Decompress(_))));
    }

    #[test]
    fn inflation_is_capped() {
        let big = gzip(&vec![0u8; 4096]);
        assert!(big.len() < 100);
        assert_eq!(inflate(&big, 4096).unwrap().len(), 4096);
        match inflate(&big, 4095) {
            Err(DecodeError::Decompress(reason)) => assert!(reason.contains("4095")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn heartbeat_is_an_hb_push_frame() {
        let hb = proto::PushFrame::decode(heartbeat_frame().as_slice()).unwrap();
        assert_eq!(hb.payload_type, "hb");
        assert!(hb.payload.is_empty());
    }
}
