//! JSON framing for the Home Assistant WebSocket channel.
//!
//! Outbound calls are flat objects: `{"id": N, "type": "<method>", ...params}`.
//! Inbound transport frames hold either one message object or, when the hub
//! coalesces, an array of them.

use serde_json::{Map, Value};

use crate::error::{HaError, HaResult};
use crate::messages::{AuthMessage, Frame, RawMessage};

/// Encode a call envelope. `params` must be a JSON object or null.
pub fn encode_call(id: u64, method: &str, params: &Value) -> HaResult<String> {
    let mut body = match params {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(HaError::Codec(format!(
                "params for '{method}' must be a JSON object, got {}",
                json_kind(other)
            )))
        }
    };
    body.insert("id".into(), Value::from(id));
    body.insert("type".into(), Value::from(method));
    Ok(serde_json::to_string(&Value::Object(body))?)
}

/// Encode the authentication message sent in reply to `auth_required`.
pub fn encode_auth(access_token: &str) -> HaResult<String> {
    Ok(serde_json::to_string(&AuthMessage::new(access_token))?)
}

/// Decode one transport frame into the messages it carries, in order.
///
/// Strict: any undecodable message fails the whole frame.
pub fn decode_frames(text: &str) -> HaResult<Vec<Frame>> {
    split_frames(text)?.into_iter().collect()
}

/// Decode one transport frame, keeping a separate result per message so a
/// bad element of a coalesced array does not take its neighbours with it.
///
/// Fails outright only when the text is not JSON at all.
pub fn split_frames(text: &str) -> HaResult<Vec<HaResult<Frame>>> {
    let value: Value = serde_json::from_str(text)?;
    Ok(match value {
        Value::Array(items) => items.into_iter().map(decode_value).collect(),
        other => vec![decode_value(other)],
    })
}

fn decode_value(value: Value) -> HaResult<Frame> {
    let raw: RawMessage = serde_json::from_value(value)?;
    Frame::try_from(raw)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RemoteErrorInfo;
    use serde_json::json;

    #[test]
    fn call_merges_params() {
        let text = encode_call(
            7,
            "call_service",
            &json!({"domain": "light", "service": "turn_on"}),
        )
        .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            v,
            json!({"id": 7, "type": "call_service", "domain": "light", "service": "turn_on"})
        );
    }

    #[test]
    fn call_envelope_fields_win_over_params() {
        let text = encode_call(2, "get_states", &json!({"id": 99, "type": "bogus"})).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["id"], 2);
        assert_eq!(v["type"], "get_states");
    }

    #[test]
    fn call_without_params() {
        let text = encode_call(1, "ping", &Value::Null).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, json!({"id": 1, "type": "ping"}));
    }

    #[test]
    fn call_rejects_non_object_params() {
        let err = encode_call(1, "ping", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, HaError::Codec(_)));
    }

    #[test]
    fn auth_message_shape() {
        let v: Value = serde_json::from_str(&encode_auth("secret").unwrap()).unwrap();
        assert_eq!(v, json!({"type": "auth", "access_token": "secret"}));
    }

    #[test]
    fn decode_success_result() {
        let frames =
            decode_frames(r#"{"id":4,"type":"result","success":true,"result":{"a":1}}"#).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Result {
                id: 4,
                outcome: Ok(json!({"a": 1}))
            }]
        );
    }

    #[test]
    fn decode_null_result_is_null_payload() {
        let frames =
            decode_frames(r#"{"id":5,"type":"result","success":true,"result":null}"#).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Result {
                id: 5,
                outcome: Ok(Value::Null)
            }]
        );
    }

    #[test]
    fn decode_error_result() {
        let frames = decode_frames(
            r#"{"id":6,"type":"result","success":false,"error":{"code":"not_found","message":"Entity not found"}}"#,
        )
        .unwrap();
        assert_eq!(
            frames,
            vec![Frame::Result {
                id: 6,
                outcome: Err(RemoteErrorInfo {
                    code: "not_found".into(),
                    message: "Entity not found".into()
                })
            }]
        );
    }

    #[test]
    fn decode_event_and_pong() {
        let frames = decode_frames(r#"{"id":8,"type":"event","event":{"result":"on"}}"#).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Event {
                id: 8,
                event: json!({"result": "on"})
            }]
        );

        let frames = decode_frames(r#"{"id":9,"type":"pong"}"#).unwrap();
        assert_eq!(frames, vec![Frame::Pong { id: 9 }]);
    }

    #[test]
    fn decode_coalesced_array_keeps_order() {
        let frames = decode_frames(
            r#"[{"id":1,"type":"event","event":1},{"id":1,"type":"event","event":2},{"id":2,"type":"pong"}]"#,
        )
        .unwrap();
        let ids: Vec<_> = frames.iter().map(Frame::id).collect();
        assert_eq!(ids, vec![Some(1), Some(1), Some(2)]);
        assert_eq!(
            frames[1],
            Frame::Event {
                id: 1,
                event: json!(2)
            }
        );
    }

    #[test]
    fn decode_auth_invalid() {
        let frames =
            decode_frames(r#"{"type":"auth_invalid","message":"Invalid password"}"#).unwrap();
        assert_eq!(
            frames,
            vec![Frame::AuthInvalid {
                message: "Invalid password".into()
            }]
        );
    }

    #[test]
    fn split_keeps_good_messages_next_to_a_bad_one() {
        let text = r#"[{"id":1,"type":"pong"},{"id":2},{"id":3,"type":"result","success":true}]"#;
        let frames = split_frames(text).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Ok(Frame::Pong { id: 1 }));
        assert!(matches!(frames[1], Err(HaError::Codec(_))));
        assert_eq!(
            frames[2],
            Ok(Frame::Result {
                id: 3,
                outcome: Ok(Value::Null)
            })
        );

        assert!(decode_frames(text).is_err());
        assert!(split_frames("[oops").is_err());
    }

    #[test]
    fn decode_garbage_is_codec_error() {
        assert!(matches!(decode_frames("not json"), Err(HaError::Codec(_))));
        assert!(matches!(decode_frames(r#"{"id":1}"#), Err(HaError::Codec(_))));
    }
}
