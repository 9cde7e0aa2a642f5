//!
//! Canonical JSON-RPC 2.0 record, batch framing and message classification.
//!
//! The `id`, `params` and `result` fields are carried as raw JSON tokens
//! ([`RawValue`]) end to end. Ids in particular are never re-parsed into
//! numbers: a request with id `7` answers with id `7`, not `7.0` or `"7"`,
//! and comparisons are byte-wise on the textual token.
//!

use crate::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};
use serde_json::Value;

/// The protocol version accepted and emitted.
pub const VERSION: &str = "2.0";

/// A value of this type can be a JSON-RPC request, notification, successful
/// response or error response; which one it is depends on field presence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "jsonrpc", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Message {
    pub fn call(id: Box<RawValue>, method: impl Into<String>, params: Option<Box<RawValue>>) -> Message {
        Message {
            version: Some(VERSION.to_string()),
            id: Some(id),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Box<RawValue>>) -> Message {
        Message {
            version: Some(VERSION.to_string()),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Parse a request body into messages. A leading `[` (after
    /// insignificant whitespace) selects batch framing; ill-formed batch
    /// elements become empty messages that fail validation downstream
    /// rather than poisoning the whole batch.
    pub fn parse(data: &[u8]) -> Result<(Vec<Message>, bool), serde_json::Error> {
        if is_batch(data) {
            let elements: Vec<&RawValue> = serde_json::from_slice(data)?;
            let messages = elements
                .into_iter()
                .map(|raw| serde_json::from_str(raw.get()).unwrap_or_default())
                .collect();
            Ok((messages, true))
        } else {
            let message = serde_json::from_slice(data)?;
            Ok((vec![message], false))
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    pub fn is_call(&self) -> bool {
        self.has_valid_id() && self.method.is_some()
    }

    pub fn is_response(&self) -> bool {
        self.has_valid_id()
            && self.method.is_none()
            && self.params.is_none()
            && (self.result.is_some() || self.error.is_some())
    }

    /// An id is valid when present and not an object, array or `null`.
    pub fn has_valid_id(&self) -> bool {
        match &self.id {
            Some(id) => {
                let token = id.get();
                !token.starts_with('{') && !token.starts_with('[') && token != "null"
            }
            None => false,
        }
    }
}

/// A response record. Unlike [`Message`], the id is always emitted (`null`
/// when the request id could not be recovered) and exactly one of
/// `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "jsonrpc")]
    pub version: String,
    pub id: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Option<Box<RawValue>>, result: Box<RawValue>) -> Response {
        Response {
            version: VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Box<RawValue>>, error: RpcError) -> Response {
        Response {
            version: VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A server-initiated subscription notice, produced by handlers through the
/// session notifier. On the wire it becomes a notification whose params are
/// `{subscription, result}`.
#[derive(Debug, Clone)]
pub struct SubscriptionNotice {
    /// The subscribing method's name.
    pub method: String,
    /// The subscription token, usually the notifier's id.
    pub subscription: String,
    pub result: Value,
}

impl SubscriptionNotice {
    pub fn new(
        method: impl Into<String>,
        subscription: impl Into<String>,
        result: Value,
    ) -> SubscriptionNotice {
        SubscriptionNotice {
            method: method.into(),
            subscription: subscription.into(),
            result,
        }
    }

    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        let params = SubscriptionParams {
            subscription: Value::String(self.subscription.clone()),
            result: Some(to_raw_value(&self.result)?),
        };
        Ok(Message::notification(
            self.method.clone(),
            Some(to_raw_value(&params)?),
        ))
    }
}

/// The params payload of a subscription notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
}

/// Returns true when the first significant byte is `[` (insignificant
/// whitespace per RFC 4627).
fn is_batch(data: &[u8]) -> bool {
    for c in data {
        match c {
            0x20 | 0x09 | 0x0a | 0x0d => continue,
            c => return *c == b'[',
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::METHOD_NOT_FOUND;

    #[test]
    fn parse_single_object() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"rpc.Add","params":{"a":100,"b":200}}"#;
        let (messages, batch) = Message::parse(body).unwrap();
        assert!(!batch);
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert!(msg.is_call());
        assert_eq!(msg.method.as_deref(), Some("rpc.Add"));
        assert_eq!(msg.id.as_ref().unwrap().get(), "1");
    }

    #[test]
    fn parse_batch_with_leading_whitespace() {
        let body = b" \t\r\n [{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"a.b\"}]";
        let (messages, batch) = Message::parse(body).unwrap();
        assert!(batch);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn parse_empty_batch() {
        let (messages, batch) = Message::parse(b"[]").unwrap();
        assert!(batch);
        assert!(messages.is_empty());
    }

    #[test]
    fn ill_formed_batch_element_becomes_empty_message() {
        let (messages, batch) = Message::parse(br#"[42, {"jsonrpc":"2.0","id":1,"method":"a.b"}]"#).unwrap();
        assert!(batch);
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].is_call());
        assert!(messages[1].is_call());
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        assert!(Message::parse(b"{not json").is_err());
    }

    #[test]
    fn id_token_is_preserved_verbatim() {
        // a 64-bit id that would lose precision through f64
        let body = br#"{"jsonrpc":"2.0","id":9007199254740993,"method":"x.y"}"#;
        let (messages, _) = Message::parse(body).unwrap();
        let id = messages[0].id.clone();
        assert_eq!(id.as_ref().unwrap().get(), "9007199254740993");

        let response = Response::failure(id, RpcError::system(METHOD_NOT_FOUND, None));
        let encoded = serde_json::to_string(&response).unwrap();
        assert!(encoded.contains(r#""id":9007199254740993"#));
    }

    #[test]
    fn string_id_stays_a_string() {
        let body = br#"{"jsonrpc":"2.0","id":"7","method":"x.y"}"#;
        let (messages, _) = Message::parse(body).unwrap();
        assert_eq!(messages[0].id.as_ref().unwrap().get(), "\"7\"");
    }

    #[test]
    fn valid_id_rules() {
        for (id, valid) in [
            (r#"1"#, true),
            (r#""x""#, true),
            (r#"null"#, false),
            (r#"{}"#, false),
            (r#"[1]"#, false),
        ] {
            let body = format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"a.b"}}"#);
            let (messages, _) = Message::parse(body.as_bytes()).unwrap();
            assert_eq!(messages[0].has_valid_id(), valid, "id {id}");
        }
    }

    #[test]
    fn absent_params_do_not_round_trip_as_null() {
        let msg = Message::call(to_raw_value(&1).unwrap(), "a.b", None);
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(!encoded.contains("params"));
    }

    #[test]
    fn response_id_null_when_absent() {
        let response = Response::failure(None, RpcError::system(crate::error::PARSE_ERROR, None));
        let encoded = serde_json::to_string(&response).unwrap();
        assert!(encoded.contains(r#""id":null"#));
    }

    #[test]
    fn classification_predicates() {
        let (messages, _) =
            Message::parse(br#"{"jsonrpc":"2.0","method":"tick","params":{}}"#).unwrap();
        assert!(messages[0].is_notification());
        assert!(!messages[0].is_call());

        let (messages, _) = Message::parse(br#"{"jsonrpc":"2.0","id":3,"result":42}"#).unwrap();
        assert!(messages[0].is_response());
    }

    #[test]
    fn subscription_notice_shape() {
        let notice = SubscriptionNotice::new("Sub", "0x5e", serde_json::json!({"dt": "now"}));
        let msg = notice.to_message().unwrap();
        let encoded = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            encoded,
            r#"{"jsonrpc":"2.0","method":"Sub","params":{"subscription":"0x5e","result":{"dt":"now"}}}"#
        );
    }
}
