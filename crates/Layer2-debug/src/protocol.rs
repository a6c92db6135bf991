//! Debug adapter wire format: Content-Length framed JSON messages

use serde_json::{json, Value};
use tether_foundation::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

const CONTENT_LENGTH: &str = "content-length:";

/// Encode one message with its header
pub fn encode_message(message: &Value) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    let mut framed = format!("Content-Length: {}\r\n\r\n", payload.len()).into_bytes();
    framed.extend_from_slice(&payload);
    Ok(framed)
}

/// Read one message. `Ok(None)` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            if saw_header {
                return Err(Error::Transport("Stream ended inside a message header".into()));
            }
            return Ok(None);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if saw_header {
                break;
            }
            // Stray blank line between messages
            continue;
        }
        saw_header = true;
        if line.to_ascii_lowercase().starts_with(CONTENT_LENGTH) {
            let value = line[CONTENT_LENGTH.len()..].trim();
            content_length = Some(value.parse().map_err(|_| {
                Error::Transport(format!("Invalid Content-Length: {}", value))
            })?);
        }
    }

    let len = content_length
        .ok_or_else(|| Error::Transport("Missing Content-Length header".into()))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Kind of an incoming message
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        request_seq: i64,
        success: bool,
        command: String,
        message: Option<String>,
        body: Value,
    },
    Event(Value),
    /// Reverse request from the adapter (e.g. `runInTerminal`)
    Request {
        seq: i64,
        command: String,
    },
    Unknown,
}

impl Incoming {
    pub fn classify(message: &Value) -> Self {
        let str_field = |key: &str| message.get(key).and_then(Value::as_str).map(str::to_string);
        match message.get("type").and_then(Value::as_str) {
            Some("response") => Incoming::Response {
                request_seq: message.get("request_seq").and_then(Value::as_i64).unwrap_or(-1),
                success: message.get("success").and_then(Value::as_bool).unwrap_or(false),
                command: str_field("command").unwrap_or_default(),
                message: str_field("message"),
                body: message.get("body").cloned().unwrap_or(Value::Null),
            },
            Some("request") => Incoming::Request {
                seq: message.get("seq").and_then(Value::as_i64).unwrap_or(-1),
                command: str_field("command").unwrap_or_default(),
            },
            Some("event") => Incoming::Event(message.clone()),
            _ => Incoming::Unknown,
        }
    }
}

pub fn request_message(seq: i64, command: &str, arguments: Value) -> Value {
    json!({
        "seq": seq,
        "type": "request",
        "command": command,
        "arguments": arguments,
    })
}

/// Refusal for reverse requests the engine does not serve
pub fn error_response(seq: i64, request_seq: i64, command: &str, message: &str) -> Value {
    json!({
        "seq": seq,
        "type": "response",
        "request_seq": request_seq,
        "success": false,
        "command": command,
        "message": message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_encode_then_read() {
        let message = request_message(1, "threads", Value::Null);
        let mut framed = encode_message(&message).unwrap();
        framed.extend(encode_message(&json!({ "type": "event", "event": "initialized" })).unwrap());

        let mut reader = &framed[..];
        assert_eq!(read_message(&mut reader).await.unwrap(), Some(message));
        let second = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(second["event"], "initialized");
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_header_case_and_extra_headers() {
        let body = r#"{"type":"event","event":"terminated"}"#;
        let raw = format!(
            "content-length: {}\r\nContent-Type: application/json\r\n\r\n{}",
            body.len(),
            body
        );
        let mut reader = raw.as_bytes();
        let message = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(message["event"], "terminated");
    }

    #[tokio::test]
    async fn test_missing_length_is_error() {
        let mut reader = &b"X-Other: 1\r\n\r\n{}"[..];
        assert!(matches!(
            read_message(&mut reader).await,
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn test_classify() {
        let response = Incoming::classify(&json!({
            "seq": 5, "type": "response", "request_seq": 2, "success": false,
            "command": "evaluate", "message": "not available"
        }));
        assert_eq!(
            response,
            Incoming::Response {
                request_seq: 2,
                success: false,
                command: "evaluate".into(),
                message: Some("not available".into()),
                body: Value::Null,
            }
        );

        assert_eq!(
            Incoming::classify(&json!({ "seq": 7, "type": "request", "command": "runInTerminal" })),
            Incoming::Request {
                seq: 7,
                command: "runInTerminal".into()
            }
        );
        assert_eq!(Incoming::classify(&json!({})), Incoming::Unknown);
    }
}
