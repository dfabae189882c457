//! Wire encoding for command channel messages
//!
//! A message is a length-prefixed token stream; no byte is structural, so
//! separators or `=` inside a value are plain content and no escaping
//! exists. All integers are big-endian `u32`:
//!
//! ```text
//! message    := name-token param-count { parameter }
//! name-token := u32 length, <length> bytes of UTF-8
//!               (command name for requests, "OK"/"ERROR" for responses)
//! param-count:= u32 number of parameters that follow
//! parameter  := u32 key-length, key bytes, u32 value-length, value bytes
//! ```
//!
//! The command name and parameter keys must be non-empty; a value may be
//! empty (which is distinct from the key being absent). The optional
//! request sequence id travels as a reserved `sequence-id` parameter and
//! never appears in the decoded parameter map.

mod decoder;

pub use decoder::{DecodeState, DecodedMessage, MessageDecoder, ParametersNotReady};

use std::collections::HashMap;

use thiserror::Error;

use crate::command::{Request, Response, ResponseStatus};

/// Maximum byte length of a single name, key, or value token
pub const MAX_TOKEN_SIZE: usize = 64 * 1024;

/// Maximum number of parameters in one message
pub const MAX_PARAMETERS: u32 = 1024;

/// Reserved parameter key carrying the request sequence id
pub const SEQUENCE_ID_KEY: &str = "sequence-id";

/// Name token of a successful response
pub const STATUS_OK: &str = "OK";

/// Name token of a failed response
pub const STATUS_ERROR: &str = "ERROR";

/// Errors raised while decoding a message from raw bytes, or while
/// encoding one that the protocol's own limits reject
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The command or status name had zero length
    #[error("Malformed request: empty command name")]
    EmptyCommandName,

    /// A parameter key had zero length
    #[error("Malformed request: empty parameter key")]
    EmptyParameterKey,

    /// A length prefix exceeded the per-token limit
    #[error("Malformed request: token of {length} bytes exceeds limit of {limit} bytes")]
    TokenTooLong {
        /// Declared token length
        length: usize,
        /// Maximum allowed token length
        limit: usize,
    },

    /// The declared parameter count exceeded the per-message limit
    #[error("Malformed request: {count} parameters exceeds limit of {limit}")]
    TooManyParameters {
        /// Declared parameter count
        count: u32,
        /// Maximum allowed parameter count
        limit: u32,
    },

    /// A name, key, or value was not valid UTF-8
    #[error("Malformed request: invalid UTF-8 in {what}")]
    InvalidUtf8 {
        /// Which token contained the invalid bytes
        what: &'static str,
    },

    /// The reserved sequence-id parameter did not hold a decimal integer
    #[error("Malformed request: invalid sequence id '{0}'")]
    InvalidSequenceId(String),

    /// A response name token was neither "OK" nor "ERROR"
    #[error("Malformed response: unknown status token '{0}'")]
    InvalidStatus(String),

    /// `feed` was called after the message completed, without a reset
    #[error("Decoder already holds a complete message; reset before feeding more data")]
    MessageComplete,

    /// `feed` was called after a previous fatal decode error
    #[error("Decoder state corrupted by previous decode error")]
    Poisoned,
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_token(buf: &mut Vec<u8>, token: &str) -> Result<(), DecodeError> {
    if token.len() > MAX_TOKEN_SIZE {
        return Err(DecodeError::TokenTooLong {
            length: token.len(),
            limit: MAX_TOKEN_SIZE,
        });
    }
    put_u32(buf, token.len() as u32);
    buf.extend_from_slice(token.as_bytes());
    Ok(())
}

fn put_parameters(
    buf: &mut Vec<u8>,
    parameters: &HashMap<String, String>,
    sequence_id: Option<u64>,
) -> Result<(), DecodeError> {
    let count = parameters.len() + usize::from(sequence_id.is_some());
    if count > MAX_PARAMETERS as usize {
        return Err(DecodeError::TooManyParameters {
            count: count.min(u32::MAX as usize) as u32,
            limit: MAX_PARAMETERS,
        });
    }
    put_u32(buf, count as u32);
    if let Some(seq) = sequence_id {
        put_token(buf, SEQUENCE_ID_KEY)?;
        put_token(buf, &seq.to_string())?;
    }
    for (key, value) in parameters {
        if key.is_empty() {
            return Err(DecodeError::EmptyParameterKey);
        }
        put_token(buf, key)?;
        put_token(buf, value)?;
    }
    Ok(())
}

/// Encode a request into its wire representation.
///
/// Enforces the same limits the decoder does, so a message that encodes
/// here is never rejected by the peer's decoder.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, DecodeError> {
    if request.command_name.is_empty() {
        return Err(DecodeError::EmptyCommandName);
    }
    let mut buf = Vec::new();
    put_token(&mut buf, &request.command_name)?;
    put_parameters(&mut buf, &request.parameters, request.sequence_id)?;
    Ok(buf)
}

/// Encode a response into its wire representation.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::new();
    let status = match response.status {
        ResponseStatus::Ok => STATUS_OK,
        ResponseStatus::Error => STATUS_ERROR,
    };
    put_token(&mut buf, status)?;
    put_parameters(&mut buf, &response.parameters, None)?;
    Ok(buf)
}

/// Build a request from a fully decoded message.
///
/// Lifts the reserved `sequence-id` parameter out of the map; a duplicate
/// on the wire follows map semantics (last one wins) before the lift.
pub fn request_from(message: DecodedMessage) -> Result<Request, DecodeError> {
    let DecodedMessage {
        name,
        mut parameters,
    } = message;
    let sequence_id = match parameters.remove(SEQUENCE_ID_KEY) {
        Some(raw) => Some(
            raw.parse::<u64>()
                .map_err(|_| DecodeError::InvalidSequenceId(raw))?,
        ),
        None => None,
    };
    Ok(Request {
        command_name: name,
        parameters,
        sequence_id,
    })
}

/// Build a response from a fully decoded message.
///
/// The name token must be one of the two status tokens.
pub fn response_from(message: DecodedMessage) -> Result<Response, DecodeError> {
    let status = match message.name.as_str() {
        STATUS_OK => ResponseStatus::Ok,
        STATUS_ERROR => ResponseStatus::Error,
        other => return Err(DecodeError::InvalidStatus(other.to_string())),
    };
    Ok(Response {
        status,
        parameters: message.parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> DecodedMessage {
        let mut decoder = MessageDecoder::new();
        let consumed = decoder.feed(bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        decoder.take_message().unwrap()
    }

    #[test]
    fn test_request_round_trip() {
        let request = Request::new("REQUEST_GC").with_parameter("vmId", "42");
        let bytes = encode_request(&request).unwrap();
        let decoded = request_from(decode_all(&bytes)).unwrap();

        assert_eq!(decoded.command_name, "REQUEST_GC");
        assert_eq!(decoded.parameters, request.parameters);
        assert_eq!(decoded.sequence_id, None);
    }

    #[test]
    fn test_request_round_trip_with_sequence_id() {
        let request = Request::new("dump-heap")
            .with_parameter("vmId", "1234")
            .with_sequence_id(7);
        let bytes = encode_request(&request).unwrap();
        let decoded = request_from(decode_all(&bytes)).unwrap();

        assert_eq!(decoded.sequence_id, Some(7));
        // The reserved key never surfaces in the parameter map
        assert!(!decoded.parameters.contains_key(SEQUENCE_ID_KEY));
        assert_eq!(decoded.parameters.len(), 1);
    }

    #[test]
    fn test_response_round_trip() {
        let response = Response::error("no such VM");
        let bytes = encode_response(&response).unwrap();
        let decoded = response_from(decode_all(&bytes)).unwrap();

        assert_eq!(decoded.status, ResponseStatus::Error);
        assert_eq!(decoded.parameters, response.parameters);
    }

    #[test]
    fn test_response_rejects_unknown_status_token() {
        let request = Request::new("not-a-status");
        let bytes = encode_request(&request).unwrap();
        let result = response_from(decode_all(&bytes));
        assert!(matches!(result, Err(DecodeError::InvalidStatus(_))));
    }

    #[test]
    fn test_invalid_sequence_id_is_malformed() {
        let request = Request::new("ping").with_parameter(SEQUENCE_ID_KEY, "not-a-number");
        let bytes = encode_request(&request).unwrap();
        let result = request_from(decode_all(&bytes));
        assert!(matches!(result, Err(DecodeError::InvalidSequenceId(_))));
    }

    #[test]
    fn test_empty_value_survives_round_trip() {
        let request = Request::new("set-flag").with_parameter("flag", "");
        let bytes = encode_request(&request).unwrap();
        let decoded = request_from(decode_all(&bytes)).unwrap();
        assert_eq!(decoded.parameters.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_encode_rejects_oversize_value() {
        let request = Request::new("store").with_parameter("blob", "x".repeat(MAX_TOKEN_SIZE + 1));
        let result = encode_request(&request);
        assert!(matches!(result, Err(DecodeError::TokenTooLong { .. })));
    }

    #[test]
    fn test_encode_rejects_too_many_parameters() {
        let mut request = Request::new("store");
        for i in 0..=MAX_PARAMETERS {
            request = request.with_parameter(format!("k{i}"), "v");
        }
        let result = encode_request(&request);
        assert!(matches!(result, Err(DecodeError::TooManyParameters { .. })));
    }

    #[test]
    fn test_encode_rejects_empty_command_name() {
        let result = encode_request(&Request::new(""));
        assert!(matches!(result, Err(DecodeError::EmptyCommandName)));
    }

    #[test]
    fn test_encode_value_at_limit_round_trips() {
        let request = Request::new("store").with_parameter("blob", "x".repeat(MAX_TOKEN_SIZE));
        let bytes = encode_request(&request).unwrap();
        let decoded = request_from(decode_all(&bytes)).unwrap();
        assert_eq!(
            decoded.parameters.get("blob").map(String::len),
            Some(MAX_TOKEN_SIZE)
        );
    }

    #[test]
    fn test_structural_lookalikes_are_literal_content() {
        // Separator-looking bytes inside a value are plain content under
        // length-prefixed framing
        let request = Request::new("store").with_parameter("expr", "a=b\n\0c=d");
        let bytes = encode_request(&request).unwrap();
        let decoded = request_from(decode_all(&bytes)).unwrap();
        assert_eq!(
            decoded.parameters.get("expr").map(String::as_str),
            Some("a=b\n\0c=d")
        );
    }
}
