//! Incremental message decoder
//!
//! Consumes raw bytes exactly as they arrive from the channel and advances
//! a per-message decoding state machine. Chunk boundaries may fall
//! anywhere (inside a length prefix, mid-key, mid-value, or exactly on a
//! message boundary) without affecting the result. The decoder never
//! consumes past the end of the current message, so the caller can frame
//! the next message in a shared read buffer from the number of bytes
//! consumed.

use std::collections::HashMap;

use thiserror::Error;

use super::{DecodeError, MAX_PARAMETERS, MAX_TOKEN_SIZE};

/// Public decoding state of one in-flight message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Reading the command/status name and the parameter count
    AwaitingCommand,
    /// Reading a parameter key
    ReadingParameterKey,
    /// Reading the value belonging to the pending key
    ReadingParameterValue,
    /// A whole message has been decoded; terminal until reset
    AllParametersRead,
}

/// Exact position inside the token stream. Several steps map onto one
/// public `DecodeState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    NameLength,
    NameBytes,
    ParameterCount,
    KeyLength,
    KeyBytes,
    ValueLength,
    ValueBytes,
    Complete,
}

impl Step {
    fn public_state(self) -> DecodeState {
        match self {
            Step::NameLength | Step::NameBytes | Step::ParameterCount => {
                DecodeState::AwaitingCommand
            }
            Step::KeyLength | Step::KeyBytes => DecodeState::ReadingParameterKey,
            Step::ValueLength | Step::ValueBytes => DecodeState::ReadingParameterValue,
            Step::Complete => DecodeState::AllParametersRead,
        }
    }
}

/// A fully decoded message: name token plus parameter map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Command name (requests) or status token (responses)
    pub name: String,
    /// Decoded parameters; duplicate wire keys collapse, last one wins
    pub parameters: HashMap<String, String>,
}

/// Error returned when the parameter map is read before the message is
/// fully decoded. This is a caller bug, surfaced loudly rather than
/// handing out a half-built map.
#[derive(Error, Debug)]
#[error("Parameter map read in state {state:?}; message not fully decoded")]
pub struct ParametersNotReady {
    /// Decoding state at the time of the call
    pub state: DecodeState,
}

/// Incremental decoder for one message at a time
#[derive(Debug)]
pub struct MessageDecoder {
    step: Step,
    poisoned: bool,
    /// Bytes of the token currently being accumulated
    acc: Vec<u8>,
    /// Total bytes the current token requires (4 while reading a length)
    need: usize,
    bytes_consumed: usize,
    name: Option<String>,
    remaining_params: u32,
    pending_key: Option<String>,
    values: HashMap<String, String>,
}

impl MessageDecoder {
    /// Create a decoder ready for the start of a message.
    pub fn new() -> Self {
        Self {
            step: Step::NameLength,
            poisoned: false,
            acc: Vec::new(),
            need: 4,
            bytes_consumed: 0,
            name: None,
            remaining_params: 0,
            pending_key: None,
            values: HashMap::new(),
        }
    }

    /// Current public decoding state.
    pub fn state(&self) -> DecodeState {
        self.step.public_state()
    }

    /// Number of bytes of the current message consumed so far.
    ///
    /// Monotonically non-decreasing; once the state reaches
    /// `AllParametersRead` this is exactly the byte length of the message.
    pub fn bytes_consumed(&self) -> usize {
        self.bytes_consumed
    }

    /// True if no byte of a new message has been consumed yet.
    pub fn is_idle(&self) -> bool {
        self.step == Step::NameLength && self.acc.is_empty()
    }

    /// Feed a chunk of bytes into the decoder.
    ///
    /// Returns how many bytes of `input` belonged to the current message;
    /// the decoder stops consuming at the end of the message, so a return
    /// value smaller than `input.len()` means the remainder starts the
    /// next message and must be re-fed after a reset.
    pub fn feed(&mut self, input: &[u8]) -> Result<usize, DecodeError> {
        if self.poisoned {
            return Err(DecodeError::Poisoned);
        }
        if self.step == Step::Complete {
            return Err(DecodeError::MessageComplete);
        }

        let mut offset = 0;
        while self.step != Step::Complete {
            let missing = self.need - self.acc.len();
            let take = missing.min(input.len() - offset);
            if take < missing && take == 0 {
                // Chunk exhausted mid-token; wait for more data
                break;
            }
            self.acc.extend_from_slice(&input[offset..offset + take]);
            offset += take;
            self.bytes_consumed += take;
            if self.acc.len() == self.need {
                if let Err(e) = self.advance() {
                    self.poisoned = true;
                    return Err(e);
                }
            }
        }
        Ok(offset)
    }

    /// Move to the next step once the current token is complete.
    fn advance(&mut self) -> Result<(), DecodeError> {
        match self.step {
            Step::NameLength => {
                let length = self.take_length("command name", false)?;
                self.step = Step::NameBytes;
                self.need = length;
            }
            Step::NameBytes => {
                self.name = Some(self.take_string("command name")?);
                self.step = Step::ParameterCount;
                self.need = 4;
            }
            Step::ParameterCount => {
                let count = self.take_u32();
                if count > MAX_PARAMETERS {
                    return Err(DecodeError::TooManyParameters {
                        count,
                        limit: MAX_PARAMETERS,
                    });
                }
                self.remaining_params = count;
                if count == 0 {
                    self.step = Step::Complete;
                } else {
                    self.step = Step::KeyLength;
                    self.need = 4;
                }
            }
            Step::KeyLength => {
                let length = self.take_length("parameter key", false)?;
                self.step = Step::KeyBytes;
                self.need = length;
            }
            Step::KeyBytes => {
                self.pending_key = Some(self.take_string("parameter key")?);
                self.step = Step::ValueLength;
                self.need = 4;
            }
            Step::ValueLength => {
                let length = self.take_length("parameter value", true)?;
                if length == 0 {
                    // Empty value: commit the pair without a data token
                    self.commit_value(String::new());
                } else {
                    self.step = Step::ValueBytes;
                    self.need = length;
                }
            }
            Step::ValueBytes => {
                let value = self.take_string("parameter value")?;
                self.commit_value(value);
            }
            Step::Complete => unreachable!("advance called on complete decoder"),
        }
        Ok(())
    }

    fn commit_value(&mut self, value: String) {
        // pending_key is always set by the time a value completes
        if let Some(key) = self.pending_key.take() {
            self.values.insert(key, value);
        }
        self.remaining_params -= 1;
        if self.remaining_params == 0 {
            self.step = Step::Complete;
        } else {
            self.step = Step::KeyLength;
            self.need = 4;
        }
    }

    fn take_u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.acc);
        self.acc.clear();
        u32::from_be_bytes(bytes)
    }

    fn take_length(&mut self, what: &'static str, allow_empty: bool) -> Result<usize, DecodeError> {
        let length = self.take_u32() as usize;
        if length == 0 && !allow_empty {
            return Err(match what {
                "command name" => DecodeError::EmptyCommandName,
                _ => DecodeError::EmptyParameterKey,
            });
        }
        if length > MAX_TOKEN_SIZE {
            return Err(DecodeError::TokenTooLong {
                length,
                limit: MAX_TOKEN_SIZE,
            });
        }
        Ok(length)
    }

    fn take_string(&mut self, what: &'static str) -> Result<String, DecodeError> {
        let bytes = std::mem::take(&mut self.acc);
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { what })
    }

    /// Borrow the completed parameter map.
    ///
    /// Fails unless the decoder has reached `AllParametersRead`; repeated
    /// calls return the same map.
    pub fn values(&self) -> Result<&HashMap<String, String>, ParametersNotReady> {
        if self.step != Step::Complete {
            return Err(ParametersNotReady {
                state: self.state(),
            });
        }
        Ok(&self.values)
    }

    /// Take the completed message and reset the decoder for the next one
    /// on the same connection.
    pub fn take_message(&mut self) -> Result<DecodedMessage, ParametersNotReady> {
        if self.step != Step::Complete {
            return Err(ParametersNotReady {
                state: self.state(),
            });
        }
        let message = DecodedMessage {
            // name is always present once the decoder completed
            name: self.name.take().unwrap_or_default(),
            parameters: std::mem::take(&mut self.values),
        };
        self.reset();
        Ok(message)
    }

    /// Discard all per-message state and start over.
    pub fn reset(&mut self) {
        *self = MessageDecoder::new();
    }
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Request;
    use crate::wire::encode_request;
    use proptest::prelude::*;

    fn sample_message() -> Vec<u8> {
        let request = Request::new("REQUEST_GC").with_parameter("vmId", "42");
        encode_request(&request).unwrap()
    }

    #[test]
    fn test_decode_whole_message_in_one_feed() {
        let bytes = sample_message();
        let mut decoder = MessageDecoder::new();

        let consumed = decoder.feed(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoder.state(), DecodeState::AllParametersRead);
        assert_eq!(decoder.bytes_consumed(), bytes.len());

        let message = decoder.take_message().unwrap();
        assert_eq!(message.name, "REQUEST_GC");
        assert_eq!(message.parameters.get("vmId").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_decode_one_byte_at_a_time() {
        let bytes = sample_message();
        let mut decoder = MessageDecoder::new();

        for byte in &bytes {
            decoder.feed(std::slice::from_ref(byte)).unwrap();
        }
        assert_eq!(decoder.state(), DecodeState::AllParametersRead);

        let message = decoder.take_message().unwrap();
        assert_eq!(message.name, "REQUEST_GC");
        assert_eq!(message.parameters.len(), 1);
    }

    #[test]
    fn test_state_progression() {
        let bytes = sample_message();
        let mut decoder = MessageDecoder::new();
        assert_eq!(decoder.state(), DecodeState::AwaitingCommand);
        assert!(decoder.is_idle());

        // Name length + "REQUEST_GC" + param count = 4 + 10 + 4
        decoder.feed(&bytes[..18]).unwrap();
        assert_eq!(decoder.state(), DecodeState::ReadingParameterKey);
        assert!(!decoder.is_idle());

        // Key length + "vmId" = 4 + 4
        decoder.feed(&bytes[18..26]).unwrap();
        assert_eq!(decoder.state(), DecodeState::ReadingParameterValue);

        decoder.feed(&bytes[26..]).unwrap();
        assert_eq!(decoder.state(), DecodeState::AllParametersRead);
    }

    #[test]
    fn test_zero_parameters_completes_immediately() {
        let bytes = encode_request(&Request::new("ping")).unwrap();
        let mut decoder = MessageDecoder::new();
        decoder.feed(&bytes).unwrap();
        assert_eq!(decoder.state(), DecodeState::AllParametersRead);
        assert!(decoder.values().unwrap().is_empty());
    }

    #[test]
    fn test_values_before_complete_fails() {
        let bytes = sample_message();
        let mut decoder = MessageDecoder::new();
        decoder.feed(&bytes[..10]).unwrap();

        let err = decoder.values().unwrap_err();
        assert_ne!(err.state, DecodeState::AllParametersRead);
        assert!(decoder.take_message().is_err());
    }

    #[test]
    fn test_values_repeatable_after_complete() {
        let bytes = sample_message();
        let mut decoder = MessageDecoder::new();
        decoder.feed(&bytes).unwrap();

        let first = decoder.values().unwrap().clone();
        let second = decoder.values().unwrap().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn test_feed_after_complete_fails_without_reset() {
        let bytes = sample_message();
        let mut decoder = MessageDecoder::new();
        decoder.feed(&bytes).unwrap();

        let err = decoder.feed(&[0]).unwrap_err();
        assert!(matches!(err, DecodeError::MessageComplete));

        decoder.reset();
        assert!(decoder.is_idle());
        decoder.feed(&bytes).unwrap();
        assert_eq!(decoder.state(), DecodeState::AllParametersRead);
    }

    #[test]
    fn test_stops_consuming_at_message_boundary() {
        let first = sample_message();
        let second = encode_request(&Request::new("ping")).unwrap();
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        let mut decoder = MessageDecoder::new();
        let consumed = decoder.feed(&stream).unwrap();
        assert_eq!(consumed, first.len());
        assert_eq!(decoder.bytes_consumed(), first.len());

        let message = decoder.take_message().unwrap();
        assert_eq!(message.name, "REQUEST_GC");

        // Remainder decodes as the next message after the reset
        let consumed = decoder.feed(&stream[consumed..]).unwrap();
        assert_eq!(consumed, second.len());
        assert_eq!(decoder.take_message().unwrap().name, "ping");
    }

    #[test]
    fn test_duplicate_keys_overwrite() {
        let mut bytes = Vec::new();
        let put = |buf: &mut Vec<u8>, s: &str| {
            buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        };
        put(&mut bytes, "set");
        bytes.extend_from_slice(&2u32.to_be_bytes());
        put(&mut bytes, "level");
        put(&mut bytes, "1");
        put(&mut bytes, "level");
        put(&mut bytes, "2");

        let mut decoder = MessageDecoder::new();
        decoder.feed(&bytes).unwrap();
        let message = decoder.take_message().unwrap();
        assert_eq!(message.parameters.len(), 1);
        assert_eq!(message.parameters.get("level").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_empty_command_name_is_malformed() {
        let bytes = 0u32.to_be_bytes();
        let mut decoder = MessageDecoder::new();
        let err = decoder.feed(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyCommandName));

        // Decoder is poisoned afterwards
        let err = decoder.feed(&[0]).unwrap_err();
        assert!(matches!(err, DecodeError::Poisoned));
    }

    #[test]
    fn test_empty_parameter_key_is_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(b"ping");
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes()); // zero-length key

        let mut decoder = MessageDecoder::new();
        let err = decoder.feed(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyParameterKey));
    }

    #[test]
    fn test_oversized_token_is_malformed() {
        let bytes = ((MAX_TOKEN_SIZE as u32) + 1).to_be_bytes();
        let mut decoder = MessageDecoder::new();
        let err = decoder.feed(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::TokenTooLong { .. }));
    }

    #[test]
    fn test_too_many_parameters_is_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(b"ping");
        bytes.extend_from_slice(&(MAX_PARAMETERS + 1).to_be_bytes());

        let mut decoder = MessageDecoder::new();
        let err = decoder.feed(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::TooManyParameters { .. }));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&[0xff, 0xfe]);

        let mut decoder = MessageDecoder::new();
        let err = decoder.feed(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8 { .. }));
    }

    #[test]
    fn test_bytes_consumed_is_monotonic() {
        let bytes = sample_message();
        let mut decoder = MessageDecoder::new();
        let mut last = 0;
        for byte in &bytes {
            decoder.feed(std::slice::from_ref(byte)).unwrap();
            let consumed = decoder.bytes_consumed();
            assert!(consumed >= last);
            last = consumed;
        }
        assert_eq!(last, bytes.len());
    }

    proptest! {
        /// Chunking is transparent: any split of a valid message yields
        /// the same parameter map as decoding it in one call.
        #[test]
        fn prop_chunk_boundaries_do_not_change_result(
            params in proptest::collection::hash_map("[a-zA-Z0-9._-]{1,12}", ".{0,24}", 0..8),
            splits in proptest::collection::vec(0usize..4096, 0..10),
        ) {
            let mut request = Request::new("REQUEST_GC");
            for (key, value) in &params {
                request = request.with_parameter(key.clone(), value.clone());
            }
            let bytes = encode_request(&request).unwrap();

            let mut whole = MessageDecoder::new();
            whole.feed(&bytes).unwrap();
            let expected = whole.take_message().unwrap();

            let mut cuts: Vec<usize> = splits.iter().map(|s| s % (bytes.len() + 1)).collect();
            cuts.sort_unstable();
            cuts.dedup();

            let mut chunked = MessageDecoder::new();
            let mut start = 0;
            for cut in cuts.into_iter().chain(std::iter::once(bytes.len())) {
                if cut > start {
                    chunked.feed(&bytes[start..cut]).unwrap();
                    start = cut;
                }
            }
            let actual = chunked.take_message().unwrap();

            prop_assert_eq!(expected, actual);
        }
    }
}
