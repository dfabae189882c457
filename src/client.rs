//! Client side of the command channel
//!
//! Used by external control tools (and the integration tests) to send
//! requests to a running agent and wait for the matching response.
//! Requests on one connection are answered strictly in order, so a
//! round trip is send-then-read-until-complete.

use tracing::debug;

use crate::channel::{ChannelError, MessageChannel};
use crate::command::{Request, Response};
use crate::config::TransportConfig;
use crate::error::AgentError;
use crate::wire::{self, DecodeState, MessageDecoder};

/// A connected command channel client
pub struct CommandClient {
    channel: MessageChannel,
    decoder: MessageDecoder,
    /// Bytes received past the end of the previous response
    backlog: Vec<u8>,
}

impl CommandClient {
    /// Connect to the configured endpoint.
    pub async fn connect(config: &TransportConfig) -> Result<Self, ChannelError> {
        let channel = MessageChannel::connect(config).await?;
        debug!("Connected to command channel endpoint '{}'", config.endpoint_name);
        Ok(Self {
            channel,
            decoder: MessageDecoder::new(),
            backlog: Vec::new(),
        })
    }

    /// Send one request and wait for its response.
    pub async fn execute(&mut self, request: &Request) -> Result<Response, AgentError> {
        self.channel.send(&wire::encode_request(request)?).await?;

        loop {
            if !self.backlog.is_empty() {
                let buffered = std::mem::take(&mut self.backlog);
                if let Some(response) = self.consume(&buffered)? {
                    return Ok(response);
                }
                continue;
            }

            let chunk = self
                .channel
                .receive()
                .await?
                .ok_or(ChannelError::Closed)?;
            if let Some(response) = self.consume(&chunk)? {
                return Ok(response);
            }
        }
    }

    /// Feed received bytes into the decoder; on completion, save any
    /// surplus for the next round trip and build the response.
    fn consume(&mut self, chunk: &[u8]) -> Result<Option<Response>, AgentError> {
        let consumed = self.decoder.feed(chunk)?;
        if self.decoder.state() != DecodeState::AllParametersRead {
            return Ok(None);
        }
        self.backlog.extend_from_slice(&chunk[consumed..]);
        match self.decoder.take_message() {
            Ok(message) => Ok(Some(wire::response_from(message)?)),
            Err(_) => Ok(None),
        }
    }

    /// Close the connection.
    pub async fn close(mut self) {
        self.channel.close().await;
    }
}
