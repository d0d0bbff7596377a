//! Ollama backend
//!
//! Streams `/api/generate` and republishes the NDJSON body as bus
//! notifications. `dispatch` acknowledges as soon as Ollama answers with a
//! success status; the body is read by a spawned task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DispatchError, DispatchRequest, InferenceBackend};
use crate::config::BackendConfig;
use crate::events::{EventBus, SessionEmitter};

/// Request body for `POST /api/generate`
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One line of the streamed `/api/generate` body
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Parse one NDJSON line; blank lines yield `None`
pub fn parse_chunk(line: &[u8]) -> Option<Result<GenerateChunk, serde_json::Error>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(line))
}

/// Ollama HTTP client
pub struct OllamaBackend {
    base_url: String,
    http: Client,
    timeout: Duration,
    bus: Arc<EventBus>,
}

impl OllamaBackend {
    /// Create a backend publishing to `bus`
    pub fn from_config(config: &BackendConfig, bus: Arc<EventBus>) -> Result<Self, DispatchError> {
        debug!(?config, "OllamaBackend::from_config: called");
        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(DispatchError::Network)?;

        Ok(Self {
            base_url: config.effective_base_url(),
            http,
            timeout,
            bus,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn dispatch(&self, request: DispatchRequest, cancel: CancellationToken) -> Result<(), DispatchError> {
        debug!(
            session = %request.session,
            model = %request.model,
            user_id = %request.user_id,
            prompt_len = request.prompt.len(),
            "OllamaBackend::dispatch: called"
        );
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &request.model,
            prompt: &request.prompt,
            stream: true,
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session = %request.session, "OllamaBackend::dispatch: cancelled before acknowledgment");
                return Err(DispatchError::Cancelled);
            }
            result = self.http.post(&url).json(&body).send() => result.map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(self.timeout)
                } else {
                    DispatchError::Network(e)
                }
            })?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GenerateChunk>(&text)
                .ok()
                .and_then(|c| c.error)
                .unwrap_or(text);
            debug!(status, %message, "OllamaBackend::dispatch: rejected");
            return Err(DispatchError::Api { status, message });
        }

        debug!(session = %request.session, "OllamaBackend::dispatch: acknowledged");
        let emitter = self.bus.emitter_for(request.session);
        tokio::spawn(relay_stream(response, emitter, cancel));
        Ok(())
    }
}

/// Read the NDJSON body and republish it on the bus
///
/// Always ends with exactly one completion unless the exchange was
/// cancelled, in which case nothing more is emitted.
async fn relay_stream(response: reqwest::Response, emitter: SessionEmitter, cancel: CancellationToken) {
    let session = emitter.session();
    debug!(%session, "relay_stream: started");
    let mut stream = response.bytes_stream();
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%session, "relay_stream: cancelled");
                return;
            }
            next = stream.next() => next,
        };

        let Some(chunk) = next else {
            break;
        };

        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%session, error = %e, "relay_stream: body read failed");
                break;
            }
        };
        pending.extend_from_slice(&bytes);

        // Process complete lines; a trailing partial line waits for more bytes
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            if relay_line(&line, &emitter) {
                emitter.complete();
                debug!(%session, "relay_stream: done");
                return;
            }
        }
    }

    if relay_line(&pending, &emitter) {
        debug!(%session, "relay_stream: done on final line");
    } else {
        debug!(%session, "relay_stream: body ended without done marker");
    }
    emitter.complete();
}

/// Emit the text carried by one line; true if the line ends the stream
fn relay_line(line: &[u8], emitter: &SessionEmitter) -> bool {
    match parse_chunk(line) {
        None => false,
        Some(Ok(chunk)) => {
            if let Some(error) = chunk.error {
                warn!(session = %emitter.session(), %error, "relay_line: backend reported error mid-stream");
                return true;
            }
            if !chunk.response.is_empty() {
                emitter.partial(&chunk.response);
            }
            chunk.done
        }
        Some(Err(e)) => {
            warn!(session = %emitter.session(), error = %e, "relay_line: skipping malformed line");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    #[test]
    fn test_parse_chunk_text() {
        let chunk = parse_chunk(br#"{"model":"llama3:8b","response":"Hel","done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.response, "Hel");
        assert!(!chunk.done);
        assert!(chunk.error.is_none());
    }

    #[test]
    fn test_parse_chunk_done() {
        let chunk = parse_chunk(b"{\"response\":\"\",\"done\":true,\"eval_count\":12}\r\n")
            .unwrap()
            .unwrap();
        assert!(chunk.done);
        assert!(chunk.response.is_empty());
    }

    #[test]
    fn test_parse_chunk_blank_line() {
        assert!(parse_chunk(b"  \n").is_none());
        assert!(parse_chunk(b"").is_none());
    }

    #[test]
    fn test_parse_chunk_malformed() {
        assert!(parse_chunk(b"{not json").unwrap().is_err());
    }

    #[tokio::test]
    async fn test_relay_line_emits_partial_and_signals_done() {
        let bus = EventBus::new(16);
        let mut partials = bus.subscribe_partial();
        let emitter = bus.emitter_for(SessionId(2));

        assert!(!relay_line(br#"{"response":"Hi","done":false}"#, &emitter));
        assert!(relay_line(br#"{"response":"!","done":true}"#, &emitter));

        assert_eq!(partials.recv().await.unwrap().text, "Hi");
        assert_eq!(partials.recv().await.unwrap().text, "!");
    }

    #[test]
    fn test_relay_line_error_ends_stream() {
        let bus = EventBus::new(16);
        let emitter = bus.emitter_for(SessionId(2));
        assert!(relay_line(br#"{"error":"model crashed"}"#, &emitter));
    }

    /// Response whose body arrives in exactly these byte chunks
    fn chunked_response(chunks: &[&'static str]) -> reqwest::Response {
        let parts: Vec<Result<&'static str, std::io::Error>> = chunks.iter().map(|c| Ok(*c)).collect();
        let body = reqwest::Body::wrap_stream(futures::stream::iter(parts));
        reqwest::Response::from(http::Response::new(body))
    }

    /// Run the relay to the end and collect what reached the bus
    async fn relay(chunks: &[&'static str], cancel: CancellationToken) -> (Vec<String>, usize) {
        let bus = EventBus::new(64);
        let mut partials = bus.subscribe_partial();
        let mut completions = bus.subscribe_complete();

        relay_stream(chunked_response(chunks), bus.emitter_for(SessionId(7)), cancel).await;

        let mut texts = Vec::new();
        while let Ok(partial) = partials.try_recv() {
            assert_eq!(partial.session, SessionId(7));
            texts.push(partial.text);
        }
        let mut completed = 0;
        while let Ok(completion) = completions.try_recv() {
            assert_eq!(completion.session, SessionId(7));
            completed += 1;
        }
        (texts, completed)
    }

    #[tokio::test]
    async fn test_relay_reassembles_lines_split_across_chunks() {
        let (texts, completed) = relay(
            &[
                r#"{"response":"Hel"#,
                r#"","done":false}"#,
                "\n{\"response\":\"lo\",\"do",
                "ne\":false}\n",
                r#"{"response":"!","done":true}"#,
            ],
            CancellationToken::new(),
        )
        .await;

        assert_eq!(texts, vec!["Hel", "lo", "!"]);
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn test_relay_body_without_done_still_completes_once() {
        let (texts, completed) = relay(
            &["{\"response\":\"a\"}\n", "\n", "{not json}\n", r#"{"response":"b"}"#],
            CancellationToken::new(),
        )
        .await;

        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn test_relay_stops_at_done() {
        let (texts, completed) = relay(
            &["{\"response\":\"a\",\"done\":true}\n{\"response\":\"late\"}\n"],
            CancellationToken::new(),
        )
        .await;

        assert_eq!(texts, vec!["a"]);
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn test_relay_error_line_completes() {
        let (texts, completed) = relay(
            &["{\"response\":\"a\"}\n{\"error\":\"out of memory\"}\n{\"response\":\"b\"}\n"],
            CancellationToken::new(),
        )
        .await;

        assert_eq!(texts, vec!["a"]);
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn test_relay_cancelled_emits_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (texts, completed) = relay(&["{\"response\":\"a\",\"done\":true}\n"], cancel).await;

        assert!(texts.is_empty());
        assert_eq!(completed, 0);
    }

    #[test]
    fn test_from_config_trims_trailing_slash() {
        let config = BackendConfig {
            base_url: "http://myserver:11434/".to_string(),
            ..Default::default()
        };
        let backend = OllamaBackend::from_config(&config, Arc::new(EventBus::new(16))).unwrap();
        if std::env::var(crate::config::BASE_URL_ENV).is_err() {
            assert_eq!(backend.base_url(), "http://myserver:11434");
        }
    }

    #[tokio::test]
    async fn test_dispatch_unreachable_server_is_network_error() {
        let config = BackendConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            connect_timeout_ms: 500,
            timeout_ms: 1_000,
            ..Default::default()
        };
        if std::env::var(crate::config::BASE_URL_ENV).is_ok() {
            return;
        }
        let backend = OllamaBackend::from_config(&config, Arc::new(EventBus::new(16))).unwrap();
        let request = DispatchRequest {
            session: SessionId(1),
            model: "llama3:8b".to_string(),
            prompt: "hi".to_string(),
            user_id: "local".to_string(),
        };

        let result = backend.dispatch(request, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(DispatchError::Network(_)) | Err(DispatchError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_cancelled_before_ack() {
        let config = BackendConfig {
            base_url: "http://10.255.255.1:11434".to_string(),
            connect_timeout_ms: 5_000,
            ..Default::default()
        };
        if std::env::var(crate::config::BASE_URL_ENV).is_ok() {
            return;
        }
        let backend = OllamaBackend::from_config(&config, Arc::new(EventBus::new(16))).unwrap();
        let request = DispatchRequest {
            session: SessionId(1),
            model: "llama3:8b".to_string(),
            prompt: "hi".to_string(),
            user_id: "local".to_string(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = backend.dispatch(request, cancel).await;
        assert!(matches!(result, Err(DispatchError::Cancelled)));
    }
}
