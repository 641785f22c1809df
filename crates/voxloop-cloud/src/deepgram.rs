//! Streaming speech recognition over the Deepgram listen WebSocket API.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use url::Url;

use voxloop_core::{AudioChunk, Recognizer};
use voxloop_foundation::CollaboratorError;

const LISTEN_ENDPOINT: &str = "wss://api.deepgram.com/v1/listen";
const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

#[derive(Debug, Clone)]
pub struct DeepgramConfig {
    pub api_key: String,
    pub model: String,
    pub language: String,
    /// Override of the listen endpoint, for tests and self-hosted gateways.
    pub endpoint: String,
}

impl DeepgramConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "nova-2".to_string(),
            language: "en".to_string(),
            endpoint: LISTEN_ENDPOINT.to_string(),
        }
    }
}

/// Listen response, trimmed to the fields the engine consumes.
#[derive(Debug, Deserialize)]
struct ListenResponse {
    #[serde(rename = "type")]
    response_type: String,
    channel: Option<ListenChannel>,
    is_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    transcript: String,
}

pub struct DeepgramRecognizer {
    config: DeepgramConfig,
}

impl DeepgramRecognizer {
    pub fn new(config: DeepgramConfig) -> Self {
        Self { config }
    }

    fn build_url(&self, sample_rate: u32) -> Result<Url, CollaboratorError> {
        let mut url = Url::parse(&self.config.endpoint)
            .map_err(|e| CollaboratorError::Provider(format!("invalid listen endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &self.config.model)
            .append_pair("language", &self.config.language)
            .append_pair("encoding", "linear16")
            .append_pair("sample_rate", &sample_rate.to_string())
            .append_pair("channels", "1")
            .append_pair("punctuate", "true")
            .append_pair("interim_results", "false");
        Ok(url)
    }
}

#[async_trait]
impl Recognizer for DeepgramRecognizer {
    async fn stream_recognize(
        &self,
        cancel: CancellationToken,
        mut audio: mpsc::Receiver<AudioChunk>,
        results: mpsc::Sender<String>,
        sample_rate: u32,
    ) -> Result<(), CollaboratorError> {
        let url = self.build_url(sample_rate)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| CollaboratorError::Transport(format!("listen request: {e}")))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Token {}", self.config.api_key)
                .parse()
                .map_err(|_| CollaboratorError::Provider("malformed api key".to_string()))?,
        );

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| CollaboratorError::Transport(format!("listen connect: {e}")))?;
        let (mut ws_tx, mut ws_rx) = ws.split();
        tracing::debug!("Recognition stream connected ({}Hz)", sample_rate);

        let mut audio_done = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Text(CLOSE_STREAM.into())).await;
                    break;
                }
                chunk = audio.recv(), if !audio_done => match chunk {
                    Some(bytes) => {
                        ws_tx
                            .send(Message::Binary(bytes))
                            .await
                            .map_err(|e| CollaboratorError::Transport(format!("listen send: {e}")))?;
                    }
                    None => {
                        // Capture side finished; ask the provider to flush
                        // its final results and close.
                        audio_done = true;
                        let _ = ws_tx.send(Message::Text(CLOSE_STREAM.into())).await;
                    }
                },
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        for transcript in final_transcripts(&text) {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => break,
                                sent = results.send(transcript) => {
                                    if sent.is_err() {
                                        // Engine stopped listening; wind down.
                                        let _ = ws_tx.send(Message::Text(CLOSE_STREAM.into())).await;
                                        return Ok(());
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(CollaboratorError::Transport(format!("listen receive: {e}")));
                    }
                },
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        // Connections are per-phase; nothing persistent to release.
        Ok(())
    }
}

/// Extracts non-empty final transcripts from a listen text frame. Interim
/// results and metadata frames yield nothing.
fn final_transcripts(text: &str) -> Vec<String> {
    let Ok(response) = serde_json::from_str::<ListenResponse>(text) else {
        tracing::debug!("Unparseable listen frame: {}", text);
        return Vec::new();
    };
    if response.response_type != "Results" || !response.is_final.unwrap_or(false) {
        return Vec::new();
    }
    response
        .channel
        .into_iter()
        .flat_map(|c| c.alternatives)
        .map(|a| a.transcript)
        .filter(|t| !t.trim().is_empty())
        .collect()
}
