//! Streaming speech synthesis over the Deepgram speak HTTP API.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use voxloop_core::{AudioChunk, SynthesisOptions, Synthesizer};
use voxloop_foundation::CollaboratorError;

const SPEAK_ENDPOINT: &str = "https://api.deepgram.com/v1/speak";

#[derive(Debug, Clone)]
pub struct SpeakConfig {
    pub api_key: String,
    /// Default speak model when the synthesis options carry none.
    pub model: String,
    pub sample_rate: u32,
    pub endpoint: String,
}

impl SpeakConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "aura-asteria-en".to_string(),
            sample_rate: 22_050,
            endpoint: SPEAK_ENDPOINT.to_string(),
        }
    }
}

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

pub struct DeepgramSynthesizer {
    config: SpeakConfig,
    client: reqwest::Client,
}

impl DeepgramSynthesizer {
    pub fn new(config: SpeakConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// The options' model and format tags are provider-opaque to the core;
    /// here they select the speak model and container. Speed and volume
    /// have no speak-side equivalent and are ignored.
    fn build_url(&self, options: &SynthesisOptions) -> Result<Url, CollaboratorError> {
        let mut url = Url::parse(&self.config.endpoint)
            .map_err(|e| CollaboratorError::Provider(format!("invalid speak endpoint: {e}")))?;
        let model = if options.model.is_empty() {
            &self.config.model
        } else {
            &options.model
        };
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("model", model)
                .append_pair("encoding", "linear16")
                .append_pair("sample_rate", &self.config.sample_rate.to_string());
            match options.format.as_deref() {
                Some(container) => pairs.append_pair("container", container),
                None => pairs.append_pair("container", "none"),
            };
        }
        Ok(url)
    }
}

#[async_trait]
impl Synthesizer for DeepgramSynthesizer {
    async fn synthesize_to_stream(
        &self,
        cancel: CancellationToken,
        text: &str,
        options: &SynthesisOptions,
        out: mpsc::Sender<AudioChunk>,
    ) -> Result<(), CollaboratorError> {
        let url = self.build_url(options)?;
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Token {}", self.config.api_key))
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(format!("speak request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Provider(format!(
                "speak returned {status}: {body}"
            )));
        }

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk =
                chunk.map_err(|e| CollaboratorError::Transport(format!("speak stream: {e}")))?;
            if chunk.is_empty() {
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = out.send(chunk.to_vec()) => {
                    if sent.is_err() {
                        // Playback side is gone; stop pulling audio.
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
