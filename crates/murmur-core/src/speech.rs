//! Text-to-speech
//!
//! Uses ElevenLabs when a key is configured and falls back to the platform's
//! speech command otherwise. Nothing here ever reports an error to the caller.

use reqwest::Client;
use serde::Serialize;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

use crate::config::Config;

pub const SPEECH_BASE_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Voice parameters for local synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub language: String,
    pub pitch: f32,
    pub rate: f32,
}

impl Default for Utterance {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            pitch: 1.0,
            rate: 0.98,
        }
    }
}

/// On-device synthesizer used when remote synthesis is unavailable.
pub trait LocalSynthesizer: Send + Sync {
    fn stop(&self);
    fn speak(&self, text: &str, utterance: &Utterance);
}

/// Speaks through `say` on macOS and `espeak` elsewhere.
#[derive(Default)]
pub struct CommandSynthesizer {
    current: Mutex<Option<Child>>,
}

impl CommandSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn command(text: &str, utterance: &Utterance) -> Command {
        if cfg!(target_os = "macos") {
            // `say` takes words per minute; ~180 is its normal rate
            let wpm = (180.0 * utterance.rate).round() as u32;
            let mut cmd = Command::new("say");
            cmd.arg("-r").arg(wpm.to_string()).arg(text);
            cmd
        } else {
            let wpm = (175.0 * utterance.rate).round() as u32;
            let pitch = (50.0 * utterance.pitch).round() as u32;
            let voice = utterance.language.to_lowercase();
            let mut cmd = Command::new("espeak");
            cmd.arg("-v")
                .arg(voice)
                .arg("-s")
                .arg(wpm.to_string())
                .arg("-p")
                .arg(pitch.to_string())
                .arg(text);
            cmd
        }
    }
}

impl LocalSynthesizer for CommandSynthesizer {
    fn stop(&self) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };
        if let Some(mut child) = current.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn speak(&self, text: &str, utterance: &Utterance) {
        let spawned = Self::command(text, utterance)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(child) => {
                if let Ok(mut current) = self.current.lock() {
                    *current = Some(child);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Local speech synthesizer unavailable"),
        }
    }
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Clone)]
pub struct SpeechClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    voice_model: String,
    synthesizer: Arc<dyn LocalSynthesizer>,
}

impl SpeechClient {
    pub fn new(
        api_key: Option<String>,
        voice_model: &str,
        synthesizer: Arc<dyn LocalSynthesizer>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: SPEECH_BASE_URL.to_string(),
            api_key,
            voice_model: voice_model.to_string(),
            synthesizer,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.speech_api_key(),
            &config.voice_model(),
            Arc::new(CommandSynthesizer::new()),
        )
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn uses_remote(&self) -> bool {
        self.api_key.is_some()
    }

    /// Speak `text`. Blank text is ignored.
    pub async fn speak(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        let Some(api_key) = self.api_key.as_deref() else {
            self.speak_locally(text);
            return;
        };

        match self.fetch_remote_audio(api_key, text).await {
            Ok(audio) => {
                // TODO: play the fetched audio instead of re-speaking locally
                tracing::debug!(bytes = audio.len(), "Fetched remote speech audio");
            }
            Err(e) => tracing::warn!(error = %e, "Remote speech failed, using local synthesizer"),
        }
        self.speak_locally(text);
    }

    fn speak_locally(&self, text: &str) {
        self.synthesizer.stop();
        self.synthesizer.speak(text, &Utterance::default());
    }

    async fn fetch_remote_audio(&self, api_key: &str, text: &str) -> anyhow::Result<Vec<u8>> {
        let request = SpeechRequest {
            text,
            model_id: &self.voice_model,
            voice_settings: VoiceSettings {
                stability: 0.4,
                similarity_boost: 0.8,
            },
        };

        let response = self
            .client
            .post(format!("{}/{}", self.base_url, self.voice_model))
            .header("xi-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("speech endpoint returned {}", response.status());
        }

        Ok(response.bytes().await?.to_vec())
    }
}
