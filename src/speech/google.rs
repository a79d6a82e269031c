//! Google Cloud Text-to-Speech (REST) and local MP3 playback

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::Speaker;
use crate::config::SpeechConfig;

const SYNTHESIZE_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    ssml_gender: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Speaker backed by Google Cloud Text-to-Speech
pub struct GoogleSpeaker {
    client: reqwest::Client,
    runtime: Runtime,
    api_key: String,
    config: SpeechConfig,
}

impl GoogleSpeaker {
    pub fn new(api_key: String, config: SpeechConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        let runtime = Runtime::new().context("Failed to create tokio runtime")?;

        Ok(Self {
            client,
            runtime,
            api_key,
            config,
        })
    }

    fn request_body(&self, text: &str) -> Result<String> {
        let request = SynthesizeRequest {
            input: SynthesisInput { text },
            voice: VoiceSelection {
                language_code: &self.config.language_code,
                ssml_gender: &self.config.voice_gender,
            },
            audio_config: AudioConfig {
                audio_encoding: "MP3",
            },
        };
        Ok(serde_json::to_string(&request)?)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(SYNTHESIZE_URL)
            .query(&[("key", self.api_key.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(self.request_body(text)?)
            .send()
            .await
            .context("Speech synthesis request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Speech synthesis returned {}: {}", status, body);
        }

        let body: SynthesizeResponse = response
            .json()
            .await
            .context("Unexpected speech synthesis response")?;
        decode_audio(&body.audio_content)
    }
}

impl Speaker for GoogleSpeaker {
    fn speak(&mut self, text: &str) -> Result<PathBuf> {
        info!("Synthesizing: {}", text);
        let audio = self.runtime.block_on(self.synthesize(text))?;

        let path = self.config.output_path.clone();
        std::fs::write(&path, &audio)
            .with_context(|| format!("Failed to write audio to {:?}", path))?;
        debug!("Audio content written to {:?} ({} bytes)", path, audio.len());

        Ok(path)
    }

    fn play(&mut self, path: &Path) -> Result<()> {
        play_file(path)
    }
}

/// Decode base64 audio content from the synthesis response
pub fn decode_audio(content: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(content.trim())
        .context("Audio content is not valid base64")
}

/// Play an audio file on the default output device, blocking until done
pub fn play_file(path: &Path) -> Result<()> {
    let (_stream, handle) =
        rodio::OutputStream::try_default().context("No audio output device")?;
    let sink = rodio::Sink::try_new(&handle).context("Failed to create audio sink")?;

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file {:?}", path))?;
    let source = rodio::Decoder::new(BufReader::new(file))
        .with_context(|| format!("Failed to decode audio file {:?}", path))?;

    info!("Playing {:?}", path);
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let speaker = GoogleSpeaker::new("key".to_string(), SpeechConfig::default()).unwrap();
        let body: serde_json::Value =
            serde_json::from_str(&speaker.request_body("721번 버스").unwrap()).unwrap();

        assert_eq!(body["input"]["text"], "721번 버스");
        assert_eq!(body["voice"]["languageCode"], "ko-KR");
        assert_eq!(body["voice"]["ssmlGender"], "NEUTRAL");
        assert_eq!(body["audioConfig"]["audioEncoding"], "MP3");
    }

    #[test]
    fn test_decode_audio() {
        assert_eq!(decode_audio("SUQz\n").unwrap(), b"ID3".to_vec());
        assert!(decode_audio("not base64!").is_err());
    }
}
