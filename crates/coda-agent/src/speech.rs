//! STT/TTS capability seams.
//!
//! The core never synthesizes or decodes audio itself. Speech input
//! arrives through the orchestrator's transcription entry point (driven
//! by whatever capture loop the deployment wires up — the gateway routes
//! `user_input` frames there); speech output goes through [`TtsEngine`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use coda_core::error::CodaError;

/// Timing facts about one spoken utterance.
#[derive(Debug, Clone, Copy)]
pub struct SpokenUtterance {
    /// Time spent synthesizing (computation, not playback).
    pub synthesis_seconds: f64,
    /// Length of the generated audio.
    pub audio_seconds: f64,
}

/// Control handle for the speech-capture side.
pub trait SttControl: Send + Sync {
    /// Capture mode reported in `stt_start` events.
    fn mode(&self) -> &str;
    /// Stop capturing. Idempotent.
    fn stop(&self);
}

/// Capture is driven externally (WS `user_input` frames); this handle
/// only carries the reported mode and a no-op stop.
pub struct ExternalStt {
    mode: String,
}

impl ExternalStt {
    pub fn new(mode: impl Into<String>) -> Self {
        Self { mode: mode.into() }
    }
}

impl SttControl for ExternalStt {
    fn mode(&self) -> &str {
        &self.mode
    }

    fn stop(&self) {
        info!("external STT source stopped");
    }
}

/// Text-to-speech capability.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Provider label reported in `tts_start` events.
    fn provider(&self) -> &str;
    fn voice(&self) -> &str;

    /// Synthesize and play `text`, reporting coarse progress in
    /// [0, 100] through `progress`. Returns timing facts; a stopped
    /// utterance returns the partial timings.
    async fn speak(
        &self,
        text: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<SpokenUtterance, CodaError>;

    /// Cancel the currently playing utterance, if any. Idempotent.
    fn stop(&self);

    /// Release engine resources. Called once during shutdown.
    async fn close(&self) {}
}

/// Deterministic stand-in engine: estimates audio length from character
/// count and optionally simulates playback time. Used by the binary when
/// no real engine is configured, and by the pipeline tests.
pub struct MockTts {
    voice: String,
    /// Assumed speaking rate for the audio-length estimate.
    chars_per_second: f64,
    /// When true, `speak` sleeps for the estimated audio duration in
    /// small slices so interrupts take effect mid-utterance.
    simulate_playback: bool,
    interrupted: AtomicBool,
}

impl MockTts {
    pub fn new(voice: impl Into<String>, simulate_playback: bool) -> Self {
        Self {
            voice: voice.into(),
            chars_per_second: 15.0,
            simulate_playback,
            interrupted: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TtsEngine for MockTts {
    fn provider(&self) -> &str {
        "mock"
    }

    fn voice(&self) -> &str {
        &self.voice
    }

    async fn speak(
        &self,
        text: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<SpokenUtterance, CodaError> {
        self.interrupted.store(false, Ordering::SeqCst);
        let started = Instant::now();
        let audio_seconds = (text.chars().count() as f64 / self.chars_per_second).max(0.1);
        debug!(chars = text.chars().count(), audio_seconds, "mock synthesis");

        let slices = 8u32;
        for i in 1..=slices {
            if self.interrupted.load(Ordering::SeqCst) {
                info!("mock playback interrupted");
                let elapsed = started.elapsed().as_secs_f64();
                return Ok(SpokenUtterance {
                    synthesis_seconds: elapsed,
                    audio_seconds: audio_seconds * f64::from(i - 1) / f64::from(slices),
                });
            }
            if self.simulate_playback {
                tokio::time::sleep(Duration::from_secs_f64(audio_seconds / f64::from(slices)))
                    .await;
            }
            progress(100.0 * f64::from(i) / f64::from(slices));
        }

        Ok(SpokenUtterance {
            synthesis_seconds: started.elapsed().as_secs_f64(),
            audio_seconds,
        })
    }

    fn stop(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}
