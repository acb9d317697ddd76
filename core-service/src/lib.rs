//! Speech service façade.
//!
//! Sends text to the synthesis service and streams the answer into the
//! playback engine. One [`SpeechService`] owns one engine, so a new request
//! always supersedes the one before it.
//!
//! ```ignore
//! use core_playback::StreamingConfig;
//! use core_runtime::config::CoreConfig;
//! use core_service::{SpeechService, SynthesisRequest};
//!
//! let service = SpeechService::new(CoreConfig::from_env().build()?, StreamingConfig::default())?;
//! let job = service.speak(SynthesisRequest::new("Hello there")).await?;
//! let outcome = job.wait().await?;
//! println!("generated in {:?}", outcome.generation_time);
//! ```

pub mod error;
pub mod request;
pub mod timer;

pub use error::{CoreError, Result};
pub use request::SynthesisRequest;
pub use timer::{format_generation_time, GenerationTimer};

use bridge_traits::{BridgeError, ByteStream, HttpRequest};
use bytes::Bytes;
use core_playback::{
    AssetHandle, AttemptId, AudioOutput, ChunkDecoder, EngineFrame, SessionOutcome, StreamEngine,
    StreamSession, StreamingConfig, SymphoniaChunkDecoder, VirtualAudioOutput,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, SynthesisEvent};
use core_runtime::logging::text_preview;
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Render rate of the built-in virtual output.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// A finished synthesis.
#[derive(Debug, Clone)]
pub struct SpeechOutcome {
    pub session: SessionOutcome,
    /// Request sent to last byte received.
    pub generation_time: Duration,
}

/// A synthesis whose audio is streaming into the engine.
#[derive(Debug)]
pub struct SpeechJob {
    session: StreamSession,
    timer: GenerationTimer,
    generated: oneshot::Receiver<Duration>,
}

impl SpeechJob {
    pub fn attempt(&self) -> AttemptId {
        self.session.attempt()
    }

    /// Time since the request was sent.
    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }

    pub fn is_finished(&self) -> bool {
        self.session.is_finished()
    }

    /// Wait until the audio has played out and the recording is ready.
    pub async fn wait(self) -> Result<SpeechOutcome> {
        let session = self.session.wait().await?;
        let generation_time = match self.generated.await {
            Ok(elapsed) => elapsed,
            Err(_) => self.timer.elapsed(),
        };
        Ok(SpeechOutcome {
            session,
            generation_time,
        })
    }
}

/// Primary façade exposed to host applications.
pub struct SpeechService {
    config: CoreConfig,
    engine: Arc<StreamEngine>,
    events: EventBus,
    virtual_output: Option<Arc<VirtualAudioOutput>>,
}

impl SpeechService {
    /// Create a service playing through an in-process virtual output.
    ///
    /// Drive its clock with [`spawn_output_clock`](Self::spawn_output_clock).
    pub fn new(config: CoreConfig, streaming: StreamingConfig) -> Result<Self> {
        let output = Arc::new(VirtualAudioOutput::new(DEFAULT_OUTPUT_SAMPLE_RATE));
        let mut service = Self::with_output(config, streaming, output.clone())?;
        service.virtual_output = Some(output);
        Ok(service)
    }

    /// Create a service playing through `output`.
    pub fn with_output(
        config: CoreConfig,
        streaming: StreamingConfig,
        output: Arc<dyn AudioOutput>,
    ) -> Result<Self> {
        Self::with_parts(config, streaming, output, Arc::new(SymphoniaChunkDecoder))
    }

    /// Create a service with an explicit decoder as well.
    pub fn with_parts(
        config: CoreConfig,
        streaming: StreamingConfig,
        output: Arc<dyn AudioOutput>,
        decoder: Arc<dyn ChunkDecoder>,
    ) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_buffer_size);
        let engine = StreamEngine::new(streaming, decoder, output, events.clone())?;
        info!(api_url = %config.api_url, "Speech service ready");

        Ok(Self {
            config,
            engine: Arc::new(engine),
            events,
            virtual_output: None,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<StreamEngine> {
        &self.engine
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run the virtual output's clock against wall time. `None` when the
    /// service plays through a host-provided output.
    pub fn spawn_output_clock(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let output = self.virtual_output.clone()?;
        Some(output.spawn_clock(self.engine.config().refresh_interval(), cancel))
    }

    /// Request speech for `request` and start playing it as it arrives.
    ///
    /// Returns once the service has accepted the request; playback goes on
    /// in the background.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Unreachable`] if the service cannot be reached
    /// - [`CoreError::Rejected`] for a non-2xx answer
    #[instrument(skip(self, request), fields(chars = request.text.chars().count()))]
    pub async fn speak(&self, request: SynthesisRequest) -> Result<SpeechJob> {
        let timer = GenerationTimer::start();
        let payload = request.payload(&self.config);
        let http_request = HttpRequest::post(self.config.synthesize_url())
            .header("Accept", "application/octet-stream")
            .timeout(self.config.request_timeout)
            .json(&payload)?;

        info!(
            text = %text_preview(payload.text, 24),
            language = payload.language,
            "Requesting synthesis"
        );
        self.emit(SynthesisEvent::Requested {
            text_chars: payload.text.chars().count() as u64,
            language: payload.language.to_string(),
        });

        let response = match self.config.http_client.stream(http_request).await {
            Ok(response) => response,
            Err(err) => {
                timer.finish(false);
                let err = match err {
                    BridgeError::ConnectionFailed(message) => CoreError::Unreachable(message),
                    BridgeError::Timeout => {
                        CoreError::Unreachable("timed out waiting for a response".to_string())
                    }
                    other => CoreError::Bridge(other),
                };
                warn!("Synthesis request failed: {}", err);
                self.emit(SynthesisEvent::Rejected {
                    status: None,
                    message: err.user_message(),
                });
                return Err(err);
            }
        };

        let status = response.status;
        if !response.is_success() {
            timer.finish(false);
            let body = match response.collect().await {
                Ok(response) => response.body,
                Err(e) => {
                    warn!("Failed to read error body: {}", e);
                    Bytes::new()
                }
            };
            let message = request::rejection_message(status, &body);
            warn!(status, "Synthesis rejected: {}", message);
            self.emit(SynthesisEvent::Rejected {
                status: Some(status),
                message: message.clone(),
            });
            return Err(CoreError::Rejected { status, message });
        }

        let (generated_tx, generated) = oneshot::channel();
        let body: ByteStream = Box::pin(TimedBody {
            inner: response.body,
            timer,
            done: Some(generated_tx),
        });
        let session = self.engine.start(body)?;
        self.emit(SynthesisEvent::StreamOpened {
            attempt: session.attempt().0,
            status,
        });

        Ok(SpeechJob {
            session,
            timer,
            generated,
        })
    }

    pub fn stop(&self) -> Result<()> {
        Ok(self.engine.stop()?)
    }

    pub fn pause(&self) -> Result<bool> {
        Ok(self.engine.pause()?)
    }

    pub fn resume(&self) -> Result<bool> {
        Ok(self.engine.resume()?)
    }

    /// Play the last finished recording again.
    pub fn replay(&self) -> Result<AttemptId> {
        Ok(self.engine.replay()?)
    }

    pub fn refresh(&self) -> EngineFrame {
        self.engine.refresh()
    }

    pub fn current_recording(&self) -> Option<AssetHandle> {
        self.engine.current_asset()
    }

    /// Write the last recording into `dir` under the configured file name.
    pub async fn save_recording(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let asset = self.current_recording().ok_or(CoreError::NoRecording)?;
        let path = dir.as_ref().join(&self.engine.config().download_file_name);
        asset.write_to(&path).await?;
        Ok(path)
    }

    fn emit(&self, event: SynthesisEvent) {
        let _ = self.events.emit(CoreEvent::Synthesis(event));
    }
}

impl std::fmt::Debug for SpeechService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechService")
            .field("api_url", &self.config.api_url)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Response body that stops the generation timer at its last byte.
struct TimedBody {
    inner: ByteStream,
    timer: GenerationTimer,
    done: Option<oneshot::Sender<Duration>>,
}

impl Stream for TimedBody {
    type Item = bridge_traits::error::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        let finished = match &polled {
            Poll::Ready(None) => Some(true),
            Poll::Ready(Some(Err(_))) => Some(false),
            _ => None,
        };
        if let Some(succeeded) = finished {
            if let Some(done) = self.done.take() {
                let _ = done.send(self.timer.finish(succeeded));
            }
        }
        polled
    }
}
