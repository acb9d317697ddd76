//! # Core Configuration Module
//!
//! Configuration for talking to the speech-synthesis service.
//!
//! ## Overview
//!
//! A builder assembles [`CoreConfig`] from the service endpoint, request
//! defaults and the host capabilities the core needs. Validation is
//! fail-fast: a missing capability is reported when the configuration is
//! built, not when the first request goes out.
//!
//! ## Required Capabilities
//!
//! - `HttpClient` - request and stream synthesized audio. With the
//!   `desktop-shims` feature the reqwest-based client from `bridge-desktop`
//!   is injected when none is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .api_url("https://tts.example.com")
//!     .language("it")
//!     .build()?;
//! ```
//!
//! ## Environment
//!
//! [`CoreConfig::from_env`] starts from `TTS_API_URL` when it is set, which is
//! how deployments point the client at their own synthesis host.

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use bridge_traits::HttpClient;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the synthesis service base URL.
pub const API_URL_ENV: &str = "TTS_API_URL";

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

pub const DEFAULT_VOICE_DESCRIPTION: &str = "A natural and clear voice";

pub const DEFAULT_LANGUAGE: &str = "en";

/// Event buffer large enough for a few seconds of position updates.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = crate::events::DEFAULT_EVENT_BUFFER_SIZE;

/// Core configuration for the speech streaming client.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Base URL of the synthesis service, without a trailing slash
    pub api_url: String,

    /// Voice description sent when the caller leaves it blank
    pub voice_description: String,

    /// Language code sent when the caller does not pick one
    pub language: String,

    /// Timeout for establishing the synthesis request
    pub request_timeout: Duration,

    /// HTTP client used for synthesis requests
    pub http_client: Arc<dyn HttpClient>,

    pub logging: LoggingConfig,

    /// Per-subscriber event buffer
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_url", &self.api_url)
            .field("voice_description", &self.voice_description)
            .field("language", &self.language)
            .field("request_timeout", &self.request_timeout)
            .field("http_client", &"HttpClient { ... }")
            .field("logging", &self.logging)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Builder pre-filled from the environment.
    ///
    /// Reads `TTS_API_URL`; everything else keeps its default.
    pub fn from_env() -> CoreConfigBuilder {
        let builder = CoreConfigBuilder::default();
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => builder.api_url(url),
            _ => builder,
        }
    }

    /// Full URL of the voice-design synthesis endpoint.
    pub fn synthesize_url(&self) -> String {
        format!("{}/synthesize/design", self.api_url)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.api_url.is_empty() {
            return Err(Error::Config("API URL cannot be empty".to_string()));
        }

        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "API URL must start with http:// or https://, got '{}'",
                self.api_url
            )));
        }

        if self.language.trim().is_empty() {
            return Err(Error::Config("Language cannot be empty".to_string()));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to reach the synthesis service. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Other hosts: inject an implementation with .http_client()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout)
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_url: Option<String>,
    voice_description: Option<String>,
    language: Option<String>,
    request_timeout: Option<Duration>,
    http_client: Option<Arc<dyn HttpClient>>,
    logging: Option<LoggingConfig>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the synthesis service base URL. Trailing slashes are dropped.
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.api_url = Some(url.trim().trim_end_matches('/').to_string());
        self
    }

    pub fn voice_description(mut self, description: impl Into<String>) -> Self {
        self.voice_description = Some(description.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// Optional with `desktop-shims`; required otherwise.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when no `HttpClient` is available
    /// - [`Error::Config`] when a value fails validation
    pub fn build(self) -> Result<CoreConfig> {
        let request_timeout = self.request_timeout.unwrap_or(Duration::from_secs(30));

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(request_timeout)?,
        };

        let voice_description = self
            .voice_description
            .filter(|description| !description.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_VOICE_DESCRIPTION.to_string());

        let config = CoreConfig {
            api_url: self
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            voice_description,
            language: self
                .language
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            request_timeout,
            http_client,
            logging: self.logging.unwrap_or_default(),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
