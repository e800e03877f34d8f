//! Configuration module for the Voicebridge server.
//!
//! Configuration comes from environment variables (with `.env` support) or a
//! YAML file. When a file is given, its values take priority over the
//! environment; both sit on top of the built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::auth::AuthApiSecret;
use crate::core::bridge::{
    MaxTokens, SessionUpdateConfig, TranscriptionConfig, TurnDetection, UpstreamConfig,
};

mod yaml;

pub use yaml::YamlConfig;

/// Default upstream realtime endpoint (OpenAI Realtime API).
pub const DEFAULT_UPSTREAM_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default realtime model.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// TLS configuration for HTTPS and WSS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    FileParse { path: String, message: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    // Upstream provider
    /// OpenAI API key for the Realtime API
    pub openai_api_key: Option<String>,
    /// Upstream realtime WebSocket endpoint
    pub upstream_url: String,
    /// Realtime model
    pub realtime_model: String,
    /// Voice for audio output
    pub realtime_voice: String,
    /// System instructions injected into every session
    pub realtime_instructions: Option<String>,
    /// Sampling temperature
    pub realtime_temperature: Option<f32>,
    /// Max response output tokens (-1 for infinite)
    pub realtime_max_output_tokens: Option<i32>,
    /// Input transcription model
    pub transcription_model: String,
    /// VAD activation threshold (0.0 to 1.0)
    pub vad_threshold: f32,
    /// VAD audio prefix padding (ms)
    pub vad_prefix_padding_ms: u32,
    /// VAD silence duration before end of turn (ms)
    pub vad_silence_duration_ms: u32,
    /// Upper bound on one upstream connection attempt (seconds)
    pub upstream_connect_timeout_secs: u64,
    /// Fixed delay between upstream reconnection attempts (ms)
    pub upstream_reconnect_delay_ms: u64,
    /// Upstream reconnection budget
    pub upstream_reconnect_max_attempts: u32,

    // Authentication
    pub auth_required: bool,
    pub auth_api_secrets: Vec<AuthApiSecret>,
    pub auth_jwt_secret: Option<String>,

    // Security settings
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            openai_api_key: None,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            realtime_voice: "alloy".to_string(),
            realtime_instructions: None,
            realtime_temperature: Some(0.8),
            realtime_max_output_tokens: None,
            transcription_model: "whisper-1".to_string(),
            vad_threshold: 0.5,
            vad_prefix_padding_ms: 300,
            vad_silence_duration_ms: 500,
            upstream_connect_timeout_secs: 15,
            upstream_reconnect_delay_ms: 2000,
            upstream_reconnect_max_attempts: 3,
            auth_required: false,
            auth_api_secrets: Vec::new(),
            auth_jwt_secret: None,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: Some(1024),
            max_connections_per_ip: 16,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file; environment variables fill the
    /// keys the file leaves out.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        let yaml = YamlConfig::load(path)?;
        yaml.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse::<u16>("PORT")? {
            self.port = port;
        }
        let cert = std::env::var("TLS_CERT_PATH").ok();
        let key = std::env::var("TLS_KEY_PATH").ok();
        if let (Some(cert_path), Some(key_path)) = (cert, key) {
            self.tls = Some(TlsConfig {
                cert_path: PathBuf::from(cert_path),
                key_path: PathBuf::from(key_path),
            });
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.openai_api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("UPSTREAM_URL") {
            self.upstream_url = url;
        }
        if let Ok(model) = std::env::var("REALTIME_MODEL") {
            self.realtime_model = model;
        }
        if let Ok(voice) = std::env::var("REALTIME_VOICE") {
            self.realtime_voice = voice;
        }
        if let Ok(instructions) = std::env::var("REALTIME_INSTRUCTIONS") {
            self.realtime_instructions = Some(instructions);
        }
        if let Some(temperature) = env_parse::<f32>("REALTIME_TEMPERATURE")? {
            self.realtime_temperature = Some(temperature);
        }
        if let Some(tokens) = env_parse::<i32>("REALTIME_MAX_OUTPUT_TOKENS")? {
            self.realtime_max_output_tokens = Some(tokens);
        }
        if let Ok(model) = std::env::var("TRANSCRIPTION_MODEL") {
            self.transcription_model = model;
        }
        if let Some(threshold) = env_parse::<f32>("VAD_THRESHOLD")? {
            self.vad_threshold = threshold;
        }
        if let Some(padding) = env_parse::<u32>("VAD_PREFIX_PADDING_MS")? {
            self.vad_prefix_padding_ms = padding;
        }
        if let Some(silence) = env_parse::<u32>("VAD_SILENCE_DURATION_MS")? {
            self.vad_silence_duration_ms = silence;
        }
        if let Some(timeout) = env_parse::<u64>("UPSTREAM_CONNECT_TIMEOUT_SECS")? {
            self.upstream_connect_timeout_secs = timeout;
        }
        if let Some(delay) = env_parse::<u64>("UPSTREAM_RECONNECT_DELAY_MS")? {
            self.upstream_reconnect_delay_ms = delay;
        }
        if let Some(attempts) = env_parse::<u32>("UPSTREAM_RECONNECT_MAX_ATTEMPTS")? {
            self.upstream_reconnect_max_attempts = attempts;
        }

        if let Some(required) = env_parse::<bool>("AUTH_REQUIRED")? {
            self.auth_required = required;
        }
        if let Ok(secrets) = std::env::var("AUTH_API_SECRETS") {
            self.auth_api_secrets = parse_api_secrets(&secrets)?;
        }
        if let Ok(secret) = std::env::var("AUTH_JWT_SECRET") {
            if !secret.is_empty() {
                self.auth_jwt_secret = Some(secret);
            }
        }

        if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
            self.cors_allowed_origins = Some(origins);
        }
        if let Some(rps) = env_parse::<u32>("RATE_LIMIT_RPS")? {
            self.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = env_parse::<u32>("RATE_LIMIT_BURST")? {
            self.rate_limit_burst_size = burst;
        }
        if let Some(max) = env_parse::<usize>("MAX_WS_CONNECTIONS")? {
            self.max_websocket_connections = if max == 0 { None } else { Some(max) };
        }
        if let Some(max) = env_parse::<usize>("MAX_CONNECTIONS_PER_IP")? {
            self.max_connections_per_ip = max;
        }
        Ok(())
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.upstream_url.starts_with("ws://") && !self.upstream_url.starts_with("wss://") {
            return Err(ConfigError::Validation(format!(
                "upstream_url must be a ws:// or wss:// URL, got '{}'",
                self.upstream_url
            )));
        }
        if let Some(temperature) = self.realtime_temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::Validation(format!(
                    "realtime temperature must be between 0.0 and 2.0, got {temperature}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(ConfigError::Validation(format!(
                "VAD threshold must be between 0.0 and 1.0, got {}",
                self.vad_threshold
            )));
        }
        if self.max_connections_per_ip == 0 {
            return Err(ConfigError::Validation(
                "max_connections_per_ip must be at least 1".to_string(),
            ));
        }
        if self.auth_required && self.auth_api_secrets.is_empty() && self.auth_jwt_secret.is_none()
        {
            return Err(ConfigError::Validation(
                "AUTH_REQUIRED is set but neither API secrets nor a JWT secret is configured"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    pub fn has_jwt_auth(&self) -> bool {
        self.auth_jwt_secret.is_some()
    }

    /// The fixed session configuration injected on `session.created`.
    pub fn session_settings(&self) -> SessionUpdateConfig {
        SessionUpdateConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: self.realtime_instructions.clone(),
            voice: Some(self.realtime_voice.clone()),
            input_audio_format: Some("pcm16".to_string()),
            output_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: Some(TranscriptionConfig {
                model: self.transcription_model.clone(),
            }),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: Some(self.vad_threshold),
                prefix_padding_ms: Some(self.vad_prefix_padding_ms),
                silence_duration_ms: Some(self.vad_silence_duration_ms),
            }),
            temperature: self.realtime_temperature,
            max_response_output_tokens: self.realtime_max_output_tokens.map(|tokens| {
                if tokens < 0 {
                    MaxTokens::Infinite("inf".to_string())
                } else {
                    MaxTokens::Number(tokens as u32)
                }
            }),
        }
    }

    /// Upstream connection settings for one relay session.
    pub fn upstream_config(&self, api_key: String) -> UpstreamConfig {
        UpstreamConfig {
            url: self.upstream_url.clone(),
            api_key,
            model: self.realtime_model.clone(),
            session: self.session_settings(),
            connect_timeout: Duration::from_secs(self.upstream_connect_timeout_secs),
            reconnect_delay: Duration::from_millis(self.upstream_reconnect_delay_ms),
            reconnect_max_attempts: self.upstream_reconnect_max_attempts,
        }
    }
}

/// Parse `id:secret,id:secret` pairs.
fn parse_api_secrets(raw: &str) -> Result<Vec<AuthApiSecret>, ConfigError> {
    let mut secrets = Vec::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (id, secret) = pair.trim().split_once(':').ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "AUTH_API_SECRETS".to_string(),
                message: "expected comma-separated id:secret pairs".to_string(),
            }
        })?;
        if id.is_empty() || secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "AUTH_API_SECRETS".to_string(),
                message: "id and secret must both be non-empty".to_string(),
            });
        }
        secrets.push(AuthApiSecret::new(id, secret));
    }
    Ok(secrets)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => {
            value
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(None),
    }
}
