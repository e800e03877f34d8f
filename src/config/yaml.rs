//! YAML configuration file loading.
//!
//! Every key is optional; present keys override whatever the environment
//! provided.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::auth::AuthApiSecret;

use super::{ConfigError, ServerConfig, TlsConfig};

/// Root of the YAML configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub security: SecuritySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSection {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<i32>,
    pub transcription_model: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub reconnect_max_attempts: Option<u32>,
    pub vad: Option<VadSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VadSection {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    pub required: Option<bool>,
    #[serde(default)]
    pub api_secrets: Vec<ApiSecretSection>,
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSecretSection {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecuritySection {
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<usize>,
}

impl YamlConfig {
    /// Read and parse a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::FileParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Overlay the file's values on a config.
    pub fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.server.host {
            config.host = host;
        }
        if let Some(port) = self.server.port {
            config.port = port;
        }
        if let Some(tls) = self.server.tls {
            config.tls = Some(TlsConfig {
                cert_path: tls.cert_path,
                key_path: tls.key_path,
            });
        }

        if let Some(url) = self.upstream.url {
            config.upstream_url = url;
        }
        if let Some(api_key) = self.upstream.api_key {
            config.openai_api_key = Some(api_key);
        }
        if let Some(model) = self.upstream.model {
            config.realtime_model = model;
        }
        if let Some(voice) = self.upstream.voice {
            config.realtime_voice = voice;
        }
        if let Some(instructions) = self.upstream.instructions {
            config.realtime_instructions = Some(instructions);
        }
        if let Some(temperature) = self.upstream.temperature {
            config.realtime_temperature = Some(temperature);
        }
        if let Some(tokens) = self.upstream.max_output_tokens {
            config.realtime_max_output_tokens = Some(tokens);
        }
        if let Some(model) = self.upstream.transcription_model {
            config.transcription_model = model;
        }
        if let Some(timeout) = self.upstream.connect_timeout_secs {
            config.upstream_connect_timeout_secs = timeout;
        }
        if let Some(delay) = self.upstream.reconnect_delay_ms {
            config.upstream_reconnect_delay_ms = delay;
        }
        if let Some(attempts) = self.upstream.reconnect_max_attempts {
            config.upstream_reconnect_max_attempts = attempts;
        }
        if let Some(vad) = self.upstream.vad {
            if let Some(threshold) = vad.threshold {
                config.vad_threshold = threshold;
            }
            if let Some(padding) = vad.prefix_padding_ms {
                config.vad_prefix_padding_ms = padding;
            }
            if let Some(silence) = vad.silence_duration_ms {
                config.vad_silence_duration_ms = silence;
            }
        }

        if let Some(required) = self.auth.required {
            config.auth_required = required;
        }
        if !self.auth.api_secrets.is_empty() {
            config.auth_api_secrets = self
                .auth
                .api_secrets
                .into_iter()
                .map(|s| AuthApiSecret::new(s.id, s.secret))
                .collect();
        }
        if let Some(secret) = self.auth.jwt_secret {
            config.auth_jwt_secret = Some(secret);
        }

        if let Some(origins) = self.security.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rps) = self.security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = self.security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if let Some(max) = self.security.max_websocket_connections {
            config.max_websocket_connections = if max == 0 { None } else { Some(max) };
        }
        if let Some(max) = self.security.max_connections_per_ip {
            config.max_connections_per_ip = max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
server:
  host: 127.0.0.1
  port: 9443

upstream:
  api_key: sk-from-file
  model: gpt-4o-mini-realtime-preview
  voice: coral
  reconnect_max_attempts: 7
  vad:
    silence_duration_ms: 800

auth:
  required: true
  api_secrets:
    - id: tenant-a
      secret: alpha

security:
  cors_allowed_origins: "*"
  max_connections_per_ip: 4
"#;

    #[test]
    fn yaml_overlays_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let mut config = ServerConfig::default();
        let yaml = YamlConfig::load(file.path()).unwrap();
        yaml.apply(&mut config);

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9443);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-from-file"));
        assert_eq!(config.realtime_model, "gpt-4o-mini-realtime-preview");
        assert_eq!(config.realtime_voice, "coral");
        assert_eq!(config.upstream_reconnect_max_attempts, 7);
        assert_eq!(config.vad_silence_duration_ms, 800);
        // Keys the file omits keep their defaults.
        assert_eq!(config.vad_prefix_padding_ms, 300);
        assert!(config.auth_required);
        assert_eq!(config.auth_api_secrets.len(), 1);
        assert_eq!(config.cors_allowed_origins.as_deref(), Some("*"));
        assert_eq!(config.max_connections_per_ip, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"server:\n  hostt: typo\n").unwrap();
        assert!(matches!(
            YamlConfig::load(file.path()),
            Err(ConfigError::FileParse { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let path = std::path::Path::new("/definitely/not/here.yaml");
        assert!(matches!(
            YamlConfig::load(path),
            Err(ConfigError::FileRead { .. })
        ));
    }
}
