//! Initialization helpers for preparing a Voicebridge deployment.
//!
//! This module powers the `voicebridge init` CLI command, which writes a
//! starter `config.yaml` next to the binary so deployments do not begin from
//! a blank file.
//!
//! ```text
//! $ voicebridge init
//! $ voicebridge --config config.yaml
//! ```

use std::path::Path;

use anyhow::{Result, bail};

const CONFIG_TEMPLATE: &str = r#"# Voicebridge server configuration.
# Every key is optional; environment variables fill anything omitted here.

server:
  host: 0.0.0.0
  port: 3001
  # tls:
  #   cert_path: /etc/voicebridge/cert.pem
  #   key_path: /etc/voicebridge/key.pem

upstream:
  # api_key: sk-...            # or set OPENAI_API_KEY
  model: gpt-4o-realtime-preview
  voice: alloy
  # instructions: You are a concise voice assistant.
  temperature: 0.8
  transcription_model: whisper-1
  connect_timeout_secs: 15
  reconnect_delay_ms: 2000
  reconnect_max_attempts: 3
  vad:
    threshold: 0.5
    prefix_padding_ms: 300
    silence_duration_ms: 500

auth:
  required: false
  # api_secrets:
  #   - id: tenant-a
  #     secret: change-me
  # jwt_secret: change-me

security:
  # cors_allowed_origins: "*"
  rate_limit_requests_per_second: 60
  rate_limit_burst_size: 10
  max_websocket_connections: 1024
  max_connections_per_ip: 16
"#;

/// Write a starter configuration file at the given path.
pub fn run(path: &Path) -> Result<()> {
    if path.exists() {
        bail!(
            "refusing to overwrite existing config file at {}",
            path.display()
        );
    }
    std::fs::write(path, CONFIG_TEMPLATE)?;
    tracing::info!("Wrote starter configuration to {}", path.display());
    println!("Wrote starter configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn template_produces_a_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        run(&path).unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.realtime_voice, "alloy");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server: {}\n").unwrap();
        assert!(run(&path).is_err());
    }
}
