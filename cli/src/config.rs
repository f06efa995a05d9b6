//! Application configuration file.
//!
//! ```yaml
//! log:
//!   level: info
//!   components: { danmu-ws: debug }
//! session:
//!   read_timeout_secs: 120
//! signer:
//!   kind: command
//!   program: node
//!   args: [sign.js]
//! dedup_capacity: 1000
//! streams:
//!   - id: 1
//!     url: https://live.douyin.com/123456
//!     name: someone
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use danmu_core::config::StreamConfig;
use danmu_core::dedup::DEFAULT_DEDUP_CAPACITY;
use danmu_core::policy::ReconnectPolicy;
use danmu_core::signer::{Signer, StaticSigner};
use danmu_douyin::{CommandSigner, DouyinConfig};
use danmu_ws::{SessionOptions, WsConnector};

use crate::logging::LogConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub session: SessionSettings,
    pub douyin: DouyinSettings,
    pub signer: SignerConfig,
    /// Per-task recency window for console output.
    pub dedup_capacity: usize,
    pub streams: Vec<StreamConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            session: SessionSettings::default(),
            douyin: DouyinSettings::default(),
            signer: SignerConfig::default(),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            streams: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}

/// Session timing, in whole seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub event_capacity: usize,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Pause between failed connection rounds.
    pub retry_delay_secs: u64,
    /// Reconnects tried when a live connection fails.
    pub reconnect_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            read_timeout_secs: 120,
            write_timeout_secs: 8,
            connect_timeout_secs: 10,
            retry_delay_secs: 5,
            reconnect_attempts: 3,
        }
    }
}

impl SessionSettings {
    pub fn options(&self) -> SessionOptions {
        let retry = Duration::from_secs(self.retry_delay_secs);
        SessionOptions {
            event_capacity: self.event_capacity.max(1),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            connect_policy: ReconnectPolicy::fixed(1, retry),
            retry_pause: retry,
            recover_policy: ReconnectPolicy::fixed(self.reconnect_attempts, Duration::ZERO),
        }
    }

    pub fn connector(&self) -> WsConnector {
        WsConnector {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DouyinSettings {
    pub heartbeat_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for DouyinSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: 10,
            request_timeout_secs: 10,
            user_agent: None,
        }
    }
}

impl DouyinSettings {
    pub fn adapter_config(&self) -> DouyinConfig {
        DouyinConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs.max(1)),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone(),
            ..DouyinConfig::default()
        }
    }
}

/// Where push URL signatures come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignerConfig {
    /// A fixed signature, mostly for testing.
    Static {
        #[serde(default)]
        value: String,
    },
    /// An external program: stub on stdin, signature on stdout.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_sign_timeout")]
        timeout_secs: u64,
    },
}

fn default_sign_timeout() -> u64 {
    10
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self::Static {
            value: String::new(),
        }
    }
}

impl SignerConfig {
    pub fn build(&self) -> Arc<dyn Signer> {
        match self {
            Self::Static { value } => Arc::new(StaticSigner(value.clone())),
            Self::Command {
                program,
                args,
                timeout_secs,
            } => Arc::new(
                CommandSigner::new(program.clone())
                    .with_args(args.iter().cloned())
                    .with_timeout(Duration::from_secs(*timeout_secs)),
            ),
        }
    }

    /// `true` when no signature source is configured at all.
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Static { value } if value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::parse("{}").unwrap();
        assert_eq!(config.dedup_capacity, 1000);
        assert_eq!(config.log.level, "info");
        assert!(config.streams.is_empty());
        assert!(config.signer.is_unset());

        let options = config.session.options();
        assert_eq!(options.event_capacity, 100);
        assert_eq!(options.read_timeout, Duration::from_secs(120));
        assert_eq!(options.write_timeout, Duration::from_secs(8));
        assert_eq!(options.retry_pause, Duration::from_secs(5));
        assert_eq!(options.recover_policy.attempts(), 3);
        assert_eq!(
            config.douyin.adapter_config().heartbeat_interval,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn full_document() {
        let yaml = r#"
log:
  level: debug
  json: true
  components:
    danmu-ws: trace
session:
  read_timeout_secs: 30
  reconnect_attempts: 5
signer:
  kind: command
  program: node
  args: [sign.js]
dedup_capacity: 50
streams:
  - id: 1
    url: https://live.douyin.com/123456
    name: first
  - id: 2
    url: https://live.douyin.com/654321
    enabled: false
    schedule: "@every 5m"
"#;
        let config = AppConfig::parse(yaml).unwrap();
        assert!(config.log.json);
        assert_eq!(config.log.components["danmu-ws"], "trace");
        assert_eq!(config.session.options().read_timeout, Duration::from_secs(30));
        assert_eq!(config.session.options().recover_policy.attempts(), 5);
        assert_eq!(config.session.write_timeout_secs, 8);
        assert_eq!(config.dedup_capacity, 50);
        assert_eq!(config.streams.len(), 2);
        assert!(!config.streams[1].enabled);
        assert_eq!(config.streams[1].schedule.as_deref(), Some("@every 5m"));
        match &config.signer {
            SignerConfig::Command {
                program,
                args,
                timeout_secs,
            } => {
                assert_eq!(program, "node");
                assert_eq!(args, &["sign.js"]);
                assert_eq!(*timeout_secs, 10);
            }
            other => panic!("unexpected signer {other:?}"),
        }
    }

    #[test]
    fn unknown_signer_kind_is_rejected() {
        assert!(AppConfig::parse("signer: { kind: magic }").is_err());
    }

    #[tokio::test]
    async fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let err = AppConfig::load(&missing).await.unwrap_err();
        assert!(err.to_string().contains("nope.yaml"));

        let path = dir.path().join("danmu.yaml");
        std::fs::write(&path, "dedup_capacity: 7\n").unwrap();
        assert_eq!(AppConfig::load(&path).await.unwrap().dedup_capacity, 7);
    }
}
