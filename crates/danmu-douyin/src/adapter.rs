//! The Douyin platform strategy and its factory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{COOKIE, REFERER, USER_AGENT};
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

use danmu_core::adapter::{Adapter, AdapterFactory, ConnectionInfo, EventSink, HeartbeatSpec};
use danmu_core::error::{AdapterError, ConfigError, DecodeError};
use danmu_core::signer::Signer;

use crate::decode;
use crate::identity;
use crate::params;
use crate::room::RoomInfo;

pub const PLATFORM: &str = "douyin";

/// Tunables for [`DouyinAdapter`].
#[derive(Debug, Clone)]
pub struct DouyinConfig {
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
    /// Page fetched for the `ttwid` cookie.
    pub home_url: String,
    pub room_enter_url: String,
    /// Fixed user agent; a random desktop one is drawn per adapter if unset.
    pub user_agent: Option<String>,
}

impl Default for DouyinConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            home_url: params::HOME_URL.to_owned(),
            room_enter_url: params::ROOM_ENTER_URL.to_owned(),
            user_agent: None,
        }
    }
}

/// Adapter for one Douyin live room.
///
/// # Thread Safety
/// The room identity learned by [`Adapter::check_liveness`] sits behind a
/// mutex and is read by [`Adapter::connection_info`]; both may run at once.
pub struct DouyinAdapter {
    web_rid: String,
    user_agent: String,
    config: DouyinConfig,
    http: reqwest::Client,
    signer: Arc<dyn Signer>,
    ttwid: OnceCell<String>,
    room: Mutex<Option<RoomInfo>>,
}

impl DouyinAdapter {
    pub fn new(
        live_url: &str,
        http: reqwest::Client,
        signer: Arc<dyn Signer>,
        config: DouyinConfig,
    ) -> Result<Self, AdapterError> {
        let web_rid = params::web_rid(live_url).ok_or_else(|| ConfigError::MalformedUrl {
            url: live_url.to_owned(),
            reason: "no web room id".into(),
        })?;
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(identity::random_user_agent);
        Ok(Self {
            web_rid,
            user_agent,
            config,
            http,
            signer,
            ttwid: OnceCell::new(),
            room: Mutex::new(None),
        })
    }

    pub fn web_rid(&self) -> &str {
        &self.web_rid
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Room identity from the most recent liveness probe.
    pub fn room(&self) -> Option<RoomInfo> {
        self.room.lock().clone()
    }

    async fn ttwid(&self) -> Result<&str, AdapterError> {
        self.ttwid
            .get_or_try_init(|| self.fetch_ttwid())
            .await
            .map(String::as_str)
    }

    async fn fetch_ttwid(&self) -> Result<String, AdapterError> {
        let resp = self
            .http
            .get(&self.config.home_url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?;
        let ttwid = resp
            .cookies()
            .find(|c| c.name() == "ttwid")
            .map(|c| c.value().to_owned())
            .ok_or_else(|| AdapterError::UnexpectedResponse("no ttwid cookie".into()))?;
        tracing::debug!(web_rid = %self.web_rid, "ttwid acquired");
        Ok(ttwid)
    }

    async fn room_info(&self) -> Result<RoomInfo, AdapterError> {
        let ttwid = self.ttwid().await?;
        let url = params::room_enter_url(&self.config.room_enter_url, &self.web_rid, &self.user_agent)
            .map_err(|e| ConfigError::MalformedUrl {
                url: self.config.room_enter_url.clone(),
                reason: e.to_string(),
            })?;

        let resp = self
            .http
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .header(REFERER, params::HOME_URL)
            .header(COOKIE, format!("ttwid={ttwid}"))
            .send()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AdapterError::Http(format!("room enter returned HTTP {}", resp.status().as_u16())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AdapterError::UnexpectedResponse(e.to_string()))?;
        RoomInfo::from_enter_response(&body)
    }
}

#[async_trait]
impl Adapter for DouyinAdapter {
    fn platform(&self) -> &str {
        PLATFORM
    }

    async fn connection_info(&self) -> Result<ConnectionInfo, AdapterError> {
        let room = self
            .room()
            .filter(RoomInfo::is_live)
            .ok_or_else(|| AdapterError::Identity(format!("room {} not resolved as live", self.web_rid)))?;
        let ttwid = self.ttwid().await?;

        let unique_id = identity::random_unique_id();
        let stub = params::signature_stub(&params::signature_params(&room.room_id, &unique_id));
        let signature = self.signer.sign(&stub).await?;
        let url = params::push_url(&room.room_id, &unique_id, &signature, &self.user_agent)
            .map_err(|e| ConfigError::MalformedUrl {
                url: params::PUSH_URL.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(ConnectionInfo::new(url)
            .with_header("User-Agent", self.user_agent.clone())
            .with_header("Cookie", format!("ttwid={ttwid}")))
    }

    fn heartbeat_spec(&self) -> HeartbeatSpec {
        HeartbeatSpec {
            interval: self.config.heartbeat_interval,
            payload: decode::heartbeat_frame(),
        }
    }

    async fn decode_frame(
        &self,
        raw: &[u8],
        sink: &EventSink,
    ) -> Result<Option<Vec<u8>>, DecodeError> {
        let frame = decode::push_frame(raw)?;
        if frame.payload_type == decode::PAYLOAD_TYPE_HEARTBEAT || frame.payload.is_empty() {
            return Ok(None);
        }
        let response = decode::response(&frame)?;

        for msg in &response.messages_list {
            match decode::event(msg) {
                Ok(event) => sink.send(event).await.map_err(|_| DecodeError::SinkClosed)?,
                Err(e) => {
                    tracing::debug!(web_rid = %self.web_rid, msg_id = msg.msg_id, error = %e, "skipping message")
                }
            }
        }
        Ok(decode::ack_frame(&frame, &response))
    }

    async fn check_liveness(&self) -> Result<bool, AdapterError> {
        let info = self.room_info().await?;
        let live = info.is_live();
        tracing::debug!(
            web_rid = %self.web_rid,
            room_id = %info.room_id,
            status = info.status,
            live,
            "room status"
        );
        *self.room.lock() = Some(info);
        Ok(live)
    }
}

/// Builds a [`DouyinAdapter`] for `*.douyin.com` URLs and rejects the rest
/// as unsupported.
pub struct DouyinAdapterFactory {
    http: reqwest::Client,
    signer: Arc<dyn Signer>,
    config: DouyinConfig,
}

impl DouyinAdapterFactory {
    pub fn new(signer: Arc<dyn Signer>, config: DouyinConfig) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AdapterError::Http(e.to_string()))?;
        Ok(Self {
            http,
            signer,
            config,
        })
    }

    /// Concrete adapter for `url`, for callers that need its room details.
    pub fn adapter(&self, url: &str) -> Result<DouyinAdapter, AdapterError> {
        if !Self::accepts(url) {
            return Err(ConfigError::UnsupportedUrl { url: url.to_owned() }.into());
        }
        DouyinAdapter::new(url, self.http.clone(), self.signer.clone(), self.config.clone())
    }

    /// `true` if `url` points at a Douyin host.
    pub fn accepts(url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .is_some_and(|host| host == "douyin.com" || host.ends_with(".douyin.com"))
    }
}

#[async_trait]
impl AdapterFactory for DouyinAdapterFactory {
    async fn create(&self, url: &str) -> Result<Arc<dyn Adapter>, AdapterError> {
        Ok(Arc::new(self.adapter(url)?))
    }
}
