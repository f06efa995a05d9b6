//! Request URL building and signature input.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

pub const HOME_URL: &str = "https://live.douyin.com/";
pub const ROOM_ENTER_URL: &str = "https://live.douyin.com/webcast/room/web/enter/";
pub const PUSH_URL: &str = "wss://webcast5-ws-web-lf.douyin.com/webcast/im/push/v2/";

const AID: &str = "6383";
const VERSION_CODE: &str = "180800";
const SDK_VERSION: &str = "1.0.14-beta.0";

static WEB_RID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"douyin\.com/.*?(\d+)(?:\?.*)?$")
        .expect("web room id regex is a compile-time constant and always valid")
});

/// Extract the web room id from a live page URL.
pub fn web_rid(live_url: &str) -> Option<String> {
    WEB_RID
        .captures(live_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Browser name and version as the web client reports them: the text
/// before the first `/` and whatever follows its last occurrence.
pub fn browser_params(user_agent: &str) -> (String, String) {
    let name = user_agent.split('/').next().unwrap_or_default();
    if name.is_empty() {
        return (String::new(), String::new());
    }
    let version = user_agent
        .rsplit(name)
        .next()
        .unwrap_or_default()
        .trim_start_matches('/');
    (name.to_owned(), version.to_owned())
}

/// Add (or overwrite) the common web client query parameters on `raw`.
pub fn with_common_params(raw: &str, user_agent: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(raw)?;
    let (browser_name, browser_version) = browser_params(user_agent);
    let common = [
        ("aid", AID.to_owned()),
        ("device_platform", "web".to_owned()),
        ("browser_language", "zh-CN".to_owned()),
        ("browser_platform", "Win32".to_owned()),
        ("browser_name", browser_name),
        ("browser_version", browser_version),
    ];

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !common.iter().any(|(c, _)| c == k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .extend_pairs(common);
    Ok(url.into())
}

/// The ordered parameter list whose digest is handed to the signer.
pub fn signature_params(room_id: &str, unique_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("live_id", "1".into()),
        ("aid", AID.into()),
        ("version_code", VERSION_CODE.into()),
        ("webcast_sdk_version", SDK_VERSION.into()),
        ("room_id", room_id.into()),
        ("sub_room_id", String::new()),
        ("sub_channel_id", String::new()),
        ("did_rule", "3".into()),
        ("user_unique_id", unique_id.into()),
        ("device_platform", "web".into()),
        ("device_type", String::new()),
        ("ac", String::new()),
        ("identity", "audience".into()),
    ]
}

/// Hex MD5 of `k=v` pairs joined by commas, in order.
pub fn signature_stub(params: &[(&str, String)]) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{:x}", md5::compute(joined.as_bytes()))
}

/// Push socket URL for a room.
pub fn push_url(
    room_id: &str,
    unique_id: &str,
    signature: &str,
    user_agent: &str,
) -> Result<String, url::ParseError> {
    let mut url = Url::parse(PUSH_URL)?;
    url.query_pairs_mut().extend_pairs([
        ("room_id", room_id),
        ("compress", "gzip"),
        ("version_code", VERSION_CODE),
        ("webcast_sdk_version", SDK_VERSION),
        ("live_id", "1"),
        ("did_rule", "3"),
        ("user_unique_id", unique_id),
        ("identity", "audience"),
        ("signature", signature),
    ]);
    with_common_params(url.as_str(), user_agent)
}

/// Room-enter API URL for a web room id.
pub fn room_enter_url(
    endpoint: &str,
    web_rid: &str,
    user_agent: &str,
) -> Result<String, url::ParseError> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut().append_pair("web_rid", web_rid);
    with_common_params(url.as_str(), user_agent)
}
