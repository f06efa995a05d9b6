//! Liveness probing and push URL signing against a local HTTP stand-in.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use danmu_core::adapter::Adapter;
use danmu_core::error::{AdapterError, SignError};
use danmu_core::signer::{Signer, StaticSigner};
use danmu_douyin::{params, DouyinAdapter, DouyinConfig};

/// Request lines and cookie headers seen by the stand-in.
#[derive(Default)]
struct Seen {
    requests: Vec<(String, Option<String>)>,
}

struct Platform {
    base: String,
    seen: Arc<Mutex<Seen>>,
    status: Arc<Mutex<i64>>,
}

async fn platform() -> Platform {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Seen::default()));
    let status = Arc::new(Mutex::new(2_i64));

    let (seen2, status2) = (seen.clone(), status.clone());
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                match sock.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            let head = String::from_utf8_lossy(&buf).into_owned();
            let target = head.split_whitespace().nth(1).unwrap_or("/").to_owned();
            let cookie = head
                .lines()
                .find(|l| l.to_ascii_lowercase().starts_with("cookie:"))
                .map(|l| l["cookie:".len()..].trim().to_owned());
            seen2.lock().requests.push((target.clone(), cookie));

            let (extra, body) = if target.starts_with("/webcast/room/web/enter/") {
                let status = *status2.lock();
                (
                    "Content-Type: application/json\r\n".to_owned(),
                    format!(
                        r#"{{"data":{{"user":{{"sec_uid":"MS4wLj"}},"data":[{{"id_str":"7001","status":{status}}}]}}}}"#
                    ),
                )
            } else {
                (
                    "Set-Cookie: ttwid=tt-123; Path=/\r\n".to_owned(),
                    "ok".to_owned(),
                )
            };
            let resp = format!(
                "HTTP/1.1 200 OK\r\n{extra}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = sock.write_all(resp.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });

    Platform { base, seen, status }
}

fn adapter(p: &Platform, signer: Arc<dyn Signer>) -> DouyinAdapter {
    let config = DouyinConfig {
        home_url: format!("{}/", p.base),
        room_enter_url: format!("{}/webcast/room/web/enter/", p.base),
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Chrome/110.0 Safari/537.36".into()),
        ..DouyinConfig::default()
    };
    DouyinAdapter::new(
        "https://live.douyin.com/123456?from=share",
        reqwest::Client::new(),
        signer,
        config,
    )
    .unwrap()
}

fn query_param(url: &str, key: &str) -> Option<String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn probe_then_connect() {
    let p = platform().await;
    let a = adapter(&p, Arc::new(StaticSigner("sig-abc".into())));
    assert_eq!(a.web_rid(), "123456");

    assert!(a.check_liveness().await.unwrap());
    let room = a.room().unwrap();
    assert_eq!(room.room_id, "7001");
    assert_eq!(room.sec_uid, "MS4wLj");

    {
        let seen = p.seen.lock();
        assert_eq!(seen.requests.len(), 2);
        assert_eq!(seen.requests[0].0, "/");
        let (enter, cookie) = &seen.requests[1];
        assert!(enter.contains("web_rid=123456"));
        assert!(enter.contains("aid=6383"));
        assert_eq!(cookie.as_deref(), Some("ttwid=tt-123"));
    }

    let info = a.connection_info().await.unwrap();
    assert!(info.url.starts_with(params::PUSH_URL));
    assert_eq!(query_param(&info.url, "room_id").as_deref(), Some("7001"));
    assert_eq!(query_param(&info.url, "signature").as_deref(), Some("sig-abc"));
    assert!(info
        .headers
        .iter()
        .any(|(k, v)| k == "Cookie" && v == "ttwid=tt-123"));

    // ttwid is fetched once per adapter
    a.check_liveness().await.unwrap();
    assert_eq!(p.seen.lock().requests.len(), 3);
}

#[tokio::test]
async fn offline_room_cannot_connect() {
    let p = platform().await;
    *p.status.lock() = 4;
    let a = adapter(&p, Arc::new(StaticSigner("sig".into())));

    assert!(!a.check_liveness().await.unwrap());
    assert!(matches!(a.connection_info().await, Err(AdapterError::Identity(_))));

    *p.status.lock() = 2;
    assert!(a.check_liveness().await.unwrap());
    assert!(a.connection_info().await.is_ok());
}

#[tokio::test]
async fn signer_failure_surfaces() {
    let p = platform().await;
    let a = adapter(&p, Arc::new(StaticSigner(String::new())));
    assert!(a.check_liveness().await.unwrap());
    assert!(matches!(
        a.connection_info().await,
        Err(AdapterError::Sign(SignError::Empty))
    ));
}

#[tokio::test]
async fn unreachable_platform_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = DouyinConfig {
        home_url: format!("http://{addr}/"),
        room_enter_url: format!("http://{addr}/webcast/room/web/enter/"),
        ..DouyinConfig::default()
    };
    let a = DouyinAdapter::new(
        "https://live.douyin.com/1",
        reqwest::Client::new(),
        Arc::new(StaticSigner("sig".into())),
        config,
    )
    .unwrap();
    let err = a.check_liveness().await.unwrap_err();
    assert!(err.is_transient(), "{err}");
}
