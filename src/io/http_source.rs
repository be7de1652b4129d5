//! Live map endpoint backend
//!
//! Listing: form POST of the region bounds (8-digit strings) plus fixed
//! filter flags. The response is a JSON object keyed by site id, each value
//! carrying an obfuscated name (`rfs21d`) and a base64 kind marker (`xgxg35`).
//!
//! Detail: form POST `mid=<id>`, answered with `description`, `markerlat`
//! and `markerlng`.
//!
//! Either endpoint may answer `{"spam": ...}` (or HTTP 429) to ask for a
//! back-off, and `null` when it is momentarily unable to answer.

use crate::domain::region::{format_coord, Region};
use crate::domain::site::{SiteDetail, SiteId};
use crate::infra::config::Config;
use crate::io::source::{
    DetailOutcome, DiscoveryOutcome, ListedEntry, MalformedRecord, RawRecord, SiteSource,
    SourceError,
};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

const NAME_FIELD: &str = "rfs21d";
const KIND_FIELD: &str = "xgxg35";
const SPAM_FIELD: &str = "spam";

const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/61.0.3163.100 Safari/537.36";

// Only sites with gyms enabled; pokestops, nests, raids and sponsors off
const FILTER_FLAGS: [(&str, &str); 6] = [
    ("fpoke", "0"),
    ("fgym", "1"),
    ("farm", "0"),
    ("nests", "0"),
    ("raids", "0"),
    ("sponsor", "0"),
];

const MAP_FILTERS: &str = "0[##split##]1[##split##]1[##split##]0[##split##]0[##split##]0\
     [##split##]0[##split##]0[##split##]1[##split##]1[##split##]1[##split##]0";

pub struct HttpMapSource {
    client: reqwest::Client,
    listing_url: String,
    detail_url: String,
    user_id: String,
    session_id: String,
}

impl HttpMapSource {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_AGENT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));

        let mut builder = reqwest::Client::builder().default_headers(headers).http1_only();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            listing_url: config.listing_url().to_string(),
            detail_url: config.detail_url().to_string(),
            user_id: config.user_id().to_string(),
            session_id: config.session_id().to_string(),
        })
    }

    fn cookie(&self, focus: Option<&Region>) -> String {
        session_cookie(&self.user_id, &self.session_id, focus)
    }

    async fn post(
        &self,
        url: &str,
        cookie: String,
        form: &[(&str, String)],
    ) -> Result<(u16, String), SourceError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::COOKIE, cookie)
            .form(form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl SiteSource for HttpMapSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn query_region(&self, region: &Region) -> Result<DiscoveryOutcome, SourceError> {
        let mut form: Vec<(&str, String)> = vec![
            ("fromlat", format_coord(region.min_lat())),
            ("tolat", format_coord(region.max_lat())),
            ("fromlng", format_coord(region.min_long())),
            ("tolng", format_coord(region.max_long())),
        ];
        form.extend(FILTER_FLAGS.iter().map(|(k, v)| (*k, v.to_string())));

        let (status, body) = self.post(&self.listing_url, self.cookie(Some(region)), &form).await?;
        debug!(region = %region, status = status, bytes = body.len(), "listing_response");

        match classify_status(status, &self.listing_url)? {
            StatusClass::RateLimited => Ok(DiscoveryOutcome::RateLimited),
            StatusClass::Retry => Ok(DiscoveryOutcome::Ambiguous),
            StatusClass::Body => Ok(classify_listing(&body)),
        }
    }

    async fn query_detail(&self, id: &SiteId) -> Result<DetailOutcome, SourceError> {
        let form = [("mid", id.0.clone())];

        let (status, body) = self.post(&self.detail_url, self.cookie(None), &form).await?;
        debug!(site_id = %id, status = status, bytes = body.len(), "detail_response");

        match classify_status(status, &self.detail_url)? {
            StatusClass::RateLimited => Ok(DetailOutcome::RateLimited),
            StatusClass::Retry => Ok(DetailOutcome::Ambiguous),
            StatusClass::Body => Ok(classify_detail(&body)),
        }
    }
}

/// Cookie header carrying the session values; listing queries also pin the
/// map view to the region midpoint.
fn session_cookie(user_id: &str, session_id: &str, focus: Option<&Region>) -> String {
    let mut cookie = format!(
        "updatetoken=0; __cfduid={user_id}; PHPSESSID={session_id}; mapfilters={MAP_FILTERS}"
    );
    if let Some(region) = focus {
        cookie.push_str(&format!(
            "; latlngzoom=15[##split##]{}[##split##]{}",
            format_coord(region.mid_lat()),
            format_coord(region.mid_long())
        ));
    }
    cookie
}

#[derive(Debug, PartialEq, Eq)]
enum StatusClass {
    Body,
    RateLimited,
    Retry,
}

fn classify_status(status: u16, endpoint: &str) -> Result<StatusClass, SourceError> {
    match status {
        429 => Ok(StatusClass::RateLimited),
        500..=599 => Ok(StatusClass::Retry),
        400..=499 => Err(SourceError::Status { status, endpoint: endpoint.to_string() }),
        _ => Ok(StatusClass::Body),
    }
}

/// Parse a body as JSON; `None` for an empty or unparsable body
fn parse_body(body: &str) -> Option<Value> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

fn is_spam(object: &Map<String, Value>) -> bool {
    object.contains_key(SPAM_FIELD)
}

fn classify_listing(body: &str) -> DiscoveryOutcome {
    match parse_body(body) {
        None | Some(Value::Null) => DiscoveryOutcome::Ambiguous,
        Some(Value::Object(object)) if is_spam(&object) => DiscoveryOutcome::RateLimited,
        Some(Value::Object(object)) if object.is_empty() => DiscoveryOutcome::Empty,
        Some(Value::Object(object)) => DiscoveryOutcome::Listing(
            object.iter().map(|(key, value)| decode_entry(key, value)).collect(),
        ),
        // The endpoint answers an empty array for a region with no sites
        Some(_) => DiscoveryOutcome::Empty,
    }
}

fn decode_entry(key: &str, value: &Value) -> ListedEntry {
    let malformed = |reason: &str| MalformedRecord { key: key.to_string(), reason: reason.to_string() };

    if key.trim().is_empty() {
        return Err(malformed("empty id"));
    }
    let object = value.as_object().ok_or_else(|| malformed("entry is not an object"))?;
    let name = object
        .get(NAME_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing name"))?;
    let encoded = object
        .get(KIND_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing kind marker"))?;
    let kind = decode_kind(encoded).ok_or_else(|| malformed("undecodable kind marker"))?;

    Ok(RawRecord { id: SiteId::from(key), name: name.to_string(), kind })
}

fn decode_kind(encoded: &str) -> Option<u32> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    let text = std::str::from_utf8(&bytes).ok()?;
    text.trim().parse().ok()
}

fn classify_detail(body: &str) -> DetailOutcome {
    let object = match parse_body(body) {
        None | Some(Value::Null) => return DetailOutcome::Ambiguous,
        Some(Value::Object(object)) => object,
        Some(_) => return DetailOutcome::Missing,
    };
    if is_spam(&object) {
        return DetailOutcome::RateLimited;
    }

    let description = object.get("description").and_then(Value::as_str);
    let latitude = object.get("markerlat").and_then(parse_coordinate);
    let longitude = object.get("markerlng").and_then(parse_coordinate);

    match (description, latitude, longitude) {
        (Some(description), Some(latitude), Some(longitude)) => DetailOutcome::Found(SiteDetail {
            description: description.to_string(),
            latitude,
            longitude,
        }),
        _ => DetailOutcome::Missing,
    }
}

/// Coordinates arrive as strings or as bare numbers
fn parse_coordinate(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn kind(n: u32) -> String {
        STANDARD.encode(n.to_string())
    }

    #[test]
    fn test_session_cookie_with_focus() {
        let region = Region::new(dec("0"), dec("1"), dec("10"), dec("11")).unwrap();
        let cookie = session_cookie("user", "sess", Some(&region));
        assert!(cookie.starts_with("updatetoken=0; __cfduid=user; PHPSESSID=sess; mapfilters="));
        assert!(cookie.ends_with("latlngzoom=15[##split##]0.50000000[##split##]10.50000000"));
    }

    #[test]
    fn test_session_cookie_without_focus() {
        let cookie = session_cookie("u", "s", None);
        assert!(!cookie.contains("latlngzoom"));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200, "x").unwrap(), StatusClass::Body);
        assert_eq!(classify_status(429, "x").unwrap(), StatusClass::RateLimited);
        assert_eq!(classify_status(503, "x").unwrap(), StatusClass::Retry);
        let err = classify_status(403, "http://map/listing").unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 403, .. }));
    }

    #[test]
    fn test_listing_spam_is_rate_limited() {
        assert_eq!(classify_listing(r#"{"spam": 1}"#), DiscoveryOutcome::RateLimited);
    }

    #[test]
    fn test_listing_null_and_garbage_are_ambiguous() {
        assert_eq!(classify_listing("null"), DiscoveryOutcome::Ambiguous);
        assert_eq!(classify_listing(""), DiscoveryOutcome::Ambiguous);
        assert_eq!(classify_listing("  \n"), DiscoveryOutcome::Ambiguous);
        assert_eq!(classify_listing("<html>busy</html>"), DiscoveryOutcome::Ambiguous);
    }

    #[test]
    fn test_listing_non_object_is_empty() {
        assert_eq!(classify_listing("[]"), DiscoveryOutcome::Empty);
        assert_eq!(classify_listing("0"), DiscoveryOutcome::Empty);
        assert_eq!(classify_listing("{}"), DiscoveryOutcome::Empty);
    }

    #[test]
    fn test_listing_decodes_entries() {
        let body = format!(
            r#"{{"101": {{"rfs21d": "Clock Tower", "xgxg35": "{}"}},
                 "102": {{"rfs21d": "Bench", "xgxg35": "{}"}},
                 "103": "garbage"}}"#,
            kind(2),
            kind(1)
        );
        let DiscoveryOutcome::Listing(entries) = classify_listing(&body) else {
            panic!("expected listing");
        };
        assert_eq!(entries.len(), 3);

        let decoded: Vec<_> = entries.iter().filter_map(|e| e.as_ref().ok()).collect();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.contains(&&RawRecord {
            id: SiteId::from("101"),
            name: "Clock Tower".to_string(),
            kind: 2
        }));
        assert!(entries.iter().any(|e| matches!(e, Err(m) if m.key == "103")));
    }

    #[test]
    fn test_decode_entry_rejects_bad_kind() {
        let value = serde_json::json!({"rfs21d": "Statue", "xgxg35": "!!not base64!!"});
        let err = decode_entry("7", &value).unwrap_err();
        assert_eq!(err.reason, "undecodable kind marker");

        let value = serde_json::json!({"rfs21d": "Statue", "xgxg35": STANDARD.encode("abc")});
        assert!(decode_entry("7", &value).is_err());

        let value = serde_json::json!({"xgxg35": kind(3)});
        assert_eq!(decode_entry("7", &value).unwrap_err().reason, "missing name");
    }

    #[test]
    fn test_detail_found_with_string_or_number_coordinates() {
        let outcome = classify_detail(
            r#"{"description": "Old fountain", "markerlat": "51.50072", "markerlng": -0.12462}"#,
        );
        assert_eq!(
            outcome,
            DetailOutcome::Found(SiteDetail {
                description: "Old fountain".to_string(),
                latitude: dec("51.50072"),
                longitude: dec("-0.12462"),
            })
        );
    }

    #[test]
    fn test_detail_classification() {
        assert_eq!(classify_detail(r#"{"spam": true}"#), DetailOutcome::RateLimited);
        assert_eq!(classify_detail("null"), DetailOutcome::Ambiguous);
        assert_eq!(classify_detail("not json"), DetailOutcome::Ambiguous);
        assert_eq!(classify_detail("[]"), DetailOutcome::Missing);
        assert_eq!(classify_detail(r#"{"description": "x"}"#), DetailOutcome::Missing);
        assert_eq!(
            classify_detail(r#"{"description": "x", "markerlat": "north", "markerlng": "1"}"#),
            DetailOutcome::Missing
        );
    }

    #[derive(Debug, Clone)]
    struct Captured {
        path: String,
        cookie: String,
        form: String,
    }

    struct MapServer {
        base: String,
        captured: Arc<Mutex<Vec<Captured>>>,
    }

    /// Local endpoint answering with the scripted (status, body) replies in order
    async fn map_server(replies: Vec<(u16, &'static str)>) -> MapServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let replies = Arc::new(Mutex::new(VecDeque::from(replies)));

        let log = captured.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = log.clone();
                let replies = replies.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let log = log.clone();
                        let replies = replies.clone();
                        async move {
                            let path = req.uri().path().to_string();
                            let cookie = req
                                .headers()
                                .get(hyper::header::COOKIE)
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or_default()
                                .to_string();
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            log.lock().push(Captured {
                                path,
                                cookie,
                                form: String::from_utf8_lossy(&body).into_owned(),
                            });

                            let (status, body) = replies.lock().pop_front().unwrap_or((200, "null"));
                            let response = Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::from(body)))
                                .unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
                });
            }
        });

        MapServer { base: format!("http://{addr}"), captured }
    }

    fn source_for(server: &MapServer) -> HttpMapSource {
        let mut source = HttpMapSource::new(&Config::default()).unwrap();
        source.listing_url = format!("{}/listing", server.base);
        source.detail_url = format!("{}/detail", server.base);
        source.user_id = "user".to_string();
        source.session_id = "sess".to_string();
        source
    }

    #[tokio::test]
    async fn test_listing_posts_fixed_scale_bounds_and_filters() {
        let server = map_server(vec![(200, r#"{"101": {"rfs21d": "Clock Tower", "xgxg35": "Mg=="}}"#)]).await;
        let source = source_for(&server);
        let region = Region::new(dec("40.7"), dec("40.8"), dec("-74.02"), dec("-73.92")).unwrap();

        let outcome = source.query_region(&region).await.unwrap();

        assert_eq!(
            outcome,
            DiscoveryOutcome::Listing(vec![Ok(RawRecord {
                id: SiteId::from("101"),
                name: "Clock Tower".to_string(),
                kind: 2,
            })])
        );
        let captured = server.captured.lock().clone();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].path, "/listing");
        assert_eq!(
            captured[0].form,
            "fromlat=40.70000000&tolat=40.80000000&fromlng=-74.02000000&tolng=-73.92000000\
             &fpoke=0&fgym=1&farm=0&nests=0&raids=0&sponsor=0"
        );
        assert!(captured[0].cookie.contains("__cfduid=user; PHPSESSID=sess"));
        assert!(captured[0].cookie.ends_with("latlngzoom=15[##split##]40.75000000[##split##]-73.97000000"));
    }

    #[tokio::test]
    async fn test_detail_posts_site_id() {
        let server = map_server(vec![(
            200,
            r#"{"description": "Old fountain", "markerlat": "51.50072", "markerlng": "-0.12462"}"#,
        )])
        .await;
        let source = source_for(&server);

        let outcome = source.query_detail(&SiteId::from("1004")).await.unwrap();

        assert!(matches!(outcome, DetailOutcome::Found(ref d) if d.latitude == dec("51.50072")));
        let captured = server.captured.lock().clone();
        assert_eq!(captured[0].path, "/detail");
        assert_eq!(captured[0].form, "mid=1004");
        assert!(captured[0].cookie.contains("PHPSESSID=sess"));
        assert!(!captured[0].cookie.contains("latlngzoom"));
    }

    #[tokio::test]
    async fn test_http_status_classification() {
        let server = map_server(vec![
            (429, ""),
            (503, "busy"),
            (200, r#"{"spam": 1}"#),
            (404, "[]"),
        ])
        .await;
        let source = source_for(&server);
        let region = Region::new(dec("0"), dec("1"), dec("0"), dec("1")).unwrap();

        assert_eq!(source.query_region(&region).await.unwrap(), DiscoveryOutcome::RateLimited);
        assert_eq!(source.query_region(&region).await.unwrap(), DiscoveryOutcome::Ambiguous);
        assert_eq!(source.query_detail(&SiteId::from("7")).await.unwrap(), DetailOutcome::RateLimited);

        let err = source.query_detail(&SiteId::from("7")).await.unwrap_err();
        match err {
            SourceError::Status { status, endpoint } => {
                assert_eq!(status, 404);
                assert!(endpoint.ends_with("/detail"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut source = HttpMapSource::new(&Config::default()).unwrap();
        source.detail_url = format!("http://{addr}/detail");

        let err = source.query_detail(&SiteId::from("1")).await.unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
    }

    #[test]
    fn test_new_from_default_config() {
        let source = HttpMapSource::new(&Config::default()).unwrap();
        assert_eq!(source.name(), "http");
        assert_eq!(source.listing_url, "http://127.0.0.1:8088/listing");
    }
}
