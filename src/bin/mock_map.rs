//! Mock map endpoint
//!
//! Serves a synthetic grid of sites over the same listing/detail contract as
//! the live map, for local end-to-end crawls.
//!
//! Behavior:
//! 1. POST /listing with fromlat/tolat/fromlng/tolng returns every grid site
//!    inside the bounds, keyed by id, truncated to --max-results
//! 2. POST /detail with mid=<id> returns description and coordinates
//! 3. Every --spam-every-th request is answered with {"spam": 1}
//! 4. Every third site is a plain marker (kind 1), the rest are sites of interest
//!
//! Usage:
//!   cargo run --bin mock_map -- --port 8088 --max-results 250 --spam-every 40

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::form_urlencoded;

#[derive(Parser, Debug)]
#[command(name = "mock_map")]
#[command(about = "Mock map endpoint serving a synthetic site grid")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8088")]
    port: u16,

    /// South-west corner of the grid
    #[arg(long, default_value = "40.70", allow_hyphen_values = true)]
    origin_lat: Decimal,

    #[arg(long, default_value = "-74.02", allow_hyphen_values = true)]
    origin_long: Decimal,

    /// Distance between neighbouring sites (degrees)
    #[arg(long, default_value = "0.002")]
    step: Decimal,

    /// Sites per grid row and column
    #[arg(long, default_value = "50")]
    grid_size: u32,

    /// Listing responses hold at most this many entries
    #[arg(long, default_value = "250")]
    max_results: usize,

    /// Answer every Nth request with a spam warning (0 disables)
    #[arg(long, default_value = "0")]
    spam_every: u64,
}

#[derive(Debug, Clone)]
struct MockSite {
    id: u64,
    name: String,
    kind: u32,
    lat: Decimal,
    long: Decimal,
}

struct MockState {
    sites: Vec<MockSite>,
    max_results: usize,
    spam_every: u64,
    requests: AtomicU64,
}

impl MockState {
    /// True when this request should be refused
    fn spam_turn(&self) -> bool {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.spam_every > 0 && n % self.spam_every == 0
    }
}

fn build_grid(origin_lat: Decimal, origin_long: Decimal, step: Decimal, size: u32) -> Vec<MockSite> {
    let mut sites = Vec::with_capacity((size * size) as usize);
    for row in 0..size {
        for col in 0..size {
            let id = 1000 + u64::from(row * size + col);
            sites.push(MockSite {
                id,
                name: format!("Site {row}-{col}"),
                kind: if id % 3 == 0 { 1 } else { 2 },
                lat: origin_lat + step * Decimal::from(row),
                long: origin_long + step * Decimal::from(col),
            });
        }
    }
    sites
}

fn parse_form(body: &[u8]) -> HashMap<String, String> {
    form_urlencoded::parse(body).into_owned().collect()
}

fn form_decimal(form: &HashMap<String, String>, key: &str) -> Option<Decimal> {
    form.get(key).and_then(|v| Decimal::from_str(v).ok())
}

fn listing_body(state: &MockState, form: &HashMap<String, String>) -> String {
    let (Some(from_lat), Some(to_lat), Some(from_long), Some(to_long)) = (
        form_decimal(form, "fromlat"),
        form_decimal(form, "tolat"),
        form_decimal(form, "fromlng"),
        form_decimal(form, "tolng"),
    ) else {
        return "null".to_string();
    };

    let entries: Map<String, Value> = state
        .sites
        .iter()
        .filter(|s| s.lat >= from_lat && s.lat <= to_lat && s.long >= from_long && s.long <= to_long)
        .take(state.max_results)
        .map(|s| {
            (
                s.id.to_string(),
                json!({"rfs21d": s.name, "xgxg35": STANDARD.encode(s.kind.to_string())}),
            )
        })
        .collect();

    if entries.is_empty() {
        "[]".to_string()
    } else {
        Value::Object(entries).to_string()
    }
}

fn detail_body(state: &MockState, form: &HashMap<String, String>) -> String {
    let site = form
        .get("mid")
        .and_then(|id| id.parse::<u64>().ok())
        .and_then(|id| state.sites.iter().find(|s| s.id == id));

    match site {
        Some(s) => json!({
            "description": format!("Synthetic site {}", s.name),
            "markerlat": s.lat.to_string(),
            "markerlng": s.long.to_string(),
        })
        .to_string(),
        None => "[]".to_string(),
    }
}

fn respond(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<MockState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "mock_body_read_failed");
            return Ok(respond(StatusCode::BAD_REQUEST, "null".to_string()));
        }
    };
    let form = parse_form(&body);

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/listing" | "/detail") if state.spam_turn() => {
            warn!(path = %path, "mock_spam_response");
            respond(StatusCode::OK, r#"{"spam":1}"#.to_string())
        }
        (&Method::POST, "/listing") => {
            let body = listing_body(&state, &form);
            info!(bounds = ?form, bytes = body.len(), "mock_listing");
            respond(StatusCode::OK, body)
        }
        (&Method::POST, "/detail") => {
            info!(mid = ?form.get("mid"), "mock_detail");
            respond(StatusCode::OK, detail_body(&state, &form))
        }
        _ => respond(StatusCode::NOT_FOUND, "null".to_string()),
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let state = Arc::new(MockState {
        sites: build_grid(args.origin_lat, args.origin_long, args.step, args.grid_size),
        max_results: args.max_results,
        spam_every: args.spam_every,
        requests: AtomicU64::new(0),
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!(
        port = %args.port,
        sites = state.sites.len(),
        max_results = args.max_results,
        spam_every = args.spam_every,
        "mock_map_started"
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "mock_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "mock_accept_error");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("mock_map_shutdown");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max_results: usize, spam_every: u64) -> MockState {
        MockState {
            sites: build_grid(Decimal::ZERO, Decimal::ZERO, Decimal::ONE, 3),
            max_results,
            spam_every,
            requests: AtomicU64::new(0),
        }
    }

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_form() {
        let parsed = parse_form(b"fromlat=0.50000000&tolat=1.00000000&fromlng=%2D1.5&mid=7");
        assert_eq!(parsed["fromlat"], "0.50000000");
        assert_eq!(parsed["fromlng"], "-1.5");
        assert_eq!(parsed["mid"], "7");
    }

    #[test]
    fn test_parse_form_decodes_escapes() {
        let parsed = parse_form(b"mid=a%20b&name=x+y&k%41=1&fromlat=%2D40%2E5");
        assert_eq!(parsed["mid"], "a b");
        assert_eq!(parsed["name"], "x y");
        assert_eq!(parsed["kA"], "1");
        assert_eq!(parsed["fromlat"], "-40.5");
        assert!(!parsed.contains_key("k%41"));
    }

    #[test]
    fn test_listing_filters_bounds_and_truncates() {
        let bounds = form(&[("fromlat", "0"), ("tolat", "1"), ("fromlng", "0"), ("tolng", "1")]);
        let body: Value = serde_json::from_str(&listing_body(&state(10, 0), &bounds)).unwrap();
        assert_eq!(body.as_object().unwrap().len(), 4);

        let body: Value = serde_json::from_str(&listing_body(&state(2, 0), &bounds)).unwrap();
        assert_eq!(body.as_object().unwrap().len(), 2);

        let outside = form(&[("fromlat", "10"), ("tolat", "11"), ("fromlng", "0"), ("tolng", "1")]);
        assert_eq!(listing_body(&state(10, 0), &outside), "[]");
    }

    #[test]
    fn test_detail_lookup() {
        let body: Value = serde_json::from_str(&detail_body(&state(10, 0), &form(&[("mid", "1004")]))).unwrap();
        assert_eq!(body["markerlat"], "1");
        assert_eq!(detail_body(&state(10, 0), &form(&[("mid", "5")])), "[]");
    }

    #[test]
    fn test_spam_turn() {
        let s = state(10, 3);
        let turns: Vec<bool> = (0..6).map(|_| s.spam_turn()).collect();
        assert_eq!(turns, vec![false, false, true, false, false, true]);
    }
}
