use std::io::Cursor;
use std::path::Path;

use tiny_http::{Header, Method, Request, Response, StatusCode};
use tracing::{debug, error};

use synseg::ledger::MetricLedger;
use synseg::train::StatsWriter;

use crate::render;

type Reply = Response<Cursor<Vec<u8>>>;

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn respond(status: u16, content_type: &str, body: Vec<u8>) -> Reply {
    let len = body.len();
    let headers = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
        .into_iter()
        .collect();
    Response::new(StatusCode(status), headers, Cursor::new(body), Some(len), None)
}

pub fn html_response(body: String) -> Reply {
    respond(200, "text/html; charset=utf-8", body.into_bytes())
}

pub fn json_response(body: String) -> Reply {
    respond(200, "application/json", body.into_bytes())
}

pub fn not_found() -> Reply {
    respond(404, "text/plain", b"404 Not Found".to_vec())
}

fn server_error(err: &anyhow::Error) -> Reply {
    respond(500, "text/plain", format!("500 Internal Server Error\n{err:#}").into_bytes())
}

// ---------------------------------------------------------------------------
// Request dispatcher
// ---------------------------------------------------------------------------

/// Split names end up in file names; keep them to plain identifiers.
fn valid_split(split: &str) -> bool {
    !split.is_empty() && split.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn route(method: &Method, path: &str, run_dir: &Path) -> anyhow::Result<Reply> {
    if *method != Method::Get {
        return Ok(not_found());
    }
    match path {
        "/" => Ok(html_response(render::dashboard_page(run_dir)?)),
        "/stats.json" => {
            let lines = StatsWriter::read_all(run_dir)?;
            Ok(json_response(serde_json::to_string(&lines)?))
        }
        _ => match path.strip_prefix("/metrics/").and_then(|s| s.strip_suffix(".json")) {
            Some(split) if valid_split(split) => {
                let history = MetricLedger::read_all(run_dir, split)?;
                Ok(json_response(serde_json::to_string(&history.entries)?))
            }
            _ => Ok(not_found()),
        },
    }
}

pub fn dispatch(request: Request, run_dir: &Path) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    let path = url.split('?').next().unwrap_or("");
    debug!(%method, path, "request");

    let response = route(&method, path, run_dir).unwrap_or_else(|err| {
        error!(path, "request failed: {err:#}");
        server_error(&err)
    });
    if let Err(err) = request.respond(response) {
        debug!("client went away: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_names_cannot_escape_the_run_dir() {
        assert!(valid_split("val"));
        assert!(valid_split("test_all"));
        assert!(!valid_split("../etc/passwd"));
        assert!(!valid_split(""));
    }

    #[test]
    fn unknown_routes_are_404() {
        let dir = tempfile::tempdir().unwrap();
        let reply = route(&Method::Get, "/nope", dir.path()).unwrap();
        assert_eq!(reply.status_code(), StatusCode(404));
        let reply = route(&Method::Get, "/metrics/val.json", dir.path()).unwrap();
        assert_eq!(reply.status_code(), StatusCode(200));
    }
}
