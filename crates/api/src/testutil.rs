//! Mock HTTP routing and auth fixtures for API tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tianyi_auth::{AccountSession, AuthError, AuthManager, Refresher, Session};
use tianyi_store::{MemorySessionStore, SessionStore};

/// One captured request.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub path: String,
    pub query: String,
    pub headers: String,
    pub body: Vec<u8>,
}

pub type RequestLog = Arc<Mutex<Vec<Captured>>>;

/// Starts a mock server routing `(path, body)` through `handler`.
///
/// Any `{{BASE}}` placeholder in a response is replaced with the
/// server's base URL so payloads can carry absolute URLs.
pub async fn start_router<F>(handler: F) -> (String, RequestLog)
where
    F: Fn(&str, &[u8]) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let requests: RequestLog = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&requests);
    let base_url = base.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let Some(captured) = read_request(&mut stream).await else {
                continue;
            };
            let mut response = handler(&captured.path, &captured.body).replace("{{BASE}}", &base_url);
            // Placeholder substitution inside a JSON body changes its
            // length; recompute the Content-Length header.
            if let Some((head, body)) = response.clone().split_once("\r\n\r\n") {
                if head.contains("Content-Length:") {
                    let fixed_head = head
                        .lines()
                        .map(|line| {
                            if line.to_ascii_lowercase().starts_with("content-length:") {
                                format!("Content-Length: {}", body.len())
                            } else {
                                line.to_string()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("\r\n");
                    response = format!("{fixed_head}\r\n\r\n{body}");
                }
            }
            log.lock().unwrap().push(captured);
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (base, requests)
}

async fn read_request(stream: &mut TcpStream) -> Option<Captured> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 8192];
    let header_end = loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            break find_header_end(&raw)?;
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(end) = find_header_end(&raw) {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }

    let target = head.lines().next()?.split_whitespace().nth(1)?.to_string();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target, String::new()),
    };
    Some(Captured {
        path,
        query: percent_decode(&query),
        headers: head,
        body,
    })
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Light percent-decoding so query assertions can use plain text.
fn percent_decode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                if let Ok(b) = u8::from_str_radix(hex, 16) {
                    out.push(b);
                    i += 3;
                    continue;
                }
                out.push(b'%');
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn json_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

/// Refresher stub: never wants a refresh, succeeds when forced.
struct NoopRefresher;

#[async_trait]
impl Refresher for NoopRefresher {
    async fn refresh(&self) -> Result<(), AuthError> {
        Ok(())
    }

    fn needs_refresh(&self) -> bool {
        false
    }
}

/// An auth manager with one account whose store holds `session`.
pub fn manager_with_session(session: Session) -> Arc<AuthManager> {
    let store = Arc::new(MemorySessionStore::new());
    store.save(&session).unwrap();
    let manager = Arc::new(AuthManager::new());
    manager
        .add_account(
            "test",
            AccountSession {
                account_id: String::new(),
                display_name: "Test".into(),
                store: Some(store as _),
                refresher: Some(Arc::new(NoopRefresher) as _),
            },
        )
        .unwrap();
    manager
}
