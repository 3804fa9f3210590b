//! Mock HTTP routing for auth tests.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Captured requests: (path, body) in arrival order.
pub type RequestLog = Arc<Mutex<Vec<(String, String)>>>;

/// Starts a mock server that routes each request through `handler`.
///
/// The handler returns a raw HTTP response; any `{{BASE}}` placeholder
/// is substituted with the server's base URL so responses can carry
/// absolute redirect targets.
pub async fn start_router<F>(handler: F) -> (String, RequestLog)
where
    F: Fn(&str, &str) -> String + Send + Sync + 'static,
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
            let Some((path, body)) = read_request(&mut stream).await else {
                continue;
            };
            log.lock().unwrap().push((path.clone(), body.clone()));
            let mut response = handler(&path, &body).replace("{{BASE}}", &base_url);
            // Substitution changes body length; fix Content-Length.
            if let Some((head, payload)) = response.clone().split_once("\r\n\r\n") {
                if head.contains("Content-Length:") {
                    let fixed_head = head
                        .lines()
                        .map(|line| {
                            if line.to_ascii_lowercase().starts_with("content-length:") {
                                format!("Content-Length: {}", payload.len())
                            } else {
                                line.to_string()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("\r\n");
                    response = format!("{fixed_head}\r\n\r\n{payload}");
                }
            }
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (base, requests)
}

/// Reads one HTTP request, returning its path and body.
async fn read_request(stream: &mut TcpStream) -> Option<(String, String)> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
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

    let target = head.lines().next()?.split_whitespace().nth(1)?;
    let path = target.split('?').next().unwrap_or(target).to_string();
    Some((path, String::from_utf8_lossy(&body).into_owned()))
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

/// A plain JSON response.
pub fn json_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

/// A 302 redirect to `location` (may contain `{{BASE}}`).
pub fn redirect_response(location: &str) -> String {
    format!(
        "HTTP/1.1 302 Found\r\nLocation: {location}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    )
}

/// A JSON response that also sets a cookie.
pub fn cookie_response(status: u16, cookie: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nSet-Cookie: {cookie}; Path=/\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

/// Generates an RSA keypair, returning the bare SPKI public body (as the
/// server sends it) and the private half for assertions.
pub fn test_rsa_key() -> (String, rsa::RsaPrivateKey) {
    use rsa::pkcs8::EncodePublicKey;
    let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let pem = private
        .to_public_key()
        .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .unwrap();
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect::<Vec<_>>()
        .concat();
    (body, private)
}
