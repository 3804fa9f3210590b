use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use rand::Rng;

use tianyi_auth::SessionProvider;
use tianyi_crypto::{encode_values_sorted, encrypt_ecb, rsa_encrypt, sign, uuid_v4};
use tianyi_http::{HttpError, Middleware};

use crate::app_signer::set_header;
use crate::types::WebRsa;

/// Web-dialect cookie middleware: attaches `COOKIE_LOGIN_USER` and
/// `SSON` from the session. Fails when both are absent.
pub fn web_cookies(provider: Arc<dyn SessionProvider>) -> Middleware {
    Arc::new(move |req: &mut reqwest::Request| {
        let user = provider.cookie_login_user();
        let sson = provider.sson();
        if user.is_empty() && sson.is_empty() {
            return Err(HttpError::Signature("web cookies missing".into()));
        }
        let mut cookie = String::new();
        if !user.is_empty() {
            cookie.push_str(&format!("COOKIE_LOGIN_USER={user}"));
        }
        if !sson.is_empty() {
            if !cookie.is_empty() {
                cookie.push_str("; ");
            }
            cookie.push_str(&format!("SSON={sson}"));
        }
        let value = reqwest::header::HeaderValue::from_str(&cookie)
            .map_err(|e| HttpError::Setup(e.to_string()))?;
        req.headers_mut().insert(reqwest::header::COOKIE, value);
        Ok(())
    })
}

/// Web upload signer: encrypts the form parameters into the `params`
/// query field with a one-off AES key, signs the request with that key,
/// and ships the key RSA-wrapped in the `EncryptionText` header.
///
/// The signature string uses a fixed field order (not alphabetical):
/// `SessionKey=..&Operate=..&RequestURI=..&Date=<ms>&params=<hex>`.
pub fn web_upload_signer(
    provider: Arc<dyn SessionProvider>,
    params: BTreeMap<String, String>,
    rsa: WebRsa,
) -> Middleware {
    Arc::new(move |req: &mut reqwest::Request| {
        if rsa.pk_id.is_empty() || rsa.pub_key.is_empty() {
            return Err(HttpError::Signature("RSA public key missing".into()));
        }
        let session_key = provider.session_key();
        if session_key.is_empty() {
            return Err(HttpError::Signature("session key missing".into()));
        }

        let secret = random_web_secret();
        let aes_key = &secret.as_bytes()[..16];

        let encoded = encode_values_sorted(&params);
        let encrypted = encrypt_ecb(aes_key, encoded.as_bytes())
            .map_err(|e| HttpError::Signature(e.to_string()))?;
        let params_hex = hex::encode(encrypted);

        replace_query_param(req.url_mut(), "params", &params_hex);

        let request_date = Utc::now().timestamp_millis().to_string();
        let request_id = uuid_v4();

        let canonical = format!(
            "SessionKey={session_key}&Operate={}&RequestURI={}&Date={request_date}&params={params_hex}",
            req.method().as_str().to_uppercase(),
            req.url().path(),
        );
        let signature = sign(&canonical, &secret);

        let encrypted_key =
            rsa_encrypt(&rsa.pub_key, secret.as_bytes()).map_err(|e| HttpError::Signature(e.to_string()))?;

        set_header(req, "accept", "application/json;charset=UTF-8")?;
        set_header(req, "sessionkey", &session_key)?;
        set_header(req, "signature", &signature)?;
        set_header(req, "x-request-date", &request_date)?;
        set_header(req, "x-request-id", &request_id)?;
        set_header(req, "encryptiontext", &BASE64.encode(&encrypted_key))?;
        set_header(req, "pkid", &rsa.pk_id)?;
        Ok(())
    })
}

/// Generates the upload secret: a 32-char template where `x` becomes a
/// random hex nibble and `y` a nibble in `[89ab]`, truncated to a
/// random length between 16 and 31.
fn random_web_secret() -> String {
    let mut rng = rand::thread_rng();
    let secret: String = "xxxxxxxxxxxx4xxxyxxxxxxxxxxxxxxx"
        .chars()
        .map(|c| match c {
            'x' => hex_char(rng.gen_range(0..16)),
            'y' => hex_char(rng.gen_range(0..16) & 0x3 | 0x8),
            other => other,
        })
        .collect();
    let len = 16 + rng.gen_range(0..16usize);
    secret[..len].to_string()
}

fn hex_char(v: u8) -> char {
    char::from_digit(v as u32, 16).unwrap_or('0')
}

fn replace_query_param(url: &mut reqwest::Url, name: &str, value: &str) {
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(others.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .append_pair(name, value);
}
