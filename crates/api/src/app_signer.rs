use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue};
use tracing::trace;

use tianyi_auth::SessionProvider;
use tianyi_http::{HttpError, Middleware};

use crate::{APP_CHANNEL_ID, APP_CLIENT_TYPE, APP_VERSION, UPLOAD_HOST, USER_AGENT};

/// App-dialect request signer.
///
/// Adds the client-identification query parameters, computes the
/// HMAC-SHA1 signature over the canonical string
/// `SessionKey=..&Operate=..&RequestURI=..&Date=..` (with `&params=..`
/// appended only on the upload host) and sets the signature headers.
/// Runs on every attempt, so each retry gets a fresh `rand`, `Date`
/// and request id.
pub fn app_signer(provider: Arc<dyn SessionProvider>) -> Middleware {
    Arc::new(move |req: &mut reqwest::Request| {
        let session_key = provider.session_key();
        let session_secret = provider.session_secret();
        if session_key.is_empty() || session_secret.is_empty() {
            return Err(HttpError::Signature(
                "session key or secret missing".into(),
            ));
        }

        let now = Utc::now();
        {
            let url = req.url_mut();
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("rand", &now.timestamp_millis().to_string());
            pairs.append_pair("clientType", APP_CLIENT_TYPE);
            pairs.append_pair("version", APP_VERSION);
            pairs.append_pair("channelId", APP_CHANNEL_ID);
        }

        let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut canonical = format!(
            "SessionKey={session_key}&Operate={}&RequestURI={}&Date={date}",
            req.method().as_str().to_uppercase(),
            req.url().path(),
        );
        let on_upload_host = req
            .url()
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(UPLOAD_HOST));
        if on_upload_host {
            if let Some(params) = query_value(req.url(), "params") {
                if !params.is_empty() {
                    canonical.push_str("&params=");
                    canonical.push_str(&params);
                }
            }
        }
        let signature = tianyi_crypto::sign(&canonical, &session_secret);
        trace!(path = req.url().path(), "app request signed");

        set_header(req, "date", &date)?;
        set_header(req, "sessionkey", &session_key)?;
        set_header(req, "signature", &signature)?;
        set_header(req, "user-agent", USER_AGENT)?;
        set_header(req, "x-request-id", &tianyi_crypto::uuid_v4())?;
        Ok(())
    })
}

fn query_value(url: &reqwest::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub(crate) fn set_header(
    req: &mut reqwest::Request,
    name: &'static str,
    value: &str,
) -> Result<(), HttpError> {
    let value = HeaderValue::from_str(value).map_err(|e| HttpError::Setup(e.to_string()))?;
    req.headers_mut()
        .insert(HeaderName::from_static(name), value);
    Ok(())
}
