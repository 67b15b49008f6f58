//! HTTP plumbing for the store protocol
//!
//! The private endpoints speak property-list encoded requests and responses;
//! the public iTunes API speaks JSON. Both run over the same blocking client
//! with the session's cookie jar attached on the way out and absorbed on the
//! way back. Redirects are handled here manually so that every hop passes
//! through cookie absorption; the authentication flow additionally needs to
//! see 3xx responses itself.

use crate::cookies::CookieJar;
use crate::{Config, Error, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::Method;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResponseFormat {
    Json,
    Plist,
}

pub struct StoreRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Plist-encoded request body, when present.
    pub body: Option<plist::Dictionary>,
    /// Content type override; the authenticate endpoint insists on a
    /// form-urlencoded label around its plist body.
    pub content_type: Option<&'static str>,
    pub format: ResponseFormat,
    pub follow_redirects: bool,
}

impl StoreRequest {
    pub fn get(url: String, format: ResponseFormat) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: None,
            content_type: None,
            format,
            follow_redirects: true,
        }
    }

    pub fn post(url: String, body: plist::Dictionary, format: ResponseFormat) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: Vec::new(),
            body: Some(body),
            content_type: None,
            format,
            follow_redirects: true,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug)]
pub enum ResponseData {
    Json(serde_json::Value),
    Plist(plist::Value),
    /// Redirect responses carry no parsed body.
    None,
}

#[derive(Debug)]
pub struct StoreResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub data: ResponseData,
}

impl StoreResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    /// The response body as a plist dictionary.
    pub fn dict(&self) -> Result<&plist::Dictionary> {
        match &self.data {
            ResponseData::Plist(plist::Value::Dictionary(dict)) => Ok(dict),
            other => Err(Error::Protocol(format!(
                "expected a plist dictionary, got {:?}",
                kind_of(other)
            ))),
        }
    }

    pub fn json(&self) -> Result<&serde_json::Value> {
        match &self.data {
            ResponseData::Json(value) => Ok(value),
            other => Err(Error::Protocol(format!(
                "expected a JSON body, got {:?}",
                kind_of(other)
            ))),
        }
    }

    /// The `failureType` field private endpoints use to signal errors.
    /// Returned as a string regardless of the on-wire type; empty when absent.
    pub fn failure_type(&self) -> String {
        self.dict()
            .ok()
            .and_then(|d| d.get("failureType"))
            .map(plist_to_string)
            .unwrap_or_default()
    }

    pub fn customer_message(&self) -> String {
        self.dict()
            .ok()
            .and_then(|d| d.get("customerMessage"))
            .map(plist_to_string)
            .unwrap_or_default()
    }
}

fn kind_of(data: &ResponseData) -> &'static str {
    match data {
        ResponseData::Json(_) => "json",
        ResponseData::Plist(_) => "plist",
        ResponseData::None => "empty",
    }
}

/// Render a plist scalar as a string; the store is inconsistent about
/// whether numeric codes arrive as integers or strings.
pub fn plist_to_string(value: &plist::Value) -> String {
    match value {
        plist::Value::String(s) => s.clone(),
        plist::Value::Integer(i) => i.to_string(),
        plist::Value::Real(r) => r.to_string(),
        plist::Value::Boolean(b) => b.to_string(),
        other => format!("{:?}", other),
    }
}

pub struct StoreClient {
    client: Client,
    download_client: Client,
    jar: Arc<CookieJar>,
    user_agent: String,
}

impl StoreClient {
    pub fn new(config: &Config, jar: Arc<CookieJar>) -> Result<Self> {
        let client = build_client(config, config.network.timeout_seconds)?;
        let download_client = build_client(config, config.network.download_timeout_seconds)?;
        Ok(Self {
            client,
            download_client,
            jar,
            user_agent: config.network.user_agent.clone(),
        })
    }

    /// Send a protocol request, following redirects unless told otherwise.
    pub fn send(&self, request: StoreRequest) -> Result<StoreResponse> {
        let mut url = request.url.clone();
        let mut hops = 0;

        loop {
            let response = self.send_once(&request, &url)?;

            if response.is_redirect() && request.follow_redirects {
                hops += 1;
                if hops > MAX_REDIRECTS {
                    return Err(Error::Protocol(format!(
                        "too many redirects requesting {}",
                        request.url
                    )));
                }
                match response.header("location") {
                    Some(location) => {
                        url = resolve_location(&url, &location)?;
                        continue;
                    }
                    None => return Ok(response),
                }
            }

            return Ok(response);
        }
    }

    fn send_once(&self, request: &StoreRequest, url: &str) -> Result<StoreResponse> {
        let parsed = Url::parse(url).map_err(|e| Error::Other(format!("invalid URL {}: {}", url, e)))?;

        let mut builder = self
            .client
            .request(request.method.clone(), parsed.clone())
            .header(USER_AGENT, &self.user_agent);

        if let Some(cookie_header) = self.jar.header_for(&parsed) {
            builder = builder.header(COOKIE, cookie_header);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(ref dict) = request.body {
            let mut body = Vec::new();
            plist::to_writer_xml(&mut body, &plist::Value::Dictionary(dict.clone()))?;
            let content_type = request.content_type.unwrap_or("application/x-apple-plist");
            builder = builder.header(CONTENT_TYPE, content_type).body(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        self.absorb_cookies(&parsed, &headers)?;

        let bytes = response.bytes()?;

        let data = if (300..400).contains(&status) {
            ResponseData::None
        } else {
            match request.format {
                ResponseFormat::Json => serde_json::from_slice(&bytes)
                    .map(ResponseData::Json)
                    .map_err(|_| protocol_error(status, &bytes))?,
                ResponseFormat::Plist => plist::Value::from_reader(Cursor::new(&bytes[..]))
                    .map(ResponseData::Plist)
                    .map_err(|_| protocol_error(status, &bytes))?,
            }
        };

        Ok(StoreResponse { status, headers, data })
    }

    /// Fetch a binary from a grant URL, optionally resuming from an offset.
    ///
    /// Uses the long-timeout client; the caller streams the body.
    pub fn fetch_binary(
        &self,
        url: &str,
        resume_from: Option<u64>,
    ) -> Result<reqwest::blocking::Response> {
        let parsed = Url::parse(url).map_err(|e| Error::Other(format!("invalid URL {}: {}", url, e)))?;

        let mut builder = self
            .download_client
            .get(parsed.clone())
            .header(USER_AGENT, &self.user_agent);

        if let Some(cookie_header) = self.jar.header_for(&parsed) {
            builder = builder.header(COOKIE, cookie_header);
        }
        if let Some(offset) = resume_from {
            if offset > 0 {
                builder = builder.header("Range", format!("bytes={}-", offset));
            }
        }

        let response = builder.send()?.error_for_status()?;
        self.absorb_cookies(&parsed, &response.headers().clone())?;
        Ok(response)
    }

    fn absorb_cookies(&self, url: &Url, headers: &HeaderMap) -> Result<()> {
        let values: Vec<String> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .collect();
        self.jar.absorb(url, &values)
    }
}

fn protocol_error(status: u16, body: &[u8]) -> Error {
    let preview = String::from_utf8_lossy(&body[..body.len().min(2048)]).to_string();
    Error::Protocol(format!("HTTP {}: unparseable body: {}", status, preview))
}

fn resolve_location(base: &str, location: &str) -> Result<String> {
    let base = Url::parse(base).map_err(|e| Error::Protocol(format!("bad redirect base: {}", e)))?;
    let target = base
        .join(location)
        .map_err(|e| Error::Protocol(format!("bad redirect location '{}': {}", location, e)))?;
    Ok(target.to_string())
}

fn build_client(config: &Config, timeout_seconds: u64) -> Result<Client> {
    let mut builder = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(timeout_seconds));

    if config.network.ssl_no_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(ref bundle_path) = config.network.ca_bundle {
        let pem = std::fs::read(bundle_path).map_err(|e| {
            Error::Storage(format!("failed to read CA bundle {}: {}", bundle_path.display(), e))
        })?;
        for cert in reqwest::Certificate::from_pem_bundle(&pem)? {
            builder = builder.add_root_certificate(cert);
        }
    }

    Ok(builder.build()?)
}
