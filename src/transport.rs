//! Injectable HTTP transport seam.
//!
//! Design Note (§9): "introduce a transport trait so session/config/file
//! logic can be tested against fakes rather than a live ProSBC" and "resolve
//! TLS verification policy per appliance, never as one process-global flag."
//! [`ReqwestTransport`] is the production implementation; tests implement
//! [`HttpTransport`] directly against canned responses drawn from the
//! scenarios in §8.
//!
//! Redirects are never followed automatically: the config-selection and
//! login flows both need to inspect a 302's `Location` header directly, so
//! every per-appliance [`reqwest::Client`] is built with
//! [`reqwest::redirect::Policy::none`].

use crate::domain::Appliance;
use crate::error::CoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// HTTP verb for an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

/// One multipart field: either a plain text value or a file part.
#[derive(Debug, Clone)]
pub enum MultipartField {
    Text { name: String, value: String },
    File {
        name: String,
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

/// Request payload variants the scraping/upload flows need.
#[derive(Debug, Clone)]
pub enum RequestBody {
    None,
    /// `application/x-www-form-urlencoded` pairs, in order.
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
    /// Pre-encoded `application/json` bytes, used by the REST update path
    /// (§4.5) which needs exact control over the serialized payload.
    Json(Vec<u8>),
}

/// An outbound request against one appliance.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path relative to the appliance's `base_url`, e.g. `/login`.
    pub path: String,
    /// Extra headers beyond `User-Agent`/`Cookie`/content-type, e.g. `X-CSRF-Token`.
    pub headers: Vec<(String, String)>,
    /// Raw `Cookie` header value, if a session cookie is already held.
    pub cookie: Option<String>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            cookie: None,
            body: RequestBody::None,
        }
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(path)
        }
    }

    pub fn post(path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            headers: Vec::new(),
            cookie: None,
            body,
        }
    }

    pub fn put(path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            headers: Vec::new(),
            cookie: None,
            body,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            ..Self::get(path)
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// The response to an [`HttpRequest`]. Redirects are surfaced, not followed.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// `Location` header on a 3xx response, if present.
    pub location: Option<String>,
    /// Every `Set-Cookie` header value, in the order the server sent them.
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The HTTP seam every higher-level component talks to instead of `reqwest`
/// directly.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        appliance: &Appliance,
        request: HttpRequest,
    ) -> Result<HttpResponse, CoreError>;
}

/// Production [`HttpTransport`], backed by one cached [`reqwest::Client`]
/// per appliance so the per-appliance TLS toggle (§6) and connection pool
/// are both scoped correctly.
pub struct ReqwestTransport {
    clients: Mutex<HashMap<String, reqwest::Client>>,
    user_agent: String,
    default_accept_invalid_certs: bool,
}

impl ReqwestTransport {
    pub fn new(config: &crate::config::CoreConfig) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            user_agent: config.user_agent.clone(),
            default_accept_invalid_certs: config.accept_invalid_certs_default,
        }
    }

    fn client_for(&self, appliance: &Appliance) -> Result<reqwest::Client, CoreError> {
        let mut guard = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = guard.get(&appliance.id) {
            return Ok(client.clone());
        }
        let accept_invalid_certs =
            appliance.accept_invalid_certs || self.default_accept_invalid_certs;
        let client = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .danger_accept_invalid_certs(accept_invalid_certs)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CoreError::ProtocolError(format!("failed to build HTTP client: {e}")))?;
        guard.insert(appliance.id.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        appliance: &Appliance,
        request: HttpRequest,
    ) -> Result<HttpResponse, CoreError> {
        let client = self.client_for(appliance)?;
        let url = join_url(&appliance.base_url, &request.path);

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
        };

        let mut builder = client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(cookie) = &request.cookie {
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }
        builder = match request.body {
            RequestBody::None => builder,
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Multipart(fields) => {
                let mut form = reqwest::multipart::Form::new();
                for field in fields {
                    form = match field {
                        MultipartField::Text { name, value } => form.text(name, value),
                        MultipartField::File {
                            name,
                            file_name,
                            content_type,
                            bytes,
                        } => {
                            let part = reqwest::multipart::Part::bytes(bytes)
                                .file_name(file_name)
                                .mime_str(&content_type)
                                .map_err(|e| {
                                    CoreError::ProtocolError(format!(
                                        "invalid multipart content type: {e}"
                                    ))
                                })?;
                            form.part(name, part)
                        }
                    };
                }
                builder.multipart(form)
            }
            RequestBody::Json(bytes) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let set_cookies = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            location,
            set_cookies,
            body,
        })
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
