//! Per-appliance cookie lifecycle (C2): login, TTL, validation probe,
//! single-flight locking, eviction.
//!
//! Design Note (§9): the "map of booleans" session-locking idea from the
//! original implementation becomes [`crate::singleflight::Group`] here, so N
//! concurrent `acquire` calls for the same appliance yield exactly one login
//! attempt.

use crate::config::CoreConfig;
use crate::domain::{Appliance, Session};
use crate::error::CoreError;
use crate::scrape;
use crate::singleflight::Group;
use crate::transport::{HttpRequest, HttpTransport, RequestBody};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Pools one [`Session`] per appliance id behind a per-appliance mutex, with
/// single-flight login coalescing.
pub struct SessionPool {
    transport: Arc<dyn HttpTransport>,
    config: CoreConfig,
    sessions: Mutex<HashMap<String, Session>>,
    logins: Arc<Group<String, String>>,
}

impl SessionPool {
    pub fn new(transport: Arc<dyn HttpTransport>, config: CoreConfig) -> Self {
        Self {
            transport,
            config,
            sessions: Mutex::new(HashMap::new()),
            logins: Arc::new(Group::new()),
        }
    }

    /// Return a valid cookie for `appliance`, logging in (or joining an
    /// in-flight login) as needed (§4.2).
    pub async fn acquire(&self, appliance: &Appliance) -> Result<String, CoreError> {
        if let Some(cookie) = self.cached_valid_cookie(appliance).await? {
            return Ok(cookie);
        }
        self.login(appliance).await
    }

    /// Force the pool to drop any cached session for `appliance_id`, e.g.
    /// after observing a downstream `401`/`403` (§4.2, §4.5).
    pub async fn evict(&self, appliance_id: &str) {
        let mut guard = self.sessions.lock().await;
        guard.remove(appliance_id);
    }

    /// Evict then re-login once; callers use this for the documented
    /// "evicts and may re-login once" retry policy.
    pub async fn reacquire(&self, appliance: &Appliance) -> Result<String, CoreError> {
        self.evict(&appliance.id).await;
        self.login(appliance).await
    }

    /// `(has cookie, time since last validated)` for `appliance_id`, used by
    /// the health-snapshot supplement — never exposes the cookie itself.
    pub async fn snapshot(&self, appliance_id: &str) -> Option<(bool, std::time::Duration)> {
        let guard = self.sessions.lock().await;
        let session = guard.get(appliance_id)?;
        Some((
            session.state == crate::domain::SessionState::Valid,
            session.last_validated_at.elapsed(),
        ))
    }

    /// Return the pooled cookie if it's within TTL and (when due) still
    /// passes the validation probe. `None` means the caller must log in.
    async fn cached_valid_cookie(&self, appliance: &Appliance) -> Result<Option<String>, CoreError> {
        let candidate = {
            let guard = self.sessions.lock().await;
            guard.get(&appliance.id).cloned()
        };
        let Some(mut session) = candidate else {
            return Ok(None);
        };
        if !session.is_fresh(self.config.session_ttl) {
            self.evict(&appliance.id).await;
            return Ok(None);
        }
        if !session.needs_probe(self.config.probe_min_interval) {
            return Ok(Some(session.cookie));
        }

        match self.probe(appliance, &session.cookie).await {
            Ok(true) => {
                session.mark_validated();
                let cookie = session.cookie.clone();
                let mut guard = self.sessions.lock().await;
                guard.insert(appliance.id.clone(), session);
                Ok(Some(cookie))
            }
            Ok(false) => {
                self.evict(&appliance.id).await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// `HEAD <base>/` — valid iff the status isn't 401/403 and the response
    /// doesn't redirect back to the login page (§4.2).
    async fn probe(&self, appliance: &Appliance, cookie: &str) -> Result<bool, CoreError> {
        let request = HttpRequest::head("/").with_cookie(cookie.to_string());
        let response = self.transport.send(appliance, request).await?;
        if response.status == 401 || response.status == 403 {
            return Ok(false);
        }
        if response.is_redirect() {
            if let Some(location) = &response.location {
                if location.contains("/login") {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Run the §4.2 login protocol through the single-flight group, so
    /// concurrent callers for the same appliance share one attempt. The
    /// group spawns the leader's work onto its own task, so a caller
    /// deadline cancelling this `acquire` never cancels the login itself.
    async fn login(&self, appliance: &Appliance) -> Result<String, CoreError> {
        let transport = self.transport.clone();
        let appliance_id = appliance.id.clone();
        let appliance_for_leader = appliance.clone();

        let result = self
            .logins
            .run(appliance_id.clone(), move || async move {
                perform_login(&transport, &appliance_for_leader)
                    .await
                    .map_err(encode_login_failure)
            })
            .await;

        match result {
            Ok(cookie) => {
                let mut guard = self.sessions.lock().await;
                guard.insert(appliance_id, Session::fresh(cookie.clone()));
                Ok(cookie)
            }
            Err(message) => Err(decode_login_failure(message)),
        }
    }
}

/// [`Group`] carries its error channel as `String`, so a login failure's
/// `CoreError` kind has to survive the round trip through it — otherwise
/// every failure surfaces as `AuthFailed` regardless of whether it was a
/// rejected credential, a network outage, or a redirect loop, breaking the
/// `.kind()` contract callers rely on to tell those apart (§4.2, §7).
fn encode_login_failure(err: CoreError) -> String {
    let kind = err.kind();
    let message = match err {
        CoreError::NotFound(m)
        | CoreError::AuthFailed(m)
        | CoreError::SessionExpired(m)
        | CoreError::ConfigSelectionFailed(m)
        | CoreError::Conflict(m)
        | CoreError::VerificationFailed(m)
        | CoreError::UpstreamUnavailable(m)
        | CoreError::ProtocolError(m)
        | CoreError::Timeout(m) => m,
        CoreError::UpstreamError { status, snippet } => match status {
            Some(code) => format!("status {code}: {snippet}"),
            None => snippet,
        },
    };
    format!("{kind}:{message}")
}

fn decode_login_failure(encoded: String) -> CoreError {
    let (kind, message) = encoded.split_once(':').unwrap_or(("auth_failed", encoded.as_str()));
    let message = message.to_string();
    match kind {
        "not_found" => CoreError::NotFound(message),
        "auth_failed" => CoreError::AuthFailed(message),
        "session_expired" => CoreError::SessionExpired(message),
        "config_selection_failed" => CoreError::ConfigSelectionFailed(message),
        "conflict" => CoreError::Conflict(message),
        "verification_failed" => CoreError::VerificationFailed(message),
        "upstream_unavailable" => CoreError::UpstreamUnavailable(message),
        "protocol_error" => CoreError::ProtocolError(message),
        "timeout" => CoreError::Timeout(message),
        _ => CoreError::UpstreamError {
            status: None,
            snippet: message,
        },
    }
}

async fn perform_login(
    transport: &Arc<dyn HttpTransport>,
    appliance: &Appliance,
) -> Result<String, CoreError> {
    let login_page = transport
        .send(appliance, HttpRequest::get("/login"))
        .await?;
    let body = login_page.body_text();
    let token = scrape::extract_csrf_token(&body);

    let mut form = vec![
        ("username".to_string(), appliance.username.clone()),
        ("password".to_string(), appliance.password.clone()),
    ];
    if !token.is_empty() {
        form.push(("authenticity_token".to_string(), token));
    }

    let request = HttpRequest::post("/login", RequestBody::Form(form));
    let response = transport.send(appliance, request).await?;

    if !response.is_redirect() {
        return Err(CoreError::AuthFailed(format!(
            "login POST returned status {} instead of a redirect",
            response.status
        )));
    }
    let location = response.location.clone().unwrap_or_default();
    if location.contains("/login") || location.is_empty() {
        return Err(CoreError::AuthFailed(
            "credentials rejected: login redirected back to the login page".to_string(),
        ));
    }

    let cookie = response
        .set_cookies
        .first()
        .cloned()
        .ok_or_else(|| {
            CoreError::ProtocolError("login succeeded but no Set-Cookie header was present".to_string())
        })?;
    Ok(cookie)
}
