//! File Operations Engine (C5): list / export / upload / update / delete
//! against a selected (appliance, configuration) pair.
//!
//! Design Note (§9): "mixed REST + HTML-scraping paths for the same
//! operation: model as a two-attempt chain with an explicit verification
//! step; do not duplicate code paths." [`FileOperations::update_via_rest`]
//! is the first attempt, [`FileOperations::upsert_via_form`] the fallback,
//! and [`FileOperations::verify`] the shared verification step both paths
//! run through.

use crate::config::CoreConfig;
use crate::domain::{Appliance, FileDescriptor, FileKind, UploadMode, UploadOutcome};
use crate::error::CoreError;
use crate::scrape;
use crate::textutil;
use crate::transport::{HttpRequest, HttpTransport, MultipartField, RequestBody};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Everything an operation needs about the already-resolved (appliance,
/// session, configuration) triple, so individual methods don't carry four
/// separate string parameters.
pub struct OperationContext<'a> {
    pub appliance: &'a Appliance,
    pub cookie: &'a str,
    /// Human-readable configuration name, used by the REST update path's
    /// `PUT /configurations/<configName>/...` (§4.5).
    pub config_name: &'a str,
    pub db_id: &'a str,
}

struct CachedListing {
    rows: Vec<FileDescriptor>,
    cached_at: Instant,
}

/// Implements §4.5 end to end.
pub struct FileOperations {
    transport: Arc<dyn HttpTransport>,
    config: CoreConfig,
    list_cache: Mutex<HashMap<(String, String, FileKind), CachedListing>>,
}

impl FileOperations {
    pub fn new(transport: Arc<dyn HttpTransport>, config: CoreConfig) -> Self {
        Self {
            transport,
            config,
            list_cache: Mutex::new(HashMap::new()),
        }
    }

    /// GET `/file_dbs/<dbId>/edit` and parse the DF/DM table (§4.5 list).
    pub async fn list(&self, ctx: &OperationContext<'_>, kind: FileKind) -> Result<Vec<FileDescriptor>, CoreError> {
        let cache_key = (ctx.appliance.id.clone(), ctx.db_id.to_string(), kind);
        {
            let guard = self.list_cache.lock().await;
            if let Some(cached) = guard.get(&cache_key) {
                if cached.cached_at.elapsed() < self.config.file_list_cache_ttl {
                    return Ok(cached.rows.clone());
                }
            }
        }

        let request = HttpRequest::get(format!("/file_dbs/{}/edit", ctx.db_id)).with_cookie(ctx.cookie.to_string());
        let response = self.transport.send(ctx.appliance, request).await?;
        if !response.is_success() {
            return Err(CoreError::upstream(
                Some(response.status),
                response_snippet(&response.body_text()),
            ));
        }
        let body = response.body_text();
        let rows = scrape::parse_file_table(&body, kind, ctx.db_id);

        let mut guard = self.list_cache.lock().await;
        guard.insert(
            cache_key,
            CachedListing {
                rows: rows.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(rows)
    }

    async fn find_by_name(
        &self,
        ctx: &OperationContext<'_>,
        kind: FileKind,
        name: &str,
    ) -> Result<Option<FileDescriptor>, CoreError> {
        let rows = self.list(ctx, kind).await?;
        Ok(rows.into_iter().find(|row| row.name == name))
    }

    /// GET `/file_dbs/<dbId>/<kind>/<fileId>/export`, streamed to the caller
    /// as a single buffer (§4.5 export). A login-page body mid-stream is
    /// surfaced as `SessionExpired` rather than returned as file content.
    pub async fn export(
        &self,
        ctx: &OperationContext<'_>,
        kind: FileKind,
        file_id: &str,
    ) -> Result<Vec<u8>, CoreError> {
        let path = format!("/file_dbs/{}/{}/{}/export", ctx.db_id, kind.path_segment(), file_id);
        let request = HttpRequest::get(path).with_cookie(ctx.cookie.to_string());
        let response = self.transport.send(ctx.appliance, request).await?;

        if !response.is_success() {
            return Err(CoreError::upstream(
                Some(response.status),
                response_snippet(&response.body_text()),
            ));
        }

        let body_text = response.body_text();
        if body_text.contains("login") || body_text.contains("Login") {
            return Err(CoreError::SessionExpired(format!(
                "export of file `{file_id}` returned a login page"
            )));
        }
        Ok(response.body)
    }

    /// §4.5 upload: dispatches on `mode`.
    pub async fn upload(
        &self,
        ctx: &OperationContext<'_>,
        kind: FileKind,
        filename: &str,
        bytes: Vec<u8>,
        mode: UploadMode,
    ) -> Result<UploadOutcome, CoreError> {
        match mode {
            UploadMode::Update => {
                let existing = self
                    .find_by_name(ctx, kind, filename)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(format!("file `{filename}` does not exist")))?;
                self.update_existing(ctx, kind, &existing, bytes).await
            }
            UploadMode::Create => self.create_with_conflict_retry(ctx, kind, filename, bytes, false).await,
            UploadMode::Replace => match self.find_by_name(ctx, kind, filename).await? {
                Some(existing) => self.update_existing(ctx, kind, &existing, bytes).await,
                None => self.create_with_conflict_retry(ctx, kind, filename, bytes, false).await,
            },
            UploadMode::Auto => match self.find_by_name(ctx, kind, filename).await {
                Ok(Some(existing)) => self.update_existing(ctx, kind, &existing, bytes).await,
                Ok(None) => self.create_with_conflict_retry(ctx, kind, filename, bytes, true).await,
                Err(_) => self.create_with_conflict_retry(ctx, kind, filename, bytes, true).await,
            },
        }
    }

    /// REST `PUT` with a verification re-export, falling back to the
    /// HTML-form CSRF update path on mismatch (§4.5 update).
    async fn update_existing(
        &self,
        ctx: &OperationContext<'_>,
        kind: FileKind,
        existing: &FileDescriptor,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, CoreError> {
        self.update_via_rest(ctx, kind, existing, &bytes).await?;

        if self.verify(ctx, kind, &existing.id, &bytes).await? {
            return Ok(UploadOutcome {
                file_name: existing.name.clone(),
                verified: true,
            });
        }

        self.upsert_via_form(ctx, kind, Some(existing), &existing.name, &bytes, true)
            .await?;

        let verified = self.verify(ctx, kind, &existing.id, &bytes).await?;
        if !verified {
            return Err(CoreError::VerificationFailed(format!(
                "file `{}` did not match after both the REST and form update paths",
                existing.name
            )));
        }
        Ok(UploadOutcome {
            file_name: existing.name.clone(),
            verified: true,
        })
    }

    async fn update_via_rest(
        &self,
        ctx: &OperationContext<'_>,
        kind: FileKind,
        existing: &FileDescriptor,
        bytes: &[u8],
    ) -> Result<(), CoreError> {
        #[derive(Serialize)]
        struct RestUpdateBody {
            name: String,
            content: String,
            #[serde(rename = "type")]
            kind: &'static str,
        }
        let payload = RestUpdateBody {
            name: existing.name.clone(),
            content: String::from_utf8_lossy(bytes).into_owned(),
            kind: "csv",
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| CoreError::ProtocolError(format!("failed to encode update payload: {e}")))?;

        let path = format!(
            "/configurations/{}/file_dbs/{}/{}/{}",
            ctx.config_name,
            ctx.db_id,
            kind.path_segment(),
            existing.id
        );
        let request = HttpRequest::put(path, RequestBody::Json(json))
            .with_header("Authorization", basic_auth_header(&ctx.appliance.username, &ctx.appliance.password))
            .with_cookie(ctx.cookie.to_string());
        let response = self.transport.send(ctx.appliance, request).await?;
        if response.is_success() {
            return Ok(());
        }
        Err(CoreError::upstream(
            Some(response.status),
            response_snippet(&response.body_text()),
        ))
    }

    /// Re-export the file and compare trimmed bodies byte-for-byte (§4.5:
    /// "verify by re-exporting the file and comparing trimmed bodies").
    async fn verify(&self, ctx: &OperationContext<'_>, kind: FileKind, file_id: &str, expected: &[u8]) -> Result<bool, CoreError> {
        let exported = self.export(ctx, kind, file_id).await?;
        Ok(trim_bytes(&exported) == trim_bytes(expected))
    }

    /// §4.5 create/auto path, with the documented single unique-name retry
    /// on a `Conflict` when `retry_on_conflict` is set (auto mode only).
    async fn create_with_conflict_retry(
        &self,
        ctx: &OperationContext<'_>,
        kind: FileKind,
        filename: &str,
        bytes: Vec<u8>,
        retry_on_conflict: bool,
    ) -> Result<UploadOutcome, CoreError> {
        match self.upsert_via_form(ctx, kind, None, filename, &bytes, false).await {
            Ok(()) => Ok(UploadOutcome {
                file_name: filename.to_string(),
                verified: true,
            }),
            Err(CoreError::Conflict(_)) if retry_on_conflict => {
                let suffixed = unique_suffixed_name(filename);
                self.upsert_via_form(ctx, kind, None, &suffixed, &bytes, false).await?;
                Ok(UploadOutcome {
                    file_name: suffixed,
                    verified: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// The HTML multipart form flow shared by create and the REST-update
    /// fallback (§4.5 steps 1-5).
    async fn upsert_via_form(
        &self,
        ctx: &OperationContext<'_>,
        kind: FileKind,
        existing: Option<&FileDescriptor>,
        filename: &str,
        bytes: &[u8],
        is_update: bool,
    ) -> Result<(), CoreError> {
        let form_page_path = match existing {
            Some(existing) => format!("/file_dbs/{}/{}/{}/edit", ctx.db_id, kind.path_segment(), existing.id),
            None => format!("/file_dbs/{}/{}/new", ctx.db_id, kind.path_segment()),
        };
        let form_page = self
            .transport
            .send(ctx.appliance, HttpRequest::get(form_page_path.clone()).with_cookie(ctx.cookie.to_string()))
            .await?;
        let token = scrape::extract_csrf_token(&form_page.body_text());

        let mut fields = vec![MultipartField::Text {
            name: "authenticity_token".to_string(),
            value: token,
        }];
        fields.push(MultipartField::File {
            name: kind.upload_field_name().to_string(),
            file_name: filename.to_string(),
            content_type: "text/csv".to_string(),
            bytes: bytes.to_vec(),
        });
        if let Some(existing) = existing {
            fields.push(MultipartField::Text {
                name: "[id]".to_string(),
                value: existing.id.clone(),
            });
        }
        fields.push(MultipartField::Text {
            name: "[tbgw_files_db_id]".to_string(),
            value: ctx.db_id.to_string(),
        });
        if is_update {
            fields.push(MultipartField::Text {
                name: "_method".to_string(),
                value: "put".to_string(),
            });
            fields.push(MultipartField::Text {
                name: "commit".to_string(),
                value: "Update".to_string(),
            });
        } else {
            fields.push(MultipartField::Text {
                name: "commit".to_string(),
                value: "Import".to_string(),
            });
        }

        let path = match existing {
            Some(existing) => format!("/file_dbs/{}/{}/{}", ctx.db_id, kind.path_segment(), existing.id),
            None => format!("/file_dbs/{}/{}", ctx.db_id, kind.path_segment()),
        };
        let request = HttpRequest::post(path, RequestBody::Multipart(fields)).with_cookie(ctx.cookie.to_string());
        let response = self.transport.send(ctx.appliance, request).await?;

        if !response.is_redirect() {
            return Err(CoreError::upstream(
                Some(response.status),
                response_snippet(&response.body_text()),
            ));
        }

        let flash = response
            .set_cookies
            .iter()
            .find_map(|raw| scrape::extract_flash_message(raw));

        if let Some(flash) = &flash {
            if flash.level == scrape::FlashLevel::Error {
                if flash.text.contains("already been taken") {
                    return Err(CoreError::Conflict(flash.text.clone()));
                }
                return Err(CoreError::upstream(Some(response.status), flash.text.clone()));
            }
            let notice = flash.text.to_lowercase();
            if notice.contains("successfully") || notice.contains("imported") || notice.contains("updated") {
                return Ok(());
            }
        }

        // Second success signal: the redirect target page names the file.
        if let Some(location) = &response.location {
            let followup = self
                .transport
                .send(ctx.appliance, HttpRequest::get(location.clone()).with_cookie(ctx.cookie.to_string()))
                .await?;
            if followup.body_text().contains(filename) {
                return Ok(());
            }
        }

        // Third success signal: probe db 1..N for the filename appearing in
        // the corresponding fieldset.
        for candidate in 1..=self.config.db_id_probe_bound {
            let candidate = candidate.to_string();
            let probe_request = HttpRequest::get(format!("/file_dbs/{candidate}/edit")).with_cookie(ctx.cookie.to_string());
            let probe_response = self.transport.send(ctx.appliance, probe_request).await?;
            if !probe_response.is_success() {
                continue;
            }
            let body = probe_response.body_text();
            if scrape::parse_file_table(&body, kind, &candidate)
                .iter()
                .any(|row| row.name == filename)
            {
                return Ok(());
            }
        }

        Err(CoreError::ProtocolError(format!(
            "upload of `{filename}` redirected but no success signal was observed"
        )))
    }

    /// §4.5 delete: REST `DELETE` with a form `_method=delete` fallback.
    pub async fn delete(&self, ctx: &OperationContext<'_>, kind: FileKind, name_or_id: &str) -> Result<(), CoreError> {
        let file_id = match self.find_by_name(ctx, kind, name_or_id).await? {
            Some(existing) => existing.id,
            None => name_or_id.to_string(),
        };

        let path = format!("/file_dbs/{}/{}/{}", ctx.db_id, kind.path_segment(), file_id);
        let request = HttpRequest::delete(path.clone())
            .with_header("Authorization", basic_auth_header(&ctx.appliance.username, &ctx.appliance.password))
            .with_header("Accept", "application/json")
            .with_cookie(ctx.cookie.to_string());
        let response = self.transport.send(ctx.appliance, request).await?;

        if response.status == 404 {
            return Err(CoreError::NotFound(format!("file `{name_or_id}` not found")));
        }
        if response.is_success() || response.is_redirect() {
            return Ok(());
        }

        let fallback_request = HttpRequest::post(path, RequestBody::Form(vec![("_method".to_string(), "delete".to_string())]))
            .with_header("Authorization", basic_auth_header(&ctx.appliance.username, &ctx.appliance.password))
            .with_cookie(ctx.cookie.to_string());
        let fallback_response = self.transport.send(ctx.appliance, fallback_request).await?;

        if fallback_response.status == 404 {
            return Err(CoreError::NotFound(format!("file `{name_or_id}` not found")));
        }
        if fallback_response.is_success() || fallback_response.is_redirect() {
            return Ok(());
        }
        Err(CoreError::upstream(
            Some(fallback_response.status),
            response_snippet(&fallback_response.body_text()),
        ))
    }
}

/// Bounded, redacted snippet for an error-carrying response body (§6:
/// "response snippet (≤200 chars, HTML stripped of script tags)").
fn response_snippet(body: &str) -> String {
    let stripped = scrape::strip_script_tags(body);
    textutil::truncate_with_suffix_by_chars(&stripped, 200, "...[truncated]")
}

fn trim_bytes(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// `<stem>_<unix-ms><ext>` (§4.5 create: "generate a unique name by
/// appending `_<unix-ms>` before the extension").
fn unique_suffixed_name(filename: &str) -> String {
    let ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_{ms}.{ext}"),
        None => format!("{filename}_{ms}"),
    }
}

/// Basic-auth header for the REST update/delete paths (§6 "Basic-auth
/// header construction"), encoded the same way the teacher's own auth
/// module does it.
fn basic_auth_header(username: &str, password: &str) -> String {
    use base64::engine::general_purpose::STANDARD as B64;
    use base64::Engine;
    format!("Basic {}", B64.encode(format!("{username}:{password}")))
}
