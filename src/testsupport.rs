//! Shared test fixtures: canned HTML pages and a scripted [`HttpTransport`]
//! driven by a request script, so session/selector/files/orchestrator tests
//! can exercise the §8 scenarios without a real ProSBC.

use crate::domain::Appliance;
use crate::error::CoreError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Build a test [`Appliance`] with sensible defaults, overriding only what a
/// test cares about.
pub fn appliance(id: &str) -> Appliance {
    Appliance {
        id: id.to_string(),
        base_url: format!("https://{id}.example.test"),
        username: "admin".to_string(),
        password: "hunter2".to_string(),
        accept_invalid_certs: false,
    }
}

/// One scripted (request matcher, response) pair. The matcher receives the
/// request's method and path; the first unconsumed entry whose matcher
/// returns true is popped and its response returned.
pub struct ScriptedStep {
    pub matches: Box<dyn Fn(Method, &str) -> bool + Send + Sync>,
    pub response: HttpResponse,
}

impl ScriptedStep {
    pub fn new(method: Method, path: &str, response: HttpResponse) -> Self {
        let path = path.to_string();
        Self {
            matches: Box::new(move |m, p| m == method && p == path),
            response,
        }
    }
}

/// A [`HttpTransport`] fake driven by an ordered script of request/response
/// pairs, shared by every component's test module. A request with no
/// remaining matching step panics naming the unmatched method and path,
/// which is far more useful than a generic "index out of bounds".
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<ScriptedStep>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, _appliance: &Appliance, request: HttpRequest) -> Result<HttpResponse, CoreError> {
        let mut guard = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let position = guard
            .iter()
            .position(|step| (step.matches)(request.method, &request.path));
        match position {
            Some(index) => Ok(guard.remove(index).unwrap().response),
            None => panic!(
                "ScriptedTransport: no remaining step matches {:?} {}",
                request.method, request.path
            ),
        }
    }
}

/// `200 OK` with a plain body and no cookies/redirect.
pub fn ok_html(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        location: None,
        set_cookies: Vec::new(),
        body: body.as_bytes().to_vec(),
    }
}

/// `302` redirect carrying a fresh session cookie, as returned by a
/// successful login POST.
pub fn redirect_with_cookie(location: &str, cookie: &str) -> HttpResponse {
    HttpResponse {
        status: 302,
        location: Some(location.to_string()),
        set_cookies: vec![cookie.to_string()],
        body: Vec::new(),
    }
}

/// Login page body carrying an `authenticity_token` input, as scraped by
/// [`crate::scrape::extract_csrf_token`].
pub const LOGIN_PAGE: &str = r#"
    <html><body>
    <form action="/login" method="post">
      <input type="hidden" name="authenticity_token" value="login-csrf-tok">
      <input name="username"><input name="password">
    </form>
    </body></html>
"#;

/// Config chooser page (`/file_dbs`) listing two configurations.
pub const CHOOSER_PAGE: &str = r#"
    <html><body>
    <div id="configurations_list">
      <select name="config_id">
        <option value="3">config_052421-1</option>
        <option value="5">config_1-BU</option>
      </select>
    </div>
    </body></html>
"#;

/// File-database `edit` page body with both the DF and DM fieldsets
/// populated, mirroring the shape [`crate::scrape::parse_file_table`] parses.
pub fn file_db_edit_page(db_id: &str, df_rows: &[(&str, &str)], dm_rows: &[(&str, &str)]) -> String {
    let df_table = rows_html(db_id, "routesets_definitions", df_rows);
    let dm_table = rows_html(db_id, "routesets_digitmaps", dm_rows);
    format!(
        r#"<html><body>
        <fieldset>
          <legend>Routesets Definition:</legend>
          <table>{df_table}</table>
        </fieldset>
        <fieldset>
          <legend>Routesets Digitmap:</legend>
          <table>{dm_table}</table>
        </fieldset>
        </body></html>"#
    )
}

fn rows_html(db_id: &str, segment: &str, rows: &[(&str, &str)]) -> String {
    rows.iter()
        .map(|(id, name)| {
            format!(
                r#"<tr><td>{name}</td>
                    <td><a href="/file_dbs/{db_id}/{segment}/{id}/edit">Edit</a></td>
                    <td><a href="/file_dbs/{db_id}/{segment}/{id}/export">Export</a></td>
                    <td><a href="/file_dbs/{db_id}/{segment}/{id}">Delete</a></td>
                  </tr>"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Minimal DM CSV body: a `called`/`calling` header row followed by one
/// number per line, matching what the inventory sync's `extract_numbers`
/// skips vs. keeps.
pub fn dm_csv(numbers: &[&str]) -> String {
    let mut out = String::from("called,calling\n");
    for number in numbers {
        out.push_str(number);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_transport_matches_regardless_of_script_declaration_order() {
        let transport = ScriptedTransport::new(vec![
            ScriptedStep::new(Method::Get, "/login", ok_html(LOGIN_PAGE)),
            ScriptedStep::new(
                Method::Post,
                "/login",
                redirect_with_cookie("/file_dbs", "_WebOAMP_session=abc"),
            ),
        ]);
        let app = appliance("app-1");
        let login = transport.send(&app, HttpRequest::get("/login")).await.unwrap();
        assert_eq!(login.status, 200);
        let post = transport
            .send(&app, HttpRequest::post("/login", crate::transport::RequestBody::None))
            .await
            .unwrap();
        assert_eq!(post.set_cookies, vec!["_WebOAMP_session=abc".to_string()]);
    }

    #[tokio::test]
    #[should_panic(expected = "no remaining step matches")]
    async fn scripted_transport_panics_on_an_unmatched_request() {
        let transport = ScriptedTransport::new(Vec::new());
        let _ = transport.send(&appliance("app-1"), HttpRequest::get("/login")).await;
    }

    #[test]
    fn file_db_edit_page_embeds_both_kinds_of_rows() {
        let page = file_db_edit_page("3", &[("12", "acme.csv")], &[("7", "cust.csv")]);
        assert!(page.contains("acme.csv"));
        assert!(page.contains("cust.csv"));
        assert!(page.contains("/file_dbs/3/routesets_definitions/12/edit"));
    }

    #[test]
    fn dm_csv_embeds_the_header_and_one_line_per_number() {
        let csv = dm_csv(&["12025550100", "12025550101"]);
        assert!(csv.starts_with("called,calling\n"));
        assert!(csv.contains("12025550100\n"));
    }
}
