//! Shared fixtures for the end-to-end scenario tests (§8 of the original
//! specification work). Integration tests build against the published API
//! only, so this mirrors `src/testsupport.rs` through `prosbc_core::` paths
//! rather than reusing that `#[cfg(test)]`-gated module directly.

#![allow(dead_code)]

use prosbc_core::domain::Appliance;
use prosbc_core::error::CoreError;
use prosbc_core::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

pub fn appliance(id: &str) -> Appliance {
    Appliance {
        id: id.to_string(),
        base_url: format!("https://{id}.example.test"),
        username: "admin".to_string(),
        password: "hunter2".to_string(),
        accept_invalid_certs: false,
    }
}

pub struct ScriptedStep {
    matches: Box<dyn Fn(Method, &str) -> bool + Send + Sync>,
    response: HttpResponse,
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

/// A scripted transport, keyed by appliance id, so fan-out scenarios can
/// give each appliance its own independent request script.
pub struct ScriptedTransport {
    steps: Mutex<std::collections::HashMap<String, VecDeque<ScriptedStep>>>,
}

impl ScriptedTransport {
    pub fn new(per_appliance: Vec<(&str, Vec<ScriptedStep>)>) -> Self {
        let mut steps = std::collections::HashMap::new();
        for (id, script) in per_appliance {
            steps.insert(id.to_string(), script.into_iter().collect());
        }
        Self {
            steps: Mutex::new(steps),
        }
    }

    /// Convenience constructor for single-appliance scenarios.
    pub fn single(appliance_id: &str, script: Vec<ScriptedStep>) -> Self {
        Self::new(vec![(appliance_id, script)])
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, appliance: &Appliance, request: HttpRequest) -> Result<HttpResponse, CoreError> {
        let mut guard = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let script = guard
            .get_mut(&appliance.id)
            .unwrap_or_else(|| panic!("ScriptedTransport: no script registered for appliance `{}`", appliance.id));
        let position = script
            .iter()
            .position(|step| (step.matches)(request.method, &request.path));
        match position {
            Some(index) => Ok(script.remove(index).unwrap().response),
            None => panic!(
                "ScriptedTransport: appliance `{}` has no remaining step matching {:?} {}",
                appliance.id, request.method, request.path
            ),
        }
    }
}

pub fn ok_html(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        location: None,
        set_cookies: Vec::new(),
        body: body.as_bytes().to_vec(),
    }
}

pub fn ok_bytes(body: Vec<u8>) -> HttpResponse {
    HttpResponse {
        status: 200,
        location: None,
        set_cookies: Vec::new(),
        body,
    }
}

pub fn redirect_with_cookie(location: &str, cookie: &str) -> HttpResponse {
    HttpResponse {
        status: 302,
        location: Some(location.to_string()),
        set_cookies: vec![cookie.to_string()],
        body: Vec::new(),
    }
}

pub fn redirect(location: &str) -> HttpResponse {
    HttpResponse {
        status: 302,
        location: Some(location.to_string()),
        set_cookies: Vec::new(),
        body: Vec::new(),
    }
}

pub const LOGIN_PAGE: &str = r#"
    <html><body>
    <form action="/login" method="post">
      <input type="hidden" name="authenticity_token" value="login-csrf-tok">
      <input name="username"><input name="password">
    </form>
    </body></html>
"#;

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

/// File-database `edit` page body with the DF and DM fieldsets populated.
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

pub fn dm_csv(numbers: &[&str]) -> String {
    let mut out = String::from("called,calling\n");
    for number in numbers {
        out.push_str(number);
        out.push('\n');
    }
    out
}
