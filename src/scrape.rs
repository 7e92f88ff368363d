//! HTML/CSRF scraping (C4).
//!
//! Design Note (§9): "Regex + DOM parsing fallbacks: preserve both. Prefer a
//! streaming tokenizer when available; the DOM fallback must use a tolerant
//! HTML parser (the remote's markup is not always well-formed)." [`scraper`]
//! (built on `html5ever`) is that tolerant parser; a handful of `regex`
//! passes over the raw body cover the token/flash extraction that a CSS
//! selector can't express cleanly (JSON-ish fragments, `onclick` attributes,
//! cookie payloads).

use crate::domain::{FileDescriptor, FileKind};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

/// Markers that identify the chooser page (`/configurations` or `/file_dbs`
/// index) rather than a selected file-database page (§4.3 step 5).
const CHOOSER_MARKERS: &[&str] = &["configurations_list", "choose_redirect"];

/// True when `html` carries one of the chooser-page markers (§4.3, §4.4).
pub fn contains_chooser_markers(html: &str) -> bool {
    CHOOSER_MARKERS.iter().any(|marker| html.contains(marker))
}

/// True when `html` contains a legend matching one of `kind`'s candidates,
/// via the same exact/normalized matching §4.4 uses for `parse_file_table`.
pub fn contains_legend_for(html: &str, kind: FileKind) -> bool {
    let document = Html::parse_document(html);
    legend_fieldsets(&document, kind).next().is_some()
}

/// Parse the DF/DM file-list table out of a file-database `edit` page body
/// (§4.4 `parseFileTable`).
///
/// Matching is layered: exact legend text, then normalized (strip `:`,
/// whitespace, lowercase) containment either way, then the first `<fieldset>`
/// on the page. The final fallback reflects observed UI variants and must
/// never be removed (§4.4).
pub fn parse_file_table(html: &str, kind: FileKind, config_db_id: &str) -> Vec<FileDescriptor> {
    let document = Html::parse_document(html);

    let fieldset = legend_fieldsets(&document, kind)
        .next()
        .or_else(|| first_fieldset(&document));

    let Some(fieldset) = fieldset else {
        return Vec::new();
    };

    parse_rows(&fieldset, kind, config_db_id)
}

/// Iterate `<fieldset>` elements whose `<legend>` matches `kind`, exact
/// matches first, then normalized containment (either direction).
fn legend_fieldsets<'a>(
    document: &'a Html,
    kind: FileKind,
) -> impl Iterator<Item = ElementRef<'a>> {
    let fieldset_sel = selector("fieldset");
    let legend_sel = selector("legend");
    let candidates = kind.legend_candidates();
    let normalized_candidates: Vec<String> = candidates.iter().map(|c| normalize(c)).collect();

    let mut exact = Vec::new();
    let mut normalized = Vec::new();

    for fieldset in document.select(&fieldset_sel) {
        let Some(legend) = fieldset.select(&legend_sel).next() else {
            continue;
        };
        let legend_text = element_text(&legend);
        if candidates.iter().any(|c| legend_text.trim() == *c) {
            exact.push(fieldset);
            continue;
        }
        let legend_norm = normalize(&legend_text);
        if normalized_candidates
            .iter()
            .any(|c| legend_norm.contains(c.as_str()) || c.contains(legend_norm.as_str()))
        {
            normalized.push(fieldset);
        }
    }

    exact.into_iter().chain(normalized)
}

fn first_fieldset(document: &Html) -> Option<ElementRef<'_>> {
    document.select(&selector("fieldset")).next()
}

/// Strip `:` and whitespace, lowercase — §4.4's normalization rule.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect::<String>()
        .to_lowercase()
}

fn parse_rows(fieldset: &ElementRef<'_>, kind: FileKind, config_db_id: &str) -> Vec<FileDescriptor> {
    let row_sel = selector("tr");
    let cell_sel = selector("td");
    let link_sel = selector("a[href]");
    let href_re = href_pattern(kind);

    let mut out = Vec::new();
    for row in fieldset.select(&row_sel) {
        let Some(first_cell) = row.select(&cell_sel).next() else {
            continue;
        };
        let name = element_text(&first_cell);
        if name.is_empty() {
            continue;
        }

        let mut id = None;
        let mut update_href = String::new();
        let mut export_href = String::new();
        let mut delete_href = String::new();

        for link in row.select(&link_sel) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(captures) = href_re.captures(href) else {
                continue;
            };
            id = Some(captures.get(2).unwrap().as_str().to_string());
            match captures.get(3).map(|m| m.as_str()) {
                Some("edit") => update_href = href.to_string(),
                Some("export") => export_href = href.to_string(),
                None => delete_href = href.to_string(),
                _ => {}
            }
        }

        let Some(id) = id else { continue };
        out.push(FileDescriptor {
            id,
            name,
            kind,
            config_db_id: config_db_id.to_string(),
            update_href,
            export_href,
            delete_href,
        });
    }
    out
}

/// `/file_dbs/<db>/<kind>/<id>(/edit|/export)?` — capture group 2 is the id,
/// group 3 is the optional trailing action.
fn href_pattern(kind: FileKind) -> Regex {
    let segment = regex::escape(kind.path_segment());
    Regex::new(&format!(r"/file_dbs/(\d+)/{segment}/(\d+)(?:/(edit|export))?$")).unwrap()
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|_| panic!("invalid built-in selector: {css}"))
}

static AUTHENTICITY_INPUT: OnceLock<Regex> = OnceLock::new();
static CSRF_META: OnceLock<Regex> = OnceLock::new();
static HIDDEN_TOKEN: OnceLock<Regex> = OnceLock::new();
static JSON_TOKEN: OnceLock<Regex> = OnceLock::new();
static ONCLICK_TOKEN: OnceLock<Regex> = OnceLock::new();

/// Locate an anti-forgery token in `html` (§4.4 `extractCsrfToken`).
///
/// Search order: `input[name="authenticity_token"]`, `meta[name="csrf-token"]`,
/// a hidden input carrying a long base64-ish value, a JSON-like
/// `authenticity_token:"..."` fragment, then `onclick` attributes. Returns
/// an empty string when nothing matches — callers may still attempt the
/// POST, since some variants accept it (§4.4).
pub fn extract_csrf_token(html: &str) -> String {
    let authenticity_input = AUTHENTICITY_INPUT.get_or_init(|| {
        Regex::new(r#"name=["']authenticity_token["'][^>]*value=["']([^"']+)["']"#).unwrap()
    });
    if let Some(c) = authenticity_input.captures(html) {
        return c[1].to_string();
    }
    // Attribute order on the input tag may be reversed.
    let authenticity_input_rev = Regex::new(
        r#"value=["']([^"']+)["'][^>]*name=["']authenticity_token["']"#,
    )
    .unwrap();
    if let Some(c) = authenticity_input_rev.captures(html) {
        return c[1].to_string();
    }

    let csrf_meta = CSRF_META.get_or_init(|| {
        Regex::new(r#"name=["']csrf-token["'][^>]*content=["']([^"']+)["']"#).unwrap()
    });
    if let Some(c) = csrf_meta.captures(html) {
        return c[1].to_string();
    }

    let hidden_token = HIDDEN_TOKEN.get_or_init(|| {
        Regex::new(
            r#"type=["']hidden["'][^>]*value=["']([A-Za-z0-9+/=_-]{20,})["']"#,
        )
        .unwrap()
    });
    if let Some(c) = hidden_token.captures(html) {
        return c[1].to_string();
    }

    let json_token = JSON_TOKEN
        .get_or_init(|| Regex::new(r#"authenticity_token["']?\s*:\s*["']([^"']+)["']"#).unwrap());
    if let Some(c) = json_token.captures(html) {
        return c[1].to_string();
    }

    let onclick_token = ONCLICK_TOKEN.get_or_init(|| {
        Regex::new(r#"onclick=["'][^"']*authenticity_token=([A-Za-z0-9+/=_%.-]{8,})"#).unwrap()
    });
    if let Some(c) = onclick_token.captures(html) {
        return c[1].to_string();
    }

    String::new()
}

/// Parse `<option value="id">name</option>` entries from a config chooser
/// page, used by the §4.3 step 3 fallback when no redirect is present.
pub fn parse_config_options(html: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    let option_sel = selector("option");
    document
        .select(&option_sel)
        .filter_map(|opt| {
            let value = opt.value().attr("value")?.to_string();
            if value.is_empty() {
                return None;
            }
            Some((value, element_text(&opt)))
        })
        .collect()
}

/// Flash level decoded from a session cookie (§4.4 `extractFlashMessage`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLevel {
    Notice,
    Error,
}

/// A decoded flash message carried on the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashMessage {
    pub level: FlashLevel,
    pub text: String,
}

/// Decode a `notice:...`/`error:...` flash payload out of a raw `Set-Cookie`
/// header value (§4.4). Returns `None` when neither prefix is present —
/// callers treat that as an unrecognized cookie shape, per §9's Open
/// Question ("treat unknowns as UpstreamError with the raw cookie snippet").
pub fn extract_flash_message(set_cookie: &str) -> Option<FlashMessage> {
    let decoded = url_decode_plus_as_space(set_cookie);
    if let Some(idx) = decoded.find("notice:") {
        return Some(FlashMessage {
            level: FlashLevel::Notice,
            text: flash_value(&decoded[idx + "notice:".len()..]),
        });
    }
    if let Some(idx) = decoded.find("error:") {
        return Some(FlashMessage {
            level: FlashLevel::Error,
            text: flash_value(&decoded[idx + "error:".len()..]),
        });
    }
    None
}

/// Flash text runs until the next cookie attribute/field separator.
fn flash_value(rest: &str) -> String {
    rest.split(|c| c == ';' || c == '&')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Decode `application/x-www-form-urlencoded`-style text: `+` is a space,
/// `%XX` is a percent-escaped byte. Unknown escapes are passed through.
fn url_decode_plus_as_space(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(value);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Strip `<script>...</script>` blocks from a response snippet, per §4.5's
/// "response snippet (≤200 chars, HTML stripped of script tags)".
pub fn strip_script_tags(html: &str) -> String {
    static SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
    let re = SCRIPT_RE
        .get_or_init(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
    re.replace_all(html, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF_PAGE: &str = r#"
        <html><body>
        <fieldset>
          <legend>Routesets Definition:</legend>
          <table>
            <tr>
              <td>acme.csv</td>
              <td><a href="/file_dbs/3/routesets_definitions/12/edit">Edit</a></td>
              <td><a href="/file_dbs/3/routesets_definitions/12/export">Export</a></td>
              <td><a href="/file_dbs/3/routesets_definitions/12">Delete</a></td>
            </tr>
          </table>
        </fieldset>
        <fieldset>
          <legend>Routesets Digitmap:</legend>
          <table>
            <tr>
              <td>cust.csv</td>
              <td><a href="/file_dbs/3/routesets_digitmaps/7/edit">Edit</a></td>
              <td><a href="/file_dbs/3/routesets_digitmaps/7/export">Export</a></td>
              <td><a href="/file_dbs/3/routesets_digitmaps/7">Delete</a></td>
            </tr>
          </table>
        </fieldset>
        </body></html>
    "#;

    #[test]
    fn parse_file_table_finds_exact_legend_match() {
        let rows = parse_file_table(DF_PAGE, FileKind::Df, "3");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "acme.csv");
        assert_eq!(rows[0].id, "12");
        assert_eq!(rows[0].update_href, "/file_dbs/3/routesets_definitions/12/edit");
        assert_eq!(
            rows[0].export_href,
            "/file_dbs/3/routesets_definitions/12/export"
        );
        assert_eq!(rows[0].delete_href, "/file_dbs/3/routesets_definitions/12");
    }

    #[test]
    fn parse_file_table_distinguishes_df_from_dm() {
        let rows = parse_file_table(DF_PAGE, FileKind::Dm, "3");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "cust.csv");
    }

    #[test]
    fn parse_file_table_normalized_legend_fallback() {
        let html = r#"
            <fieldset><legend>routesets definition</legend>
              <table><tr><td>a.csv</td>
                <td><a href="/file_dbs/1/routesets_definitions/2/edit">e</a></td>
                <td><a href="/file_dbs/1/routesets_definitions/2/export">x</a></td>
                <td><a href="/file_dbs/1/routesets_definitions/2">d</a></td>
              </tr></table>
            </fieldset>
        "#;
        let rows = parse_file_table(html, FileKind::Df, "1");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn parse_file_table_falls_back_to_first_fieldset_when_no_legend_matches() {
        let html = r#"
            <fieldset><legend>Something Else Entirely</legend>
              <table><tr><td>only.csv</td>
                <td><a href="/file_dbs/1/routesets_definitions/9/edit">e</a></td>
                <td><a href="/file_dbs/1/routesets_definitions/9/export">x</a></td>
                <td><a href="/file_dbs/1/routesets_definitions/9">d</a></td>
              </tr></table>
            </fieldset>
        "#;
        let rows = parse_file_table(html, FileKind::Df, "1");
        assert_eq!(rows.len(), 1, "fallback to first fieldset must not be removed");
        assert_eq!(rows[0].name, "only.csv");
    }

    #[test]
    fn parse_file_table_empty_when_no_fieldset_present() {
        assert!(parse_file_table("<html><body>nothing here</body></html>", FileKind::Df, "1").is_empty());
    }

    #[test]
    fn contains_chooser_markers_detects_either_marker() {
        assert!(contains_chooser_markers("<div id=\"configurations_list\">"));
        assert!(contains_chooser_markers("choose_redirect"));
        assert!(!contains_chooser_markers(DF_PAGE));
    }

    #[test]
    fn extract_csrf_token_finds_authenticity_input() {
        let html = r#"<input type="hidden" name="authenticity_token" value="tok-123abc">"#;
        assert_eq!(extract_csrf_token(html), "tok-123abc");
    }

    #[test]
    fn extract_csrf_token_falls_back_to_csrf_meta() {
        let html = r#"<meta name="csrf-token" content="meta-tok-456">"#;
        assert_eq!(extract_csrf_token(html), "meta-tok-456");
    }

    #[test]
    fn extract_csrf_token_falls_back_to_hidden_base64_value() {
        let html = r#"<input type="hidden" name="foo" value="QWxhZGRpbjpvcGVuIHNlc2FtZQ==">"#;
        assert_eq!(extract_csrf_token(html), "QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn extract_csrf_token_returns_empty_when_absent() {
        assert_eq!(extract_csrf_token("<html><body>no tokens</body></html>"), "");
    }

    #[test]
    fn extract_flash_message_decodes_error_with_plus_as_space() {
        let cookie = "_WebOAMP_session=abc; notice_or_error=error:Name+has+already+been+taken";
        let flash = extract_flash_message(cookie).unwrap();
        assert_eq!(flash.level, FlashLevel::Error);
        assert_eq!(flash.text, "Name has already been taken");
    }

    #[test]
    fn extract_flash_message_decodes_notice() {
        let cookie = "session=x; flash=notice:File%20successfully%20imported";
        let flash = extract_flash_message(cookie).unwrap();
        assert_eq!(flash.level, FlashLevel::Notice);
        assert_eq!(flash.text, "File successfully imported");
    }

    #[test]
    fn extract_flash_message_none_when_no_prefix_present() {
        assert!(extract_flash_message("session=abc123").is_none());
    }

    #[test]
    fn strip_script_tags_removes_script_blocks() {
        let html = "<p>hello</p><script>alert(1)</script><p>world</p>";
        let out = strip_script_tags(html);
        assert_eq!(out, "<p>hello</p><p>world</p>");
    }

    #[test]
    fn parse_config_options_extracts_id_and_name_pairs() {
        let html = r#"<select><option value="5">config_1-BU</option><option value="6">config_052421-1</option></select>"#;
        let options = parse_config_options(html);
        assert_eq!(
            options,
            vec![
                ("5".to_string(), "config_1-BU".to_string()),
                ("6".to_string(), "config_052421-1".to_string())
            ]
        );
    }
}
