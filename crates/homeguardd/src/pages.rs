//! Server-rendered pages and the browser script.

use axum::http::header;
use axum::response::{Html, IntoResponse};

const LOGIN_HTML: &str = include_str!("../assets/login.html");
const CONSENT_HTML: &str = include_str!("../assets/consent.html");
const INDEX_HTML: &str = include_str!("../assets/index.html");
const INDEX_JS: &str = include_str!("../assets/index.js");

pub fn login(error: Option<&str>) -> Html<String> {
    Html(render(LOGIN_HTML, error))
}

pub fn consent(error: Option<&str>) -> Html<String> {
    Html(render(CONSENT_HTML, error))
}

pub fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn index_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript; charset=utf-8")], INDEX_JS)
}

fn render(template: &str, error: Option<&str>) -> String {
    let block = match error {
        Some(msg) => format!(r#"<p class="error">{}</p>"#, escape_html(msg)),
        None => String::new(),
    };
    template.replace("{{error}}", &block)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
