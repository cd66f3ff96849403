//! Unauthenticated share links: `/{slug}` and `/d/{display_name}`.
//!
//! Password-protected files answer with a small HTML form that resubmits
//! the same URL with `?password=`.

use super::file_handlers::{Disposition, PasswordQuery, stream_file};
use crate::{
    errors::AppError,
    services::{FileError, FileService, Lookup},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

/// `GET /{slug}?password=`
pub async fn open_by_slug(
    State(service): State<FileService>,
    Path(slug): Path<String>,
    Query(query): Query<PasswordQuery>,
) -> Response {
    open(&service, Lookup::Slug(&slug), &slug, query.password.as_deref()).await
}

/// `GET /d/{display_name}?password=`
pub async fn open_by_display_name(
    State(service): State<FileService>,
    Path(name): Path<String>,
    Query(query): Query<PasswordQuery>,
) -> Response {
    open(&service, Lookup::DisplayName(&name), &name, query.password.as_deref()).await
}

async fn open(
    service: &FileService,
    lookup: Lookup<'_>,
    label: &str,
    password: Option<&str>,
) -> Response {
    match service.resolve(lookup, password).await {
        Ok(resolved) => stream_file(resolved, Disposition::Inline),
        Err(FileError::PasswordRequired) => {
            (StatusCode::UNAUTHORIZED, password_prompt(label, None)).into_response()
        }
        Err(FileError::PasswordInvalid) => (
            StatusCode::FORBIDDEN,
            password_prompt(label, Some("Incorrect password.")),
        )
            .into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

fn password_prompt(label: &str, notice: Option<&str>) -> Html<String> {
    let label = escape_html(label);
    let notice = notice
        .map(|n| format!("<p class=\"notice\">{}</p>", escape_html(n)))
        .unwrap_or_default();
    Html(format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{label}</title>
</head>
<body>
<h1>{label}</h1>
<p>This file is password protected.</p>
{notice}<form method="get">
<input type="password" name="password" autofocus required>
<button type="submit">Open</button>
</form>
</body>
</html>
"#
    ))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_escapes_the_label() {
        let Html(page) = password_prompt("<script>alert('x')</script>", Some("Incorrect password."));
        assert!(page.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
        assert!(!page.contains("<script>"));
        assert!(page.contains("Incorrect password."));
        assert!(page.contains(r#"name="password""#));
    }
}
