//! Public and backend URL derivation.

use crate::context::{BackendTarget, UrlInfo};
use crate::error::GatewayError;
use crate::event::ProxyEvent;
use crate::headers::Headers;
use crate::rewrite::ReplacePattern;

/// Trusted header carrying the full public URL of the request.
pub const ORIGINAL_URL_HEADER: &str = "x-original-url";

/// Host used when the request carries none.
pub const DEFAULT_HOST: &str = "localhost";

/// The route template with path parameters substituted. No trailing slash
/// unless the result is the root.
pub fn hydrate_resource_path(event: &ProxyEvent) -> String {
    let template = if event.request_context.resource_path.is_empty() {
        &event.resource
    } else {
        &event.request_context.resource_path
    };

    let mut path = template.clone();
    for (name, value) in event.path_parameters.iter().flatten() {
        for placeholder in [format!("{{{}+}}", name), format!("{{{}}}", name)] {
            if let Some(at) = path.find(&placeholder) {
                path.replace_range(at..at + placeholder.len(), value);
                break;
            }
        }
    }

    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

/// The full public URL of the request, without a trailing slash.
pub fn original_url(headers: &Headers, event: &ProxyEvent, default_host: &str) -> String {
    let url = match headers.first(ORIGINAL_URL_HEADER) {
        Some(url) => url.to_string(),
        None => {
            let proto = headers.first("x-forwarded-proto").unwrap_or("https");
            let host = headers.first("host").unwrap_or(default_host);
            let port = match headers.first("x-forwarded-port") {
                Some("443") if proto == "https" => String::new(),
                Some("80") | None => String::new(),
                Some(port) => format!(":{}", port),
            };
            let path = if event.request_context.path.is_empty() {
                &event.path
            } else {
                &event.request_context.path
            };
            format!("{}://{}{}{}", proto, host, port, path)
        }
    };
    url.strip_suffix('/').map(str::to_string).unwrap_or(url)
}

/// The public URL prefix in front of `resource_path`.
pub fn api_url(original_url: &str, resource_path: &str) -> String {
    original_url
        .strip_suffix(resource_path)
        .unwrap_or(original_url)
        .to_string()
}

/// Path part of an absolute URL as written, empty when there is none.
fn raw_path(url: &str) -> &str {
    let after_scheme = url.find("://").map_or(0, |at| at + 3);
    url[after_scheme..]
        .find('/')
        .map_or("", |at| &url[after_scheme + at..])
}

fn url_path(url: &str) -> Result<String, GatewayError> {
    reqwest::Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .map_err(|_| GatewayError::InvalidBackendUrl(url.to_string()))
}

impl UrlInfo {
    /// Addressing for a request whose backend is `target`.
    pub fn build(
        target: &BackendTarget,
        headers: &Headers,
        event: &ProxyEvent,
        default_host: &str,
    ) -> Result<Self, GatewayError> {
        let backend_url = target.base_url().ok_or(GatewayError::MissingBackend)?;
        let resource_path = hydrate_resource_path(event);
        let original = original_url(headers, event, default_host);
        let api_url = api_url(&original, &resource_path);

        let frontend_prefix = reqwest::Url::parse(&api_url)
            .map(|parsed| parsed.path().to_string())
            .map_err(|_| GatewayError::BadRequest(format!("invalid public URL {}", api_url)))?;
        let backend_prefix = url_path(&backend_url)?;

        Ok(Self {
            api_pattern: ReplacePattern::literal(&api_url)?,
            backend_pattern: ReplacePattern::literal(&backend_url)?,
            backend_any_host_pattern: ReplacePattern::any_host_with_path(raw_path(&backend_url))?,
            api_url,
            backend_url,
            resource_path,
            frontend_prefix,
            backend_prefix,
        })
    }

    /// Backend URL for the request: base, hydrated path and query.
    pub fn request_url(&self, query: Option<&str>) -> String {
        match query {
            Some(query) => format!("{}{}?{}", self.backend_url, self.resource_path, query),
            None => format!("{}{}", self.backend_url, self.resource_path),
        }
    }

    /// Pattern for backend URLs in responses.
    ///
    /// The all-hosts pattern only applies when the backend URL has a path.
    /// Without one it would match every absolute URL, third-party and
    /// already public links included, so the literal backend pattern is used.
    pub fn response_pattern(&self, rewrite_all: bool) -> &ReplacePattern {
        if rewrite_all && !raw_path(&self.backend_url).trim_matches('/').is_empty() {
            &self.backend_any_host_pattern
        } else {
            &self.backend_pattern
        }
    }
}
