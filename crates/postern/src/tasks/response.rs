//! Response rewriting.

use async_trait::async_trait;

use crate::context::{CorsOutcome, RequestContext};
use crate::cors::{ALLOW_ORIGIN, HEADER_PREFIX};
use crate::error::GatewayError;
use crate::headers::{Headers, RESPONSE_STRIPPED};
use crate::pipeline::{ChainSignal, Task};
use crate::rewrite::{rewrite_text, RewriteStrategy};

/// Backend call duration in milliseconds.
pub const BACKEND_OVERHEAD_HEADER: &str = "x-gateway-backend-overhead-ms";

/// Time spent in the gateway itself, in milliseconds.
pub const PROXY_OVERHEAD_HEADER: &str = "x-gateway-proxy-overhead-ms";

/// Rewrites backend URLs in a textual response body to the public URL.
pub struct ResponseBody;

#[async_trait]
impl Task for ResponseBody {
    fn name(&self) -> &'static str {
        "response-body"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        let Some(info) = ctx.url_info.clone() else {
            return Ok(ChainSignal::Continue);
        };
        let pattern = info.response_pattern(ctx.stage.rewrite_all_backend_urls);

        let Some(response) = ctx.final_response_mut() else {
            return Ok(ChainSignal::Continue);
        };
        if response.is_base64_encoded {
            return Ok(ChainSignal::Continue);
        }
        if let Some(body) = response.body.as_mut().filter(|b| !b.is_empty()) {
            *body = rewrite_text(body, pattern, &info.api_url);
        }
        Ok(ChainSignal::Continue)
    }
}

/// Filters and rewrites response headers, applies the CORS outcome and adds
/// the timing headers.
pub struct ResponseHeaders;

impl ResponseHeaders {
    fn cors_headers(ctx: &RequestContext, headers: Headers) -> Headers {
        match ctx.cors {
            CorsOutcome::Allowed => headers.merged(&ctx.additional_response_headers),
            CorsOutcome::Rejected => {
                let stripped: Vec<&str> = headers
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .filter(|name| name.starts_with(HEADER_PREFIX))
                    .collect();
                headers.omit(&stripped)
            }
            CorsOutcome::NotApplied => {
                let mut headers = headers.merged(&ctx.additional_response_headers);
                if let Some(origin) = ctx.normalized_headers.get("origin") {
                    headers.insert(ALLOW_ORIGIN, origin.to_vec());
                }
                headers
            }
        }
    }
}

#[async_trait]
impl Task for ResponseHeaders {
    fn name(&self) -> &'static str {
        "response-headers"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        let Some(response) = ctx.final_response() else {
            return Ok(ChainSignal::Continue);
        };

        let mut headers = response.headers.omit(RESPONSE_STRIPPED);
        if let Some(info) = &ctx.url_info {
            let pattern = info.response_pattern(ctx.stage.rewrite_all_backend_urls);
            headers = RewriteStrategy::Structural.rewrite_headers(&headers, pattern, &info.api_url);
        }
        let mut headers = Self::cors_headers(ctx, headers);

        let backend = ctx.timing.backend();
        headers.set(BACKEND_OVERHEAD_HEADER, backend.as_millis().to_string());
        headers.set(
            PROXY_OVERHEAD_HEADER,
            ctx.timing.proxy_overhead().as_millis().to_string(),
        );

        if let Some(response) = ctx.final_response_mut() {
            response.headers = headers;
        }
        Ok(ChainSignal::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::GatewayResponse;
    use crate::tasks::testing::context;
    use crate::tasks::{StaticBackend, UrlInfoTask};

    async fn answered(stage: &[(&str, &str)], response: GatewayResponse) -> RequestContext {
        let mut ctx = context(stage);
        StaticBackend.run(&mut ctx).await.unwrap();
        UrlInfoTask::new("localhost".into()).run(&mut ctx).await.unwrap();
        ctx.answer(response).unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_body_rewritten_to_public_url() {
        let mut ctx = answered(
            &[("backendURL", "http://svc.internal")],
            GatewayResponse::new(200).with_body(r#"{"next":"http://svc.internal/docs/43"}"#),
        )
        .await;
        ResponseBody.run(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.final_response().unwrap().body.as_deref(),
            Some(r#"{"next":"https://api.example.com/prod/docs/43"}"#)
        );
    }

    #[tokio::test]
    async fn test_all_hosts_rewrite() {
        let body = "see http://10.1.2.3:8080/v1/docs/43";
        let mut narrow = answered(
            &[("backendURL", "http://svc.internal/v1")],
            GatewayResponse::new(200).with_body(body),
        )
        .await;
        ResponseBody.run(&mut narrow).await.unwrap();
        assert_eq!(narrow.final_response().unwrap().body.as_deref(), Some(body));

        let mut wide = answered(
            &[("backendURL", "http://svc.internal/v1"), ("rewriteAllBackendURLs", "true")],
            GatewayResponse::new(200).with_body(body),
        )
        .await;
        ResponseBody.run(&mut wide).await.unwrap();
        assert_eq!(
            wide.final_response().unwrap().body.as_deref(),
            Some("see https://api.example.com/prod/docs/43")
        );
    }

    #[tokio::test]
    async fn test_all_hosts_rewrite_keeps_foreign_urls_without_backend_path() {
        let mut ctx = answered(
            &[("backendURL", "http://svc.internal"), ("rewriteAllBackendURLs", "true")],
            GatewayResponse::new(200).with_body(
                "http://svc.internal/docs/43 https://cdn.example.org/logo.png",
            ),
        )
        .await;
        ResponseBody.run(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.final_response().unwrap().body.as_deref(),
            Some("https://api.example.com/prod/docs/43 https://cdn.example.org/logo.png")
        );
    }

    #[tokio::test]
    async fn test_base64_body_untouched() {
        let mut response = GatewayResponse::new(200).with_body("aHR0cDovL3N2Yy5pbnRlcm5hbA==");
        response.is_base64_encoded = true;
        let mut ctx = answered(&[("backendURL", "http://svc.internal")], response).await;
        ResponseBody.run(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.final_response().unwrap().body.as_deref(),
            Some("aHR0cDovL3N2Yy5pbnRlcm5hbA==")
        );
    }

    #[tokio::test]
    async fn test_headers_filtered_rewritten_and_timed() {
        let mut ctx = answered(
            &[("backendURL", "http://svc.internal")],
            GatewayResponse::new(302)
                .with_header("Location", "http://svc.internal/docs/43")
                .with_header("Server", "nginx")
                .with_header("Content-Length", "0")
                .with_header("x-request-id", "r-1"),
        )
        .await;
        ResponseHeaders.run(&mut ctx).await.unwrap();

        let headers = &ctx.final_response().unwrap().headers;
        assert_eq!(
            headers.first("location"),
            Some("https://api.example.com/prod/docs/43")
        );
        assert!(!headers.contains("server"));
        assert!(!headers.contains("content-length"));
        assert_eq!(headers.first("x-request-id"), Some("r-1"));
        assert_eq!(headers.first(BACKEND_OVERHEAD_HEADER), Some("0"));
        assert!(headers.contains(PROXY_OVERHEAD_HEADER));
    }

    #[tokio::test]
    async fn test_origin_echoed_without_enforcement() {
        let mut ctx = answered(
            &[("backendURL", "http://svc.internal")],
            GatewayResponse::new(200),
        )
        .await;
        ctx.normalized_headers.set("origin", "https://app.example");
        ResponseHeaders.run(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.final_response().unwrap().headers.first(ALLOW_ORIGIN),
            Some("https://app.example")
        );
    }

    #[tokio::test]
    async fn test_rejected_origin_strips_cors_headers() {
        let mut ctx = answered(
            &[("backendURL", "http://svc.internal")],
            GatewayResponse::new(200)
                .with_header("Access-Control-Allow-Origin", "*")
                .with_header("Access-Control-Expose-Headers", "x-total")
                .with_header("x-total", "3"),
        )
        .await;
        ctx.normalized_headers.set("origin", "https://evil.example");
        ctx.cors = CorsOutcome::Rejected;
        ResponseHeaders.run(&mut ctx).await.unwrap();

        let headers = &ctx.final_response().unwrap().headers;
        assert!(!headers.iter().any(|(name, _)| name.starts_with("access-control-")));
        assert_eq!(headers.first("x-total"), Some("3"));
    }

    #[tokio::test]
    async fn test_gateway_cors_headers_win() {
        let mut ctx = answered(
            &[("backendURL", "http://svc.internal")],
            GatewayResponse::new(200).with_header("Access-Control-Allow-Origin", "*"),
        )
        .await;
        ctx.cors = CorsOutcome::Allowed;
        ctx.additional_response_headers
            .set(ALLOW_ORIGIN, "https://app.example");
        ResponseHeaders.run(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.final_response().unwrap().headers.get(ALLOW_ORIGIN),
            Some(&["https://app.example".to_string()][..])
        );
    }
}
