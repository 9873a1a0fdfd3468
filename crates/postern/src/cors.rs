//! Cross-origin policy evaluation.
//!
//! The policy comes from stage variables and is cached per `apiId/stage` for
//! its own max-age. Method and header checks on preflights always pass; only
//! the origin is enforced.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use regex_lite::Regex;

use crate::cache::TimedCache;
use crate::event::ProxyEvent;
use crate::headers::Headers;

/// Policy lifetime when `CORSOptionsMaxAge` is absent or unparsable.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(30_000);

const DEFAULT_ALLOW_METHODS: &str = "GET,POST,HEAD";
const DEFAULT_ALLOW_HEADERS: &str = "X-Requested-With,Content-Type,Accept,Origin";

pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
pub const ALLOW_METHODS: &str = "access-control-allow-methods";
pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
pub const REQUEST_METHOD: &str = "access-control-request-method";

/// Prefix shared by every cross-origin response header.
pub const HEADER_PREFIX: &str = "access-control-";

/// Allowed origins.
#[derive(Debug, Clone)]
pub enum OriginMatcher {
    Any,
    /// Anchored, case-insensitive expressions; `*` matches anything.
    Patterns(Vec<Regex>),
}

impl OriginMatcher {
    /// Parse a comma separated origin list. `*` anywhere as a whole entry
    /// allows every origin.
    pub fn parse(list: &str) -> Result<Self, regex_lite::Error> {
        let entries: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect();
        if entries.iter().any(|e| *e == "*") {
            return Ok(Self::Any);
        }

        let patterns = entries
            .into_iter()
            .map(|entry| {
                let escaped = regex_lite::escape(entry).replace("\\*", ".*");
                Regex::new(&format!("(?i)^{}$", escaped))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Patterns(patterns))
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Patterns(patterns) => patterns.iter().any(|p| p.is_match(origin)),
        }
    }
}

/// Effective cross-origin policy of one API stage.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    /// The configured origin list, for logs.
    pub allow_origin: String,
    pub origins: OriginMatcher,
    pub allow_credentials: bool,
    pub allow_methods: String,
    pub allow_headers: String,
    pub expose_headers: String,
    pub forward_preflight: bool,
    pub max_age: Duration,
}

impl CorsPolicy {
    /// Build from stage variables, applying defaults.
    pub fn from_stage(vars: Option<&BTreeMap<String, String>>) -> Result<Self, regex_lite::Error> {
        let get = |name: &str| {
            vars.and_then(|v| v.get(name))
                .map(String::as_str)
                .filter(|v| !v.is_empty())
        };
        let flag = |name: &str| get(name).is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let allow_origin = match get("CORSAccessControlAllowOrigin") {
            None | Some("all") => "*".to_string(),
            Some(list) => list.to_string(),
        };
        let max_age = get("CORSOptionsMaxAge")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_MAX_AGE);

        Ok(Self {
            origins: OriginMatcher::parse(&allow_origin)?,
            allow_origin,
            allow_credentials: flag("CORSAccessControlAllowCredentials"),
            allow_methods: get("CORSAccessControlAllowMethods")
                .unwrap_or(DEFAULT_ALLOW_METHODS)
                .to_string(),
            allow_headers: get("CORSAccessControlAllowHeaders")
                .unwrap_or(DEFAULT_ALLOW_HEADERS)
                .to_string(),
            expose_headers: get("CORSAccessControlExposeHeaders")
                .unwrap_or_default()
                .to_string(),
            forward_preflight: flag("CORSForwardPreflight"),
            max_age,
        })
    }

    /// Headers added to a non-preflight response.
    fn simple_headers(&self, origin: &str) -> Headers {
        let mut headers = Headers::new();
        headers.set(ALLOW_ORIGIN, origin);
        if self.allow_credentials {
            headers.set(ALLOW_CREDENTIALS, "true");
        }
        if !self.expose_headers.is_empty() {
            headers.set(EXPOSE_HEADERS, self.expose_headers.clone());
        }
        headers
    }

    /// Headers added to a preflight response.
    fn preflight_headers(&self, origin: &str) -> Headers {
        let mut headers = Headers::new();
        headers.set(ALLOW_METHODS, self.allow_methods.clone());
        headers.set(ALLOW_ORIGIN, origin);
        headers.set(ALLOW_HEADERS, self.allow_headers.clone());
        if self.allow_credentials {
            headers.set(ALLOW_CREDENTIALS, "true");
        }
        headers
    }
}

/// Kind of cross-origin request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// GET, POST or HEAD without `Access-Control-Request-Method`.
    Simple,
    /// OPTIONS with `Access-Control-Request-Method`.
    Preflight,
    /// Anything else; treated like a simple request.
    Other,
}

impl RequestKind {
    pub fn classify(method: &str, headers: &Headers) -> Self {
        let requests_method = headers.contains(REQUEST_METHOD);
        let method = method.to_uppercase();
        match method.as_str() {
            "GET" | "POST" | "HEAD" if !requests_method => Self::Simple,
            "OPTIONS" if requests_method => Self::Preflight,
            _ => Self::Other,
        }
    }
}

/// What the engine decided for a request.
#[derive(Debug, Clone)]
pub enum CorsDecision {
    /// Enforcement off or no `Origin`.
    NotApplied,
    /// The origin is not allowed.
    Rejected { origin: String, allowed: String },
    /// Headers to add; `answer_preflight` means reply 204 without calling
    /// the backend.
    Allowed {
        headers: Headers,
        answer_preflight: bool,
    },
}

/// Policy cache plus decision logic.
#[derive(Clone, Default)]
pub struct CorsEngine {
    cache: TimedCache<String, Arc<CorsPolicy>>,
}

impl CorsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy for the event's API stage. Events without an API id or stage
    /// get a freshly computed, uncached policy.
    pub fn policy(&self, event: &ProxyEvent) -> Result<Arc<CorsPolicy>, regex_lite::Error> {
        let context = &event.request_context;
        if context.api_id.is_empty() || context.stage.is_empty() {
            return CorsPolicy::from_stage(event.stage_variables.as_ref()).map(Arc::new);
        }

        let key = format!("{}/{}", context.api_id, context.stage);
        if let Some(policy) = self.cache.get(&key) {
            return Ok(policy);
        }
        let policy = Arc::new(CorsPolicy::from_stage(event.stage_variables.as_ref())?);
        self.cache.insert(key, Arc::clone(&policy), policy.max_age);
        Ok(policy)
    }

    /// Decide for one request. `headers` are the normalized inbound headers.
    pub fn evaluate(
        &self,
        event: &ProxyEvent,
        headers: &Headers,
    ) -> Result<CorsDecision, regex_lite::Error> {
        if event.stage_variable("CORSEnforce") != Some("true") {
            return Ok(CorsDecision::NotApplied);
        }
        let Some(origin) = headers.first("origin") else {
            return Ok(CorsDecision::NotApplied);
        };

        let policy = self.policy(event)?;
        if !policy.origins.matches(origin) {
            return Ok(CorsDecision::Rejected {
                origin: origin.to_string(),
                allowed: policy.allow_origin.clone(),
            });
        }

        let decision = match RequestKind::classify(&event.http_method, headers) {
            RequestKind::Preflight => CorsDecision::Allowed {
                headers: policy.preflight_headers(origin),
                answer_preflight: !policy.forward_preflight,
            },
            RequestKind::Simple | RequestKind::Other => CorsDecision::Allowed {
                headers: policy.simple_headers(origin),
                answer_preflight: false,
            },
        };
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventContext;

    fn event(method: &str, vars: &[(&str, &str)]) -> ProxyEvent {
        ProxyEvent {
            http_method: method.into(),
            stage_variables: Some(
                vars.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            request_context: EventContext {
                api_id: "api1".into(),
                stage: "prod".into(),
                ..EventContext::default()
            },
            ..ProxyEvent::default()
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut headers = Headers::new();
        for (name, value) in pairs {
            headers.set(name, *value);
        }
        headers
    }

    #[test]
    fn test_policy_defaults() {
        let policy = CorsPolicy::from_stage(None).unwrap();
        assert_eq!(policy.allow_origin, "*");
        assert!(matches!(policy.origins, OriginMatcher::Any));
        assert_eq!(policy.allow_methods, "GET,POST,HEAD");
        assert_eq!(policy.allow_headers, "X-Requested-With,Content-Type,Accept,Origin");
        assert_eq!(policy.expose_headers, "");
        assert!(!policy.allow_credentials);
        assert!(!policy.forward_preflight);
        assert_eq!(policy.max_age, DEFAULT_MAX_AGE);
    }

    #[test]
    fn test_unparsable_max_age_falls_back() {
        let vars = BTreeMap::from([("CORSOptionsMaxAge".to_string(), "soon".to_string())]);
        let policy = CorsPolicy::from_stage(Some(&vars)).unwrap();
        assert_eq!(policy.max_age, DEFAULT_MAX_AGE);
    }

    #[test]
    fn test_origin_patterns() {
        let matcher = OriginMatcher::parse("https://app.example.com, https://*.partner.io").unwrap();
        assert!(matcher.matches("https://APP.example.com"));
        assert!(matcher.matches("https://eu.partner.io"));
        assert!(!matcher.matches("https://appXexample.com"));
        assert!(!matcher.matches("https://app.example.com.evil.net"));
        assert!(matches!(OriginMatcher::parse("https://a, *").unwrap(), OriginMatcher::Any));
    }

    #[test]
    fn test_request_kinds() {
        let preflight = headers(&[(REQUEST_METHOD, "PUT")]);
        assert_eq!(RequestKind::classify("get", &Headers::new()), RequestKind::Simple);
        assert_eq!(RequestKind::classify("OPTIONS", &preflight), RequestKind::Preflight);
        assert_eq!(RequestKind::classify("OPTIONS", &Headers::new()), RequestKind::Other);
        assert_eq!(RequestKind::classify("GET", &preflight), RequestKind::Other);
        assert_eq!(RequestKind::classify("DELETE", &Headers::new()), RequestKind::Other);
    }

    #[test]
    fn test_inert_without_enforcement_or_origin() {
        let engine = CorsEngine::new();
        let origin = headers(&[("origin", "https://a")]);

        let off = engine.evaluate(&event("GET", &[]), &origin).unwrap();
        assert!(matches!(off, CorsDecision::NotApplied));

        let no_origin = engine
            .evaluate(&event("GET", &[("CORSEnforce", "true")]), &Headers::new())
            .unwrap();
        assert!(matches!(no_origin, CorsDecision::NotApplied));
    }

    #[test]
    fn test_simple_request_headers() {
        let engine = CorsEngine::new();
        let event = event(
            "GET",
            &[
                ("CORSEnforce", "true"),
                ("CORSAccessControlAllowCredentials", "TRUE"),
                ("CORSAccessControlExposeHeaders", "x-total"),
            ],
        );
        let decision = engine
            .evaluate(&event, &headers(&[("origin", "https://a")]))
            .unwrap();

        let CorsDecision::Allowed {
            headers,
            answer_preflight,
        } = decision
        else {
            panic!("expected allowed");
        };
        assert!(!answer_preflight);
        assert_eq!(headers.first(ALLOW_ORIGIN), Some("https://a"));
        assert_eq!(headers.first(ALLOW_CREDENTIALS), Some("true"));
        assert_eq!(headers.first(EXPOSE_HEADERS), Some("x-total"));
        assert!(!headers.contains(ALLOW_METHODS));
    }

    #[test]
    fn test_preflight_answered_or_forwarded() {
        let engine = CorsEngine::new();
        let inbound = headers(&[("origin", "https://a"), (REQUEST_METHOD, "PUT")]);

        let answered = engine
            .evaluate(&event("OPTIONS", &[("CORSEnforce", "true")]), &inbound)
            .unwrap();
        let CorsDecision::Allowed {
            headers,
            answer_preflight,
        } = answered
        else {
            panic!("expected allowed");
        };
        assert!(answer_preflight);
        assert_eq!(headers.first(ALLOW_METHODS), Some("GET,POST,HEAD"));
        assert!(headers.contains(ALLOW_HEADERS));

        let other_engine = CorsEngine::new();
        let forwarded = other_engine
            .evaluate(
                &event(
                    "OPTIONS",
                    &[("CORSEnforce", "true"), ("CORSForwardPreflight", "true")],
                ),
                &inbound,
            )
            .unwrap();
        assert!(matches!(
            forwarded,
            CorsDecision::Allowed {
                answer_preflight: false,
                ..
            }
        ));
    }

    #[test]
    fn test_rejected_origin() {
        let engine = CorsEngine::new();
        let event = event(
            "GET",
            &[
                ("CORSEnforce", "true"),
                ("CORSAccessControlAllowOrigin", "https://trusted.example"),
            ],
        );
        let decision = engine
            .evaluate(&event, &headers(&[("origin", "https://evil.example")]))
            .unwrap();
        assert!(matches!(decision, CorsDecision::Rejected { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_cached_for_max_age() {
        let engine = CorsEngine::new();
        let first = event(
            "GET",
            &[("CORSAccessControlAllowMethods", "GET"), ("CORSOptionsMaxAge", "1000")],
        );
        assert_eq!(engine.policy(&first).unwrap().allow_methods, "GET");

        let changed = event(
            "GET",
            &[("CORSAccessControlAllowMethods", "PUT"), ("CORSOptionsMaxAge", "1000")],
        );
        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(engine.policy(&changed).unwrap().allow_methods, "GET");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(engine.policy(&changed).unwrap().allow_methods, "PUT");
    }
}
