//! Dynamic backend resolution from a route table.
//!
//! Route keys follow `/routes/{METHOD|ANY}{path}/BACKEND_URL`. A path
//! segment `ALL` turns the key into a wildcard: the remaining path becomes a
//! prefix that matches any request path containing it. Lookup order is
//! exact (method, then `ANY`), wildcard (earliest occurrence in the path,
//! ties to the first key in table order), then catch-all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::cache::TimedCache;
use crate::error::GatewayError;
use crate::stores::ParameterStore;

/// How long a fetched route table is served.
pub const ROUTE_TABLE_TTL: Duration = Duration::from_secs(300);

const ROUTES: &str = "/routes/";
const SUFFIX: &str = "/BACKEND_URL";
const ANY: &str = "ANY";
const WILDCARD: &str = "ALL";

/// Which rule selected a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Wildcard,
    CatchAll,
}

/// A resolved route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub key: &'a str,
    pub address: &'a str,
    pub kind: MatchKind,
}

/// A wildcard key broken into its parts.
struct WildcardKey {
    /// `None` for `ANY`.
    method: Option<String>,
    prefix: String,
}

impl WildcardKey {
    fn parse(key: &str) -> Option<Self> {
        let inner = key.strip_prefix(ROUTES)?.strip_suffix(SUFFIX)?;
        let mut segments = inner.split('/');
        let method = segments.next()?;
        let mut path: Vec<&str> = segments.collect();
        let wildcard_at = path.iter().position(|s| *s == WILDCARD)?;
        path.remove(wildcard_at);

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("/{}", path.join("/"))
        };
        Some(Self {
            method: (method != ANY).then(|| method.to_uppercase()),
            prefix,
        })
    }

    fn applies_to(&self, method: &str) -> bool {
        self.method.as_deref().map_or(true, |m| m == method)
    }
}

/// Route keys (relative to the API prefix) mapped to backend addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    entries: BTreeMap<String, String>,
}

impl RouteTable {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// Build from a fetched tree, stripping `prefix` from every key.
    pub fn from_tree(prefix: &str, tree: BTreeMap<String, String>) -> Self {
        let entries = tree
            .into_iter()
            .map(|(key, value)| {
                let relative = key.strip_prefix(prefix).unwrap_or(&key).to_string();
                (relative, value)
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Select the backend for `method` on the hydrated `path`.
    pub fn resolve(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        let method = method.to_uppercase();
        let path = path.trim_end_matches('/');

        self.exact(&method, path)
            .or_else(|| self.wildcard(&method, path))
            .or_else(|| self.catch_all(&method))
    }

    fn lookup(&self, key: String, kind: MatchKind) -> Option<RouteMatch<'_>> {
        self.entries
            .get_key_value(&key)
            .map(|(key, address)| RouteMatch {
                key,
                address,
                kind,
            })
    }

    fn exact(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        self.lookup(format!("{}{}{}{}", ROUTES, method, path, SUFFIX), MatchKind::Exact)
            .or_else(|| self.lookup(format!("{}{}{}{}", ROUTES, ANY, path, SUFFIX), MatchKind::Exact))
    }

    fn wildcard(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        let mut best: Option<(usize, RouteMatch<'_>)> = None;

        for (key, address) in &self.entries {
            let Some(wildcard) = WildcardKey::parse(key) else {
                continue;
            };
            // empty prefixes are catch-alls, handled last
            if wildcard.prefix.is_empty() || !wildcard.applies_to(method) {
                continue;
            }
            let Some(at) = path.find(&wildcard.prefix) else {
                continue;
            };
            if best.as_ref().map_or(true, |(best_at, _)| at < *best_at) {
                best = Some((
                    at,
                    RouteMatch {
                        key,
                        address,
                        kind: MatchKind::Wildcard,
                    },
                ));
            }
        }

        best.map(|(_, found)| found)
    }

    fn catch_all(&self, method: &str) -> Option<RouteMatch<'_>> {
        self.lookup(
            format!("{}{}/{}{}", ROUTES, method, WILDCARD, SUFFIX),
            MatchKind::CatchAll,
        )
        .or_else(|| {
            self.lookup(
                format!("{}{}/{}{}", ROUTES, ANY, WILDCARD, SUFFIX),
                MatchKind::CatchAll,
            )
        })
    }
}

/// Fetches, caches and queries route tables per API.
#[derive(Clone)]
pub struct RouteResolver {
    store: Arc<dyn ParameterStore>,
    parameter_prefix: Option<String>,
    cache: TimedCache<String, Arc<RouteTable>>,
    ttl: Duration,
}

impl RouteResolver {
    pub fn new(store: Arc<dyn ParameterStore>, parameter_prefix: Option<String>) -> Self {
        Self {
            store,
            parameter_prefix: parameter_prefix.filter(|p| !p.is_empty()),
            cache: TimedCache::new(),
            ttl: ROUTE_TABLE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Whether a parameter prefix is configured at all.
    pub fn is_configured(&self) -> bool {
        self.parameter_prefix.is_some()
    }

    fn table_prefix(&self, api_id: &str) -> Option<String> {
        self.parameter_prefix
            .as_ref()
            .map(|prefix| format!("{}/{}", prefix.trim_end_matches('/'), api_id))
    }

    /// The route table for `api_id`, from cache or freshly fetched.
    pub async fn table(&self, api_id: &str) -> Result<Arc<RouteTable>, GatewayError> {
        let prefix = self.table_prefix(api_id).ok_or(GatewayError::MissingBackend)?;
        let ttl = self.ttl;
        let store = Arc::clone(&self.store);

        self.cache
            .get_or_try_insert_with(
                prefix.clone(),
                |_| ttl,
                || async move {
                    match store.fetch_tree(&prefix).await {
                        Ok(tree) => {
                            debug!(prefix = %prefix, entries = tree.len(), "route table fetched");
                            Ok(Arc::new(RouteTable::from_tree(&prefix, tree)))
                        }
                        Err(e) => {
                            error!(prefix = %prefix, error = %e, "route table fetch failed");
                            Err(GatewayError::RouteTable(e))
                        }
                    }
                },
            )
            .await
    }

    /// Backend address for the request, or "method not allowed".
    pub async fn resolve(
        &self,
        api_id: &str,
        method: &str,
        path: &str,
    ) -> Result<String, GatewayError> {
        let table = self.table(api_id).await?;
        match table.resolve(method, path) {
            Some(found) => {
                debug!(key = found.key, kind = ?found.kind, "route resolved");
                Ok(found.address.to_string())
            }
            None => {
                debug!(method, path, "no route matched");
                Err(GatewayError::MethodNotAllowed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PREFIX: &str = "/dxcassure/feature-150/features/apis";
    const API: &str = "i7sfjnnq71";

    fn sample_tree() -> BTreeMap<String, String> {
        [
            ("acl", "acl"),
            ("attribute_classes", "attribute_classes"),
            ("documents", "documents"),
            ("groups", "groups"),
            ("permission_resources", "permission_resources"),
            ("structures", "library"),
            ("templates", "templates"),
        ]
        .into_iter()
        .map(|(segment, function)| {
            (
                format!("{}/{}/routes/ANY/{}/ALL/BACKEND_URL", PREFIX, API, segment),
                format!("lambda:feature-150-assure-document-management-{}", function),
            )
        })
        .collect()
    }

    fn table(entries: &[(&str, &str)]) -> RouteTable {
        RouteTable::new(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    struct CountingStore {
        tree: BTreeMap<String, String>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingStore {
        fn new(tree: BTreeMap<String, String>) -> Arc<Self> {
            Arc::new(Self {
                tree,
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                tree: BTreeMap::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl ParameterStore for CountingStore {
        async fn fetch_tree(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Unavailable("throttled".into()));
            }
            Ok(self
                .tree
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
    }

    #[test]
    fn test_wildcard_earliest_prefix_wins() {
        let table = RouteTable::from_tree(&format!("{}/{}", PREFIX, API), sample_tree());

        let found = table
            .resolve("GET", "/permission_resources/documents/permissions")
            .unwrap();

        assert_eq!(found.kind, MatchKind::Wildcard);
        assert_eq!(
            found.address,
            "lambda:feature-150-assure-document-management-permission_resources"
        );
    }

    #[test]
    fn test_wildcard_plain_prefix() {
        let table = RouteTable::from_tree(&format!("{}/{}", PREFIX, API), sample_tree());
        let found = table.resolve("POST", "/structures/12").unwrap();
        assert_eq!(found.address, "lambda:feature-150-assure-document-management-library");
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let table = table(&[
            ("/routes/ANY/orders/ALL/BACKEND_URL", "http://wild"),
            ("/routes/ANY/orders/42/BACKEND_URL", "http://any-exact"),
            ("/routes/GET/orders/42/BACKEND_URL", "http://get-exact"),
        ]);

        let get = table.resolve("get", "/orders/42").unwrap();
        assert_eq!((get.address, get.kind), ("http://get-exact", MatchKind::Exact));

        let post = table.resolve("POST", "/orders/42/").unwrap();
        assert_eq!(post.address, "http://any-exact");

        let other = table.resolve("GET", "/orders/7").unwrap();
        assert_eq!(other.address, "http://wild");
    }

    #[test]
    fn test_method_specific_wildcard() {
        let table = table(&[
            ("/routes/GET/reports/ALL/BACKEND_URL", "http://reader"),
            ("/routes/ANY/ALL/BACKEND_URL", "http://default"),
        ]);
        assert_eq!(table.resolve("GET", "/reports/q1").unwrap().address, "http://reader");
        assert_eq!(table.resolve("PUT", "/reports/q1").unwrap().address, "http://default");
    }

    #[test]
    fn test_tie_goes_to_first_key() {
        let table = table(&[
            ("/routes/ANY/a/ALL/BACKEND_URL", "http://first"),
            ("/routes/ANY/a/b/ALL/BACKEND_URL", "http://second"),
        ]);
        assert_eq!(table.resolve("GET", "/a/b/c").unwrap().address, "http://first");
    }

    #[test]
    fn test_catch_all_fallback() {
        let table = table(&[
            ("/routes/ANY/orders/ALL/BACKEND_URL", "http://orders"),
            ("/routes/ANY/ALL/BACKEND_URL", "http://default"),
        ]);
        let found = table.resolve("GET", "/invoices/3").unwrap();
        assert_eq!((found.address, found.kind), ("http://default", MatchKind::CatchAll));
    }

    #[test]
    fn test_no_match() {
        let table = table(&[("/routes/ANY/orders/ALL/BACKEND_URL", "http://orders")]);
        assert!(table.resolve("GET", "/invoices/3").is_none());
    }

    #[test]
    fn test_all_must_be_a_whole_segment() {
        let table = table(&[("/routes/ANY/INSTALLS/BACKEND_URL", "http://installs")]);
        assert!(table.resolve("GET", "/x/INSTALLS/y").is_none());
    }

    #[tokio::test]
    async fn test_resolver_errors() {
        let resolver = RouteResolver::new(CountingStore::new(sample_tree()), Some(PREFIX.into()));
        let err = resolver.resolve("other-api", "GET", "/acl").await.unwrap_err();
        assert!(matches!(err, GatewayError::MethodNotAllowed));

        let failing = RouteResolver::new(CountingStore::failing(), Some(PREFIX.into()));
        let err = failing.resolve(API, "GET", "/acl").await.unwrap_err();
        assert!(matches!(err, GatewayError::RouteTable(_)));
        assert_eq!(err.to_string(), "Invalid configuration");
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_cached_for_five_minutes() {
        let store = CountingStore::new(sample_tree());
        let resolver = RouteResolver::new(store.clone(), Some(format!("{}/", PREFIX)));

        resolver.resolve(API, "GET", "/acl/1").await.unwrap();
        tokio::time::advance(ROUTE_TABLE_TTL - Duration::from_millis(1)).await;
        resolver.resolve(API, "GET", "/groups/1").await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        resolver.resolve(API, "GET", "/acl/1").await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let store = CountingStore::failing();
        let resolver = RouteResolver::new(store.clone(), Some(PREFIX.into()));
        assert!(resolver.table(API).await.is_err());
        assert!(resolver.table(API).await.is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unconfigured_prefix() {
        let resolver = RouteResolver::new(CountingStore::new(BTreeMap::new()), Some(String::new()));
        assert!(!resolver.is_configured());
    }
}
