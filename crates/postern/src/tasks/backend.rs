//! Backend selection and URL info.

use async_trait::async_trait;
use tracing::debug;

use crate::context::{BackendTarget, RequestContext, UrlInfo};
use crate::error::GatewayError;
use crate::pipeline::{ChainSignal, Task};
use crate::resolver::RouteResolver;
use crate::urls::hydrate_resource_path;

/// Filter mode targets the embedded handler; proxy mode takes the stage's
/// `backendURL` when present.
pub struct StaticBackend;

#[async_trait]
impl Task for StaticBackend {
    fn name(&self) -> &'static str {
        "static-backend"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        if !ctx.is_proxy_mode {
            debug!("filter mode, backend is the embedded handler");
            ctx.set_backend(BackendTarget::Embedded)?;
            return Ok(ChainSignal::Continue);
        }

        if let Some(address) = ctx.stage.backend_url.clone() {
            let target = BackendTarget::from_address(&address)?;
            debug!(backend = %target, "backend from stage configuration");
            ctx.set_backend(target)?;
        }
        Ok(ChainSignal::Continue)
    }
}

/// Resolves the backend from the API's route table when nothing else did.
pub struct RouteBackend {
    resolver: RouteResolver,
}

impl RouteBackend {
    pub fn new(resolver: RouteResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Task for RouteBackend {
    fn name(&self) -> &'static str {
        "route-backend"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        if !ctx.is_proxy_mode || ctx.backend().is_resolved() || !self.resolver.is_configured() {
            return Ok(ChainSignal::Continue);
        }

        let path = hydrate_resource_path(&ctx.event);
        let address = self
            .resolver
            .resolve(&ctx.event.request_context.api_id, &ctx.method(), &path)
            .await?;
        let target = BackendTarget::from_address(&address)?;
        debug!(backend = %target, path = %path, "backend from route table");
        ctx.set_backend(target)?;
        Ok(ChainSignal::Continue)
    }
}

/// Computes the public and backend addressing; fails without a backend.
pub struct UrlInfoTask {
    default_host: String,
}

impl UrlInfoTask {
    pub fn new(default_host: String) -> Self {
        Self { default_host }
    }
}

#[async_trait]
impl Task for UrlInfoTask {
    fn name(&self) -> &'static str {
        "url-info"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<ChainSignal, GatewayError> {
        let info = UrlInfo::build(
            ctx.backend(),
            &ctx.normalized_headers,
            &ctx.event,
            &self.default_host,
        )?;
        debug!(
            api_url = %info.api_url,
            backend_url = %info.backend_url,
            resource_path = %info.resource_path,
            "url info"
        );
        ctx.url_info = Some(info);
        Ok(ChainSignal::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{ParameterStore, StoreError};
    use crate::tasks::testing::context;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct Routes(BTreeMap<String, String>);

    #[async_trait]
    impl ParameterStore for Routes {
        async fn fetch_tree(&self, _prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
            Ok(self.0.clone())
        }
    }

    fn resolver(entries: &[(&str, &str)], prefix: Option<&str>) -> RouteResolver {
        let tree = entries
            .iter()
            .map(|(k, v)| (format!("/apis/api1{}", k), v.to_string()))
            .collect();
        RouteResolver::new(Arc::new(Routes(tree)), prefix.map(str::to_string))
    }

    #[tokio::test]
    async fn test_filter_mode_is_embedded() {
        let mut ctx = context(&[("backendURL", "http://ignored")]);
        ctx.is_proxy_mode = false;
        StaticBackend.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.backend(), &BackendTarget::Embedded);
    }

    #[tokio::test]
    async fn test_static_backend_from_stage() {
        let mut ctx = context(&[("backendURL", "lambda:orders")]);
        StaticBackend.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.backend(), &BackendTarget::Function("orders".into()));

        let mut bad = context(&[("backendURL", "lambda:")]);
        let err = StaticBackend.run(&mut bad).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidFunctionName(_)));
    }

    #[tokio::test]
    async fn test_route_backend_resolves_when_unset() {
        let task = RouteBackend::new(resolver(
            &[("/routes/GET/docs/42/BACKEND_URL", "http://docs.internal")],
            Some("/apis"),
        ));
        let mut ctx = context(&[]);
        task.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.backend(), &BackendTarget::Http("http://docs.internal".into()));
    }

    #[tokio::test]
    async fn test_route_backend_skipped() {
        let task = RouteBackend::new(resolver(&[], Some("/apis")));
        let mut ctx = context(&[("backendURL", "http://static")]);
        StaticBackend.run(&mut ctx).await.unwrap();
        task.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.backend(), &BackendTarget::Http("http://static".into()));

        let unconfigured = RouteBackend::new(resolver(&[], None));
        let mut ctx = context(&[]);
        unconfigured.run(&mut ctx).await.unwrap();
        assert!(!ctx.backend().is_resolved());
    }

    #[tokio::test]
    async fn test_route_backend_method_not_allowed() {
        let task = RouteBackend::new(resolver(
            &[("/routes/POST/docs/ALL/BACKEND_URL", "http://writer")],
            Some("/apis"),
        ));
        let err = task.run(&mut context(&[])).await.unwrap_err();
        assert_eq!(err.classify().0, 405);
    }

    #[tokio::test]
    async fn test_url_info_requires_backend() {
        let task = UrlInfoTask::new("localhost".into());
        let err = task.run(&mut context(&[])).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingBackend));

        let mut ctx = context(&[("backendURL", "http://svc.internal")]);
        StaticBackend.run(&mut ctx).await.unwrap();
        task.run(&mut ctx).await.unwrap();
        let info = ctx.url_info.unwrap();
        assert_eq!(info.api_url, "https://api.example.com/prod");
        assert_eq!(info.resource_path, "/docs/42");
    }
}
