use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    auth::Authenticator,
    context::Context,
    http::{Response, StatusCode},
    middleware::{Middleware, Next},
};

pub const DEFAULT_REALM: &str = "proxy";

/// Requires clients to authenticate before their request goes upstream.
///
/// Authenticators are asked in order and the first one that handles the
/// request decides. On success the [`Identity`](crate::auth::Identity) is
/// stored in the request extensions and `Proxy-Authorization` is stripped,
/// since it is meant for this hop only. Everything else gets
/// `407 Proxy Authentication Required` and the connection is closed.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_proxy::auth::{BasicAuthenticator, CredentialStore};
/// use rttp_proxy::middleware::from_middleware;
/// use rttp_proxy::security::ProxyAuthMiddleware;
///
/// let users: CredentialStore = [("alice", "secret")].into_iter().collect();
/// let auth = ProxyAuthMiddleware::new()
///     .realm("corp")
///     .authenticator(Arc::new(BasicAuthenticator::new(users)));
///
/// let handler = from_middleware(Arc::new(auth));
/// ```
#[derive(Clone)]
pub struct ProxyAuthMiddleware {
    authenticators: Vec<Arc<dyn Authenticator>>,
    realm: String,
}

impl Default for ProxyAuthMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyAuthMiddleware {
    /// Creates a middleware with no authenticators, which rejects everyone.
    pub fn new() -> Self {
        Self {
            authenticators: Vec::new(),
            realm: DEFAULT_REALM.to_owned(),
        }
    }

    #[must_use]
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    /// Realm advertised in the `Proxy-Authenticate` challenge.
    #[must_use]
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    fn challenge(&self) -> Response {
        let realm = self.realm.replace(['\\', '"'], "");
        Response::new(StatusCode::ProxyAuthenticationRequired)
            .header("Proxy-Authenticate", format!("Basic realm=\"{realm}\""))
            .keep_alive(false)
    }
}

impl Middleware for ProxyAuthMiddleware {
    fn handle(
        &self,
        mut ctx: Context,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let decision = self
            .authenticators
            .iter()
            .find_map(|authenticator| authenticator.authenticate(&ctx));

        let identity = match decision {
            Some(Ok(identity)) => identity,
            Some(Err(e)) => {
                warn!(uri = %ctx.request().target(), error = %e, "proxy authentication failed");
                let challenge = self.challenge();
                return Box::pin(async move { challenge });
            }
            None => {
                debug!(uri = %ctx.request().target(), "no proxy credentials");
                let challenge = self.challenge();
                return Box::pin(async move { challenge });
            }
        };

        debug!(user = identity.user(), "proxy client authenticated");
        ctx.request_mut().headers_mut().remove("proxy-authorization");
        ctx.extensions_mut().insert(identity);

        Box::pin(async move { next.run(ctx).await })
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;

    use super::*;
    use crate::auth::{AuthError, BasicAuthenticator, Identity};
    use crate::http::{Method, Request};
    use crate::middleware::{MiddlewareHandler, from_middleware};

    /// Echoes the identity and whether the credentials leaked through.
    fn upstream() -> MiddlewareHandler {
        Arc::new(
            |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let user = ctx
                    .extensions()
                    .get::<Identity>()
                    .map(|identity| identity.user().to_owned())
                    .unwrap_or_default();
                let leaked = ctx.request().headers().contains("proxy-authorization");
                Box::pin(async move {
                    Response::new(StatusCode::Ok)
                        .header("X-User", user)
                        .header("X-Leaked", leaked.to_string())
                })
            },
        )
    }

    fn chain(auth: ProxyAuthMiddleware) -> Next {
        Next::new(vec![from_middleware(Arc::new(auth)), upstream()])
    }

    fn request(header: Option<&str>) -> Context {
        let mut request = Request::new(Method::Get, "http://example.com/");
        if let Some(value) = header {
            request.headers_mut().insert("Proxy-Authorization", value);
        }
        Context::new(request)
    }

    fn basic_users() -> Arc<BasicAuthenticator> {
        Arc::new(BasicAuthenticator::new(
            [("alice", "secret")].into_iter().collect(),
        ))
    }

    #[tokio::test]
    async fn authenticated_request_reaches_upstream_without_credentials() {
        let auth = ProxyAuthMiddleware::new().authenticator(basic_users());
        let header = format!("Basic {}", STANDARD.encode("alice:secret"));

        let resp = chain(auth).run(request(Some(&header))).await;

        assert_eq!(resp.status(), StatusCode::Ok);
        assert_eq!(resp.headers().get("x-user"), Some("alice"));
        assert_eq!(resp.headers().get("x-leaked"), Some("false"));
    }

    #[tokio::test]
    async fn wrong_credentials_are_challenged() {
        let auth = ProxyAuthMiddleware::new()
            .realm("corp")
            .authenticator(basic_users());
        let header = format!("Basic {}", STANDARD.encode("alice:nope"));

        let resp = chain(auth).run(request(Some(&header))).await;

        assert_eq!(resp.status(), StatusCode::ProxyAuthenticationRequired);
        assert_eq!(
            resp.headers().get("proxy-authenticate"),
            Some(r#"Basic realm="corp""#)
        );
        assert!(!resp.is_keep_alive());
    }

    #[tokio::test]
    async fn missing_credentials_are_challenged() {
        let auth = ProxyAuthMiddleware::new().authenticator(basic_users());
        let resp = chain(auth).run(request(None)).await;
        assert_eq!(resp.status(), StatusCode::ProxyAuthenticationRequired);
    }

    struct Declines;

    impl Authenticator for Declines {
        fn authenticate(&self, _ctx: &Context) -> Option<Result<Identity, AuthError>> {
            None
        }
    }

    struct Refuses;

    impl Authenticator for Refuses {
        fn authenticate(&self, _ctx: &Context) -> Option<Result<Identity, AuthError>> {
            Some(Err(AuthError::NoSuchUser))
        }
    }

    #[tokio::test]
    async fn first_handling_authenticator_decides() {
        let header = format!("Basic {}", STANDARD.encode("alice:secret"));

        let auth = ProxyAuthMiddleware::new()
            .authenticator(Arc::new(Declines))
            .authenticator(basic_users());
        let resp = chain(auth).run(request(Some(&header))).await;
        assert_eq!(resp.status(), StatusCode::Ok);

        let auth = ProxyAuthMiddleware::new()
            .authenticator(Arc::new(Refuses))
            .authenticator(basic_users());
        let resp = chain(auth).run(request(Some(&header))).await;
        assert_eq!(resp.status(), StatusCode::ProxyAuthenticationRequired);
    }
}
