//! Middleware pipeline for inbound proxy requests.
//!
//! Each middleware wraps the next layer and may inspect the request, answer
//! it directly (an auth challenge, for instance) or decorate the response on
//! the way back. The last entry in the stack is normally the handler that
//! dials upstream.
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`]: wraps a [`Middleware`] as a [`MiddlewareHandler`].

use std::{future::Future, pin::Pin, sync::Arc};

use crate::context::Context;
use crate::http::{Response, StatusCode};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so a middleware can forward a
/// request at most once.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use rttp_proxy::{context::Context, http::Response, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// ```rust,no_run
/// use std::{future::Future, pin::Pin, sync::Arc};
/// use rttp_proxy::{context::Context, http::Response, middleware::{MiddlewareHandler, Next}};
///
/// let handler: MiddlewareHandler = Arc::new(
///     |ctx: Context, next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     },
/// );
/// ```
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// An exhausted chain answers `502 Bad Gateway`: nothing was there to
    /// talk to upstream.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::BadGateway)
                .body("No upstream handler in middleware pipeline")
        }
    }
}

/// The core trait for proxy middleware.
///
/// Implementations are shared across tasks and must not hold `&mut` state
/// across an `.await`.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, Request};

    struct Tag(&'static str);

    impl Middleware for Tag {
        fn handle(
            &self,
            ctx: Context,
            next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let tag = self.0;
            Box::pin(async move {
                let mut resp = next.run(ctx).await;
                resp.add_header("X-Seen", tag);
                resp
            })
        }
    }

    #[tokio::test]
    async fn runs_in_order_and_unwinds() {
        let upstream: MiddlewareHandler = Arc::new(
            |_ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                Box::pin(async { Response::new(StatusCode::Ok) })
            },
        );
        let chain = Next::new(vec![
            from_middleware(Arc::new(Tag("outer"))),
            from_middleware(Arc::new(Tag("inner"))),
            upstream,
        ]);

        let resp = chain
            .run(Context::new(Request::new(Method::Get, "/")))
            .await;

        assert_eq!(resp.status(), StatusCode::Ok);
        let seen: Vec<_> = resp.headers().get_all("x-seen").collect();
        assert_eq!(seen, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn exhausted_chain_is_bad_gateway() {
        let resp = Next::new(vec![])
            .run(Context::new(Request::new(Method::Get, "/")))
            .await;
        assert_eq!(resp.status(), StatusCode::BadGateway);
    }
}
