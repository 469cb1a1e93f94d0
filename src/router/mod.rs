//! Request routing: map URL patterns and HTTP methods to handler functions.
//!
//! [`Router`] dispatches requests by method and path. Three pattern styles are
//! supported:
//!
//! | Pattern              | Example match              | Captured params                  |
//! |----------------------|----------------------------|----------------------------------|
//! | `/users`             | `/users`                   | *(none)*                         |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                      |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"`  |
//!
//! Trailing slashes are normalized, and routes are matched in registration
//! order. Middleware added with [`Router::layer`] wraps every matched route;
//! unmatched requests get `404 Not Found` without running any middleware.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, Parameters};
use crate::middleware::{MiddlewareHandler, Next};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler that turns a [`Context`] into a [`Response`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
    // Any path starting with the prefix, e.g. `/files/*`.
    Wildcard(String),
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> Option<Parameters> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(Parameters::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = Parameters::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }
                Some(params)
            }
            Pattern::Wildcard(prefix) => path.strip_prefix(prefix.as_str()).map(|suffix| {
                let mut params = Parameters::new();
                params.insert("wildcard".to_string(), suffix.to_string());
                params
            }),
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// HTTP request router with a middleware stack.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_sql::{Router, Response, StatusCode};
///
/// let mut router = Router::new();
/// router.get("/users/:id", |ctx| async move {
///     let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    middlewares: Vec<MiddlewareHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a middleware around every route. Layers run in the order added,
    /// the first one outermost.
    pub fn layer(&mut self, middleware: MiddlewareHandler) {
        self.middlewares.push(middleware);
    }

    pub fn get<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Get, path, handler);
    }

    pub fn post<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Post, path, handler);
    }

    pub fn put<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Put, path, handler);
    }

    pub fn delete<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.add_route(Method::Delete, path, handler);
    }

    fn add_route<F, Fut>(&mut self, method: Method, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx: Context| {
            Box::pin(handler(ctx)) as Pin<Box<dyn Future<Output = Response> + Send>>
        });
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches `request` through the middleware stack to the first matching route.
    ///
    /// Also the way to exercise an application in-process, without a socket.
    pub async fn route(&self, request: Request) -> Response {
        let matched = self.routes.iter().find_map(|route| {
            (&route.method == request.method())
                .then(|| route.pattern.matches(request.path()))
                .flatten()
                .map(|params| (route.handler.clone(), params))
        });

        let Some((handler, params)) = matched else {
            return Response::new(StatusCode::NotFound);
        };

        let endpoint: MiddlewareHandler = Arc::new(move |ctx: Context, _next: Next| handler(ctx));
        let mut chain = self.middlewares.clone();
        chain.push(endpoint);

        Next::new(chain)
            .run(Context::with_params(request, params))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Middleware, from_middleware};

    fn request(method: Method, path: &str) -> Request {
        Request::new(method, path)
    }

    #[test]
    fn pattern_parse_trailing_slash_stripped() {
        assert!(matches!(Pattern::parse("/users/"), Pattern::Exact(s) if s == "/users"));
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
    }

    #[test]
    fn pattern_param_extracts_values() {
        let pat = Pattern::parse("/users/:id/posts/:post_id");
        let params = pat.matches("/users/7/posts/99").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("post_id"), Some("99"));
        assert!(pat.matches("/users/7").is_none());
        assert!(pat.matches("/teams/7/posts/99").is_none());
    }

    #[test]
    fn pattern_wildcard_captures_suffix() {
        let pat = Pattern::parse("/files/*");
        let params = pat.matches("/files/docs/readme.txt").unwrap();
        assert_eq!(params.get("wildcard"), Some("/docs/readme.txt"));
        assert!(pat.matches("/other/readme.txt").is_none());
    }

    #[tokio::test]
    async fn method_must_match() {
        let mut router = Router::new();
        router.get("/test", |_ctx| async { Response::new(StatusCode::Ok) });
        router.post("/test", |_ctx| async { Response::new(StatusCode::Created) });
        assert_eq!(router.len(), 2);

        let res = router.route(request(Method::Post, "/test")).await;
        assert_eq!(res.status(), StatusCode::Created);
        let res = router.route(request(Method::Delete, "/test")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn handler_receives_params() {
        let mut router = Router::new();
        router.get("/users/:id", |ctx: Context| async move {
            let id = ctx.params().get("id").unwrap_or("").to_owned();
            Response::new(StatusCode::Ok).body(id)
        });
        let res = router.route(request(Method::Get, "/users/42")).await;
        assert_eq!(res.body_text(), Some("42"));
    }

    struct Teapot;

    impl Middleware for Teapot {
        fn handle(&self, _ctx: Context, _next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async { Response::new(StatusCode::Conflict) })
        }
    }

    #[tokio::test]
    async fn layers_run_only_for_matched_routes() {
        let mut router = Router::new();
        router.layer(from_middleware(Arc::new(Teapot)));
        router.get("/test", |_ctx| async { Response::new(StatusCode::Ok) });

        let res = router.route(request(Method::Get, "/test")).await;
        assert_eq!(res.status(), StatusCode::Conflict);
        let res = router.route(request(Method::Get, "/nope")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }
}
