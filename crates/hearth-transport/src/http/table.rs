//! The route table.
//!
//! Routes are kept in registration order, which is also dispatch priority:
//! the first route whose pattern accepts the path and whose method filter
//! accepts the method runs its chain. The list is copy-on-write; dispatch
//! scans an immutable snapshot taken when it starts, so handlers may register
//! or remove routes while a request is in flight.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use hearth_core::{IntoPatterns, PathMatcher, Scope};
use parking_lot::RwLock;
use tracing::{debug, error, trace};

use super::handler::{Flow, HandlerChain};
use super::request::RouteRequest;
use crate::error::{DispatchError, DispatchResult, TransportResult, allow_header};

static NEXT_ROUTE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(u64);

impl RouteId {
    fn next() -> Self {
        Self(NEXT_ROUTE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// MethodFilter
// =============================================================================

/// Methods reported in `Allow` for routes registered with [`MethodFilter::Any`].
const ANY_METHODS: [Method; 7] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// The set of methods a route accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    /// Every method.
    Any,
    /// Only the listed methods. `GET` implies `HEAD`.
    Only(Vec<Method>),
}

impl MethodFilter {
    /// Returns `true` if `method` is accepted.
    pub fn accepts(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Only(methods) => {
                methods.contains(method)
                    || (*method == Method::HEAD && methods.contains(&Method::GET))
            }
        }
    }

    /// Returns the accepted methods in registration order.
    pub fn allowed(&self) -> Vec<Method> {
        match self {
            Self::Any => ANY_METHODS.to_vec(),
            Self::Only(methods) => {
                let mut out = methods.clone();
                if out.contains(&Method::GET) && !out.contains(&Method::HEAD) {
                    out.push(Method::HEAD);
                }
                out
            }
        }
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        Self::Only(vec![method])
    }
}

impl From<Vec<Method>> for MethodFilter {
    fn from(methods: Vec<Method>) -> Self {
        Self::Only(methods)
    }
}

impl<const N: usize> From<[Method; N]> for MethodFilter {
    fn from(methods: [Method; N]) -> Self {
        Self::Only(methods.to_vec())
    }
}

// =============================================================================
// Route & RouteHandle
// =============================================================================

/// A registered route.
#[derive(Debug)]
pub struct Route {
    id: RouteId,
    matcher: PathMatcher,
    methods: MethodFilter,
    chain: HandlerChain,
}

impl Route {
    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    pub fn methods(&self) -> &MethodFilter {
        &self.methods
    }
}

/// Handle returned by route registration, used for explicit removal.
#[derive(Debug, Clone)]
pub struct RouteHandle {
    id: RouteId,
    table: Weak<RouteTable>,
}

impl RouteHandle {
    pub fn id(&self) -> RouteId {
        self.id
    }

    /// Removes the route. Returns `false` if it was already gone.
    pub fn remove(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.remove(self.id))
    }
}

// =============================================================================
// RouteTable
// =============================================================================

/// Ordered, copy-on-write collection of routes.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<Arc<Vec<Arc<Route>>>>,
}

impl RouteTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends a route.
    ///
    /// When `scope` is given, disposing it removes the route. A pattern error
    /// leaves the table and the scope untouched.
    pub fn register(
        self: &Arc<Self>,
        patterns: impl IntoPatterns,
        methods: impl Into<MethodFilter>,
        chain: HandlerChain,
        scope: Option<&Scope>,
    ) -> TransportResult<RouteHandle> {
        let matcher = PathMatcher::compile(patterns)?;
        let route = Arc::new(Route {
            id: RouteId::next(),
            matcher,
            methods: methods.into(),
            chain,
        });
        let id = route.id;

        {
            let mut routes = self.routes.write();
            let mut next = Vec::with_capacity(routes.len() + 1);
            next.extend(routes.iter().cloned());
            next.push(Arc::clone(&route));
            *routes = Arc::new(next);
        }
        debug!(route = %id, pattern = %route.matcher, methods = ?route.methods, "Route registered");

        if let Some(scope) = scope {
            let table = Arc::downgrade(self);
            scope.defer(move || {
                if let Some(table) = table.upgrade() {
                    table.remove(id);
                }
            });
        }

        Ok(RouteHandle {
            id,
            table: Arc::downgrade(self),
        })
    }

    /// Removes the route with `id`. Returns `false` if it is not present.
    pub fn remove(&self, id: RouteId) -> bool {
        let mut routes = self.routes.write();
        let Some(pos) = routes.iter().position(|r| r.id == id) else {
            return false;
        };
        let mut next = Vec::clone(&routes);
        next.remove(pos);
        *routes = Arc::new(next);
        debug!(route = %id, "Route removed");
        true
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Returns a snapshot of the routes in dispatch order.
    pub fn routes(&self) -> Arc<Vec<Arc<Route>>> {
        Arc::clone(&self.routes.read())
    }

    /// Dispatches a request against a snapshot of the table.
    ///
    /// - The first route matching path and method runs its chain; a chain
    ///   that passes the request on falls through to the next match.
    /// - A matched path with no route accepting the method yields
    ///   `MethodNotAllowed`, or `200` with `Allow` for `OPTIONS`.
    /// - Handler errors and panics yield `HandlerFailure`.
    pub async fn dispatch(&self, mut req: RouteRequest) -> DispatchResult<Response> {
        let snapshot = self.routes();
        let method = req.method().clone();
        let path = req.path().to_string();

        let mut path_matched = false;
        let mut method_matched = false;
        let mut allowed: Vec<Method> = Vec::new();

        for route in snapshot.iter() {
            let Some(params) = route.matcher.captures(&path) else {
                continue;
            };
            path_matched = true;
            for m in route.methods.allowed() {
                if !allowed.contains(&m) {
                    allowed.push(m);
                }
            }
            if !route.methods.accepts(&method) {
                continue;
            }
            method_matched = true;

            trace!(route = %route.id, %method, path = %path, "Running handler chain");
            req.set_params(params);
            match AssertUnwindSafe(route.chain.run(req)).catch_unwind().await {
                Ok(Ok(Flow::Respond(response))) => return Ok(response),
                Ok(Ok(Flow::Next(next))) => req = next,
                Ok(Err(source)) => {
                    error!(
                        route = %route.id,
                        %method,
                        path = %path,
                        error = %source,
                        "Handler failed"
                    );
                    return Err(DispatchError::HandlerFailure {
                        route: route.id,
                        source,
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        route = %route.id,
                        %method,
                        path = %path,
                        panic = %message,
                        "Handler panicked"
                    );
                    return Err(DispatchError::HandlerFailure {
                        route: route.id,
                        source: format!("handler panicked: {message}").into(),
                    });
                }
            }
        }

        if !path_matched || method_matched {
            return Err(DispatchError::NotFound { method, path });
        }
        if method == Method::OPTIONS {
            return Ok((StatusCode::OK, [(header::ALLOW, allow_header(&allowed))]).into_response());
        }
        Err(DispatchError::MethodNotAllowed {
            method,
            path,
            allowed,
        })
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{handler_fn, middleware_fn};
    use parking_lot::Mutex;
    use std::convert::Infallible;

    fn text(body: &'static str) -> HandlerChain {
        handler_fn(move |_req| async move { Ok::<_, Infallible>(body) }).into()
    }

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn get(table: &RouteTable, path: &str) -> DispatchResult<Response> {
        table.dispatch(RouteRequest::new(Method::GET, path)).await
    }

    fn ids(table: &RouteTable) -> Vec<RouteId> {
        table.routes().iter().map(|r| r.id()).collect()
    }

    #[tokio::test]
    async fn test_ping_scenario() {
        let table = RouteTable::new();
        table.register("/ping", Method::GET, text("pong"), None).unwrap();

        let response = get(&table, "/ping").await.unwrap();
        assert_eq!(body_of(response).await, "pong");

        let err = table
            .dispatch(RouteRequest::new(Method::POST, "/ping"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
        let DispatchError::MethodNotAllowed { allowed, .. } = &err else {
            panic!("expected MethodNotAllowed");
        };
        assert_eq!(allowed, &vec![Method::GET, Method::HEAD]);

        let err = get(&table, "/missing").await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_earliest_registration_wins() {
        let table = RouteTable::new();
        table.register("/dup", Method::GET, text("first"), None).unwrap();
        table.register("/dup", Method::GET, text("second"), None).unwrap();
        assert_eq!(body_of(get(&table, "/dup").await.unwrap()).await, "first");
    }

    #[tokio::test]
    async fn test_removal_keeps_relative_order() {
        let table = RouteTable::new();
        let a = table.register("/a", Method::GET, text("a"), None).unwrap();
        let b = table.register("/b", Method::GET, text("b"), None).unwrap();
        let c = table.register("/c", Method::GET, text("c"), None).unwrap();

        assert!(b.remove());
        assert!(!b.remove());
        assert_eq!(ids(&table), vec![a.id(), c.id()]);
        assert!(matches!(
            get(&table, "/b").await,
            Err(DispatchError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_scope_disposal_removes_only_owned_routes() {
        let table = RouteTable::new();
        let scope = Scope::new("plugin");
        let keep = table.register("/keep", Method::GET, text("k"), None).unwrap();
        table
            .register("/owned", Method::GET, text("o"), Some(&scope))
            .unwrap();
        let tail = table.register("/tail", Method::GET, text("t"), None).unwrap();
        table
            .register(["/x", "/y"], Method::POST, text("xy"), Some(&scope))
            .unwrap();

        scope.dispose();
        assert_eq!(ids(&table), vec![keep.id(), tail.id()]);
        scope.dispose();
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_removal_before_dispose() {
        let table = RouteTable::new();
        let scope = Scope::new("plugin");
        let handle = table
            .register("/a", Method::GET, text("a"), Some(&scope))
            .unwrap();
        assert!(handle.remove());
        scope.dispose();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_pattern_error_registers_nothing() {
        let table = RouteTable::new();
        let scope = Scope::new("plugin");
        let err = table.register("/:", Method::GET, text("x"), Some(&scope));
        assert!(err.is_err());
        assert!(table.is_empty());
        assert_eq!(scope.pending(), 0);
    }

    #[tokio::test]
    async fn test_method_not_allowed_unions_matching_routes() {
        let table = RouteTable::new();
        table.register("/item/:id", Method::GET, text("g"), None).unwrap();
        table
            .register("/item/:id", [Method::PUT, Method::DELETE], text("p"), None)
            .unwrap();
        table.register("/other", Method::POST, text("o"), None).unwrap();

        let err = table
            .dispatch(RouteRequest::new(Method::POST, "/item/1"))
            .await
            .unwrap_err();
        let DispatchError::MethodNotAllowed { allowed, .. } = err else {
            panic!("expected MethodNotAllowed");
        };
        assert_eq!(
            allowed,
            vec![Method::GET, Method::HEAD, Method::PUT, Method::DELETE]
        );
    }

    #[tokio::test]
    async fn test_options_and_head() {
        let table = RouteTable::new();
        table.register("/ping", Method::GET, text("pong"), None).unwrap();

        let response = table
            .dispatch(RouteRequest::new(Method::OPTIONS, "/ping"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");

        let response = table
            .dispatch(RouteRequest::new(Method::HEAD, "/ping"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_params_reach_handler() {
        let table = RouteTable::new();
        table
            .register(
                "/chat/:room",
                MethodFilter::Any,
                handler_fn(|req: RouteRequest| async move {
                    Ok::<_, Infallible>(req.param("room").unwrap_or_default().to_string())
                })
                .into(),
                None,
            )
            .unwrap();
        let response = get(&table, "/chat/general").await.unwrap();
        assert_eq!(body_of(response).await, "general");
    }

    #[tokio::test]
    async fn test_exhausted_chain_falls_through() {
        let table = RouteTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        table
            .register(
                "/:any*",
                MethodFilter::Any,
                middleware_fn(move |req: RouteRequest| {
                    s.lock().push(req.path().to_string());
                    async move { Ok::<_, Infallible>(Flow::Next(req)) }
                })
                .into(),
                None,
            )
            .unwrap();
        table.register("/end", Method::GET, text("end"), None).unwrap();

        assert_eq!(body_of(get(&table, "/end").await.unwrap()).await, "end");
        assert!(matches!(
            get(&table, "/nothing").await,
            Err(DispatchError::NotFound { .. })
        ));
        assert_eq!(*seen.lock(), vec!["/end", "/nothing"]);
    }

    #[tokio::test]
    async fn test_handler_failure_and_panic_are_contained() {
        let table = RouteTable::new();
        let failing = table
            .register(
                "/fail",
                Method::GET,
                handler_fn(|_req| async { Err::<&str, _>("broken") }).into(),
                None,
            )
            .unwrap();
        table
            .register(
                "/panic",
                Method::GET,
                handler_fn(|_req| async {
                    if true {
                        panic!("kaboom");
                    }
                    Ok::<_, Infallible>("never")
                })
                .into(),
                None,
            )
            .unwrap();
        table.register("/ok", Method::GET, text("ok"), None).unwrap();

        let err = get(&table, "/fail").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(
            err,
            DispatchError::HandlerFailure { route, .. } if route == failing.id()
        ));

        let err = get(&table, "/panic").await.unwrap_err();
        assert!(err.to_string().contains("kaboom"));

        assert_eq!(table.len(), 3);
        assert_eq!(body_of(get(&table, "/ok").await.unwrap()).await, "ok");
    }

    #[tokio::test]
    async fn test_mutation_during_dispatch_uses_snapshot() {
        let table = RouteTable::new();
        let slot: Arc<Mutex<Option<RouteHandle>>> = Arc::new(Mutex::new(None));
        let s = Arc::clone(&slot);
        let handle = table
            .register(
                "/once",
                Method::GET,
                middleware_fn(move |req: RouteRequest| {
                    if let Some(handle) = s.lock().take() {
                        handle.remove();
                    }
                    async move { Ok::<_, Infallible>(Flow::Next(req)) }
                })
                .into(),
                None,
            )
            .unwrap();
        table.register("/once", Method::GET, text("second"), None).unwrap();
        *slot.lock() = Some(handle);

        // The first route removes itself mid-scan; the scan still reaches the second.
        assert_eq!(body_of(get(&table, "/once").await.unwrap()).await, "second");
        assert_eq!(table.len(), 1);
    }
}
