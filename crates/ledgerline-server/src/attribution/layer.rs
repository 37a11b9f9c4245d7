//! Tower middleware that opens an attribution scope per request
//!
//! The authentication collaborator runs further out in the stack and inserts
//! an [`AuthenticatedUser`] extension into requests it has verified. This layer
//! never verifies anything itself; it only carries the id into the task-local
//! scope that the data layer reads.

use axum::{extract::Request, response::Response};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::{debug, trace};
use uuid::Uuid;

use super::store::run_with_attribution;

/// Header accepted as the user id when the layer is configured to trust it
pub const USER_ID_HEADER: &str = "x-user-id";

/// Request extension set by the authentication collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

/// Layer wrapping services in [`AttributionMiddleware`]
#[derive(Debug, Clone, Default)]
pub struct AttributionLayer {
    trust_user_header: bool,
}

impl AttributionLayer {
    /// Only [`AuthenticatedUser`] extensions are honoured
    pub fn new() -> Self {
        Self::default()
    }

    /// Also honour the `x-user-id` header when no extension is present
    ///
    /// Only enable this behind a gateway that strips the header from
    /// untrusted clients.
    pub fn trusting_user_header(mut self, trust: bool) -> Self {
        self.trust_user_header = trust;
        self
    }
}

impl<S> Layer<S> for AttributionLayer {
    type Service = AttributionMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AttributionMiddleware {
            inner,
            trust_user_header: self.trust_user_header,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttributionMiddleware<S> {
    inner: S,
    trust_user_header: bool,
}

impl<S> AttributionMiddleware<S> {
    fn user_id(&self, request: &Request) -> Option<Uuid> {
        if let Some(AuthenticatedUser(user_id)) = request.extensions().get::<AuthenticatedUser>() {
            return Some(*user_id);
        }

        if !self.trust_user_header {
            return None;
        }

        request
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
    }
}

impl<S> Service<Request> for AttributionMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // Take the service that was driven to readiness and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let user_id = self.user_id(&request);

        match user_id {
            Some(user_id) => {
                debug!(
                    user_id = %user_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    "Attributed request"
                );
                Box::pin(run_with_attribution(user_id, async move {
                    inner.call(request).await
                }))
            },
            None => {
                trace!(
                    method = %request.method(),
                    uri = %request.uri(),
                    "Unattributed request"
                );
                Box::pin(async move { inner.call(request).await })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::current_user_id;
    use axum::{
        body::Body,
        http::{Method, StatusCode},
        routing::post,
        Router,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn whoami() -> String {
        // Hop through a spawned task and a sleep to mimic a nested data call.
        let nested = crate::attribution::spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            current_user_id()
        })
        .await
        .ok()
        .flatten();

        nested.map(|id| id.to_string()).unwrap_or_else(|| "anonymous".to_string())
    }

    fn router(layer: AttributionLayer) -> Router {
        Router::new().route("/whoami", post(whoami)).layer(layer)
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_extension_user_is_visible_in_handler() {
        let user = Uuid::new_v4();
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/whoami")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(AuthenticatedUser(user));

        let response = router(AttributionLayer::new()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, user.to_string());
    }

    #[tokio::test]
    async fn test_header_ignored_unless_trusted() {
        let user = Uuid::new_v4();
        let request = || {
            Request::builder()
                .method(Method::POST)
                .uri("/whoami")
                .header(USER_ID_HEADER, user.to_string())
                .body(Body::empty())
                .unwrap()
        };

        let untrusted = router(AttributionLayer::new()).oneshot(request()).await.unwrap();
        assert_eq!(body_text(untrusted).await, "anonymous");

        let trusted = router(AttributionLayer::new().trusting_user_header(true))
            .oneshot(request())
            .await
            .unwrap();
        assert_eq!(body_text(trusted).await, user.to_string());
    }

    #[tokio::test]
    async fn test_extension_wins_over_header() {
        let from_auth = Uuid::new_v4();
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/whoami")
            .header(USER_ID_HEADER, Uuid::new_v4().to_string())
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(AuthenticatedUser(from_auth));

        let response = router(AttributionLayer::new().trusting_user_header(true))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(body_text(response).await, from_auth.to_string());
    }

    #[tokio::test]
    async fn test_malformed_header_is_unattributed() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/whoami")
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(Body::empty())
            .unwrap();

        let response = router(AttributionLayer::new().trusting_user_header(true))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(body_text(response).await, "anonymous");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_see_their_own_user() {
        let app = router(AttributionLayer::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let app = app.clone();
            let user = Uuid::new_v4();
            handles.push(tokio::spawn(async move {
                let mut request = Request::builder()
                    .method(Method::POST)
                    .uri("/whoami")
                    .body(Body::empty())
                    .unwrap();
                request.extensions_mut().insert(AuthenticatedUser(user));
                let response = app.oneshot(request).await.unwrap();
                (user, body_text(response).await)
            }));
        }

        for handle in handles {
            let (user, seen) = handle.await.unwrap();
            assert_eq!(seen, user.to_string());
        }
    }
}
