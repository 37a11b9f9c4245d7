//! Task-local storage for the acting user

use std::future::Future;

use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

tokio::task_local! {
    static ATTRIBUTION: RequestAttribution;
}

/// The acting user for one request's execution tree. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestAttribution {
    pub user_id: Uuid,
}

#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("Attribution context is not propagated: {0}")]
    PropagationUnavailable(&'static str),
}

/// Run `future` with `user_id` as the current user
///
/// Everything the future awaits, however deeply nested, sees `user_id` through
/// [`current_user_id`]. Nested calls shadow the outer value for their own
/// duration. The scope ends when the future completes, whether it succeeds,
/// fails or panics.
pub async fn run_with_attribution<F>(user_id: Uuid, future: F) -> F::Output
where
    F: Future,
{
    ATTRIBUTION
        .scope(RequestAttribution { user_id }, future)
        .await
}

/// The user id of the nearest enclosing scope, or `None` outside any scope
pub fn current_user_id() -> Option<Uuid> {
    ATTRIBUTION.try_with(|attribution| attribution.user_id).ok()
}

/// Spawn a task that inherits the caller's attribution
///
/// `tokio::spawn` starts tasks with empty task-locals, so work handed off to
/// another task would otherwise run unattributed.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match ATTRIBUTION.try_with(|attribution| *attribution) {
        Ok(attribution) => tokio::spawn(ATTRIBUTION.scope(attribution, future)),
        Err(_) => tokio::spawn(future),
    }
}

/// Startup self-check that attribution survives awaits and task hand-off
///
/// A failure here is a wiring error (for example a runtime without task-local
/// support), so the server refuses to start rather than silently writing
/// unattributed audit rows.
pub async fn verify_propagation() -> Result<(), AttributionError> {
    let probe = Uuid::new_v4();

    let observed = run_with_attribution(probe, async {
        tokio::task::yield_now().await;
        let nested = current_user_id();
        let spawned = spawn(async { current_user_id() }).await.ok().flatten();
        (nested, spawned)
    })
    .await;

    match observed {
        (Some(nested), _) if nested != probe => Err(AttributionError::PropagationUnavailable(
            "scope returned a different user id",
        )),
        (None, _) => Err(AttributionError::PropagationUnavailable(
            "scope is lost across await points",
        )),
        (_, spawned) if spawned != Some(probe) => Err(AttributionError::PropagationUnavailable(
            "scope is lost across spawned tasks",
        )),
        _ if current_user_id().is_some() => Err(AttributionError::PropagationUnavailable(
            "scope leaks past its future",
        )),
        _ => Ok(()),
    }
}
