//! Request-scoped attribution
//!
//! Every mutating data call must know which user caused it, but threading a
//! user id through every function signature does not scale. Instead the
//! acting user is stored in a tokio task-local for the lifetime of one
//! request's execution tree:
//!
//! - [`AttributionLayer`] opens the scope for each authenticated HTTP request
//! - [`run_with_attribution`] opens a scope explicitly (background jobs, tests)
//! - [`current_user_id`] reads the nearest enclosing scope from anywhere below it
//! - [`spawn`] carries the scope into a newly spawned task
//!
//! ```no_run
//! use ledgerline_server::attribution::{current_user_id, run_with_attribution};
//! use uuid::Uuid;
//!
//! # async fn example() {
//! let user = Uuid::new_v4();
//! let seen = run_with_attribution(user, async { current_user_id() }).await;
//! assert_eq!(seen, Some(user));
//! assert_eq!(current_user_id(), None);
//! # }
//! ```

mod layer;
mod store;

pub use layer::{AttributionLayer, AttributionMiddleware, AuthenticatedUser, USER_ID_HEADER};
pub use store::{
    current_user_id, run_with_attribution, spawn, verify_propagation, AttributionError,
    RequestAttribution,
};
