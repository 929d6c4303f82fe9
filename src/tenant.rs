//! Request-scoped tenant binding.
//!
//! The HTTP layer is out of scope here; what it must carry per request is
//! not. [`TenantContext`] is the explicit request-scoped value an upstream
//! auth layer populates with the authenticated user id (and, optionally,
//! the user's remote credential). [`TenantBinder`] resolves that context to
//! a session before handlers run; handlers read it back through a typed
//! accessor instead of a stringly-keyed bag.
//!
//! Binding never fails a request: a missing or empty user id, or a session
//! construction error, leaves the request sessionless. Handlers that
//! cannot proceed without one use
//! [`require_session`](TenantContext::require_session) and map the error
//! to an internal-error status.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::{Result, StoreError};
use crate::provider::SessionProvider;
use crate::remote::RemoteCredential;
use crate::session::StoreSession;

/// Well-known name under which the session travels in string-keyed request
/// contexts (frameworks that only offer an extensions map).
pub const SESSION_CONTEXT_KEY: &str = "huntboard.store.session";

/// The per-request value the boundary adapter operates on.
///
/// Constructed by the web layer at the top of each request; the auth
/// middleware fills in `user_id`/`credential`, then [`TenantBinder::bind`]
/// attaches the session.
#[derive(Debug, Default)]
pub struct TenantContext {
    user_id: Option<String>,
    credential: Option<RemoteCredential>,
    session: Option<Arc<StoreSession>>,
}

impl TenantContext {
    /// Creates an empty, unauthenticated context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context for an authenticated user.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            credential: None,
            session: None,
        }
    }

    /// Attaches the user's remote credential (builder style).
    pub fn with_credential(mut self, credential: RemoteCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Returns the authenticated user id, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the bound session, if binding attached one.
    pub fn session(&self) -> Option<&Arc<StoreSession>> {
        self.session.as_ref()
    }

    /// Returns the bound session or fails with
    /// [`StoreError::SessionMissing`].
    ///
    /// Handlers that require storage map this error to an internal-error
    /// response.
    pub fn require_session(&self) -> Result<&Arc<StoreSession>> {
        self.session.as_ref().ok_or(StoreError::SessionMissing)
    }
}

/// Boundary adapter that attaches sessions to request contexts.
#[derive(Clone, Debug)]
pub struct TenantBinder {
    provider: Arc<SessionProvider>,
}

impl TenantBinder {
    /// Creates a binder over the process-wide provider.
    pub fn new(provider: Arc<SessionProvider>) -> Self {
        Self { provider }
    }

    /// Resolves the context's user to a session and attaches it.
    ///
    /// Short-circuits in single-tenant deployments. Absent, empty, or
    /// unresolvable users leave the context sessionless; the request
    /// proceeds either way.
    #[instrument(skip(self, ctx), fields(user = ctx.user_id.as_deref().unwrap_or("-")))]
    pub async fn bind(&self, ctx: &mut TenantContext) {
        if !self.provider.config().multi_tenant_enabled {
            return;
        }

        let Some(user) = ctx.user_id.as_deref().filter(|u| !u.is_empty()) else {
            debug!("No authenticated user on request; skipping session binding");
            return;
        };

        match self.provider.get(user, ctx.credential.clone()).await {
            Ok(session) => ctx.session = Some(session),
            Err(err) => {
                warn!(user = %user, error = %err, "Failed to bind session to request");
            }
        }
    }
}
