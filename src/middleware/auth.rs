// Bearer token authentication and the non-anonymous caller check

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::error;

use crate::config::StaticToken;
use crate::models::{AppState, Identity, Requester};
use crate::types::AppError;

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve an access token to its user; `None` for unknown or expired tokens.
    async fn authenticate(&self, token: &str) -> Result<Option<Requester>>;
}

/// Tokens fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Requester>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: &[StaticToken]) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|t| {
                    (t.token.clone(), Requester { user_id: t.user_id, username: t.username.clone() })
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Option<Requester>> {
        Ok(self.tokens.get(token).cloned())
    }
}

pub fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Attach the caller's [`Identity`] to the request.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let requester = match bearer_token(&req) {
        Some(token) => state.authenticator.authenticate(token).await?,
        None => None,
    };
    let identity = requester.map(Identity::User).unwrap_or(Identity::Anonymous);
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Reject anonymous callers and expose the [`Requester`] to handlers.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, AppError> {
    match req.extensions().get::<Identity>().cloned() {
        Some(Identity::User(requester)) => {
            req.extensions_mut().insert(requester);
            Ok(next.run(req).await)
        }
        _ => {
            error!("CMMApi - {} - User is Anonymous or dont have permission", req.uri().path());
            Err(AppError::PermissionDenied)
        }
    }
}
