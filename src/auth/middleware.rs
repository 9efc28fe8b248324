use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;

use super::handlers::ACCESS_COOKIE;
use crate::db::Account;
use crate::error::{AppError, AuthError};
use crate::AppState;

/// The account behind a valid access token.
///
/// The token is read from the `accessToken` cookie first, then from an
/// `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount(pub Account);

pub fn access_token_from(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie(ACCESS_COOKIE) {
        return Some(cookie.value().to_string());
    }
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

impl FromRequest for AuthenticatedAccount {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = access_token_from(req);
        let state = req.app_data::<web::Data<AppState>>().cloned();

        Box::pin(async move {
            let state = state.ok_or_else(|| {
                AppError::InternalError("application state not registered".into())
            })?;
            let token = token.ok_or(AuthError::Unauthorized)?;
            let account = state.sessions.authenticate(&token).await?;
            Ok(AuthenticatedAccount(account))
        })
    }
}
