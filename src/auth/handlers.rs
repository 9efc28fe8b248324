use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::{error, info};

use super::middleware::AuthenticatedAccount;
use super::service::{AccountDetails, IssuedTokens, NewAccount};
use crate::config::CookieConfig;
use crate::error::{AppError, AuthError};
use crate::AppState;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identifier: Option<String>,
    pub handle: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    fn identifier(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .or(self.handle.as_deref())
            .or(self.email.as_deref())
            .filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

fn session_cookie<'c>(name: &'c str, value: String, max_age_secs: i64, config: &CookieConfig) -> Cookie<'c> {
    Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(max_age_secs))
        .finish()
}

fn removal_cookie<'c>(name: &'c str, config: &CookieConfig) -> Cookie<'c> {
    let mut cookie = session_cookie(name, String::new(), 0, config);
    cookie.make_removal();
    cookie
}

fn with_token_cookies(tokens: &IssuedTokens, config: &CookieConfig) -> actix_web::HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    builder
        .cookie(session_cookie(ACCESS_COOKIE, tokens.access_token.clone(), config.access_max_age_secs, config))
        .cookie(session_cookie(REFRESH_COOKIE, tokens.refresh_token.clone(), config.refresh_max_age_secs, config));
    builder
}

pub async fn register(
    req: web::Json<NewAccount>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received registration request for handle: {}", req.handle);

    match state.sessions.register(req.into_inner()).await {
        Ok(profile) => {
            info!("Registration successful for handle: {}", profile.handle);
            Ok(HttpResponse::Created().json(profile))
        }
        Err(e) => {
            error!("Registration failed: {}", e);
            Err(e)
        }
    }
}

pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let identifier = req
        .identifier()
        .ok_or_else(|| AppError::ValidationError("Handle or email is required".into()))?;
    info!("Received login request for identifier: {}", identifier);

    let outcome = state.sessions.login(identifier, &req.password).await?;
    Ok(with_token_cookies(&outcome.tokens, &state.config.cookies).json(outcome))
}

pub async fn logout(
    account: AuthenticatedAccount,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.sessions.logout(account.0.id).await?;

    let cookies = &state.config.cookies;
    Ok(HttpResponse::Ok()
        .cookie(removal_cookie(ACCESS_COOKIE, cookies))
        .cookie(removal_cookie(REFRESH_COOKIE, cookies))
        .json(serde_json::json!({
            "message": "Successfully logged out"
        })))
}

pub async fn refresh_token(
    req: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    // Browsers send the cookie; other clients put it in the body.
    let presented = req
        .cookie(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| body.and_then(|b| b.into_inner().refresh_token))
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Unauthorized)?;

    let tokens = state.sessions.refresh(&presented).await?;
    Ok(with_token_cookies(&tokens, &state.config.cookies).json(tokens))
}

pub async fn change_password(
    account: AuthenticatedAccount,
    req: web::Json<ChangePasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    if req.new_password != req.confirm_password {
        return Err(AppError::ValidationError("New passwords do not match".into()));
    }

    state
        .sessions
        .change_password(account.0.id, &req.old_password, &req.new_password)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Password changed successfully"
    })))
}

pub async fn get_current_user(account: AuthenticatedAccount) -> HttpResponse {
    HttpResponse::Ok().json(account.0.profile())
}

pub async fn update_account_details(
    account: AuthenticatedAccount,
    req: web::Json<AccountDetails>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let profile = state
        .sessions
        .update_account_details(account.0.id, req.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(profile))
}

/// Mounts the account routes under `/api/v1/users`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/users")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route("/refresh-token", web::post().to(refresh_token))
            .route("/change-password", web::post().to(change_password))
            .route("/get-current-user", web::get().to(get_current_user))
            .route("/update-account-details", web::post().to(update_account_details)),
    );
}
