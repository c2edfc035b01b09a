use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use marginalia_core::Tier;

use crate::config::{AccountConfig, AppConfig};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedAccount {
    pub account_id: String,
    pub tier: Tier,
}

/// Resolves static bearer tokens from [`AppConfig`] to accounts
#[derive(Clone)]
pub struct StaticTokenVerifier {
    tokens: Arc<HashMap<String, AccountConfig>>,
}

impl StaticTokenVerifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            tokens: Arc::new(config.tokens.clone()),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedAccount, AppError> {
        let account = self
            .tokens
            .get(token)
            .ok_or_else(|| AppError::unauthorized("Unknown bearer token"))?;
        Ok(AuthenticatedAccount {
            account_id: account.account_id.clone(),
            tier: account.tier,
        })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}
