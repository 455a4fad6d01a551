//! User records and token-based authentication.
//!
//! The store is in-process and holds the whole CRUD contract the HTTP
//! surface needs: create with unique email, fetch by id, credential checks
//! and expiring bearer tokens.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::state::AppState;

pub type UserId = String;

const DEFAULT_TOKEN_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    password_hash: String,
    #[serde(skip)]
    salt: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("Email already registered")]
    EmailTaken,
}

struct TokenEntry {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct UserStore {
    users: RwLock<HashMap<UserId, User>>,
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a user; emails are unique across the store.
    pub async fn create_user(&self, new: NewUser) -> Result<User, UserError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == new.email) {
            return Err(UserError::EmailTaken);
        }

        let salt = generate_salt();
        let user = User {
            id: ulid::Ulid::new().to_string(),
            username: new.username,
            email: new.email,
            password_hash: hash_password(&salt, &new.password),
            salt,
            created_at: Utc::now(),
        };
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub async fn get(&self, id: &str) -> Option<User> {
        self.users.read().await.get(id).cloned()
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Option<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.username == username && u.password_hash == hash_password(&u.salt, password))
            .cloned()
    }

    pub async fn issue_token(&self, user: &User) -> Token {
        self.issue_token_with_ttl(user, token_ttl()).await
    }

    pub async fn issue_token_with_ttl(&self, user: &User, ttl: Duration) -> Token {
        let token = ulid::Ulid::new().to_string();
        self.tokens.write().await.insert(
            token.clone(),
            TokenEntry {
                user_id: user.id.clone(),
                expires_at: Utc::now() + ttl,
            },
        );
        Token {
            access_token: token,
            token_type: "bearer".to_string(),
        }
    }

    /// Resolve a live token to its user; expired or unknown tokens yield None.
    pub async fn user_for_token(&self, token: &str) -> Option<User> {
        let user_id = {
            let tokens = self.tokens.read().await;
            let entry = tokens.get(token)?;
            if entry.expires_at < Utc::now() {
                return None;
            }
            entry.user_id.clone()
        };
        self.users.read().await.get(&user_id).cloned()
    }
}

fn token_ttl() -> Duration {
    let minutes = std::env::var("ACCESS_TOKEN_EXPIRE_MINUTES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_TOKEN_TTL_MINUTES);
    Duration::minutes(minutes)
}

fn generate_salt() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// POST /api/users
pub async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewUser>,
) -> Response {
    match state.users.create_user(new).await {
        Ok(user) => Json(user).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// GET /api/users/{id}
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.users.get(&id).await {
        Some(user) => Json(user).into_response(),
        None => (StatusCode::NOT_FOUND, "User not found").into_response(),
    }
}

/// POST /api/login
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(login): Json<LoginRequest>,
) -> Response {
    match state
        .users
        .authenticate(&login.username, &login.password)
        .await
    {
        Some(user) => Json(state.users.issue_token(&user).await).into_response(),
        None => unauthorized("Incorrect username or password"),
    }
}

/// GET /api/me
pub async fn me_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized("Not authenticated");
    };

    match state.users.user_for_token(token).await {
        Some(user) => Json(user).into_response(),
        None => unauthorized("Invalid or expired token"),
    }
}

fn unauthorized(msg: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        msg.to_string(),
    )
        .into_response()
}
