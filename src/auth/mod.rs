//! User registry, HMAC password hashing, bearer sessions, and admin operations.
//!
//! Persistence follows libunftp's `unftp-auth-jsonfile` crate (credentials as
//! a JSON array, hashed rather than plaintext) but adds the debounced-write
//! pattern spec'd for `users.json`: mutations flip a dirty flag and wake a
//! background task that waits out a 200ms window before writing, so a burst
//! of admin actions costs one write instead of N.

pub mod session;
pub mod user;

use crate::error::{AppError, AppErrorKind};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use session::{hex_encode, Session, TokenSigner, SESSION_TTL};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{info, warn};
use user::{is_valid_username, OpLevel, User, UserStatus};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const DEBOUNCE: std::time::Duration = std::time::Duration::from_millis(200);

pub struct Auth {
    path: PathBuf,
    users: RwLock<Vec<User>>,
    sessions: DashMap<String, Session>,
    signer: TokenSigner,
    dirty: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Auth {
    pub async fn init(fileshare_dir: &Path) -> Arc<Self> {
        let path = fileshare_dir.join("users.json");
        let users = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<User>>(&bytes).unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        let auth = Arc::new(Auth {
            path,
            users: RwLock::new(users),
            sessions: DashMap::new(),
            signer: TokenSigner::new(),
            dirty: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        });

        auth.clone().spawn_debounced_saver();
        auth
    }

    fn spawn_debounced_saver(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                self.notify.notified().await;
                tokio::time::sleep(DEBOUNCE).await;
                if self.dirty.swap(false, Ordering::SeqCst) {
                    self.write_to_disk().await;
                }
            }
        });
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Synchronous-effect flush used on shutdown; writes immediately regardless
    /// of the debounce window.
    pub async fn flush(&self) {
        if self.dirty.swap(false, Ordering::SeqCst) || true {
            self.write_to_disk().await;
        }
    }

    async fn write_to_disk(&self) {
        let users = self.users.read().await.clone();
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_vec_pretty(&users) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&self.path, bytes).await {
                    warn!(error = %e, "failed to persist users.json");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize users"),
        }
    }

    fn hash_password(salt_hex: &str, password: &str) -> Result<String, AppError> {
        let salt = hex_decode(salt_hex).ok_or_else(|| AppError::invalid_input("bad salt"))?;
        let mut mac = HmacSha256::new_from_slice(&salt).map_err(|_| AppError::invalid_input("bad salt"))?;
        mac.update(password.as_bytes());
        Ok(hex_encode(&mac.finalize().into_bytes()))
    }

    pub async fn register(&self, username: &str, password: &str, registration_ip: &str) -> Result<User, AppError> {
        let username = username.to_lowercase();
        if !is_valid_username(&username) {
            return Err(AppError::invalid_input("bad username"));
        }
        if password.len() < 4 {
            return Err(AppError::invalid_input("password too short"));
        }

        let mut users = self.users.write().await;
        if users.iter().any(|u| u.username == username) {
            return Err(AppError::invalid_input("username taken"));
        }

        let mut salt_bytes = [0u8; 16];
        getrandom::fill(&mut salt_bytes).map_err(|e| AppError::with_source(AppErrorKind::UpstreamIoError, e))?;
        let salt = hex_encode(&salt_bytes);
        let password_hash = Self::hash_password(&salt, password)?;

        let user = User {
            id: Uuid::new_v4(),
            username,
            password_hash,
            salt,
            registration_ip: registration_ip.to_string(),
            status: UserStatus::Pending,
            op_level: OpLevel::Normal,
            created_at: chrono::Utc::now(),
        };
        users.push(user.clone());
        drop(users);
        self.mark_dirty();
        Ok(user)
    }

    pub async fn login(&self, username: &str, password: &str, observed_ip: &str) -> Result<Session, AppError> {
        let username = username.to_lowercase();
        let users = self.users.read().await;
        let user = users.iter().find(|u| u.username == username).ok_or_else(|| AppError::new(AppErrorKind::Unauthorized))?;

        let expected_hash = Self::hash_password(&user.salt, password)?;
        if !constant_time_eq(expected_hash.as_bytes(), user.password_hash.as_bytes()) {
            return Err(AppError::new(AppErrorKind::Unauthorized));
        }
        if user.status != UserStatus::Approved {
            return Err(AppError::new(AppErrorKind::Unauthorized));
        }

        let user_id = user.id;
        let current_username = user.username.clone();
        drop(users);

        let token = self.signer.mint(user_id);
        let session = Session {
            user_id,
            current_username,
            token: token.clone(),
            observed_ip: observed_ip.to_string(),
            expires_at: chrono::Utc::now() + SESSION_TTL,
        };
        self.sessions.insert(token, session.clone());
        info!(user = %session.current_username, "login succeeded");
        Ok(session)
    }

    pub async fn logout(&self, token: &str) {
        self.sessions.remove(token);
    }

    /// Validates the token's signature and TTL, confirms the owning user is
    /// still `approved`, and returns that user's *current* username (which
    /// reflects any admin rename since the token was minted).
    pub async fn verify_token(&self, token: &str) -> Result<(Uuid, String, OpLevel), AppError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).to_string();
        let Some(entry) = self.sessions.get(&token) else {
            return Err(AppError::new(AppErrorKind::Unauthorized));
        };
        if entry.expires_at < chrono::Utc::now() {
            drop(entry);
            self.sessions.remove(&token);
            return Err(AppError::new(AppErrorKind::Unauthorized));
        }
        let user_id = entry.user_id;
        drop(entry);

        let users = self.users.read().await;
        let user = users.iter().find(|u| u.id == user_id).ok_or_else(|| AppError::new(AppErrorKind::Unauthorized))?;
        if user.status != UserStatus::Approved {
            return Err(AppError::new(AppErrorKind::Unauthorized));
        }
        Ok((user.id, user.username.clone(), user.op_level))
    }

    pub async fn approve(&self, username: &str) -> Result<(), AppError> {
        self.set_status(username, UserStatus::Approved).await
    }

    pub async fn deny(&self, username: &str) -> Result<(), AppError> {
        self.set_status(username, UserStatus::Denied).await?;
        self.invalidate_sessions_of(username).await;
        Ok(())
    }

    async fn set_status(&self, username: &str, status: UserStatus) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        let user = users.iter_mut().find(|u| u.username == username).ok_or_else(AppError::not_found)?;
        user.status = status;
        drop(users);
        self.mark_dirty();
        Ok(())
    }

    pub async fn clear_pending(&self) {
        let mut users = self.users.write().await;
        users.retain(|u| u.status != UserStatus::Pending);
        drop(users);
        self.mark_dirty();
    }

    pub async fn reset_all(&self) {
        {
            let mut users = self.users.write().await;
            users.clear();
        }
        self.sessions.clear();
        self.mark_dirty();
    }

    pub async fn reset_password(&self, username: &str, new_password: &str) -> Result<(), AppError> {
        let mut salt_bytes = [0u8; 16];
        getrandom::fill(&mut salt_bytes).map_err(|e| AppError::with_source(AppErrorKind::UpstreamIoError, e))?;
        let salt = hex_encode(&salt_bytes);
        let password_hash = Self::hash_password(&salt, new_password)?;

        let mut users = self.users.write().await;
        let user = users.iter_mut().find(|u| u.username == username).ok_or_else(AppError::not_found)?;
        user.salt = salt;
        user.password_hash = password_hash;
        drop(users);
        self.invalidate_sessions_of(username).await;
        self.mark_dirty();
        Ok(())
    }

    pub async fn reset_username(&self, old_username: &str, new_username: &str) -> Result<(), AppError> {
        let new_username = new_username.to_lowercase();
        if !is_valid_username(&new_username) {
            return Err(AppError::invalid_input("bad username"));
        }
        let mut users = self.users.write().await;
        if users.iter().any(|u| u.username == new_username) {
            return Err(AppError::invalid_input("username taken"));
        }
        let user = users.iter_mut().find(|u| u.username == old_username).ok_or_else(AppError::not_found)?;
        user.username = new_username.clone();
        let user_id = user.id;
        drop(users);

        for mut entry in self.sessions.iter_mut() {
            if entry.user_id == user_id {
                entry.current_username = new_username.clone();
            }
        }
        self.mark_dirty();
        Ok(())
    }

    pub async fn delete_user(&self, username: &str) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.username != username);
        if users.len() == before {
            return Err(AppError::not_found());
        }
        drop(users);
        self.invalidate_sessions_of(username).await;
        self.mark_dirty();
        Ok(())
    }

    pub async fn set_op_level(&self, username: &str, level: OpLevel) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        let user = users.iter_mut().find(|u| u.username == username).ok_or_else(AppError::not_found)?;
        user.op_level = level;
        drop(users);
        self.mark_dirty();
        Ok(())
    }

    async fn invalidate_sessions_of(&self, username: &str) {
        self.sessions.retain(|_, s| s.current_username != username);
    }

    pub async fn list_users(&self) -> Vec<User> {
        self.users.read().await.clone()
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok()).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Resolves the client IP per spec §4.7: proxy-v2 header (if enabled) wins,
/// then the TCP peer address, then `X-Forwarded-For`'s first element, then
/// `X-Real-IP`, else `"unknown"`.
pub fn resolve_client_ip(proxy_v2_enabled: bool, proxy_v2_header: Option<&str>, peer_addr: Option<std::net::IpAddr>, forwarded_for: Option<&str>, real_ip: Option<&str>) -> String {
    if proxy_v2_enabled {
        if let Some(header) = proxy_v2_header {
            if let Some(ip) = crate::proxy::v2::parse_header_value_to_client_ip(header) {
                return ip;
            }
        }
    }
    if let Some(addr) = peer_addr {
        return addr.to_string();
    }
    if let Some(xff) = forwarded_for {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(ip) = real_ip {
        if !ip.trim().is_empty() {
            return ip.trim().to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_auth() -> (Arc<Auth>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let auth = Auth::init(dir.path()).await;
        (auth, dir)
    }

    #[tokio::test]
    async fn register_then_pending_login_is_rejected() {
        let (auth, _dir) = temp_auth().await;
        auth.register("alice", "hunter2", "127.0.0.1").await.unwrap();
        let err = auth.login("alice", "hunter2", "127.0.0.1").await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn approve_then_login_succeeds_and_verifies() {
        let (auth, _dir) = temp_auth().await;
        auth.register("alice", "hunter2", "127.0.0.1").await.unwrap();
        auth.approve("alice").await.unwrap();
        let session = auth.login("alice", "hunter2", "127.0.0.1").await.unwrap();
        let (_, username, level) = auth.verify_token(&session.token).await.unwrap();
        assert_eq!(username, "alice");
        assert_eq!(level, OpLevel::Normal);
    }

    #[tokio::test]
    async fn deny_invalidates_existing_sessions() {
        let (auth, _dir) = temp_auth().await;
        auth.register("alice", "hunter2", "127.0.0.1").await.unwrap();
        auth.approve("alice").await.unwrap();
        let session = auth.login("alice", "hunter2", "127.0.0.1").await.unwrap();
        auth.deny("alice").await.unwrap();
        assert!(auth.verify_token(&session.token).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_username_rejected_case_insensitively() {
        let (auth, _dir) = temp_auth().await;
        auth.register("alice", "hunter2", "127.0.0.1").await.unwrap();
        let err = auth.register("ALICE", "whatever1", "127.0.0.1").await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn reset_username_updates_live_session_display_name() {
        let (auth, _dir) = temp_auth().await;
        auth.register("alice", "hunter2", "127.0.0.1").await.unwrap();
        auth.approve("alice").await.unwrap();
        let session = auth.login("alice", "hunter2", "127.0.0.1").await.unwrap();
        auth.reset_username("alice", "alicia").await.unwrap();
        let (_, username, _) = auth.verify_token(&session.token).await.unwrap();
        assert_eq!(username, "alicia");
    }
}
