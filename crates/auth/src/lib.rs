//! Supabase Auth client for Rust
//!
//! This crate provides authentication functionality for Supabase,
//! including password sign up / sign in, OAuth (PKCE) sign in,
//! session management, and user operations.

pub mod store;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use log::{debug, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

/// Seconds before expiry at which a session is refreshed
const REFRESH_MARGIN_SECS: i64 = 60;

/// エラー型
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Credential store error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Missing session")]
    MissingSession,
}

/// ユーザー情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// セッション情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    /// Unix timestamp (seconds); filled in from `expires_in` when the server omits it
    pub expires_at: Option<i64>,
    pub token_type: String,
    pub user: User,
}

impl Session {
    /// Whether the access token expires within `margin_secs`
    pub fn expires_within(&self, margin_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - chrono::Utc::now().timestamp() <= margin_secs,
            None => false,
        }
    }
}

/// ユーザー情報の更新内容
#[derive(Debug, Clone, Serialize, Default)]
pub struct UserAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "data", skip_serializing_if = "Option::is_none")]
    pub user_metadata: Option<serde_json::Value>,
}

/// クライアントオプション
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub auto_refresh_token: bool,
    pub persist_session: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
        }
    }
}

/// OAuth プロバイダ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Facebook,
    Twitter,
    Github,
    Apple,
    Discord,
    Gitlab,
    Bitbucket,
    Linkedin,
    Microsoft,
    Slack,
    Spotify,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Facebook => "facebook",
            Self::Twitter => "twitter",
            Self::Github => "github",
            Self::Apple => "apple",
            Self::Discord => "discord",
            Self::Gitlab => "gitlab",
            Self::Bitbucket => "bitbucket",
            Self::Linkedin => "linkedin",
            Self::Microsoft => "azure",
            Self::Slack => "slack",
            Self::Spotify => "spotify",
        }
    }
}

/// OAuth サインイン設定
#[derive(Debug, Clone, Default)]
pub struct OAuthSignInOptions {
    pub redirect_to: Option<String>,
    pub scopes: Option<String>,
}

/// PKCE の code_verifier と code_challenge の組
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PkceChallenge {
    /// Generate a random verifier and its S256 challenge
    pub fn generate() -> Self {
        let code_verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        Self::from_verifier(code_verifier)
    }

    pub fn from_verifier(code_verifier: String) -> Self {
        let digest = Sha256::digest(code_verifier.as_bytes());
        Self {
            code_challenge: URL_SAFE_NO_PAD.encode(digest),
            code_verifier,
        }
    }
}

/// ブラウザで開くURLと、コード交換時に必要な verifier
#[derive(Debug, Clone)]
pub struct OAuthRedirect {
    pub url: String,
    pub code_verifier: String,
}

/// Auth クライアント
pub struct Auth {
    url: String,
    key: String,
    http_client: Client,
    options: AuthOptions,
    store: Arc<dyn CredentialStore>,
    current_session: Arc<RwLock<Option<Session>>>,
}

impl Auth {
    /// 新しい Auth クライアントを作成
    pub fn new(url: &str, key: &str, http_client: Client, options: AuthOptions) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            http_client,
            options,
            store: Arc::new(MemoryCredentialStore::new()),
            current_session: Arc::new(RwLock::new(None)),
        }
    }

    /// 永続化ストアを設定し、保存済みのセッションがあれば復元する
    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = store;
        match self.restore_session() {
            Ok(Some(_)) => debug!("Restored auth session from credential store"),
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable stored session: {}", e),
        }
        self
    }

    fn restore_session(&self) -> Result<Option<Session>, AuthError> {
        if !self.options.persist_session || !self.store.has_auth() {
            return Ok(None);
        }
        let session = match self.store.get_auth()? {
            Some(json) => serde_json::from_str::<Session>(&json)?,
            None => return Ok(None),
        };
        self.set_current(Some(session.clone()));
        Ok(Some(session))
    }

    /// 現在のセッションを取得
    pub fn get_session(&self) -> Option<Session> {
        self.current_session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// API 呼び出しに使うトークン（サインイン中はアクセストークン、それ以外は anon キー）
    pub fn access_token_or_anon_key(&self) -> String {
        self.get_session()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.key.clone())
    }

    /// 期限切れが近ければリフレッシュしたうえでトークンを返す
    pub async fn valid_access_token(&self) -> Result<String, AuthError> {
        match self.get_session() {
            Some(session)
                if self.options.auto_refresh_token
                    && session.expires_within(REFRESH_MARGIN_SECS) =>
            {
                debug!("Access token about to expire, refreshing session");
                Ok(self.refresh_session().await?.access_token)
            }
            Some(session) => Ok(session.access_token),
            None => Ok(self.key.clone()),
        }
    }

    fn set_current(&self, session: Option<Session>) {
        *self
            .current_session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn save_session(&self, mut session: Session) -> Result<Session, AuthError> {
        if session.expires_at.is_none() {
            session.expires_at = Some(chrono::Utc::now().timestamp() + session.expires_in);
        }

        if self.options.persist_session {
            self.store.set_auth(&serde_json::to_string(&session)?)?;
        }
        self.set_current(Some(session.clone()));
        Ok(session)
    }

    fn clear_session(&self) -> Result<(), AuthError> {
        self.set_current(None);
        self.store.remove_auth()
    }

    async fn post_for_session(
        &self,
        url: String,
        payload: serde_json::Value,
    ) -> Result<Session, AuthError> {
        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let session: Session = check(response).await?.json().await?;
        self.save_session(session)
    }

    /// ユーザー登録
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });

        self.post_for_session(format!("{}/auth/v1/signup", self.url), payload)
            .await
    }

    /// メール・パスワードでログイン
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });

        self.post_for_session(
            format!("{}/auth/v1/token?grant_type=password", self.url),
            payload,
        )
        .await
    }

    /// セッションをリフレッシュ
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let payload = serde_json::json!({
            "refresh_token": session.refresh_token,
        });

        self.post_for_session(
            format!("{}/auth/v1/token?grant_type=refresh_token", self.url),
            payload,
        )
        .await
    }

    /// 現在のユーザーを取得
    pub async fn get_user(&self) -> Result<User, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let response = self
            .http_client
            .get(format!("{}/auth/v1/user", self.url))
            .header("apikey", &self.key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// 現在のユーザー情報を更新
    pub async fn update_user(&self, attributes: UserAttributes) -> Result<User, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let response = self
            .http_client
            .put(format!("{}/auth/v1/user", self.url))
            .header("apikey", &self.key)
            .bearer_auth(&session.access_token)
            .json(&attributes)
            .send()
            .await?;

        let user: User = check(response).await?.json().await?;

        // 保存済みセッションのユーザー情報も差し替える
        self.save_session(Session {
            user: user.clone(),
            ..session
        })?;

        Ok(user)
    }

    /// サインアウト
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let response = self
            .http_client
            .post(format!("{}/auth/v1/logout", self.url))
            .header("apikey", &self.key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        // サーバー側で失敗してもローカルのセッションは破棄する
        let result = check(response).await.map(|_| ());
        self.clear_session()?;
        result
    }

    /// パスワードリセットメールの送信
    pub async fn reset_password_for_email(&self, email: &str) -> Result<(), AuthError> {
        let response = self
            .http_client
            .post(format!("{}/auth/v1/recover", self.url))
            .header("apikey", &self.key)
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    /// OAuth プロバイダを通じたサインインのためのURL生成
    pub fn get_oauth_sign_in_url(
        &self,
        provider: OAuthProvider,
        options: &OAuthSignInOptions,
        pkce: Option<&PkceChallenge>,
    ) -> String {
        let mut url = format!(
            "{}/auth/v1/authorize?provider={}",
            self.url,
            provider.as_str()
        );

        if let Some(redirect_to) = &options.redirect_to {
            url.push_str(&format!(
                "&redirect_to={}",
                urlencoding::encode(redirect_to)
            ));
        }

        if let Some(scopes) = &options.scopes {
            url.push_str(&format!("&scopes={}", urlencoding::encode(scopes)));
        }

        if let Some(pkce) = pkce {
            url.push_str(&format!(
                "&code_challenge={}&code_challenge_method=s256",
                pkce.code_challenge
            ));
        }

        url
    }

    /// OAuth サインインを開始する。
    ///
    /// 返されたURLをブラウザで開き、リダイレクト先で受け取った `code` を
    /// `code_verifier` と一緒に [`Auth::exchange_code_for_session`] に渡す。
    pub fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        options: OAuthSignInOptions,
    ) -> OAuthRedirect {
        let pkce = PkceChallenge::generate();
        OAuthRedirect {
            url: self.get_oauth_sign_in_url(provider, &options, Some(&pkce)),
            code_verifier: pkce.code_verifier,
        }
    }

    /// OAuthコールバックからのコードを処理してセッション取得
    pub async fn exchange_code_for_session(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<Session, AuthError> {
        let payload = serde_json::json!({
            "auth_code": auth_code,
            "code_verifier": code_verifier,
        });

        self.post_for_session(
            format!("{}/auth/v1/token?grant_type=pkce", self.url),
            payload,
        )
        .await
    }
}

async fn check(response: Response) -> Result<Response, AuthError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    debug!("Auth request failed with status {}", status);
    Err(AuthError::ApiError(error_text))
}
