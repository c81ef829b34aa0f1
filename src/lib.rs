//! Supabase Rust Client Library
//!
//! A Rust client library for Supabase, providing access to the database
//! (PostgREST), auth and storage services of a Supabase project.

pub mod config;
pub mod error;

use std::sync::Arc;

use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::Value;

use crate::config::ClientOptions;
use crate::error::Error;

pub use supabase_rust_auth as auth;
pub use supabase_rust_postgrest as postgrest;
pub use supabase_rust_storage as storage;

use crate::auth::{Auth, CredentialStore};
use crate::postgrest::PostgrestClient;
use crate::storage::StorageClient;

/// The main entry point for the Supabase Rust client
pub struct Supabase {
    /// The base URL for the Supabase project
    pub url: String,
    /// The anonymous API key for the Supabase project
    pub key: String,
    /// HTTP client used for requests
    pub http_client: Client,
    /// Auth client for user management and authentication
    pub auth: Auth,
    /// Client options
    pub options: ClientOptions,
}

impl Supabase {
    /// Create a new Supabase client
    ///
    /// # Arguments
    ///
    /// * `supabase_url` - The base URL for your Supabase project
    /// * `supabase_key` - The anonymous API key for your Supabase project
    ///
    /// # Example
    ///
    /// ```
    /// use supabase_rust::Supabase;
    ///
    /// let supabase = Supabase::new("https://your-project-url.supabase.co", "your-anon-key");
    /// ```
    pub fn new(supabase_url: &str, supabase_key: &str) -> Self {
        Self::new_with_options(supabase_url, supabase_key, ClientOptions::default())
    }

    /// Create a new Supabase client with custom options
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use supabase_rust::{Supabase, config::ClientOptions};
    ///
    /// let options = ClientOptions::default()
    ///     .with_request_timeout(Some(Duration::from_secs(5)))
    ///     .with_db_schema("private");
    /// let supabase = Supabase::new_with_options(
    ///     "https://your-project-url.supabase.co",
    ///     "your-anon-key",
    ///     options
    /// );
    /// ```
    pub fn new_with_options(supabase_url: &str, supabase_key: &str, options: ClientOptions) -> Self {
        let url = supabase_url.trim_end_matches('/').to_string();
        let http_client = build_http_client(&options);
        let auth = Auth::new(&url, supabase_key, http_client.clone(), options.auth_options());

        Self {
            url,
            key: supabase_key.to_string(),
            http_client,
            auth,
            options,
        }
    }

    /// Create a client from `SUPABASE_URL` and `SUPABASE_KEY`, loading `.env` first if present
    pub fn from_env() -> Result<Self, Error> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }

        let url = std::env::var("SUPABASE_URL")
            .map_err(|_| Error::config("SUPABASE_URL must be set"))?;
        let key = std::env::var("SUPABASE_KEY")
            .map_err(|_| Error::config("SUPABASE_KEY must be set"))?;

        url::Url::parse(&url)?;
        Ok(Self::new(&url, &key))
    }

    /// Persist and restore the auth session through the given store
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.auth = self.auth.with_store(store);
        self
    }

    /// Get a reference to the auth client for user management and authentication
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Create a new PostgrestClient for database operations on a specific table or view
    ///
    /// Requests carry the signed-in user's access token, or the anon key when
    /// no session exists. A session close to expiry is refreshed first when
    /// `auto_refresh_token` is enabled.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use supabase_rust::Supabase;
    ///
    /// # async fn run() -> Result<(), supabase_rust::error::Error> {
    /// let supabase = Supabase::new("https://your-project-url.supabase.co", "your-anon-key");
    /// let users: Vec<serde_json::Value> = supabase.from("users").await?.eq("id", 1).execute().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn from(&self, table: &str) -> Result<PostgrestClient, Error> {
        let client = PostgrestClient::new(&self.url, &self.key, table, self.http_client.clone());
        self.prepare(client).await
    }

    /// Create a client that calls a Postgres function through `/rpc`
    pub async fn rpc(&self, function_name: &str, params: Value) -> Result<PostgrestClient, Error> {
        let client = PostgrestClient::rpc(
            &self.url,
            &self.key,
            function_name,
            params,
            self.http_client.clone(),
        );
        self.prepare(client).await
    }

    async fn prepare(&self, client: PostgrestClient) -> Result<PostgrestClient, Error> {
        let client = client.with_auth(&self.auth.valid_access_token().await?)?;
        if self.options.db_schema == "public" {
            return Ok(client);
        }
        Ok(client.schema(&self.options.db_schema)?)
    }

    /// Get a storage client for file operations
    ///
    /// # Example
    ///
    /// ```no_run
    /// use supabase_rust::Supabase;
    ///
    /// # async fn run() -> Result<(), supabase_rust::error::Error> {
    /// let supabase = Supabase::new("https://your-project-url.supabase.co", "your-anon-key");
    /// let storage = supabase.storage().await?;
    /// let url = storage.from("avatars").get_public_url("me.png");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn storage(&self) -> Result<StorageClient, Error> {
        let token = self.auth.valid_access_token().await?;
        Ok(StorageClient::new(&self.url, &self.key, self.http_client.clone()).with_auth(&token))
    }
}

fn build_http_client(options: &ClientOptions) -> Client {
    let mut headers = HeaderMap::new();
    for (key, value) in &options.headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Skipping invalid header {}: {}", key, value),
        }
    }

    let mut builder = Client::builder().default_headers(headers);
    if let Some(timeout) = options.request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().unwrap_or_else(|e| {
        warn!("Falling back to default HTTP client: {}", e);
        Client::new()
    })
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::ClientOptions;
    pub use crate::error::Error;
    pub use crate::Supabase;
    pub use supabase_rust_postgrest::filter;
    pub use supabase_rust_postgrest::{Filter, FilterValue, SortOrder};
}
