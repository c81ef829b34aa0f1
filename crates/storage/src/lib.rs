//! Supabase Storage client for Rust
//!
//! This crate provides storage functionality for Supabase,
//! allowing for uploading, downloading, and managing files.

use bytes::Bytes;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// 結果型
pub type Result<T> = std::result::Result<T, StorageError>;

/// エラー型
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("API error: {message} (Status: {status})")]
    ApiError {
        message: String,
        status: reqwest::StatusCode,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// ファイルアップロードオプション
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    pub cache_control: Option<String>,
    pub content_type: Option<String>,
    pub upsert: bool,
}

impl FileOptions {
    /// 新しいファイルオプションを作成
    pub fn new() -> Self {
        Self::default()
    }

    /// キャッシュコントロールを設定（秒）
    pub fn with_cache_control(mut self, cache_control: &str) -> Self {
        self.cache_control = Some(cache_control.to_string());
        self
    }

    /// コンテンツタイプを設定
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// アップサートを設定
    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

/// ファイル一覧取得オプション
#[derive(Debug, Clone, Serialize, Default)]
pub struct ListOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(rename = "sortBy", skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn sort_by(mut self, column: &str, order: SortOrder) -> Self {
        self.sort_by = Some(SortBy {
            column: column.to_string(),
            order,
        });
        self
    }

    pub fn search(mut self, search: &str) -> Self {
        self.search = Some(search.to_string());
        self
    }
}

/// ソート設定
#[derive(Debug, Clone, Serialize)]
pub struct SortBy {
    pub column: String,
    pub order: SortOrder,
}

/// ソート順
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// ファイル情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub name: String,
    pub id: Option<String>,
    pub bucket_id: Option<String>,
    pub owner: Option<String>,
    pub updated_at: Option<String>,
    pub created_at: Option<String>,
    pub last_accessed_at: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// アップロード結果
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "Key")]
    pub key: String,
}

/// バケット情報
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    pub public: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// ストレージクライアント
#[derive(Debug, Clone)]
pub struct StorageClient {
    base_url: String,
    api_key: String,
    token: String,
    http_client: Client,
}

impl StorageClient {
    /// 新しいストレージクライアントを作成
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            token: api_key.to_string(),
            http_client,
        }
    }

    /// Bearer トークンを設定（セッションのアクセストークン、または anon キー）
    pub fn with_auth(mut self, token: &str) -> Self {
        self.token = token.to_string();
        self
    }

    /// バケットを指定
    pub fn from(&self, bucket_id: &str) -> StorageBucketClient<'_> {
        StorageBucketClient {
            parent: self,
            bucket_id: bucket_id.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/storage/v1{}", self.base_url, path);
        debug!("Storage {} {}", method, url);
        self.http_client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.token)
    }

    /// バケット一覧を取得
    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let response = self.request(Method::GET, "/bucket").send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// バケットを取得
    pub async fn get_bucket(&self, bucket_id: &str) -> Result<Bucket> {
        let response = self
            .request(Method::GET, &format!("/bucket/{}", bucket_id))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// バケットを作成
    pub async fn create_bucket(&self, bucket_id: &str, is_public: bool) -> Result<()> {
        let payload = json!({
            "id": bucket_id,
            "name": bucket_id,
            "public": is_public
        });

        let response = self
            .request(Method::POST, "/bucket")
            .json(&payload)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// バケット情報を更新
    pub async fn update_bucket(&self, bucket_id: &str, is_public: bool) -> Result<()> {
        let payload = json!({
            "id": bucket_id,
            "name": bucket_id,
            "public": is_public
        });

        let response = self
            .request(Method::PUT, &format!("/bucket/{}", bucket_id))
            .json(&payload)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// バケット内のファイルをすべて削除
    pub async fn empty_bucket(&self, bucket_id: &str) -> Result<()> {
        let response = self
            .request(Method::POST, &format!("/bucket/{}/empty", bucket_id))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// バケットを削除
    pub async fn delete_bucket(&self, bucket_id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/bucket/{}", bucket_id))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

/// ストレージバケットクライアント
pub struct StorageBucketClient<'a> {
    parent: &'a StorageClient,
    bucket_id: String,
}

impl<'a> StorageBucketClient<'a> {
    /// ファイルをアップロード
    pub async fn upload(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        options: FileOptions,
    ) -> Result<UploadResponse> {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let mut part = Part::stream(reqwest::Body::from(data.into())).file_name(file_name);
        if let Some(content_type) = &options.content_type {
            part = part.mime_str(content_type)?;
        }

        let mut form = Form::new().part("", part);
        if let Some(cache_control) = &options.cache_control {
            form = form.text("cacheControl", cache_control.clone());
        }

        let response = self
            .parent
            .request(
                Method::POST,
                &format!("/object/{}/{}", self.bucket_id, path),
            )
            .header("x-upsert", options.upsert.to_string())
            .multipart(form)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// ファイルをダウンロード
    pub async fn download(&self, path: &str) -> Result<Bytes> {
        let response = self
            .parent
            .request(
                Method::GET,
                &format!("/object/authenticated/{}/{}", self.bucket_id, path),
            )
            .send()
            .await?;

        Ok(check(response).await?.bytes().await?)
    }

    /// ファイル一覧を取得
    pub async fn list(&self, prefix: &str, options: ListOptions) -> Result<Vec<FileObject>> {
        let mut payload = serde_json::to_value(&options)?;
        payload["prefix"] = json!(prefix);

        let response = self
            .parent
            .request(Method::POST, &format!("/object/list/{}", self.bucket_id))
            .json(&payload)
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// ファイルを削除
    pub async fn remove(&self, paths: &[&str]) -> Result<Vec<FileObject>> {
        let response = self
            .parent
            .request(Method::DELETE, &format!("/object/{}", self.bucket_id))
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    /// ファイルを移動（リネーム）
    pub async fn move_object(&self, from_path: &str, to_path: &str) -> Result<()> {
        let payload = json!({
            "bucketId": self.bucket_id,
            "sourceKey": from_path,
            "destinationKey": to_path
        });

        let response = self
            .parent
            .request(Method::POST, "/object/move")
            .json(&payload)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// 公開URLを取得
    pub fn get_public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.parent.base_url, self.bucket_id, path
        )
    }

    /// 署名付きURLを作成
    pub async fn create_signed_url(&self, path: &str, expires_in: u64) -> Result<String> {
        #[derive(Deserialize)]
        struct SignedUrlResponse {
            #[serde(rename = "signedURL")]
            signed_url: String,
        }

        let response = self
            .parent
            .request(
                Method::POST,
                &format!("/object/sign/{}/{}", self.bucket_id, path),
            )
            .json(&json!({ "expiresIn": expires_in }))
            .send()
            .await?;

        let signed: SignedUrlResponse = check(response).await?.json().await?;
        Ok(format!("{}/storage/v1{}", self.parent.base_url, signed.signed_url))
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await?;
    Err(StorageError::ApiError { message, status })
}
