//! Supabase PostgREST client for Rust
//!
//! This crate provides database functionality for Supabase,
//! allowing for querying, filtering, and manipulating data in PostgreSQL.
//!
//! # Features
//!
//! - Query API (`select`, `insert`, `upsert`, `update`, `delete`)
//! - Composable filters (`eq`, `gt`, `in`, `and`/`or`/`not`, ...), see [`filter`]
//! - Ordering and pagination
//! - RPC function calls

pub mod encode;
pub mod filter;

use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use url::Url;

pub use encode::FilterValue;
pub use filter::{Filter, FilterError};

/// PostgREST APIエラーの詳細情報
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostgrestApiErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

// エラー詳細を整形して表示するための Display 実装
impl fmt::Display for PostgrestApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// エラー型
#[derive(Error, Debug)]
pub enum PostgrestError {
    #[error("API error: {details} (Status: {status})")]
    ApiError {
        details: PostgrestApiErrorDetails,
        status: reqwest::StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApiError {
        message: String,
        status: reqwest::StatusCode,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Filter error: {0}")]
    FilterError(#[from] FilterError),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// ソート方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// PostgreST クライアント
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    base_url: String,
    table: String,
    http_client: Client,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
    filters: Vec<Filter>,
    is_rpc: bool,
    rpc_params: Option<Value>,
}

impl PostgrestClient {
    /// 新しい PostgreST クライアントを作成
    pub fn new(base_url: &str, api_key: &str, table: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            http_client,
            headers: default_headers(api_key),
            query_params: Vec::new(),
            filters: Vec::new(),
            is_rpc: false,
            rpc_params: None,
        }
    }

    /// RPCリクエストを作成
    pub fn rpc(
        base_url: &str,
        api_key: &str,
        function_name: &str,
        params: Value,
        http_client: Client,
    ) -> Self {
        let mut client = Self::new(base_url, api_key, function_name, http_client);
        client.is_rpc = true;
        client.rpc_params = Some(params);
        client
    }

    /// ヘッダーを追加
    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, PostgrestError> {
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header value: {}", value))
        })?;

        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header name: {}", key))
        })?;

        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// 認証トークンを設定（セッションのアクセストークン、または anon キー）
    pub fn with_auth(self, token: &str) -> Result<Self, PostgrestError> {
        self.with_header("Authorization", &format!("Bearer {}", token))
    }

    /// スキーマを指定（デフォルトのpublicスキーマではない場合）
    pub fn schema(self, schema_name: &str) -> Result<Self, PostgrestError> {
        self.with_header("Accept-Profile", schema_name)?
            .with_header("Content-Profile", schema_name)
    }

    /// 取得するカラムを指定
    pub fn select(mut self, columns: &str) -> Self {
        self.set_param("select", columns);
        self
    }

    /// フィルターを追加
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// 複数のフィルターを追加
    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// 等価フィルター
    pub fn eq(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(filter::equals(column, value))
    }

    /// 非等価フィルター
    pub fn neq(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(filter::not_equals(column, value))
    }

    /// より大きいフィルター
    pub fn gt(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(filter::greater_than(column, value))
    }

    /// 以上フィルター
    pub fn gte(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(filter::greater_than_or_equal(column, value))
    }

    /// より小さいフィルター
    pub fn lt(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(filter::less_than(column, value))
    }

    /// 以下フィルター
    pub fn lte(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(filter::less_than_or_equal(column, value))
    }

    /// LIKE フィルター
    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.filter(filter::like(column, pattern))
    }

    /// ILIKE フィルター（大文字小文字を区別しない）
    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.filter(filter::ilike(column, pattern))
    }

    /// IN フィルター
    pub fn in_list<V: Into<FilterValue>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(filter::in_list(column, values))
    }

    /// IS NULL フィルター
    pub fn is_null(self, column: &str) -> Self {
        self.filter(filter::is_null(column))
    }

    /// NOT フィルター
    pub fn not(self, filter: Filter) -> Self {
        self.filter(filter::not(filter))
    }

    /// ソート順を指定
    pub fn order(mut self, column: &str, order: SortOrder) -> Self {
        self.set_param("order", &format!("{}.{}", column, order.as_str()));
        self
    }

    /// 取得件数を制限
    pub fn limit(mut self, count: u32) -> Self {
        self.set_param("limit", &count.to_string());
        self
    }

    /// オフセットを指定
    pub fn offset(mut self, count: u32) -> Self {
        self.set_param("offset", &count.to_string());
        self
    }

    fn set_param(&mut self, key: &str, value: &str) {
        self.query_params.retain(|(k, _)| k != key);
        self.query_params.push((key.to_string(), value.to_string()));
    }

    /// データを取得
    pub async fn execute<T: for<'de> Deserialize<'de>>(&self) -> Result<Vec<T>, PostgrestError> {
        let response = self
            .send(Method::GET, self.headers.clone(), None::<&Value>)
            .await?;

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// データを挿入
    pub async fn insert<T: Serialize>(&self, values: T) -> Result<Value, PostgrestError> {
        let headers = self.prefer("return=representation");
        let response = self.send(Method::POST, headers, Some(&values)).await?;
        read_body(response).await
    }

    /// データを挿入、または一意制約が衝突した行を更新
    pub async fn upsert<T: Serialize>(
        &self,
        values: T,
        on_conflict: Option<&str>,
    ) -> Result<Value, PostgrestError> {
        let mut client = self.clone();
        if let Some(columns) = on_conflict {
            client.set_param("on_conflict", columns);
        }

        let headers = client.prefer("resolution=merge-duplicates,return=representation");
        let response = client.send(Method::POST, headers, Some(&values)).await?;
        read_body(response).await
    }

    /// データを更新
    pub async fn update<T: Serialize>(&self, values: T) -> Result<Value, PostgrestError> {
        let headers = self.prefer("return=representation");
        let response = self.send(Method::PATCH, headers, Some(&values)).await?;
        read_body(response).await
    }

    /// データを削除
    pub async fn delete(&self) -> Result<Value, PostgrestError> {
        let headers = self.prefer("return=representation");
        let response = self
            .send(Method::DELETE, headers, None::<&Value>)
            .await?;
        read_body(response).await
    }

    /// RPC関数を呼び出す (POSTリクエスト)
    pub async fn call_rpc<T: for<'de> Deserialize<'de>>(&self) -> Result<T, PostgrestError> {
        if !self.is_rpc {
            return Err(PostgrestError::InvalidParameters(
                "Client was not created for RPC. Use PostgrestClient::rpc().".to_string(),
            ));
        }
        let params = self.rpc_params.as_ref().ok_or_else(|| {
            PostgrestError::InvalidParameters("RPC parameters are missing.".to_string())
        })?;

        let response = self
            .send(Method::POST, self.headers.clone(), Some(params))
            .await?;

        response.json::<T>().await.map_err(|e| {
            PostgrestError::DeserializationError(format!(
                "Failed to deserialize RPC response: {}",
                e
            ))
        })
    }

    fn prefer(&self, value: &'static str) -> HeaderMap {
        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static(value),
        );
        headers
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        headers: HeaderMap,
        body: Option<&B>,
    ) -> Result<Response, PostgrestError> {
        let url = self.build_url()?;
        debug!("PostgREST {} {}", method, url);

        let mut request = self
            .http_client
            .request(method, url.as_str())
            .headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            debug!("PostgREST request failed with status {}", status);

            return Err(
                match serde_json::from_str::<PostgrestApiErrorDetails>(&error_text) {
                    Ok(details) => PostgrestError::ApiError { details, status },
                    Err(_) => PostgrestError::UnparsedApiError {
                        message: error_text,
                        status,
                    },
                },
            );
        }

        Ok(response)
    }

    /// URLを構築
    ///
    /// フィルターは既にエンコード済みのため、`query_pairs_mut` を使わずにクエリ文字列を組み立てる。
    pub fn build_url(&self) -> Result<Url, PostgrestError> {
        let path = if self.is_rpc {
            format!("{}/rest/v1/rpc/{}", self.base_url, self.table)
        } else {
            format!("{}/rest/v1/{}", self.base_url, self.table)
        };
        let mut url = Url::parse(&path)?;

        let mut parts: Vec<String> = self
            .query_params
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )
            })
            .collect();

        let clauses = filter::to_query_string(&self.filters)?;
        if !clauses.is_empty() {
            parts.push(clauses);
        }

        if !parts.is_empty() {
            url.set_query(Some(&parts.join("&")));
        }

        Ok(url)
    }
}

fn default_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(api_key) {
        headers.insert("apikey", value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", api_key)) {
        headers.insert("Authorization", value);
    }
    headers.insert("Content-Type", HeaderValue::from_static("application/json"));
    headers
}

// 空のレスポンス（204 No Content など）は Null として扱う
async fn read_body(response: Response) -> Result<Value, PostgrestError> {
    let body_text = response.text().await.map_err(|e| {
        PostgrestError::DeserializationError(format!("Failed to read response body: {}", e))
    })?;

    if body_text.trim().is_empty() {
        Ok(Value::Null)
    } else {
        serde_json::from_str::<Value>(&body_text)
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{and, equals, greater_than, less_than, or, raw};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str, table: &str) -> PostgrestClient {
        PostgrestClient::new(uri, "fake-key", table, reqwest::Client::new())
    }

    #[test]
    fn test_build_url_orders_params_before_filters() {
        let url = client("http://localhost:54321", "items")
            .select("id,name")
            .eq("id", 1)
            .order("name", SortOrder::Descending)
            .limit(5)
            .build_url()
            .unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:54321/rest/v1/items?select=id%2Cname&order=name.desc&limit=5&id=eq.1"
        );
    }

    #[test]
    fn test_build_url_replaces_repeated_params() {
        let url = client("http://localhost:54321/", "items")
            .limit(5)
            .limit(10)
            .build_url()
            .unwrap();

        assert_eq!(url.as_str(), "http://localhost:54321/rest/v1/items?limit=10");
    }

    #[test]
    fn test_build_url_with_logical_filter() {
        let group = or(vec![equals("status", "active"), greater_than("score", 10)]).unwrap();
        let url = client("http://localhost:54321", "items")
            .filter(group)
            .build_url()
            .unwrap();

        assert_eq!(url.query(), Some("or=(status.eq.active,score.gt.10)"));
    }

    #[test]
    fn test_build_url_surfaces_composition_errors() {
        let result = client("http://localhost:54321", "items")
            .not(raw("a=eq.1"))
            .build_url();

        assert!(matches!(
            result,
            Err(PostgrestError::FilterError(FilterError::RawComposition))
        ));
    }

    #[tokio::test]
    async fn test_select() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .and(query_param("select", "*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 1, "name": "Test Item 1" },
                { "id": 2, "name": "Test Item 2" }
            ])))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server.uri(), "items")
            .select("*")
            .execute::<Value>()
            .await;

        assert!(result.is_ok(), "Select failed: {:?}", result.err());
        let data = result.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(
            data.first()
                .and_then(|v: &Value| v.get("name"))
                .and_then(Value::as_str),
            Some("Test Item 1")
        );
    }

    #[tokio::test]
    async fn test_select_with_filters() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .and(query_param("and", "(value.gt.5,value.lt.7)"))
            .and(query_param("status", "in.(active,pending)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 6 }])))
            .mount(&mock_server)
            .await;

        let range = and(vec![greater_than("value", 5), less_than("value", 7)]).unwrap();
        let result = client(&mock_server.uri(), "items")
            .filter(range)
            .in_list("status", ["active", "pending"])
            .execute::<Value>()
            .await;

        assert!(result.is_ok(), "Filtered select failed: {:?}", result.err());
        assert_eq!(result.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rpc() {
        let mock_server = MockServer::start().await;

        let rpc_params = json!({ "arg1": "value1", "arg2": 123 });
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/my_rpc_function"))
            .and(body_json(&rpc_params))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": "success",
                "data": 456
            })))
            .mount(&mock_server)
            .await;

        let client = PostgrestClient::rpc(
            &mock_server.uri(),
            "fake-key",
            "my_rpc_function",
            rpc_params.clone(),
            reqwest::Client::new(),
        );

        #[derive(Deserialize, Debug, PartialEq)]
        struct RpcResponse {
            result: String,
            data: i32,
        }

        let result = client.call_rpc::<RpcResponse>().await;
        assert_eq!(
            result.unwrap(),
            RpcResponse {
                result: "success".to_string(),
                data: 456
            }
        );
    }

    #[tokio::test]
    async fn test_call_rpc_on_table_client_fails() {
        let result = client("http://localhost:54321", "items")
            .call_rpc::<Value>()
            .await;
        assert!(matches!(result, Err(PostgrestError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn test_insert() {
        let mock_server = MockServer::start().await;

        let insert_data = json!({ "name": "New Item", "value": 10 });
        let expected_response = json!([{ "id": 3, "name": "New Item", "value": 10 }]);

        Mock::given(method("POST"))
            .and(path("/rest/v1/items"))
            .and(header("apikey", "fake-key"))
            .and(header("content-type", "application/json"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(&insert_data))
            .respond_with(ResponseTemplate::new(201).set_body_json(&expected_response))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server.uri(), "items").insert(&insert_data).await;
        assert_eq!(result.unwrap(), expected_response);
    }

    #[tokio::test]
    async fn test_upsert() {
        let mock_server = MockServer::start().await;

        let upsert_data = json!({ "email": "a@example.com", "name": "A" });
        let expected_response = json!([{ "id": 1, "email": "a@example.com", "name": "A" }]);

        Mock::given(method("POST"))
            .and(path("/rest/v1/users"))
            .and(query_param("on_conflict", "email"))
            .and(header(
                "Prefer",
                "resolution=merge-duplicates,return=representation",
            ))
            .and(body_json(&upsert_data))
            .respond_with(ResponseTemplate::new(201).set_body_json(&expected_response))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server.uri(), "users")
            .upsert(&upsert_data, Some("email"))
            .await;
        assert_eq!(result.unwrap(), expected_response);
    }

    #[tokio::test]
    async fn test_update() {
        let mock_server = MockServer::start().await;

        let update_data = json!({ "value": 20 });
        let expected_response = json!([{ "id": 1, "name": "Updated Item", "value": 20 }]);

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/items"))
            .and(query_param("id", "eq.1"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(&update_data))
            .respond_with(ResponseTemplate::new(200).set_body_json(&expected_response))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server.uri(), "items")
            .eq("id", 1)
            .update(&update_data)
            .await;
        assert_eq!(result.unwrap(), expected_response);
    }

    #[tokio::test]
    async fn test_delete_with_empty_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/rest/v1/items"))
            .and(query_param("status", "not.eq.archived"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server.uri(), "items")
            .not(equals("status", "archived"))
            .delete()
            .await;
        assert_eq!(result.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_schema_and_auth_headers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/items"))
            .and(header("Accept-Profile", "private"))
            .and(header("Authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server.uri(), "items")
            .schema("private")
            .unwrap()
            .with_auth("user-token")
            .unwrap()
            .execute::<Value>()
            .await;
        assert!(result.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_handling() {
        let mock_server = MockServer::start().await;

        let insert_bad_data = json!({ "value": 10 });
        Mock::given(method("POST"))
            .and(path("/rest/v1/items"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "23502",
                "message": "null value in column \"name\" violates not-null constraint",
                "details": null,
                "hint": null
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/server_error"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        match client(&mock_server.uri(), "items")
            .insert(&insert_bad_data)
            .await
        {
            Err(PostgrestError::ApiError { details, status }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert_eq!(details.code, Some("23502".to_string()));
            }
            other => panic!("Expected ApiError for 400, got {:?}", other),
        }

        match client(&mock_server.uri(), "server_error")
            .select("*")
            .execute::<Value>()
            .await
        {
            Err(PostgrestError::UnparsedApiError { message, status }) => {
                assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(message, "Internal Server Error");
            }
            other => panic!("Expected UnparsedApiError for 500, got {:?}", other),
        }
    }
}
