use serde_json::{json, Value};
use std::sync::Arc;
use supabase_rust::auth::{CredentialStore, MemoryCredentialStore};
use supabase_rust::config::ClientOptions;
use supabase_rust::postgrest::filter::{and, greater_than, ilike, or};
use supabase_rust::postgrest::FilterError;
use supabase_rust::prelude::*;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_body(access_token: &str, expires_in: i64) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": expires_in,
        "refresh_token": "refresh",
        "user": { "id": "user-1", "email": "test@example.com" }
    })
}

async fn mount_sign_in_expiring(mock_server: &MockServer, access_token: &str, expires_in: i64) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(session_body(access_token, expires_in)),
        )
        .mount(mock_server)
        .await;
}

async fn mount_sign_in(mock_server: &MockServer, access_token: &str) {
    mount_sign_in_expiring(mock_server, access_token, 3600).await;
}

#[tokio::test]
async fn test_queries_use_anon_key_until_sign_in() {
    let mock_server = MockServer::start().await;
    mount_sign_in(&mock_server, "user-token").await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .and(header("Authorization", "Bearer anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .and(header("Authorization", "Bearer user-token"))
        .and(query_param("or", "(title.ilike.*rust*,and(priority.gt.2))"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "title": "learn rust" }
        ])))
        .mount(&mock_server)
        .await;

    let supabase = Supabase::new(&mock_server.uri(), "anon-key");

    let anonymous: Vec<Value> = supabase.from("tasks").await.unwrap().execute().await.unwrap();
    assert!(anonymous.is_empty());

    supabase
        .auth()
        .sign_in_with_password("test@example.com", "password123")
        .await
        .unwrap();

    let filter = or(vec![
        ilike("title", "*rust*"),
        and(vec![greater_than("priority", 2)]).unwrap(),
    ])
    .unwrap();
    let tasks: Vec<Value> = supabase
        .from("tasks")
        .await
        .unwrap()
        .filter(filter)
        .execute()
        .await
        .unwrap();
    assert_eq!(tasks[0]["title"], "learn rust");
}

#[tokio::test]
async fn test_rpc_with_custom_schema_and_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/add"))
        .and(header("Content-Profile", "private"))
        .and(header("x-client-info", "supabase-rust"))
        .and(body_json(json!({ "a": 1, "b": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(3)))
        .mount(&mock_server)
        .await;

    let options = ClientOptions::default()
        .with_db_schema("private")
        .with_header("x-client-info", "supabase-rust");
    let supabase = Supabase::new_with_options(&mock_server.uri(), "anon-key", options);

    let sum: i64 = supabase
        .rpc("add", json!({ "a": 1, "b": 2 }))
        .await
        .unwrap()
        .call_rpc()
        .await
        .unwrap();
    assert_eq!(sum, 3);
}

#[tokio::test]
async fn test_storage_uses_session_token() {
    let mock_server = MockServer::start().await;
    mount_sign_in(&mock_server, "user-token").await;

    Mock::given(method("GET"))
        .and(path("/storage/v1/bucket"))
        .and(header("apikey", "anon-key"))
        .and(header("Authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "avatars", "name": "avatars", "public": false }
        ])))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let supabase =
        Supabase::new(&mock_server.uri(), "anon-key").with_credential_store(store.clone());
    supabase
        .auth()
        .sign_in_with_password("test@example.com", "password123")
        .await
        .unwrap();

    let buckets = supabase.storage().await.unwrap().list_buckets().await.unwrap();
    assert_eq!(buckets[0].id, "avatars");
    assert!(store.has_auth());
}

#[tokio::test]
async fn test_errors_convert_into_unified_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "42P01",
            "message": "relation \"missing\" does not exist"
        })))
        .mount(&mock_server)
        .await;

    let supabase = Supabase::new(&mock_server.uri(), "anon-key");

    async fn load(supabase: &Supabase) -> Result<Vec<Value>, Error> {
        Ok(supabase.from("missing").await?.execute().await?)
    }
    assert!(matches!(load(&supabase).await, Err(Error::Database(_))));

    fn empty_group() -> Result<Filter, Error> {
        Ok(or(vec![])?)
    }
    assert!(matches!(
        empty_group(),
        Err(Error::Filter(FilterError::EmptyGroup(_)))
    ));
}

#[tokio::test]
async fn test_expiring_session_is_refreshed_before_query() {
    let mock_server = MockServer::start().await;
    mount_sign_in_expiring(&mock_server, "old-token", 10).await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(body_json(json!({ "refresh_token": "refresh" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("new-token", 3600)))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .and(header("Authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/storage/v1/bucket"))
        .and(header("Authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let supabase = Supabase::new(&mock_server.uri(), "anon-key");
    supabase
        .auth()
        .sign_in_with_password("test@example.com", "password123")
        .await
        .unwrap();

    let tasks: Vec<Value> = supabase
        .from("tasks")
        .await
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);

    // 新しいトークンは期限に余裕があるので二度目はリフレッシュしない
    let buckets = supabase.storage().await.unwrap().list_buckets().await.unwrap();
    assert!(buckets.is_empty());
}

#[tokio::test]
async fn test_auto_refresh_can_be_disabled() {
    let mock_server = MockServer::start().await;
    mount_sign_in_expiring(&mock_server, "old-token", 10).await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("new-token", 3600)))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/tasks"))
        .and(header("Authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let options = ClientOptions::default().with_auto_refresh_token(false);
    let supabase = Supabase::new_with_options(&mock_server.uri(), "anon-key", options);
    supabase
        .auth()
        .sign_in_with_password("test@example.com", "password123")
        .await
        .unwrap();

    let tasks: Vec<Value> = supabase
        .from("tasks")
        .await
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert!(tasks.is_empty());
}
