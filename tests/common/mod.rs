use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use backoffice::auth::jwt::JwtService;
use backoffice::auth::password::hash_password;
use backoffice::config::AppConfig;
use backoffice::db::{self, PgPool};
use backoffice::intelligence::{AnalyzerError, DocumentAnalyzer, DocumentModel};
use backoffice::models::{Expense, NewCompany, NewProfile, Notification, Receipt};
use backoffice::routes;
use backoffice::schema::{
    companies, expense_line_items, expenses, notifications, profiles, receipts,
};
use backoffice::state::AppState;
use backoffice::storage::{Buckets, ObjectStorage};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const PASSWORD: &str = "correct horse battery";

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

pub struct FakeStorage {
    bucket: String,
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl FakeStorage {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        self.objects.lock().await.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{}/{key}?expires_in={}",
            self.bucket,
            expires_in.as_secs()
        ))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://fake-storage/{}/{key}", self.bucket)
    }
}

/// Returns a fixed payload per model instead of calling the OCR service.
#[derive(Default)]
pub struct CannedAnalyzer {
    payloads: std::sync::Mutex<HashMap<&'static str, Value>>,
}

impl CannedAnalyzer {
    #[allow(dead_code)]
    pub fn respond_with(&self, model: DocumentModel, payload: Value) {
        if let Ok(mut guard) = self.payloads.lock() {
            guard.insert(model.as_str(), payload);
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for CannedAnalyzer {
    async fn analyze(
        &self,
        model: DocumentModel,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<Value, AnalyzerError> {
        let guard = self
            .payloads
            .lock()
            .map_err(|err| AnalyzerError::Decode(err.to_string()))?;
        Ok(guard.get(model.as_str()).cloned().unwrap_or_else(|| json!({})))
    }
}

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: 4,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        refresh_token_expiry_days: 30,
        refresh_cookie_secure: false,
        refresh_cookie_domain: None,
        cors_allowed_origin: None,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        receipts_bucket: "expense-receipts".to_string(),
        avatars_bucket: "avatars".to_string(),
        storage_public_base_url: None,
        document_intelligence_endpoint: Some("http://fake-intelligence".to_string()),
        document_intelligence_key: None,
        user_api_url: "http://localhost:3001/api".to_string(),
        invitation_expiry_days: 7,
        assignment_default_due_days: 7,
        expense_cache_ttl_seconds: 30,
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    receipts: Arc<FakeStorage>,
    avatars: Arc<FakeStorage>,
    analyzer: Arc<CannedAnalyzer>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = test_config(database_url);
        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let receipts = Arc::new(FakeStorage::new(&config.receipts_bucket));
        let avatars = Arc::new(FakeStorage::new(&config.avatars_bucket));
        let buckets = Buckets {
            receipts: receipts.clone(),
            avatars: avatars.clone(),
        };
        let analyzer = Arc::new(CannedAnalyzer::default());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, buckets, jwt, analyzer.clone());
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            receipts,
            avatars,
            analyzer,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub fn receipts(&self) -> Arc<FakeStorage> {
        self.receipts.clone()
    }

    #[allow(dead_code)]
    pub fn avatars(&self) -> Arc<FakeStorage> {
        self.avatars.clone()
    }

    #[allow(dead_code)]
    pub fn analyzer(&self) -> Arc<CannedAnalyzer> {
        self.analyzer.clone()
    }

    pub async fn insert_company(&self, name: &str) -> Result<Uuid> {
        let company = NewCompany {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(companies::table)
                .values(&company)
                .execute(conn)
                .context("failed to insert company")?;
            Ok(company.id)
        })
        .await
    }

    pub async fn insert_profile(&self, company_id: Uuid, email: &str, role: &str) -> Result<Uuid> {
        let profile = NewProfile {
            id: Uuid::new_v4(),
            company_id,
            email: email.to_string(),
            full_name: email.split('@').next().unwrap_or(email).to_string(),
            password_hash: Some(hash_password(PASSWORD)?),
            role: role.to_string(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(profiles::table)
                .values(&profile)
                .execute(conn)
                .context("failed to insert profile")?;
            Ok(profile.id)
        })
        .await
    }

    pub async fn login_token(&self, email: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/auth/login",
                &json!({ "email": email, "password": PASSWORD }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        let body: Value = json_body(response).await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response without access_token"))
    }

    #[allow(dead_code)]
    pub async fn expense(&self, expense_id: Uuid) -> Result<Expense> {
        self.with_conn(move |conn| {
            expenses::table
                .find(expense_id)
                .first(conn)
                .context("failed to load expense")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn receipt(&self, receipt_id: Uuid) -> Result<Receipt> {
        self.with_conn(move |conn| {
            receipts::table
                .find(receipt_id)
                .first(conn)
                .context("failed to load receipt")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn line_item_count(&self, expense_id: Uuid) -> Result<i64> {
        self.with_conn(move |conn| {
            expense_line_items::table
                .filter(expense_line_items::expense_id.eq(expense_id))
                .count()
                .get_result(conn)
                .context("failed to count line items")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn notifications_for(&self, recipient_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(move |conn| {
            notifications::table
                .filter(notifications::recipient_id.eq(recipient_id))
                .load(conn)
                .context("failed to load notifications")
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, None, Body::empty(), token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path, None, Body::empty(), token).await
    }

    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        path: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        self.send(
            Method::POST,
            path,
            Some(format!("multipart/form-data; boundary={boundary}")),
            Body::from(body),
            Some(token),
        )
        .await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        self.send(
            method,
            path,
            Some("application/json".to_string()),
            Body::from(body),
            token,
        )
        .await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        content_type: Option<String>,
        body: Body,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(body)?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).with_context(|| {
        format!(
            "unexpected response body: {}",
            String::from_utf8_lossy(&bytes)
        )
    })
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(db::MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute("TRUNCATE TABLE jobs, companies RESTART IDENTITY CASCADE;")
        .context("failed to truncate tables")?;
    Ok(())
}
