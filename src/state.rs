use std::{sync::Arc, time::Duration};

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    expenses::{ExpenseListCache, PgExpenseGateway, ReviewService},
    intelligence::DocumentAnalyzer,
    storage::Buckets,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub buckets: Buckets,
    pub jwt: JwtService,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub review: ReviewService,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        buckets: Buckets,
        jwt: JwtService,
        analyzer: Arc<dyn DocumentAnalyzer>,
    ) -> Self {
        let cache = ExpenseListCache::new(Duration::from_secs(config.expense_cache_ttl_seconds));
        let gateway = Arc::new(PgExpenseGateway::new(pool.clone()));
        Self {
            pool,
            config: Arc::new(config),
            buckets,
            jwt,
            analyzer,
            review: ReviewService::new(gateway, cache),
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    pub fn cache(&self) -> &ExpenseListCache {
        self.review.cache()
    }
}
