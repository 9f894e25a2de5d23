//! # PostgreSQL Request Store
//!
//! `RequestRepository` over a `dispatch_requests` table. Filters are built
//! with `QueryBuilder` so that one search description drives both the select
//! and the count query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, instrument};

use super::{RequestChangeset, RequestRepository};
use crate::config::DatabaseConfig;
use crate::error::{DispatchError, Result};
use crate::models::{Page, PageRequest, Request, RequestSearchParameters};
use crate::state_machine::RequestStatus;

const RETURNED_COLUMNS: &str = "id, request_id, content_type, source, session, status, \
     step_number, step_worker_type, dispatched_worker_type, content, error, \
     additional_headers, creation_date";

const SELECT_REQUESTS: &str = "SELECT id, request_id, content_type, source, session, status, \
     step_number, step_worker_type, dispatched_worker_type, content, error, \
     additional_headers, creation_date FROM dispatch_requests";

#[derive(Debug, FromRow)]
struct RequestRow {
    id: i64,
    request_id: String,
    content_type: String,
    source: String,
    session: String,
    status: String,
    step_number: Option<i32>,
    step_worker_type: Option<String>,
    dispatched_worker_type: Option<String>,
    content: Vec<u8>,
    error: Option<String>,
    additional_headers: Json<BTreeMap<String, String>>,
    creation_date: DateTime<Utc>,
}

impl TryFrom<RequestRow> for Request {
    type Error = DispatchError;

    fn try_from(row: RequestRow) -> Result<Self> {
        let status = row.status.parse::<RequestStatus>().map_err(|e| {
            DispatchError::DatabaseError(format!("request {}: {e}", row.request_id))
        })?;
        Ok(Request {
            id: Some(row.id),
            request_id: row.request_id,
            content_type: row.content_type,
            source: row.source,
            session: row.session,
            status,
            step_number: row.step_number,
            step_worker_type: row.step_worker_type,
            dispatched_worker_type: row.dispatched_worker_type,
            content: row.content,
            error: row.error,
            additional_headers: row.additional_headers.0,
            creation_date: row.creation_date,
        })
    }
}

fn into_requests(rows: Vec<RequestRow>) -> Result<Vec<Request>> {
    rows.into_iter().map(Request::try_from).collect()
}

/// Appends `WHERE ... AND ...` clauses for a search description
struct RequestFilterScope<'q> {
    query: QueryBuilder<'q, Postgres>,
    has_conditions: bool,
}

impl<'q> RequestFilterScope<'q> {
    fn new(base: &str) -> Self {
        Self {
            query: QueryBuilder::new(base),
            has_conditions: false,
        }
    }

    fn add_condition(&mut self, condition: &str) {
        if self.has_conditions {
            self.query.push(" AND ");
        } else {
            self.query.push(" WHERE ");
            self.has_conditions = true;
        }
        self.query.push(condition);
    }

    fn apply(mut self, params: &RequestSearchParameters) -> QueryBuilder<'q, Postgres> {
        if !params.statuses.is_empty() {
            let statuses: Vec<String> = params.statuses.iter().map(|s| s.to_string()).collect();
            self.add_condition("status = ANY(");
            self.query.push_bind(statuses).push(")");
        }
        if !params.content_types.is_empty() {
            self.add_condition("content_type = ANY(");
            self.query.push_bind(params.content_types.clone()).push(")");
        }
        if let Some(source) = &params.source {
            self.add_condition("source = ");
            self.query.push_bind(source.clone());
        }
        if let Some(session) = &params.session {
            self.add_condition("session = ");
            self.query.push_bind(session.clone());
        }
        if let Some(worker_type) = &params.dispatched_worker_type {
            self.add_condition("dispatched_worker_type = ");
            self.query.push_bind(worker_type.clone());
        }
        if let Some(after) = params.creation_date.after {
            self.add_condition("creation_date >= ");
            self.query.push_bind(after);
        }
        if let Some(before) = params.creation_date.before {
            self.add_condition("creation_date <= ");
            self.query.push_bind(before);
        }
        if !params.ids.is_empty() {
            self.add_condition("id = ANY(");
            self.query.push_bind(params.ids.clone()).push(")");
        }
        self.query
    }
}

#[derive(Debug, Clone)]
pub struct PgRequestRepository {
    pool: PgPool,
}

impl PgRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration and apply pending migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            DispatchError::ConfigurationError("database.url is not set".to_string())
        })?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;
        let repository = Self::new(pool);
        repository.migrate().await?;
        Ok(repository)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DispatchError::DatabaseError(format!("migration failed: {e}")))?;
        info!("Request store schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RequestRepository for PgRequestRepository {
    async fn existing_request_ids(&self, request_ids: &[String]) -> Result<HashSet<String>> {
        if request_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let found: Vec<String> = sqlx::query_scalar(
            "SELECT request_id FROM dispatch_requests WHERE request_id = ANY($1)",
        )
        .bind(request_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(found.into_iter().collect())
    }

    async fn find_by_request_ids(&self, request_ids: &[String]) -> Result<Vec<Request>> {
        if request_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<RequestRow> =
            sqlx::query_as(&format!("{SELECT_REQUESTS} WHERE request_id = ANY($1) ORDER BY id"))
                .bind(request_ids)
                .fetch_all(&self.pool)
                .await?;
        into_requests(rows)
    }

    async fn find_one_by_request_id(&self, request_id: &str) -> Result<Option<Request>> {
        let row: Option<RequestRow> =
            sqlx::query_as(&format!("{SELECT_REQUESTS} WHERE request_id = $1"))
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Request::try_from).transpose()
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Request>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<RequestRow> =
            sqlx::query_as(&format!("{SELECT_REQUESTS} WHERE id = ANY($1) ORDER BY id"))
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
        into_requests(rows)
    }

    #[instrument(skip(self, changes), fields(upserts = changes.upserts.len(), deletes = changes.deletes.len()))]
    async fn commit(&self, changes: RequestChangeset) -> Result<Vec<Request>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await?;
        let mut saved = Vec::with_capacity(changes.upserts.len());

        for request in &changes.upserts {
            let row: Option<RequestRow> = match request.id {
                Some(id) => {
                    sqlx::query_as(&format!(
                        "UPDATE dispatch_requests SET status = $2, step_number = $3, \
                         step_worker_type = $4, dispatched_worker_type = $5, content = $6, \
                         error = $7, additional_headers = $8 WHERE id = $1 RETURNING {RETURNED_COLUMNS}"
                    ))
                    .bind(id)
                    .bind(request.status.to_string())
                    .bind(request.step_number)
                    .bind(&request.step_worker_type)
                    .bind(&request.dispatched_worker_type)
                    .bind(&request.content)
                    .bind(&request.error)
                    .bind(Json(&request.additional_headers))
                    .fetch_optional(&mut *tx)
                    .await?
                }
                None => {
                    sqlx::query_as(&format!(
                        "INSERT INTO dispatch_requests (request_id, content_type, source, session, \
                         status, step_number, step_worker_type, dispatched_worker_type, content, \
                         error, additional_headers, creation_date) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                         ON CONFLICT (request_id) DO NOTHING RETURNING {RETURNED_COLUMNS}"
                    ))
                    .bind(&request.request_id)
                    .bind(&request.content_type)
                    .bind(&request.source)
                    .bind(&request.session)
                    .bind(request.status.to_string())
                    .bind(request.step_number)
                    .bind(&request.step_worker_type)
                    .bind(&request.dispatched_worker_type)
                    .bind(&request.content)
                    .bind(&request.error)
                    .bind(Json(&request.additional_headers))
                    .bind(request.creation_date)
                    .fetch_optional(&mut *tx)
                    .await?
                }
            };
            match row {
                Some(row) => saved.push(Request::try_from(row)?),
                None => debug!(
                    request_id = %request.request_id,
                    update = request.id.is_some(),
                    "Request written by another batch first, skipped"
                ),
            }
        }

        if !changes.deletes.is_empty() {
            sqlx::query("DELETE FROM dispatch_requests WHERE request_id = ANY($1)")
                .bind(changes.deletes.as_slice())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(saved = saved.len(), "Committed request changeset");
        Ok(saved)
    }

    async fn search(
        &self,
        params: &RequestSearchParameters,
        page: PageRequest,
    ) -> Result<Page<Request>> {
        let total_elements = self.count(params).await?;

        let mut query = RequestFilterScope::new(SELECT_REQUESTS).apply(params);
        query
            .push(" ORDER BY id LIMIT ")
            .push_bind(page.size as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
        let rows: Vec<RequestRow> = query.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            content: into_requests(rows)?,
            page,
            total_elements,
        })
    }

    async fn count(&self, params: &RequestSearchParameters) -> Result<u64> {
        let mut query =
            RequestFilterScope::new("SELECT COUNT(*) FROM dispatch_requests").apply(params);
        let count: i64 = query.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}
