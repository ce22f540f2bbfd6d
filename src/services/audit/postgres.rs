/*
 * Responsibility
 * - login_logs / operation_logs 向け SQLx 操作
 * - PgPool を受け取り insert だけを提供 (audit は追記のみ)
 */
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::services::audit::{AuditError, AuditStore, LoginRecord, OperationRecord};

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS login_logs (
        id           UUID PRIMARY KEY,
        access_level BIGINT NOT NULL,
        merchant_id  TEXT NOT NULL,
        account_id   TEXT NOT NULL,
        user_id      TEXT NOT NULL,
        user_name    TEXT NOT NULL,
        login_type   TEXT NOT NULL,
        sign_in_name TEXT NOT NULL,
        client_ip    TEXT NOT NULL,
        remote_ip    TEXT NOT NULL,
        full_path    TEXT NOT NULL,
        resp_code    INTEGER NOT NULL,
        request_id   TEXT NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL,
        updated_at   TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS operation_logs (
        id         UUID PRIMARY KEY,
        phase      TEXT NOT NULL,
        method     TEXT NOT NULL,
        full_path  TEXT NOT NULL,
        target_id  TEXT NOT NULL,
        operator   TEXT NOT NULL,
        account_id TEXT NOT NULL,
        namespace  TEXT NOT NULL,
        client_ip  TEXT NOT NULL,
        remote_ip  TEXT NOT NULL,
        status     INTEGER,
        request_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

#[derive(Clone, Debug)]
pub struct PgAuditStore {
    db: PgPool,
}

impl PgAuditStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn connect(database_url: &str) -> Result<Self, AuditError> {
        let db = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(db))
    }

    pub async fn ensure_schema(&self) -> Result<(), AuditError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn create_login(&self, record: &LoginRecord) -> Result<String, AuditError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO login_logs (
                id, access_level, merchant_id, account_id, user_id, user_name,
                login_type, sign_in_name, client_ip, remote_ip, full_path,
                resp_code, request_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(i64::from(record.access_level))
        .bind(&record.merchant_id)
        .bind(&record.account_id)
        .bind(&record.user_id)
        .bind(&record.user_name)
        .bind(&record.login_type)
        .bind(&record.sign_in_name)
        .bind(&record.client_ip)
        .bind(&record.remote_ip)
        .bind(&record.full_path)
        .bind(i32::from(record.resp_code))
        .bind(&record.request_id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.db)
        .await?;

        Ok(id.to_string())
    }

    async fn create_operation(&self, record: &OperationRecord) -> Result<String, AuditError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO operation_logs (
                id, phase, method, full_path, target_id, operator, account_id,
                namespace, client_ip, remote_ip, status, request_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(record.phase.as_str())
        .bind(&record.method)
        .bind(&record.full_path)
        .bind(&record.target_id)
        .bind(&record.operator)
        .bind(&record.account_id)
        .bind(&record.namespace)
        .bind(&record.client_ip)
        .bind(&record.remote_ip)
        .bind(record.status.map(i32::from))
        .bind(&record.request_id)
        .bind(record.timestamp)
        .fetch_one(&self.db)
        .await?;

        Ok(id.to_string())
    }
}
