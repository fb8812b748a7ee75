use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, types::Json};
use tracing::debug;
use uuid::Uuid;

use super::{JobStore, JobUpdate, ReportStore, report_from_job};
use crate::error::{Result, ScanError};
use crate::types::{
    JobId, LeaseId, LogEntry, QueuedJob, Report, ReportCreation, ReportId,
    ScanJob, ScanOutcome, TenantId,
};

const JOB_COLUMNS: &str = r#"
    id,
    tenant_id,
    domain,
    status,
    progress,
    findings,
    breach_alerts,
    scanned_urls,
    outcome,
    lease_id,
    created_at,
    updated_at
"#;

/// Postgres-backed [`JobStore`] and [`ReportStore`].
///
/// Guarded updates lock the job row (`SELECT ... FOR UPDATE`) for the length
/// of one transaction, so the claim and every executor write serialize on the
/// row itself.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await.map_err(|err| {
            ScanError::storage(format!("failed to apply migrations: {err}"))
        })
    }
}

impl fmt::Debug for PostgresJobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresJobStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

#[derive(Debug, FromRow)]
struct ScanJobRow {
    id: Uuid,
    tenant_id: Uuid,
    domain: String,
    status: String,
    progress: i16,
    findings: Json<Vec<String>>,
    breach_alerts: Json<Vec<String>>,
    scanned_urls: Json<Vec<String>>,
    outcome: Option<Json<ScanOutcome>>,
    lease_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ScanJobRow {
    fn into_job(self, log: Vec<LogEntry>) -> Result<ScanJob> {
        let status = self.status.parse().map_err(ScanError::Storage)?;
        let progress = u8::try_from(self.progress).map_err(|_| {
            ScanError::storage(format!(
                "progress {} out of range for job {}",
                self.progress, self.id
            ))
        })?;

        Ok(ScanJob {
            id: JobId(self.id),
            tenant_id: TenantId(self.tenant_id),
            domain: self.domain,
            status,
            progress,
            log,
            findings: self.findings.0,
            breach_alerts: self.breach_alerts.0,
            scanned_urls: self.scanned_urls.0,
            outcome: self.outcome.map(|json| json.0),
            lease_id: self.lease_id.map(LeaseId),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LogRow {
    job_id: Uuid,
    recorded_at: DateTime<Utc>,
    message: String,
}

#[derive(Debug, FromRow)]
struct ReportRow {
    id: Uuid,
    job_id: Uuid,
    tenant_id: Uuid,
    domain: String,
    grade: String,
    risk_score: f64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct UpsertedReportRow {
    #[sqlx(flatten)]
    report: ReportRow,
    inserted: bool,
}

impl ReportRow {
    fn into_report(self) -> Result<Report> {
        Ok(Report {
            id: ReportId(self.id),
            job_id: JobId(self.job_id),
            tenant_id: TenantId(self.tenant_id),
            domain: self.domain,
            grade: self.grade.parse().map_err(ScanError::Storage)?,
            risk_score: self.risk_score,
            created_at: self.created_at,
        })
    }
}

async fn load_log(conn: &mut PgConnection, job_id: Uuid) -> Result<Vec<LogEntry>> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT job_id, recorded_at, message
        FROM scan_job_log
        WHERE job_id = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| {
        ScanError::storage(format!("failed to load scan log: {err}"))
    })?;

    Ok(rows
        .into_iter()
        .map(|row| LogEntry {
            at: row.recorded_at,
            message: row.message,
        })
        .collect())
}

async fn append_log(
    conn: &mut PgConnection,
    job_id: Uuid,
    first_seq: usize,
    entries: &[LogEntry],
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let seqs: Vec<i32> = (first_seq..first_seq + entries.len())
        .map(|seq| seq as i32)
        .collect();
    let recorded: Vec<DateTime<Utc>> =
        entries.iter().map(|entry| entry.at).collect();
    let messages: Vec<String> =
        entries.iter().map(|entry| entry.message.clone()).collect();

    sqlx::query(
        r#"
        INSERT INTO scan_job_log (job_id, seq, recorded_at, message)
        SELECT $1, seq, recorded_at, message
        FROM UNNEST($2::int4[], $3::timestamptz[], $4::text[])
            AS entry(seq, recorded_at, message)
        "#,
    )
    .bind(job_id)
    .bind(seqs)
    .bind(recorded)
    .bind(messages)
    .execute(&mut *conn)
    .await
    .map_err(|err| {
        ScanError::storage(format!("failed to append scan log: {err}"))
    })?;

    Ok(())
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(
        &self,
        tenant_id: TenantId,
        domain: &str,
    ) -> Result<ScanJob> {
        let job = ScanJob::new(tenant_id, domain);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO scan_jobs (
                id, tenant_id, domain, status, progress, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id.0)
        .bind(job.tenant_id.0)
        .bind(&job.domain)
        .bind(job.status.as_str())
        .bind(i16::from(job.progress))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            ScanError::storage(format!("failed to insert scan job: {err}"))
        })?;
        append_log(&mut tx, job.id.0, 0, &job.log).await?;

        tx.commit().await?;
        debug!(job_id = %job.id, tenant_id = %tenant_id, "scan job created");
        Ok(job)
    }

    async fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<ScanJob> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, ScanJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(job_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ScanError::NotFound(job_id))?;

        let log = load_log(&mut conn, job_id.0).await?;
        row.into_job(log)
    }

    async fn update(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
        update: JobUpdate,
    ) -> Result<ScanJob> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ScanJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
        ))
        .bind(job_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ScanError::NotFound(job_id))?;

        let log = load_log(&mut tx, job_id.0).await?;
        let mut job = row.into_job(log)?;
        let log_len_before = job.log.len();

        // A rejected guard returns here and the transaction rolls back on drop.
        update.apply(&mut job)?;

        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = $2,
                progress = $3,
                findings = $4,
                breach_alerts = $5,
                scanned_urls = $6,
                outcome = $7,
                lease_id = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(job.id.0)
        .bind(job.status.as_str())
        .bind(i16::from(job.progress))
        .bind(Json(&job.findings))
        .bind(Json(&job.breach_alerts))
        .bind(Json(&job.scanned_urls))
        .bind(job.outcome.as_ref().map(Json))
        .bind(job.lease_id.map(|lease| lease.0))
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            ScanError::storage(format!("failed to update scan job: {err}"))
        })?;

        if update.resets_log() {
            sqlx::query("DELETE FROM scan_job_log WHERE job_id = $1")
                .bind(job.id.0)
                .execute(&mut *tx)
                .await?;
            append_log(&mut tx, job.id.0, 0, &job.log).await?;
        } else if job.log.len() > log_len_before {
            append_log(&mut tx, job.id.0, log_len_before, &job.log[log_len_before..])
                .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    async fn list(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<ScanJob>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, ScanJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs WHERE tenant_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(tenant_id.0)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *conn)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let log_rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT job_id, recorded_at, message
            FROM scan_job_log
            WHERE job_id = ANY($1)
            ORDER BY job_id, seq ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut logs: std::collections::HashMap<Uuid, Vec<LogEntry>> =
            std::collections::HashMap::new();
        for row in log_rows {
            logs.entry(row.job_id).or_default().push(LogEntry {
                at: row.recorded_at,
                message: row.message,
            });
        }

        rows.into_iter()
            .map(|row| {
                let log = logs.remove(&row.id).unwrap_or_default();
                row.into_job(log)
            })
            .collect()
    }

    async fn count(&self, tenant_id: TenantId) -> Result<u64> {
        let (count,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM scan_jobs WHERE tenant_id = $1",
        )
        .bind(tenant_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<QueuedJob>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT id, tenant_id
            FROM scan_jobs
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(job_id, tenant_id)| QueuedJob {
                job_id: JobId(job_id),
                tenant_id: TenantId(tenant_id),
            })
            .collect())
    }
}

#[async_trait]
impl ReportStore for PostgresJobStore {
    async fn ensure_report(&self, job: &ScanJob) -> Result<ReportCreation> {
        let candidate = report_from_job(job)?;

        // `xmax = 0` only holds for a freshly inserted tuple.
        let row = sqlx::query_as::<_, UpsertedReportRow>(
            r#"
            INSERT INTO scan_reports (
                id, job_id, tenant_id, domain, grade, risk_score, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_id) DO UPDATE
            SET grade = EXCLUDED.grade,
                risk_score = EXCLUDED.risk_score
            RETURNING id, job_id, tenant_id, domain, grade, risk_score, created_at,
                (xmax = 0) AS inserted
            "#,
        )
        .bind(candidate.id.0)
        .bind(candidate.job_id.0)
        .bind(candidate.tenant_id.0)
        .bind(&candidate.domain)
        .bind(candidate.grade.as_str())
        .bind(candidate.risk_score)
        .bind(candidate.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            ScanError::storage(format!("failed to upsert scan report: {err}"))
        })?;

        Ok(ReportCreation {
            created: row.inserted,
            report: row.report.into_report()?,
        })
    }

    async fn report(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<Report> {
        sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT id, job_id, tenant_id, domain, grade, risk_score, created_at
            FROM scan_reports
            WHERE job_id = $1 AND tenant_id = $2
            "#,
        )
        .bind(job_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ScanError::NotFound(job_id))?
        .into_report()
    }
}
