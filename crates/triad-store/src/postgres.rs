//! Postgres `StateStore` — grounded in
//! `bpmn_lite_core::store_postgres::PostgresStore` for the connection/pool
//! shape and `database::dsl_instance_repository` for the
//! `pool.begin()` / `&mut *tx` / `tx.commit()` transaction idiom used here
//! for the §4.I atomic ranking write.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use triad_types::{
    AirportContext, Briefing, DistanceSource, IdempotencyRecord, Ranking, RankingCandidate, Snapshot, Strategy, StrategyStatus, TriadJob, TriadJobStatus, ValueGrade,
};

use crate::error::StoreError;
use crate::ports::{HoursCacheEntry, PlaceCacheEntry, StateStore};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(|e| StoreError::Backend(e.into()))?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| StoreError::Backend(e.into()))
    }
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl StateStore for PostgresStore {
    async fn load_snapshot(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<Snapshot>, StoreError> {
        check_cancel(cancel)?;
        let row = sqlx::query(
            r#"
            SELECT snapshot_id, lat, lng, formatted_address, city, state, timezone,
                   created_at, day_part, dow, weather, air_quality,
                   airport_code, airport_name, airport_distance_miles, airport_delay_minutes,
                   is_holiday, holiday_name
            FROM snapshots WHERE snapshot_id = $1
            "#,
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        let Some(row) = row else { return Ok(None) };

        let airport_context = row.try_get::<Option<String>, _>("airport_code").ok().flatten().map(|code| AirportContext {
            code,
            name: row.try_get("airport_name").unwrap_or_default(),
            distance_miles: row.try_get("airport_distance_miles").unwrap_or_default(),
            delay_minutes: row.try_get("airport_delay_minutes").ok(),
        });

        Ok(Some(Snapshot {
            snapshot_id: row.try_get("snapshot_id").map_err(|e| StoreError::Backend(e.into()))?,
            lat: row.try_get("lat").map_err(|e| StoreError::Backend(e.into()))?,
            lng: row.try_get("lng").map_err(|e| StoreError::Backend(e.into()))?,
            formatted_address: row.try_get("formatted_address").ok(),
            city: row.try_get("city").ok(),
            state: row.try_get("state").ok(),
            timezone: row.try_get("timezone").ok(),
            created_at: row.try_get("created_at").map_err(|e| StoreError::Backend(e.into()))?,
            day_part: None,
            dow: row.try_get::<Option<i16>, _>("dow").ok().flatten().map(|d| d as u8),
            weather: row.try_get("weather").ok(),
            air_quality: row.try_get("air_quality").ok(),
            airport_context,
            is_holiday: row.try_get("is_holiday").unwrap_or(false),
            holiday_name: row.try_get("holiday_name").ok(),
        }))
    }

    async fn ensure_strategy_pending(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Strategy, StoreError> {
        check_cancel(cancel)?;
        sqlx::query(
            r#"
            INSERT INTO strategies (snapshot_id, status, attempt)
            VALUES ($1, 'pending', 0)
            ON CONFLICT (snapshot_id) DO NOTHING
            "#,
        )
        .bind(snapshot_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        self.load_strategy(snapshot_id, cancel).await?.ok_or(StoreError::NotFound)
    }

    async fn upsert_strategy_cas(&self, strategy: &Strategy, expected_status: StrategyStatus, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        let result = sqlx::query(
            r#"
            UPDATE strategies
            SET status = $2, minstrategy = $3, consolidated_strategy = $4,
                error_code = $5, error_message = $6, attempt = $7, latency_ms = $8
            WHERE snapshot_id = $1 AND status = $9
            "#,
        )
        .bind(strategy.snapshot_id)
        .bind(status_str(strategy.status))
        .bind(&strategy.minstrategy)
        .bind(&strategy.consolidated_strategy)
        .bind(&strategy.error_code)
        .bind(&strategy.error_message)
        .bind(strategy.attempt as i32)
        .bind(strategy.latency_ms.map(|v| v as i64))
        .bind(status_str(expected_status))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        if result.rows_affected() == 0 {
            Err(StoreError::CasMismatch)
        } else {
            Ok(())
        }
    }

    async fn load_strategy(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<Strategy>, StoreError> {
        check_cancel(cancel)?;
        let row = sqlx::query(
            r#"
            SELECT snapshot_id, status, minstrategy, consolidated_strategy,
                   error_code, error_message, attempt, latency_ms
            FROM strategies WHERE snapshot_id = $1
            "#,
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        let Some(row) = row else { return Ok(None) };
        let status: String = row.try_get("status").map_err(|e| StoreError::Backend(e.into()))?;

        Ok(Some(Strategy {
            snapshot_id: row.try_get("snapshot_id").map_err(|e| StoreError::Backend(e.into()))?,
            status: parse_status(&status)?,
            minstrategy: row.try_get("minstrategy").ok(),
            consolidated_strategy: row.try_get("consolidated_strategy").ok(),
            error_code: row.try_get("error_code").ok(),
            error_message: row.try_get("error_message").ok(),
            attempt: row.try_get::<i32, _>("attempt").unwrap_or(0) as u32,
            latency_ms: row.try_get::<Option<i64>, _>("latency_ms").ok().flatten().map(|v| v as u64),
        }))
    }

    async fn upsert_briefing(&self, briefing: &Briefing, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        sqlx::query(
            r#"
            INSERT INTO briefings (snapshot_id, events, news, traffic, school_closures, weather_summary, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (snapshot_id) DO UPDATE SET
                events = EXCLUDED.events, news = EXCLUDED.news, traffic = EXCLUDED.traffic,
                school_closures = EXCLUDED.school_closures, weather_summary = EXCLUDED.weather_summary,
                status = EXCLUDED.status
            "#,
        )
        .bind(briefing.snapshot_id)
        .bind(&briefing.events)
        .bind(&briefing.news)
        .bind(&briefing.traffic)
        .bind(&briefing.school_closures)
        .bind(&briefing.weather_summary)
        .bind(status_str(briefing.status))
        .bind(briefing.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn load_briefing(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<Briefing>, StoreError> {
        check_cancel(cancel)?;
        let row = sqlx::query("SELECT snapshot_id, events, news, traffic, school_closures, weather_summary, status, created_at FROM briefings WHERE snapshot_id = $1")
            .bind(snapshot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let Some(row) = row else { return Ok(None) };
        let status: String = row.try_get("status").map_err(|e| StoreError::Backend(e.into()))?;
        Ok(Some(Briefing {
            snapshot_id: row.try_get("snapshot_id").map_err(|e| StoreError::Backend(e.into()))?,
            events: row.try_get("events").unwrap_or_default(),
            news: row.try_get("news").unwrap_or_default(),
            traffic: row.try_get("traffic").unwrap_or_default(),
            school_closures: row.try_get("school_closures").unwrap_or_default(),
            weather_summary: row.try_get("weather_summary").ok(),
            status: parse_status(&status)?,
            created_at: row.try_get("created_at").map_err(|e| StoreError::Backend(e.into()))?,
        }))
    }

    /// §4.I: one transaction, insert Ranking then bulk-insert candidates.
    /// Any failure rolls the whole thing back; the transaction is dropped
    /// without `commit()` being called, which sqlx rolls back on drop.
    async fn insert_ranking(&self, ranking: &Ranking, candidates: &[RankingCandidate], cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO rankings (ranking_id, snapshot_id, user_id, city, model_name,
                                   correlation_id, scoring_ms, planner_ms, total_ms, timed_out,
                                   path_taken, extras, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(ranking.ranking_id)
        .bind(ranking.snapshot_id)
        .bind(&ranking.user_id)
        .bind(&ranking.city)
        .bind(&ranking.model_name)
        .bind(ranking.correlation_id)
        .bind(ranking.scoring_ms as i64)
        .bind(ranking.planner_ms as i64)
        .bind(ranking.total_ms as i64)
        .bind(ranking.timed_out)
        .bind(&ranking.path_taken)
        .bind(&ranking.extras)
        .bind(ranking.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;

        for candidate in candidates {
            sqlx::query(
                r#"
                INSERT INTO ranking_candidates (
                    id, ranking_id, snapshot_id, rank, name, lat, lng, place_id,
                    distance_miles, drive_minutes, value_per_min, value_grade, not_worth,
                    pro_tips, staging_tips, staging_name, staging_lat, staging_lng,
                    business_hours, closed_reasoning, distance_source, features
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
                "#,
            )
            .bind(candidate.id)
            .bind(candidate.ranking_id)
            .bind(candidate.snapshot_id)
            .bind(candidate.rank as i32)
            .bind(&candidate.name)
            .bind(candidate.lat)
            .bind(candidate.lng)
            .bind(&candidate.place_id)
            .bind(candidate.distance_miles)
            .bind(candidate.drive_minutes)
            .bind(candidate.value_per_min)
            .bind(grade_str(candidate.value_grade))
            .bind(candidate.not_worth)
            .bind(&candidate.pro_tips)
            .bind(&candidate.staging_tips)
            .bind(&candidate.staging_name)
            .bind(candidate.staging_lat)
            .bind(candidate.staging_lng)
            .bind(&candidate.business_hours)
            .bind(&candidate.closed_reasoning)
            .bind(distance_source_str(candidate.distance_source))
            .bind(&candidate.features)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    async fn load_ranking(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<(Ranking, Vec<RankingCandidate>)>, StoreError> {
        check_cancel(cancel)?;
        let ranking_row = sqlx::query(
            r#"
            SELECT ranking_id, snapshot_id, user_id, city, model_name, correlation_id,
                   scoring_ms, planner_ms, total_ms, timed_out, path_taken, extras, created_at
            FROM rankings WHERE snapshot_id = $1
            "#,
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        let Some(row) = ranking_row else { return Ok(None) };
        let ranking_id: Uuid = row.try_get("ranking_id").map_err(|e| StoreError::Backend(e.into()))?;

        let ranking = Ranking {
            ranking_id,
            snapshot_id: row.try_get("snapshot_id").map_err(|e| StoreError::Backend(e.into()))?,
            user_id: row.try_get("user_id").ok(),
            city: row.try_get("city").ok(),
            model_name: row.try_get("model_name").map_err(|e| StoreError::Backend(e.into()))?,
            correlation_id: row.try_get("correlation_id").map_err(|e| StoreError::Backend(e.into()))?,
            scoring_ms: row.try_get::<i64, _>("scoring_ms").unwrap_or(0) as u64,
            planner_ms: row.try_get::<i64, _>("planner_ms").unwrap_or(0) as u64,
            total_ms: row.try_get::<i64, _>("total_ms").unwrap_or(0) as u64,
            timed_out: row.try_get("timed_out").unwrap_or(false),
            path_taken: row.try_get("path_taken").map_err(|e| StoreError::Backend(e.into()))?,
            extras: row.try_get("extras").ok(),
            created_at: row.try_get("created_at").map_err(|e| StoreError::Backend(e.into()))?,
        };

        let candidate_rows = sqlx::query(
            r#"
            SELECT id, ranking_id, snapshot_id, rank, name, lat, lng, place_id,
                   distance_miles, drive_minutes, value_per_min, value_grade, not_worth,
                   pro_tips, staging_tips, staging_name, staging_lat, staging_lng,
                   business_hours, closed_reasoning, distance_source, features
            FROM ranking_candidates WHERE ranking_id = $1 ORDER BY rank ASC
            "#,
        )
        .bind(ranking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        let mut candidates = Vec::with_capacity(candidate_rows.len());
        for row in candidate_rows {
            let grade: String = row.try_get("value_grade").map_err(|e| StoreError::Backend(e.into()))?;
            let source: String = row.try_get("distance_source").map_err(|e| StoreError::Backend(e.into()))?;
            candidates.push(RankingCandidate {
                id: row.try_get("id").map_err(|e| StoreError::Backend(e.into()))?,
                ranking_id: row.try_get("ranking_id").map_err(|e| StoreError::Backend(e.into()))?,
                snapshot_id: row.try_get("snapshot_id").map_err(|e| StoreError::Backend(e.into()))?,
                rank: row.try_get::<i32, _>("rank").unwrap_or(0) as u32,
                name: row.try_get("name").map_err(|e| StoreError::Backend(e.into()))?,
                lat: row.try_get("lat").map_err(|e| StoreError::Backend(e.into()))?,
                lng: row.try_get("lng").map_err(|e| StoreError::Backend(e.into()))?,
                place_id: row.try_get("place_id").ok(),
                distance_miles: row.try_get("distance_miles").ok(),
                drive_minutes: row.try_get("drive_minutes").ok(),
                value_per_min: row.try_get("value_per_min").ok(),
                value_grade: parse_grade(&grade)?,
                not_worth: row.try_get("not_worth").unwrap_or(false),
                pro_tips: row.try_get("pro_tips").unwrap_or_default(),
                staging_tips: row.try_get("staging_tips").ok(),
                staging_name: row.try_get("staging_name").ok(),
                staging_lat: row.try_get("staging_lat").ok(),
                staging_lng: row.try_get("staging_lng").ok(),
                business_hours: row.try_get("business_hours").ok(),
                closed_reasoning: row.try_get("closed_reasoning").ok(),
                distance_source: parse_distance_source(&source)?,
                features: row.try_get("features").unwrap_or(serde_json::Value::Null),
            });
        }

        Ok(Some((ranking, candidates)))
    }

    async fn upsert_triad_job(&self, job: &TriadJob, cancel: &CancellationToken) -> Result<TriadJob, StoreError> {
        check_cancel(cancel)?;
        sqlx::query("INSERT INTO triad_jobs (snapshot_id, status, kind, created_at) VALUES ($1, $2, $3, $4) ON CONFLICT (snapshot_id) DO NOTHING")
            .bind(job.snapshot_id)
            .bind(job_status_str(job.status))
            .bind(&job.kind)
            .bind(job.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        self.load_triad_job(job.snapshot_id, cancel).await?.ok_or(StoreError::NotFound)
    }

    async fn update_triad_job_status(&self, snapshot_id: Uuid, status: TriadJobStatus, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        sqlx::query("UPDATE triad_jobs SET status = $2 WHERE snapshot_id = $1")
            .bind(snapshot_id)
            .bind(job_status_str(status))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn load_triad_job(&self, snapshot_id: Uuid, cancel: &CancellationToken) -> Result<Option<TriadJob>, StoreError> {
        check_cancel(cancel)?;
        let row = sqlx::query("SELECT snapshot_id, status, kind, created_at FROM triad_jobs WHERE snapshot_id = $1")
            .bind(snapshot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let Some(row) = row else { return Ok(None) };
        let status: String = row.try_get("status").map_err(|e| StoreError::Backend(e.into()))?;
        Ok(Some(TriadJob {
            snapshot_id: row.try_get("snapshot_id").map_err(|e| StoreError::Backend(e.into()))?,
            status: parse_job_status(&status)?,
            kind: row.try_get("kind").map_err(|e| StoreError::Backend(e.into()))?,
            created_at: row.try_get("created_at").map_err(|e| StoreError::Backend(e.into()))?,
        }))
    }

    async fn upsert_place_cache(&self, entry: &PlaceCacheEntry, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        sqlx::query(
            r#"
            INSERT INTO place_cache (place_id, name, formatted_address, lat, lng)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (place_id) DO UPDATE SET
                name = EXCLUDED.name, formatted_address = EXCLUDED.formatted_address,
                lat = EXCLUDED.lat, lng = EXCLUDED.lng
            "#,
        )
        .bind(&entry.place_id)
        .bind(&entry.name)
        .bind(&entry.formatted_address)
        .bind(entry.lat)
        .bind(entry.lng)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn upsert_hours_cache(&self, entry: &HoursCacheEntry, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        sqlx::query(
            r#"
            INSERT INTO hours_cache (place_id, regular_opening_hours, current_opening_hours)
            VALUES ($1, $2, $3)
            ON CONFLICT (place_id) DO UPDATE SET
                regular_opening_hours = EXCLUDED.regular_opening_hours,
                current_opening_hours = EXCLUDED.current_opening_hours
            "#,
        )
        .bind(&entry.place_id)
        .bind(&entry.regular_opening_hours)
        .bind(&entry.current_opening_hours)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn put_idempotency_record(&self, record: &IdempotencyRecord, cancel: &CancellationToken) -> Result<(), StoreError> {
        check_cancel(cancel)?;
        sqlx::query(
            r#"
            INSERT INTO idempotency_records (key, status, body, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET status = EXCLUDED.status, body = EXCLUDED.body, created_at = EXCLUDED.created_at
            "#,
        )
        .bind(&record.key)
        .bind(record.status as i32)
        .bind(&record.body)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn get_idempotency_record(&self, key: &str, cancel: &CancellationToken) -> Result<Option<IdempotencyRecord>, StoreError> {
        check_cancel(cancel)?;
        let row = sqlx::query("SELECT key, status, body, created_at FROM idempotency_records WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(IdempotencyRecord {
            key: row.try_get("key").map_err(|e| StoreError::Backend(e.into()))?,
            status: row.try_get::<i32, _>("status").unwrap_or(200) as u16,
            body: row.try_get("body").map_err(|e| StoreError::Backend(e.into()))?,
            created_at: row.try_get("created_at").map_err(|e| StoreError::Backend(e.into()))?,
        }))
    }
}

fn status_str(status: StrategyStatus) -> &'static str {
    match status {
        StrategyStatus::Pending => "pending",
        StrategyStatus::Ok => "ok",
        StrategyStatus::Failed => "failed",
    }
}

fn parse_status(raw: &str) -> Result<StrategyStatus, StoreError> {
    match raw {
        "pending" => Ok(StrategyStatus::Pending),
        "ok" => Ok(StrategyStatus::Ok),
        "failed" => Ok(StrategyStatus::Failed),
        other => Err(StoreError::Backend(anyhow::anyhow!("unknown strategy status: {other}"))),
    }
}

fn job_status_str(status: TriadJobStatus) -> &'static str {
    match status {
        TriadJobStatus::Queued => "queued",
        TriadJobStatus::Running => "running",
        TriadJobStatus::Done => "done",
        TriadJobStatus::Failed => "failed",
    }
}

fn parse_job_status(raw: &str) -> Result<TriadJobStatus, StoreError> {
    match raw {
        "queued" => Ok(TriadJobStatus::Queued),
        "running" => Ok(TriadJobStatus::Running),
        "done" => Ok(TriadJobStatus::Done),
        "failed" => Ok(TriadJobStatus::Failed),
        other => Err(StoreError::Backend(anyhow::anyhow!("unknown triad job status: {other}"))),
    }
}

fn grade_str(grade: ValueGrade) -> &'static str {
    match grade {
        ValueGrade::A => "a",
        ValueGrade::B => "b",
        ValueGrade::C => "c",
        ValueGrade::D => "d",
    }
}

fn parse_grade(raw: &str) -> Result<ValueGrade, StoreError> {
    match raw {
        "a" => Ok(ValueGrade::A),
        "b" => Ok(ValueGrade::B),
        "c" => Ok(ValueGrade::C),
        "d" => Ok(ValueGrade::D),
        other => Err(StoreError::Backend(anyhow::anyhow!("unknown value grade: {other}"))),
    }
}

fn distance_source_str(source: DistanceSource) -> &'static str {
    match source {
        DistanceSource::GoogleRoutesApi => "google_routes_api",
        DistanceSource::EnrichmentFailed => "enrichment_failed",
        DistanceSource::Predictive => "predictive",
        DistanceSource::Unknown => "unknown",
    }
}

fn parse_distance_source(raw: &str) -> Result<DistanceSource, StoreError> {
    match raw {
        "google_routes_api" => Ok(DistanceSource::GoogleRoutesApi),
        "enrichment_failed" => Ok(DistanceSource::EnrichmentFailed),
        "predictive" => Ok(DistanceSource::Predictive),
        "unknown" => Ok(DistanceSource::Unknown),
        other => Err(StoreError::Backend(anyhow::anyhow!("unknown distance source: {other}"))),
    }
}
