use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use rusqlite::{params, Connection, Params};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CallbackPayload, CronSpec, DelayedDelivery, DeliveryError};

pub(crate) const LOCAL_FAILURE_LIMIT: u32 = 3;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const LOCAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_jobs (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    schedule TEXT NOT NULL,
    timezone TEXT NOT NULL,
    due_at INTEGER NOT NULL,
    failures INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_run TEXT,
    last_error TEXT
);
CREATE INDEX IF NOT EXISTS local_jobs_due_at ON local_jobs (due_at);
"#;

const JOB_COLUMNS: &str = "id, payload, schedule, timezone, failures, created_at, last_run";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSchedule {
    Cron {
        expression: String,
        next_run: DateTime<Utc>,
    },
    OneShot {
        run_at: DateTime<Utc>,
    },
}

/// A pending job. One-shot rows are deleted once they have run or given up,
/// so every stored job is still live.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalJob {
    pub id: String,
    pub payload: CallbackPayload,
    pub schedule: JobSchedule,
    pub timezone: Tz,
    pub failures: u32,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

impl LocalJob {
    pub fn due_at(&self) -> DateTime<Utc> {
        match &self.schedule {
            JobSchedule::Cron { next_run, .. } => *next_run,
            JobSchedule::OneShot { run_at } => *run_at,
        }
    }
}

fn next_run_after(
    expression: &str,
    timezone: Tz,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, DeliveryError> {
    let schedule = CronSchedule::from_str(expression)?;
    schedule
        .after(&after.with_timezone(&timezone))
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| DeliveryError::NoNextRun(expression.to_string()))
}

/// In-process delayed delivery persisted in sqlite, for deployments without
/// QStash. Due jobs are handed to a delivery closure by `tick`; failures are
/// retried on later ticks up to `LOCAL_FAILURE_LIMIT` times.
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    path: PathBuf,
}

impl LocalScheduler {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, DeliveryError> {
        let scheduler = Self { path: path.into() };
        let _ = scheduler.open()?;
        Ok(scheduler)
    }

    fn open(&self) -> Result<Connection, DeliveryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(LOCAL_SCHEMA)?;
        Ok(conn)
    }

    pub fn jobs(&self) -> Result<Vec<LocalJob>, DeliveryError> {
        self.load_jobs(
            &format!("SELECT {} FROM local_jobs ORDER BY created_at", JOB_COLUMNS),
            params![],
        )
    }

    fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<LocalJob>, DeliveryError> {
        self.load_jobs(
            &format!(
                "SELECT {} FROM local_jobs WHERE due_at <= ?1 ORDER BY due_at",
                JOB_COLUMNS
            ),
            params![now.timestamp_millis()],
        )
    }

    fn load_jobs<P: Params>(&self, sql: &str, args: P) -> Result<Vec<LocalJob>, DeliveryError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut jobs = Vec::new();
        for row in rows {
            let (id, payload, schedule, timezone, failures, created_at, last_run) = row?;
            let Ok(timezone) = timezone.parse::<Tz>() else {
                warn!("local job {} has unknown timezone {}", id, timezone);
                continue;
            };
            jobs.push(LocalJob {
                id,
                payload: serde_json::from_str(&payload)?,
                schedule: serde_json::from_str(&schedule)?,
                timezone,
                failures: u32::try_from(failures).unwrap_or(0),
                created_at: parse_time(&created_at)?,
                last_run: last_run.as_deref().map(parse_time).transpose()?,
            });
        }
        Ok(jobs)
    }

    fn insert(&self, job: &LocalJob) -> Result<(), DeliveryError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO local_jobs (id, payload, schedule, timezone, due_at, failures, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                job.id,
                serde_json::to_string(&job.payload)?,
                serde_json::to_string(&job.schedule)?,
                job.timezone.name(),
                job.due_at().timestamp_millis(),
                job.failures as i64,
                job.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn update(&self, job: &LocalJob, last_error: Option<&str>) -> Result<(), DeliveryError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE local_jobs
             SET schedule = ?2, due_at = ?3, failures = ?4, last_run = ?5, last_error = ?6
             WHERE id = ?1",
            params![
                job.id,
                serde_json::to_string(&job.schedule)?,
                job.due_at().timestamp_millis(),
                job.failures as i64,
                job.last_run.map(|value| value.to_rfc3339()),
                last_error,
            ],
        )?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), DeliveryError> {
        let conn = self.open()?;
        let removed = conn.execute("DELETE FROM local_jobs WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(DeliveryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn schedule_at(
        &self,
        payload: &CallbackPayload,
        run_at: DateTime<Utc>,
        timezone: Tz,
    ) -> Result<String, DeliveryError> {
        let job = LocalJob {
            id: format!("local_{}", Uuid::new_v4()),
            payload: payload.clone(),
            schedule: JobSchedule::OneShot { run_at },
            timezone,
            failures: 0,
            created_at: Utc::now(),
            last_run: None,
        };
        self.insert(&job)?;
        Ok(job.id)
    }

    /// Runs every job due at `now`. `deliver` receives the payload and the
    /// delivery id (the job id). Returns how many deliveries succeeded.
    pub fn tick_at<F, E>(&self, now: DateTime<Utc>, deliver: &mut F) -> Result<usize, DeliveryError>
    where
        F: FnMut(&CallbackPayload, &str) -> Result<(), E>,
        E: Display,
    {
        let mut delivered = 0usize;
        for mut job in self.due_jobs(now)? {
            match deliver(&job.payload, &job.id) {
                Ok(()) => {
                    delivered += 1;
                    job.failures = 0;
                    job.last_run = Some(now);
                    self.finish_run(&mut job, now, None)?;
                }
                Err(err) => {
                    let message = err.to_string();
                    job.failures += 1;
                    if job.failures >= LOCAL_FAILURE_LIMIT {
                        warn!(
                            "local job {} failed {} times, giving up on this run: {}",
                            job.id, job.failures, message
                        );
                        job.failures = 0;
                        self.finish_run(&mut job, now, Some(&message))?;
                    } else {
                        warn!(
                            "local job {} delivery failed (attempt {}): {}",
                            job.id, job.failures, message
                        );
                        self.update(&job, Some(&message))?;
                    }
                }
            }
        }
        Ok(delivered)
    }

    pub fn tick<F, E>(&self, deliver: &mut F) -> Result<usize, DeliveryError>
    where
        F: FnMut(&CallbackPayload, &str) -> Result<(), E>,
        E: Display,
    {
        self.tick_at(Utc::now(), deliver)
    }

    pub fn run_loop<F, E>(
        &self,
        poll_interval: Duration,
        stop_flag: &AtomicBool,
        mut deliver: F,
    ) -> Result<(), DeliveryError>
    where
        F: FnMut(&CallbackPayload, &str) -> Result<(), E>,
        E: Display,
    {
        info!("local scheduler polling every {:?}", poll_interval);
        while !stop_flag.load(Ordering::Relaxed) {
            if let Err(err) = self.tick(&mut deliver) {
                warn!("local scheduler tick failed: {}", err);
            }
            std::thread::sleep(poll_interval);
        }
        Ok(())
    }

    /// Cron jobs move to their next slot; one-shot jobs are deleted.
    fn finish_run(
        &self,
        job: &mut LocalJob,
        now: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<(), DeliveryError> {
        match &mut job.schedule {
            JobSchedule::Cron {
                expression,
                next_run,
            } => {
                *next_run = next_run_after(expression, job.timezone, now)?;
                self.update(job, last_error)
            }
            JobSchedule::OneShot { .. } => match self.remove(&job.id) {
                // Cancelled while it was being delivered.
                Ok(()) | Err(DeliveryError::NotFound(_)) => {
                    debug!("local job {} finished", job.id);
                    Ok(())
                }
                Err(err) => Err(err),
            },
        }
    }
}

impl DelayedDelivery for LocalScheduler {
    fn publish_delayed(
        &self,
        payload: &CallbackPayload,
        delay: Duration,
    ) -> Result<String, DeliveryError> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|_| DeliveryError::Unavailable("delay out of range".to_string()))?;
        let run_at = Utc::now()
            .checked_add_signed(delay)
            .ok_or_else(|| DeliveryError::Unavailable("delay out of range".to_string()))?;
        self.schedule_at(payload, run_at, chrono_tz::UTC)
    }

    fn create_schedule(
        &self,
        payload: &CallbackPayload,
        cron: &CronSpec,
        timezone: Tz,
    ) -> Result<String, DeliveryError> {
        let expression = cron.six_field_expression();
        let now = Utc::now();
        let job = LocalJob {
            id: format!("local_scd_{}", Uuid::new_v4()),
            payload: payload.clone(),
            schedule: JobSchedule::Cron {
                next_run: next_run_after(&expression, timezone, now)?,
                expression,
            },
            timezone,
            failures: 0,
            created_at: now,
            last_run: None,
        };
        self.insert(&job)?;
        Ok(job.id)
    }

    fn cancel_message(&self, message_id: &str) -> Result<(), DeliveryError> {
        self.remove(message_id)
    }

    fn delete_schedule(&self, schedule_id: &str) -> Result<(), DeliveryError> {
        self.remove(schedule_id)
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, DeliveryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| DeliveryError::Unavailable(format!("bad timestamp {}: {}", raw, err)))
}
