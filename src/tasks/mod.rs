use crate::recurrence::DEFAULT_HORIZON_DAYS;
use crate::shared::error::CalendarError;
use crate::shared::state::AppState;
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use log::{error, info};
use std::str::FromStr;
use std::sync::Arc;

/// Nightly sweep that tops up materialized instances for every recurring
/// event.
pub const REGENERATE_SCHEDULE: &str = "0 0 3 * * *";

/// Hourly sweep that expires PENDING invitations past their deadline.
pub const EXPIRE_SCHEDULE: &str = "0 0 * * * *";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceJobKind {
    RegenerateInstances,
    ExpireInvitations,
}

impl MaintenanceJobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceJobKind::RegenerateInstances => "regenerate_instances",
            MaintenanceJobKind::ExpireInvitations => "expire_invitations",
        }
    }
}

struct MaintenanceJob {
    kind: MaintenanceJobKind,
    schedule: Schedule,
    next_run: DateTime<Utc>,
}

impl MaintenanceJob {
    fn parse(kind: MaintenanceJobKind, expression: &str) -> Result<Self, CalendarError> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            CalendarError::Internal(format!(
                "Invalid cron expression for {}: {}",
                kind.as_str(),
                e
            ))
        })?;
        let next_run = next_occurrence(&schedule);
        Ok(MaintenanceJob {
            kind,
            schedule,
            next_run,
        })
    }
}

fn next_occurrence(schedule: &Schedule) -> DateTime<Utc> {
    schedule
        .upcoming(Utc)
        .next()
        .unwrap_or_else(|| Utc::now() + Duration::hours(1))
}

/// Background maintenance loop. Jobs run on cron schedules checked once a
/// minute; a failing job is logged and rescheduled, never fatal to the
/// server.
pub struct MaintenanceScheduler {
    state: Arc<AppState>,
    jobs: Vec<MaintenanceJob>,
}

impl MaintenanceScheduler {
    pub fn new(state: Arc<AppState>) -> Result<Self, CalendarError> {
        let jobs = vec![
            MaintenanceJob::parse(
                MaintenanceJobKind::RegenerateInstances,
                REGENERATE_SCHEDULE,
            )?,
            MaintenanceJob::parse(MaintenanceJobKind::ExpireInvitations, EXPIRE_SCHEDULE)?,
        ];
        Ok(MaintenanceScheduler { state, jobs })
    }

    pub fn start(mut self) {
        info!("Starting calendar maintenance scheduler");
        for job in &self.jobs {
            info!(
                "Maintenance job {} first run at {}",
                job.kind.as_str(),
                job.next_run
            );
        }
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                self.run_due_jobs(Utc::now()).await;
            }
        });
    }

    async fn run_due_jobs(&mut self, now: DateTime<Utc>) {
        for job in &mut self.jobs {
            if job.next_run > now {
                continue;
            }
            info!("Running maintenance job: {}", job.kind.as_str());
            if let Err(e) = run_job(&self.state, job.kind).await {
                error!("Maintenance job {} failed: {}", job.kind.as_str(), e);
            }
            job.next_run = next_occurrence(&job.schedule);
        }
    }
}

async fn run_job(state: &AppState, kind: MaintenanceJobKind) -> Result<(), CalendarError> {
    match kind {
        MaintenanceJobKind::RegenerateInstances => {
            let report = state
                .recurrence
                .regenerate_all_instances(DEFAULT_HORIZON_DAYS)
                .await?;
            info!(
                "Instance regeneration finished: processed={} failed={}",
                report.processed, report.failed
            );
        }
        MaintenanceJobKind::ExpireInvitations => {
            let expired = state.invitations.expire_stale_invitations(Utc::now()).await?;
            if expired > 0 {
                info!("Invitation expiry sweep removed {} from PENDING", expired);
            }
        }
    }
    Ok(())
}
