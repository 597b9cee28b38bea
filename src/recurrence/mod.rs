use crate::auth::{AdminUser, AuthenticatedUser};
use crate::history::{EventChange, EventChangeKind, HistorySink};
use crate::permission::PermissionService;
use crate::shared::error::CalendarError;
use crate::shared::models::{
    EventInstance, InstanceStatus, NewEventInstance, NewRecurrenceRule, PermissionLevel,
    RecurrenceFrequency, RecurrenceRule,
};
use crate::shared::state::AppState;
use crate::store::CalendarStore;
use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{Datelike, Duration, Months, NaiveDate, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_HORIZON_DAYS: i64 = 90;
pub const MAX_HORIZON_DAYS: i64 = 365;
pub const MAX_INTERVAL: i32 = 1000;

fn validate_horizon(days_ahead: i64) -> Result<(), CalendarError> {
    if !(1..=MAX_HORIZON_DAYS).contains(&days_ahead) {
        return Err(CalendarError::Validation(format!(
            "days_ahead must be between 1 and {}",
            MAX_HORIZON_DAYS
        )));
    }
    Ok(())
}

fn validate_interval(interval: i32) -> Result<(), CalendarError> {
    if !(1..=MAX_INTERVAL).contains(&interval) {
        return Err(CalendarError::Validation(format!(
            "Recurrence interval must be between 1 and {}",
            MAX_INTERVAL
        )));
    }
    Ok(())
}

fn normalize_weekdays(set: &[i32]) -> Result<Vec<i32>, CalendarError> {
    let mut days = Vec::with_capacity(set.len());
    for &day in set {
        if !(0..=6).contains(&day) {
            return Err(CalendarError::Validation(format!(
                "by_day entries must be between 0 (Sunday) and 6, got {}",
                day
            )));
        }
        days.push(day);
    }
    days.sort_unstable();
    days.dedup();
    Ok(days)
}

fn normalize_month_days(set: &[i32]) -> Result<Vec<i32>, CalendarError> {
    let mut days = Vec::with_capacity(set.len());
    for &day in set {
        if !(1..=31).contains(&day) {
            return Err(CalendarError::Validation(format!(
                "by_month_day entries must be between 1 and 31, got {}",
                day
            )));
        }
        days.push(day);
    }
    days.sort_unstable();
    days.dedup();
    Ok(days)
}

fn capped(len: usize, cap: Option<usize>) -> bool {
    cap.map_or(false, |limit| len >= limit)
}

// Day 1 exists in every month.
fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Expands a recurrence rule into concrete occurrence dates, ascending and
/// without duplicates.
///
/// The walk starts at the rule's anchor date and stops at the earlier of
/// `rule.end_date` and `horizon_end` (both inclusive), or after `count`
/// occurrences when the rule carries one. Dates before the anchor never
/// appear: a weekly day-set or month-day set can name days earlier in the
/// anchor's own week or month, and those fall outside the series.
///
/// MONTHLY emits nothing in months that lack the requested day (no clamping
/// to month end), and YEARLY emits 29 February only in leap years.
pub fn expand_rule(
    rule: &RecurrenceRule,
    horizon_end: NaiveDate,
) -> Result<Vec<NaiveDate>, CalendarError> {
    let frequency: RecurrenceFrequency =
        rule.frequency.parse().map_err(CalendarError::Validation)?;
    validate_interval(rule.interval)?;

    let anchor = rule.start_date;
    let stop = match rule.end_date {
        Some(end) if end < horizon_end => end,
        _ => horizon_end,
    };
    let cap = rule.count.map(|c| c.max(0) as usize);

    let mut dates = Vec::new();
    if stop < anchor || cap == Some(0) {
        return Ok(dates);
    }

    match frequency {
        RecurrenceFrequency::Daily => {
            let step = Duration::days(rule.interval as i64);
            let mut date = anchor;
            while date <= stop {
                dates.push(date);
                if capped(dates.len(), cap) {
                    break;
                }
                date = match date.checked_add_signed(step) {
                    Some(next) => next,
                    None => break,
                };
            }
        }
        RecurrenceFrequency::Weekly => {
            let days = match &rule.by_day {
                Some(set) if !set.is_empty() => normalize_weekdays(set)?,
                _ => vec![anchor.weekday().num_days_from_sunday() as i32],
            };
            let step = Duration::weeks(rule.interval as i64);
            let mut week = anchor - Duration::days(anchor.weekday().num_days_from_sunday() as i64);
            'weeks: while week <= stop {
                for &day in &days {
                    let date = match week.checked_add_signed(Duration::days(day as i64)) {
                        Some(date) => date,
                        None => continue,
                    };
                    if date < anchor || date > stop {
                        continue;
                    }
                    dates.push(date);
                    if capped(dates.len(), cap) {
                        break 'weeks;
                    }
                }
                week = match week.checked_add_signed(step) {
                    Some(next) => next,
                    None => break,
                };
            }
        }
        RecurrenceFrequency::Monthly => {
            let days = match &rule.by_month_day {
                Some(set) if !set.is_empty() => normalize_month_days(set)?,
                _ => vec![anchor.day() as i32],
            };
            let first = month_start(anchor);
            let mut offset: u32 = 0;
            'months: loop {
                let month = match first.checked_add_months(Months::new(offset)) {
                    Some(month) if month <= stop => month,
                    _ => break,
                };
                for &day in &days {
                    let date = match month.with_day(day as u32) {
                        Some(date) => date,
                        None => continue,
                    };
                    if date < anchor || date > stop {
                        continue;
                    }
                    dates.push(date);
                    if capped(dates.len(), cap) {
                        break 'months;
                    }
                }
                offset += rule.interval as u32;
            }
        }
        RecurrenceFrequency::Yearly => {
            let mut year = anchor.year();
            while year <= stop.year() {
                if let Some(date) = NaiveDate::from_ymd_opt(year, anchor.month(), anchor.day()) {
                    if date > stop {
                        break;
                    }
                    dates.push(date);
                    if capped(dates.len(), cap) {
                        break;
                    }
                }
                year = match year.checked_add(rule.interval) {
                    Some(next) => next,
                    None => break,
                };
            }
        }
    }

    Ok(dates)
}

/// Per-occurrence override fields accepted by `modify_instance`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceOverrides {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub assigned_to: Option<i64>,
}

/// Replacement recurrence rule for an event.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleInput {
    pub frequency: RecurrenceFrequency,
    #[serde(default = "default_interval")]
    pub interval: i32,
    pub by_day: Option<Vec<i32>>,
    pub by_month_day: Option<Vec<i32>>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub count: Option<i32>,
}

fn default_interval() -> i32 {
    1
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegenerationReport {
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecurrenceIntegrityReport {
    pub recurring_without_rule: Vec<i64>,
    pub rule_without_recurring_flag: Vec<i64>,
}

impl RecurrenceIntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.recurring_without_rule.is_empty() && self.rule_without_recurring_flag.is_empty()
    }
}

/// Materializes recurrence rules into instance rows and manages
/// per-occurrence exceptions.
pub struct InstanceGenerator<S: CalendarStore, H: HistorySink> {
    store: Arc<S>,
    history: Arc<H>,
    permissions: PermissionService<S>,
}

impl<S: CalendarStore, H: HistorySink> Clone for InstanceGenerator<S, H> {
    fn clone(&self) -> Self {
        InstanceGenerator {
            store: self.store.clone(),
            history: self.history.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

impl<S: CalendarStore, H: HistorySink> InstanceGenerator<S, H> {
    pub fn new(store: Arc<S>, history: Arc<H>) -> Self {
        let permissions = PermissionService::new(store.clone());
        InstanceGenerator {
            store,
            history,
            permissions,
        }
    }

    /// Materializes missing `Generated` rows for the event's rule up to
    /// `days_ahead` from today. Existing rows are left alone whatever their
    /// status, so exceptions survive and a second run creates nothing.
    /// Returns the number of rows created.
    pub async fn generate_instances(
        &self,
        event_id: i64,
        days_ahead: i64,
    ) -> Result<usize, CalendarError> {
        validate_horizon(days_ahead)?;
        let rule = self
            .store
            .get_rule(event_id)
            .await?
            .ok_or_else(|| CalendarError::NotFound("No recurrence rule for this event".to_string()))?;

        let horizon_end = Utc::now().date_naive() + Duration::days(days_ahead);
        let dates = expand_rule(&rule, horizon_end)?;
        if dates.is_empty() {
            return Ok(0);
        }

        let existing: HashSet<NaiveDate> = self
            .store
            .list_instances(event_id)
            .await?
            .into_iter()
            .map(|instance| instance.instance_date)
            .collect();

        let mut created = 0usize;
        for date in dates {
            if existing.contains(&date) {
                continue;
            }
            let inserted = self
                .store
                .insert_instance_if_absent(NewEventInstance {
                    parent_event_id: event_id,
                    instance_date: date,
                    status: InstanceStatus::Generated.as_str().to_string(),
                    title: None,
                    description: None,
                    location: None,
                    assigned_to: None,
                    modified_by: None,
                    modified_at: None,
                })
                .await?;
            if inserted {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Turns one occurrence into a `Modified` exception carrying the given
    /// overrides. EDIT is checked here, not assumed from the caller.
    pub async fn modify_instance(
        &self,
        acting_user: i64,
        event_id: i64,
        on_date: NaiveDate,
        overrides: InstanceOverrides,
    ) -> Result<EventInstance, CalendarError> {
        self.permissions
            .require_permission(acting_user, event_id, PermissionLevel::Edit)
            .await?;

        let previous = self.store.get_instance(event_id, on_date).await?;
        let instance = self
            .store
            .upsert_instance(NewEventInstance {
                parent_event_id: event_id,
                instance_date: on_date,
                status: InstanceStatus::Modified.as_str().to_string(),
                title: overrides.title,
                description: overrides.description,
                location: overrides.location,
                assigned_to: overrides.assigned_to,
                modified_by: Some(acting_user),
                modified_at: Some(Utc::now()),
            })
            .await?;

        self.history
            .record_event_change(
                EventChange::new(event_id, EventChangeKind::Updated)
                    .with_actor(acting_user)
                    .with_field(
                        &format!("instance:{}", on_date),
                        previous.map(|p| p.status),
                        Some(instance.status.clone()),
                    ),
            )
            .await?;
        Ok(instance)
    }

    /// Cancels one occurrence. The row stays behind as a `Cancelled`
    /// exception so regeneration cannot bring the date back.
    pub async fn cancel_instance(
        &self,
        acting_user: i64,
        event_id: i64,
        on_date: NaiveDate,
    ) -> Result<EventInstance, CalendarError> {
        self.permissions
            .require_permission(acting_user, event_id, PermissionLevel::Edit)
            .await?;

        let previous = self.store.get_instance(event_id, on_date).await?;
        let (title, description, location, assigned_to) = match &previous {
            Some(p) => (
                p.title.clone(),
                p.description.clone(),
                p.location.clone(),
                p.assigned_to,
            ),
            None => (None, None, None, None),
        };
        let instance = self
            .store
            .upsert_instance(NewEventInstance {
                parent_event_id: event_id,
                instance_date: on_date,
                status: InstanceStatus::Cancelled.as_str().to_string(),
                title,
                description,
                location,
                assigned_to,
                modified_by: Some(acting_user),
                modified_at: Some(Utc::now()),
            })
            .await?;

        self.history
            .record_event_change(
                EventChange::new(event_id, EventChangeKind::Cancelled)
                    .with_actor(acting_user)
                    .with_field(
                        &format!("instance:{}", on_date),
                        previous.map(|p| p.status),
                        Some(instance.status.clone()),
                    ),
            )
            .await?;
        Ok(instance)
    }

    /// Occurrences visible to the acting user. Cancelled exceptions are
    /// filtered out; modified ones are returned with their overrides.
    pub async fn list_instances(
        &self,
        acting_user: i64,
        event_id: i64,
    ) -> Result<Vec<EventInstance>, CalendarError> {
        self.permissions
            .require_permission(acting_user, event_id, PermissionLevel::View)
            .await?;
        let instances = self.store.list_instances(event_id).await?;
        Ok(instances
            .into_iter()
            .filter(|instance| instance.status != InstanceStatus::Cancelled.as_str())
            .collect())
    }

    pub async fn get_rule(
        &self,
        acting_user: i64,
        event_id: i64,
    ) -> Result<Option<RecurrenceRule>, CalendarError> {
        self.permissions
            .require_permission(acting_user, event_id, PermissionLevel::View)
            .await?;
        self.store.get_rule(event_id).await
    }

    /// Replaces the event's rule and immediately re-materializes instances
    /// over the default horizon. Also sets the event's recurring flag, which
    /// the integrity check relies on. Input that fails validation or
    /// expansion leaves the stored rule untouched.
    pub async fn update_recurrence_rule(
        &self,
        acting_user: i64,
        event_id: i64,
        input: RuleInput,
    ) -> Result<RecurrenceRule, CalendarError> {
        self.permissions
            .require_permission(acting_user, event_id, PermissionLevel::Edit)
            .await?;

        validate_interval(input.interval)?;
        if let Some(days) = &input.by_day {
            normalize_weekdays(days)?;
        }
        if let Some(days) = &input.by_month_day {
            normalize_month_days(days)?;
        }
        if let Some(end) = input.end_date {
            if end < input.start_date {
                return Err(CalendarError::Validation(
                    "end_date must not precede start_date".to_string(),
                ));
            }
        }

        // A rule may reach storage only if it expands; the nightly sweep
        // re-expands every stored rule.
        let now = Utc::now();
        expand_rule(
            &RecurrenceRule {
                id: 0,
                event_id,
                frequency: input.frequency.as_str().to_string(),
                interval: input.interval,
                by_day: input.by_day.clone(),
                by_month_day: input.by_month_day.clone(),
                start_date: input.start_date,
                end_date: input.end_date,
                count: input.count,
                created_at: now,
                updated_at: now,
            },
            now.date_naive() + Duration::days(DEFAULT_HORIZON_DAYS),
        )?;

        let previous = self.store.get_rule(event_id).await?;
        let rule = self
            .store
            .upsert_rule(NewRecurrenceRule {
                event_id,
                frequency: input.frequency.as_str().to_string(),
                interval: input.interval,
                by_day: input.by_day,
                by_month_day: input.by_month_day,
                start_date: input.start_date,
                end_date: input.end_date,
                count: input.count,
                updated_at: now,
            })
            .await?;
        self.store.set_event_recurring(event_id, true).await?;

        let created = self
            .generate_instances(event_id, DEFAULT_HORIZON_DAYS)
            .await?;
        info!(
            "Rule change on event {} materialized {} instances",
            event_id, created
        );

        self.history
            .record_event_change(
                EventChange::new(event_id, EventChangeKind::Updated)
                    .with_actor(acting_user)
                    .with_field(
                        "recurrence_rule",
                        previous.map(|p| p.frequency),
                        Some(rule.frequency.clone()),
                    ),
            )
            .await?;
        Ok(rule)
    }

    /// Removes the rule and every instance row, and clears the event's
    /// recurring flag. Exceptions go with the rest; there is nothing for
    /// them to except from once the series is gone.
    pub async fn delete_recurrence_rule(
        &self,
        acting_user: i64,
        event_id: i64,
    ) -> Result<(), CalendarError> {
        self.permissions
            .require_permission(acting_user, event_id, PermissionLevel::Manage)
            .await?;

        let previous = self
            .store
            .get_rule(event_id)
            .await?
            .ok_or_else(|| CalendarError::NotFound("No recurrence rule for this event".to_string()))?;
        self.store.delete_rule(event_id).await?;
        let dropped = self.store.delete_instances(event_id).await?;
        self.store.set_event_recurring(event_id, false).await?;
        info!(
            "Removed recurrence rule and {} instances from event {}",
            dropped, event_id
        );

        self.history
            .record_event_change(
                EventChange::new(event_id, EventChangeKind::Updated)
                    .with_actor(acting_user)
                    .with_field("recurrence_rule", Some(previous.frequency), None),
            )
            .await?;
        Ok(())
    }

    /// Maintenance sweep over every recurring event. A failing event is
    /// logged and counted; the sweep always visits the rest.
    pub async fn regenerate_all_instances(
        &self,
        days_ahead: i64,
    ) -> Result<RegenerationReport, CalendarError> {
        validate_horizon(days_ahead)?;
        let events = self.store.list_recurring_events().await?;
        let mut processed = 0usize;
        let mut failed = 0usize;
        for event in events {
            match self.generate_instances(event.id, days_ahead).await {
                Ok(created) => {
                    processed += 1;
                    if created > 0 {
                        info!("Generated {} new instances for event {}", created, event.id);
                    }
                }
                Err(err) => {
                    failed += 1;
                    error!("Instance generation failed for event {}: {}", event.id, err);
                }
            }
        }
        Ok(RegenerationReport { processed, failed })
    }

    /// Read-only consistency report: recurring events missing a rule, and
    /// rules attached to events no longer flagged recurring.
    pub async fn check_recurrence_integrity(
        &self,
    ) -> Result<RecurrenceIntegrityReport, CalendarError> {
        let recurring = self.store.list_recurring_events().await?;
        let rules = self.store.list_rules().await?;

        let ruled: HashSet<i64> = rules.iter().map(|r| r.event_id).collect();
        let recurring_ids: HashSet<i64> = recurring.iter().map(|e| e.id).collect();

        let mut report = RecurrenceIntegrityReport::default();
        for event in &recurring {
            if !ruled.contains(&event.id) {
                report.recurring_without_rule.push(event.id);
            }
        }
        for rule in &rules {
            if !recurring_ids.contains(&rule.event_id) {
                report.rule_without_recurring_flag.push(rule.event_id);
            }
        }
        report.recurring_without_rule.sort_unstable();
        report.rule_without_recurring_flag.sort_unstable();
        Ok(report)
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateInstancesRequest {
    pub days_ahead: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GenerateInstancesResponse {
    pub created: usize,
}

pub async fn handle_get_rule(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
) -> Result<Json<Option<RecurrenceRule>>, CalendarError> {
    let rule = state.recurrence.get_rule(user_id, event_id).await?;
    Ok(Json(rule))
}

pub async fn handle_update_rule(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
    Json(input): Json<RuleInput>,
) -> Result<Json<RecurrenceRule>, CalendarError> {
    let rule = state
        .recurrence
        .update_recurrence_rule(user_id, event_id, input)
        .await?;
    Ok(Json(rule))
}

pub async fn handle_delete_rule(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
) -> Result<Json<serde_json::Value>, CalendarError> {
    state
        .recurrence
        .delete_recurrence_rule(user_id, event_id)
        .await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn handle_list_instances(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
) -> Result<Json<Vec<EventInstance>>, CalendarError> {
    let instances = state.recurrence.list_instances(user_id, event_id).await?;
    Ok(Json(instances))
}

pub async fn handle_generate_instances(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(event_id): Path<i64>,
    Json(req): Json<GenerateInstancesRequest>,
) -> Result<Json<GenerateInstancesResponse>, CalendarError> {
    state
        .permissions
        .require_permission(user_id, event_id, PermissionLevel::Edit)
        .await?;
    let created = state
        .recurrence
        .generate_instances(event_id, req.days_ahead.unwrap_or(DEFAULT_HORIZON_DAYS))
        .await?;
    Ok(Json(GenerateInstancesResponse { created }))
}

pub async fn handle_modify_instance(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path((event_id, on_date)): Path<(i64, NaiveDate)>,
    Json(overrides): Json<InstanceOverrides>,
) -> Result<Json<EventInstance>, CalendarError> {
    let instance = state
        .recurrence
        .modify_instance(user_id, event_id, on_date, overrides)
        .await?;
    Ok(Json(instance))
}

pub async fn handle_cancel_instance(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path((event_id, on_date)): Path<(i64, NaiveDate)>,
) -> Result<Json<EventInstance>, CalendarError> {
    let instance = state
        .recurrence
        .cancel_instance(user_id, event_id, on_date)
        .await?;
    Ok(Json(instance))
}

pub async fn handle_regenerate_all(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin_id): AdminUser,
    Json(req): Json<GenerateInstancesRequest>,
) -> Result<Json<RegenerationReport>, CalendarError> {
    let report = state
        .recurrence
        .regenerate_all_instances(req.days_ahead.unwrap_or(DEFAULT_HORIZON_DAYS))
        .await?;
    Ok(Json(report))
}

pub async fn handle_integrity_check(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin_id): AdminUser,
) -> Result<Json<RecurrenceIntegrityReport>, CalendarError> {
    let report = state.recurrence.check_recurrence_integrity().await?;
    Ok(Json(report))
}

pub fn configure_recurrence_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/calendar/events/{event_id}/recurrence",
            get(handle_get_rule)
                .put(handle_update_rule)
                .delete(handle_delete_rule),
        )
        .route(
            "/api/calendar/events/{event_id}/instances",
            get(handle_list_instances),
        )
        .route(
            "/api/calendar/events/{event_id}/instances/generate",
            post(handle_generate_instances),
        )
        .route(
            "/api/calendar/events/{event_id}/instances/{on_date}",
            patch(handle_modify_instance).delete(handle_cancel_instance),
        )
        .route(
            "/api/calendar/recurrence/regenerate",
            post(handle_regenerate_all),
        )
        .route(
            "/api/calendar/recurrence/integrity",
            get(handle_integrity_check),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistorySink;
    use crate::shared::models::NewCalendarEvent;
    use crate::store::memory::MemoryStore;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn rule_with(
        frequency: RecurrenceFrequency,
        interval: i32,
        start: NaiveDate,
    ) -> RecurrenceRule {
        RecurrenceRule {
            id: 1,
            event_id: 1,
            frequency: frequency.as_str().to_string(),
            interval,
            by_day: None,
            by_month_day: None,
            start_date: start,
            end_date: None,
            count: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn daily_respects_interval_and_end_date() {
        let mut rule = rule_with(RecurrenceFrequency::Daily, 3, d(2026, 1, 1));
        rule.end_date = Some(d(2026, 1, 10));

        let dates = expand_rule(&rule, d(2026, 12, 31)).expect("expand");
        assert_eq!(
            dates,
            vec![d(2026, 1, 1), d(2026, 1, 4), d(2026, 1, 7), d(2026, 1, 10)]
        );
    }

    #[test]
    fn weekly_defaults_to_anchor_weekday() {
        // 2026-01-07 is a Wednesday.
        let rule = rule_with(RecurrenceFrequency::Weekly, 1, d(2026, 1, 7));

        let dates = expand_rule(&rule, d(2026, 1, 28)).expect("expand");
        assert_eq!(
            dates,
            vec![d(2026, 1, 7), d(2026, 1, 14), d(2026, 1, 21), d(2026, 1, 28)]
        );
    }

    #[test]
    fn weekly_day_set_with_interval_and_count() {
        // 2026-01-05 is a Monday; by_day 1=Monday, 3=Wednesday.
        let mut rule = rule_with(RecurrenceFrequency::Weekly, 2, d(2026, 1, 5));
        rule.by_day = Some(vec![3, 1]);
        rule.count = Some(10);

        let dates = expand_rule(&rule, d(2026, 12, 31)).expect("expand");
        assert_eq!(
            dates,
            vec![
                d(2026, 1, 5),
                d(2026, 1, 7),
                d(2026, 1, 19),
                d(2026, 1, 21),
                d(2026, 2, 2),
                d(2026, 2, 4),
                d(2026, 2, 16),
                d(2026, 2, 18),
                d(2026, 3, 2),
                d(2026, 3, 4),
            ]
        );
    }

    #[test]
    fn weekly_count_of_ten_yields_ten_dates_a_week_apart() {
        let mut rule = rule_with(RecurrenceFrequency::Weekly, 1, d(2026, 1, 5));
        rule.count = Some(10);

        let dates = expand_rule(&rule, d(2026, 12, 31)).expect("expand");
        assert_eq!(dates.len(), 10);
        assert_eq!(dates.first(), Some(&d(2026, 1, 5)));
        assert_eq!(dates.last(), Some(&d(2026, 3, 9)));
        for pair in dates.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::days(7));
        }
    }

    #[test]
    fn weekly_never_emits_before_the_anchor() {
        // Anchor Wednesday with Monday in the day set: the anchor week's
        // Monday precedes the anchor and must not appear.
        let mut rule = rule_with(RecurrenceFrequency::Weekly, 1, d(2026, 1, 7));
        rule.by_day = Some(vec![1, 3]);

        let dates = expand_rule(&rule, d(2026, 1, 14)).expect("expand");
        assert_eq!(dates, vec![d(2026, 1, 7), d(2026, 1, 12), d(2026, 1, 14)]);
    }

    #[test]
    fn monthly_skips_months_without_the_day() {
        let rule = rule_with(RecurrenceFrequency::Monthly, 1, d(2026, 1, 31));

        let dates = expand_rule(&rule, d(2026, 5, 31)).expect("expand");
        assert_eq!(dates, vec![d(2026, 1, 31), d(2026, 3, 31), d(2026, 5, 31)]);
    }

    #[test]
    fn monthly_day_set_skips_days_before_anchor() {
        let mut rule = rule_with(RecurrenceFrequency::Monthly, 1, d(2026, 1, 10));
        rule.by_month_day = Some(vec![15, 1]);

        let dates = expand_rule(&rule, d(2026, 3, 31)).expect("expand");
        assert_eq!(
            dates,
            vec![
                d(2026, 1, 15),
                d(2026, 2, 1),
                d(2026, 2, 15),
                d(2026, 3, 1),
                d(2026, 3, 15),
            ]
        );
    }

    #[test]
    fn yearly_emits_feb_29_only_in_leap_years() {
        let rule = rule_with(RecurrenceFrequency::Yearly, 1, d(2024, 2, 29));

        let dates = expand_rule(&rule, d(2032, 12, 31)).expect("expand");
        assert_eq!(dates, vec![d(2024, 2, 29), d(2028, 2, 29), d(2032, 2, 29)]);
    }

    #[test]
    fn count_caps_the_series() {
        let mut rule = rule_with(RecurrenceFrequency::Daily, 1, d(2026, 1, 1));
        rule.count = Some(5);

        let dates = expand_rule(&rule, d(2026, 12, 31)).expect("expand");
        assert_eq!(dates.len(), 5);
        assert_eq!(dates.last(), Some(&d(2026, 1, 5)));
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let mut bad_day = rule_with(RecurrenceFrequency::Weekly, 1, d(2026, 1, 5));
        bad_day.by_day = Some(vec![7]);
        assert!(matches!(
            expand_rule(&bad_day, d(2026, 12, 31)),
            Err(CalendarError::Validation(_))
        ));

        let mut bad_month_day = rule_with(RecurrenceFrequency::Monthly, 1, d(2026, 1, 5));
        bad_month_day.by_month_day = Some(vec![0]);
        assert!(matches!(
            expand_rule(&bad_month_day, d(2026, 12, 31)),
            Err(CalendarError::Validation(_))
        ));

        let bad_interval = rule_with(RecurrenceFrequency::Daily, 0, d(2026, 1, 5));
        assert!(matches!(
            expand_rule(&bad_interval, d(2026, 12, 31)),
            Err(CalendarError::Validation(_))
        ));
    }

    #[test]
    fn oversized_intervals_are_rejected_not_walked() {
        for frequency in [
            RecurrenceFrequency::Daily,
            RecurrenceFrequency::Weekly,
            RecurrenceFrequency::Monthly,
            RecurrenceFrequency::Yearly,
        ] {
            let rule = rule_with(frequency, 2_000_000_000, d(2026, 1, 5));
            assert!(matches!(
                expand_rule(&rule, d(2126, 12, 31)),
                Err(CalendarError::Validation(_))
            ));
        }

        let at_cap = rule_with(RecurrenceFrequency::Daily, MAX_INTERVAL, d(2026, 1, 5));
        assert!(expand_rule(&at_cap, d(2026, 12, 31)).is_ok());
    }

    #[test]
    fn end_before_anchor_yields_nothing() {
        let mut rule = rule_with(RecurrenceFrequency::Daily, 1, d(2026, 6, 1));
        rule.end_date = Some(d(2026, 5, 1));

        let dates = expand_rule(&rule, d(2026, 12, 31)).expect("expand");
        assert!(dates.is_empty());
    }

    async fn seed_recurring_event(store: &MemoryStore, created_by: i64) -> i64 {
        let event = store
            .insert_event(NewCalendarEvent {
                title: "Standup".to_string(),
                description: None,
                location: None,
                start_time: Utc::now(),
                end_time: Utc::now() + Duration::minutes(30),
                all_day: false,
                event_type: Some("MEETING".to_string()),
                module: Some("operations".to_string()),
                visibility: "TEAM".to_string(),
                created_by,
                assigned_to: None,
                is_recurring: true,
            })
            .await
            .expect("seed event");
        event.id
    }

    fn generator(
        store: &Arc<MemoryStore>,
        history: &Arc<MemoryHistorySink>,
    ) -> InstanceGenerator<MemoryStore, MemoryHistorySink> {
        InstanceGenerator::new(store.clone(), history.clone())
    }

    fn daily_input(days: i64) -> RuleInput {
        let today = Utc::now().date_naive();
        RuleInput {
            frequency: RecurrenceFrequency::Daily,
            interval: 1,
            by_day: None,
            by_month_day: None,
            start_date: today,
            end_date: Some(today + Duration::days(days)),
            count: None,
        }
    }

    #[tokio::test]
    async fn generation_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let event_id = seed_recurring_event(&store, 1).await;
        let gen = generator(&store, &history);

        gen.update_recurrence_rule(1, event_id, daily_input(6))
            .await
            .expect("rule");
        // update_recurrence_rule already generated over the default horizon.
        let again = gen
            .generate_instances(event_id, DEFAULT_HORIZON_DAYS)
            .await
            .expect("regenerate");
        assert_eq!(again, 0);

        let instances = gen.list_instances(1, event_id).await.expect("list");
        assert_eq!(instances.len(), 7);
    }

    #[tokio::test]
    async fn cancelled_dates_stay_cancelled_through_regeneration() {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let event_id = seed_recurring_event(&store, 1).await;
        let gen = generator(&store, &history);

        gen.update_recurrence_rule(1, event_id, daily_input(4))
            .await
            .expect("rule");
        let victim = Utc::now().date_naive() + Duration::days(2);
        gen.cancel_instance(1, event_id, victim).await.expect("cancel");

        let created = gen
            .generate_instances(event_id, DEFAULT_HORIZON_DAYS)
            .await
            .expect("regenerate");
        assert_eq!(created, 0);

        let visible = gen.list_instances(1, event_id).await.expect("list");
        assert_eq!(visible.len(), 4);
        assert!(visible.iter().all(|i| i.instance_date != victim));

        let row = store
            .get_instance(event_id, victim)
            .await
            .expect("fetch")
            .expect("row kept");
        assert_eq!(row.status, "CANCELLED");
    }

    #[tokio::test]
    async fn modified_instances_keep_their_overrides() {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let event_id = seed_recurring_event(&store, 1).await;
        let gen = generator(&store, &history);

        gen.update_recurrence_rule(1, event_id, daily_input(3))
            .await
            .expect("rule");
        let target = Utc::now().date_naive() + Duration::days(1);
        gen.modify_instance(
            1,
            event_id,
            target,
            InstanceOverrides {
                title: Some("Moved standup".to_string()),
                location: Some("Room 2".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("modify");

        gen.generate_instances(event_id, DEFAULT_HORIZON_DAYS)
            .await
            .expect("regenerate");
        let row = store
            .get_instance(event_id, target)
            .await
            .expect("fetch")
            .expect("row");
        assert_eq!(row.status, "MODIFIED");
        assert_eq!(row.title.as_deref(), Some("Moved standup"));
        assert_eq!(row.modified_by, Some(1));

        let changes = history.list_event_changes(event_id).await.expect("history");
        let field = format!("instance:{}", target);
        assert!(changes
            .iter()
            .any(|c| c.action == "UPDATED" && c.field_name.as_deref() == Some(field.as_str())));
    }

    #[tokio::test]
    async fn assignee_updates_rule_but_cannot_delete_it() {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let event = store
            .insert_event(NewCalendarEvent {
                title: "Review".to_string(),
                description: None,
                location: None,
                start_time: Utc::now(),
                end_time: Utc::now() + Duration::hours(1),
                all_day: false,
                event_type: None,
                module: None,
                visibility: "TEAM".to_string(),
                created_by: 1,
                assigned_to: Some(5),
                is_recurring: true,
            })
            .await
            .expect("seed event");
        let gen = generator(&store, &history);

        gen.update_recurrence_rule(5, event.id, daily_input(2))
            .await
            .expect("assignee holds EDIT");

        let err = gen
            .delete_recurrence_rule(5, event.id)
            .await
            .expect_err("assignee lacks MANAGE");
        assert!(matches!(err, CalendarError::PermissionDenied(_)));

        gen.delete_recurrence_rule(1, event.id)
            .await
            .expect("creator deletes");
        assert!(store.get_rule(event.id).await.expect("rule fetch").is_none());
        assert!(store
            .list_instances(event.id)
            .await
            .expect("instances")
            .is_empty());
        let refreshed = store
            .get_event(event.id)
            .await
            .expect("event fetch")
            .expect("event");
        assert!(!refreshed.is_recurring);
    }

    #[tokio::test]
    async fn horizon_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let event_id = seed_recurring_event(&store, 1).await;
        let gen = generator(&store, &history);

        for days in [0, -1, MAX_HORIZON_DAYS + 1] {
            let err = gen
                .generate_instances(event_id, days)
                .await
                .expect_err("out-of-range horizon");
            assert!(matches!(err, CalendarError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn sweep_counts_failures_without_aborting() {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let healthy = seed_recurring_event(&store, 1).await;
        let orphan = seed_recurring_event(&store, 1).await;
        let gen = generator(&store, &history);

        gen.update_recurrence_rule(1, healthy, daily_input(2))
            .await
            .expect("rule");
        // `orphan` is flagged recurring but never got a rule.
        let report = gen
            .regenerate_all_instances(DEFAULT_HORIZON_DAYS)
            .await
            .expect("sweep");
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);

        let integrity = gen.check_recurrence_integrity().await.expect("integrity");
        assert_eq!(integrity.recurring_without_rule, vec![orphan]);
        assert!(integrity.rule_without_recurring_flag.is_empty());
        assert!(!integrity.is_clean());
    }

    #[tokio::test]
    async fn rejected_rule_updates_leave_the_stored_rule_intact() {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let event_id = seed_recurring_event(&store, 1).await;
        let gen = generator(&store, &history);

        gen.update_recurrence_rule(1, event_id, daily_input(3))
            .await
            .expect("good rule");

        let mut bad = daily_input(3);
        bad.interval = 2_000_000_000;
        let err = gen
            .update_recurrence_rule(1, event_id, bad)
            .await
            .expect_err("oversized interval");
        assert!(matches!(err, CalendarError::Validation(_)));

        let kept = store
            .get_rule(event_id)
            .await
            .expect("fetch")
            .expect("rule kept");
        assert_eq!(kept.interval, 1);

        let report = gen
            .regenerate_all_instances(DEFAULT_HORIZON_DAYS)
            .await
            .expect("sweep");
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn sweep_isolates_rules_it_cannot_expand() {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let healthy = seed_recurring_event(&store, 1).await;
        let poisoned = seed_recurring_event(&store, 1).await;
        let gen = generator(&store, &history);

        gen.update_recurrence_rule(1, healthy, daily_input(3))
            .await
            .expect("rule");
        // Planted directly in the store, past the service's validation.
        store
            .upsert_rule(NewRecurrenceRule {
                event_id: poisoned,
                frequency: "DAILY".to_string(),
                interval: 2_000_000_000,
                by_day: None,
                by_month_day: None,
                start_date: Utc::now().date_naive(),
                end_date: None,
                count: None,
                updated_at: Utc::now(),
            })
            .await
            .expect("plant rule");

        let report = gen
            .regenerate_all_instances(DEFAULT_HORIZON_DAYS)
            .await
            .expect("sweep");
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert!(!store
            .list_instances(healthy)
            .await
            .expect("instances")
            .is_empty());
    }

    #[tokio::test]
    async fn integrity_flags_rules_on_non_recurring_events() {
        let store = Arc::new(MemoryStore::new());
        let history = Arc::new(MemoryHistorySink::new());
        let event = store
            .insert_event(NewCalendarEvent {
                title: "One-off".to_string(),
                description: None,
                location: None,
                start_time: Utc::now(),
                end_time: Utc::now() + Duration::hours(1),
                all_day: false,
                event_type: None,
                module: None,
                visibility: "TEAM".to_string(),
                created_by: 1,
                assigned_to: None,
                is_recurring: false,
            })
            .await
            .expect("seed event");
        store
            .upsert_rule(NewRecurrenceRule {
                event_id: event.id,
                frequency: "DAILY".to_string(),
                interval: 1,
                by_day: None,
                by_month_day: None,
                start_date: Utc::now().date_naive(),
                end_date: None,
                count: None,
                updated_at: Utc::now(),
            })
            .await
            .expect("orphan rule");
        let gen = generator(&store, &history);

        let report = gen.check_recurrence_integrity().await.expect("integrity");
        assert_eq!(report.rule_without_recurring_flag, vec![event.id]);
    }
}
