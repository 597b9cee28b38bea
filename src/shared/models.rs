use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Access level on a calendar event. Levels form a total order; holding a
/// level satisfies any requirement at or below it. The ordering lives in
/// `rank()` and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    View,
    Edit,
    Delete,
    Manage,
}

impl PermissionLevel {
    pub const fn rank(&self) -> u8 {
        match self {
            PermissionLevel::View => 1,
            PermissionLevel::Edit => 2,
            PermissionLevel::Delete => 3,
            PermissionLevel::Manage => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::View => "VIEW",
            PermissionLevel::Edit => "EDIT",
            PermissionLevel::Delete => "DELETE",
            PermissionLevel::Manage => "MANAGE",
        }
    }

    /// Rank of a stored level string. Unknown strings rank 0 and therefore
    /// never satisfy any requirement.
    pub fn rank_of(s: &str) -> u8 {
        s.parse::<PermissionLevel>().map(|l| l.rank()).unwrap_or(0)
    }
}

impl Ord for PermissionLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for PermissionLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIEW" => Ok(PermissionLevel::View),
            "EDIT" => Ok(PermissionLevel::Edit),
            "DELETE" => Ok(PermissionLevel::Delete),
            "MANAGE" => Ok(PermissionLevel::Manage),
            other => Err(format!("unknown permission level: {}", other)),
        }
    }
}

/// Event-level disclosure policy controlling default VIEW access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Private,
    Team,
    Company,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "PRIVATE",
            Visibility::Team => "TEAM",
            Visibility::Company => "COMPANY",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIVATE" => Ok(Visibility::Private),
            "TEAM" => Ok(Visibility::Team),
            "COMPANY" => Ok(Visibility::Company),
            other => Err(format!("unknown visibility: {}", other)),
        }
    }
}

/// Kind of subject a permission grant targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantType {
    User,
    Role,
    Team,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::User => "USER",
            GrantType::Role => "ROLE",
            GrantType::Team => "TEAM",
        }
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(GrantType::User),
            "ROLE" => Ok(GrantType::Role),
            "TEAM" => Ok(GrantType::Team),
            other => Err(format!("unknown grant type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceFrequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrenceFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceFrequency::Daily => "DAILY",
            RecurrenceFrequency::Weekly => "WEEKLY",
            RecurrenceFrequency::Monthly => "MONTHLY",
            RecurrenceFrequency::Yearly => "YEARLY",
        }
    }
}

impl FromStr for RecurrenceFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAILY" => Ok(RecurrenceFrequency::Daily),
            "WEEKLY" => Ok(RecurrenceFrequency::Weekly),
            "MONTHLY" => Ok(RecurrenceFrequency::Monthly),
            "YEARLY" => Ok(RecurrenceFrequency::Yearly),
            other => Err(format!("unknown recurrence frequency: {}", other)),
        }
    }
}

/// Status of a materialized occurrence row. `Generated` rows are plain
/// projections of the rule; `Modified` and `Cancelled` rows are exceptions
/// and are never touched by a regeneration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Generated,
    Modified,
    Cancelled,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Generated => "GENERATED",
            InstanceStatus::Modified => "MODIFIED",
            InstanceStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GENERATED" => Ok(InstanceStatus::Generated),
            "MODIFIED" => Ok(InstanceStatus::Modified),
            "CANCELLED" => Ok(InstanceStatus::Cancelled),
            other => Err(format!("unknown instance status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteeType {
    User,
    Client,
    External,
}

impl InviteeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteeType::User => "USER",
            InviteeType::Client => "CLIENT",
            InviteeType::External => "EXTERNAL",
        }
    }
}

impl FromStr for InviteeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(InviteeType::User),
            "CLIENT" => Ok(InviteeType::Client),
            "EXTERNAL" => Ok(InviteeType::External),
            other => Err(format!("unknown invitee type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationRole {
    Organizer,
    Required,
    Optional,
    Observer,
}

impl InvitationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationRole::Organizer => "ORGANIZER",
            InvitationRole::Required => "REQUIRED",
            InvitationRole::Optional => "OPTIONAL",
            InvitationRole::Observer => "OBSERVER",
        }
    }
}

impl FromStr for InvitationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORGANIZER" => Ok(InvitationRole::Organizer),
            "REQUIRED" => Ok(InvitationRole::Required),
            "OPTIONAL" => Ok(InvitationRole::Optional),
            "OBSERVER" => Ok(InvitationRole::Observer),
            other => Err(format!("unknown invitation role: {}", other)),
        }
    }
}

/// Invitation lifecycle state. `Draft` and `Pending` are the only states an
/// ordinary actor can move out of; everything else is terminal unless an
/// admin override forces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationStatus {
    Draft,
    Pending,
    Accepted,
    Declined,
    AutoAccepted,
    Cancelled,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Draft => "DRAFT",
            InvitationStatus::Pending => "PENDING",
            InvitationStatus::Accepted => "ACCEPTED",
            InvitationStatus::Declined => "DECLINED",
            InvitationStatus::AutoAccepted => "AUTO_ACCEPTED",
            InvitationStatus::Cancelled => "CANCELLED",
            InvitationStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Draft | InvitationStatus::Pending)
    }
}

impl FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(InvitationStatus::Draft),
            "PENDING" => Ok(InvitationStatus::Pending),
            "ACCEPTED" => Ok(InvitationStatus::Accepted),
            "DECLINED" => Ok(InvitationStatus::Declined),
            "AUTO_ACCEPTED" => Ok(InvitationStatus::AutoAccepted),
            "CANCELLED" => Ok(InvitationStatus::Cancelled),
            "EXPIRED" => Ok(InvitationStatus::Expired),
            other => Err(format!("unknown invitation status: {}", other)),
        }
    }
}

/// The two answers an invitee can give to a pending invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationResponse {
    Accepted,
    Declined,
}

impl InvitationResponse {
    pub fn as_status(&self) -> InvitationStatus {
        match self {
            InvitationResponse::Accepted => InvitationStatus::Accepted,
            InvitationResponse::Declined => InvitationStatus::Declined,
        }
    }
}

/// Terminal state an admin override forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideAction {
    Accept,
    Decline,
    Cancel,
}

impl OverrideAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideAction::Accept => "ACCEPT",
            OverrideAction::Decline => "DECLINE",
            OverrideAction::Cancel => "CANCEL",
        }
    }

    pub fn target_status(&self) -> InvitationStatus {
        match self {
            OverrideAction::Accept => InvitationStatus::Accepted,
            OverrideAction::Decline => InvitationStatus::Declined,
            OverrideAction::Cancel => InvitationStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = calendar_events)]
pub struct CalendarEvent {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub all_day: bool,
    pub event_type: Option<String>,
    pub module: Option<String>,
    pub visibility: String,
    pub created_by: i64,
    pub assigned_to: Option<i64>,
    pub is_recurring: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = calendar_events)]
pub struct NewCalendarEvent {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub all_day: bool,
    pub event_type: Option<String>,
    pub module: Option<String>,
    pub visibility: String,
    pub created_by: i64,
    pub assigned_to: Option<i64>,
    pub is_recurring: bool,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = calendar_event_permissions)]
pub struct PermissionGrant {
    pub id: i64,
    pub event_id: i64,
    pub grant_type: String,
    pub grantee_id: i64,
    pub permission: String,
    pub granted_by: i64,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = calendar_event_permissions)]
pub struct NewPermissionGrant {
    pub event_id: i64,
    pub grant_type: String,
    pub grantee_id: i64,
    pub permission: String,
    pub granted_by: i64,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = calendar_recurrence_rules)]
pub struct RecurrenceRule {
    pub id: i64,
    pub event_id: i64,
    pub frequency: String,
    pub interval: i32,
    pub by_day: Option<Vec<i32>>,
    pub by_month_day: Option<Vec<i32>>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = calendar_recurrence_rules)]
pub struct NewRecurrenceRule {
    pub event_id: i64,
    pub frequency: String,
    pub interval: i32,
    pub by_day: Option<Vec<i32>>,
    pub by_month_day: Option<Vec<i32>>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub count: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = calendar_event_instances)]
pub struct EventInstance {
    pub id: i64,
    pub parent_event_id: i64,
    pub instance_date: NaiveDate,
    pub status: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub assigned_to: Option<i64>,
    pub modified_by: Option<i64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = calendar_event_instances)]
pub struct NewEventInstance {
    pub parent_event_id: i64,
    pub instance_date: NaiveDate,
    pub status: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub assigned_to: Option<i64>,
    pub modified_by: Option<i64>,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = calendar_invitations)]
pub struct Invitation {
    pub id: i64,
    pub event_id: i64,
    pub invitee_type: String,
    pub user_id: Option<i64>,
    pub client_id: Option<i64>,
    pub external_email: Option<String>,
    pub external_name: Option<String>,
    pub role: String,
    pub status: String,
    pub auto_accept: bool,
    pub auto_accept_reason: Option<String>,
    pub message: Option<String>,
    pub invited_by: i64,
    pub sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub admin_override: bool,
    pub overridden_by: Option<i64>,
    pub override_reason: Option<String>,
    pub overridden_at: Option<DateTime<Utc>>,
    pub participant_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invitation {
    pub fn parsed_status(&self) -> Option<InvitationStatus> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = calendar_invitations)]
pub struct NewInvitation {
    pub event_id: i64,
    pub invitee_type: String,
    pub user_id: Option<i64>,
    pub client_id: Option<i64>,
    pub external_email: Option<String>,
    pub external_name: Option<String>,
    pub role: String,
    pub status: String,
    pub auto_accept: bool,
    pub auto_accept_reason: Option<String>,
    pub message: Option<String>,
    pub invited_by: i64,
    pub sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update applied to an invitation row. `None` fields are left
/// untouched; `updated_at` is always restamped.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = calendar_invitations)]
pub struct InvitationChanges {
    pub status: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub admin_override: Option<bool>,
    pub overridden_by: Option<i64>,
    pub override_reason: Option<String>,
    pub overridden_at: Option<DateTime<Utc>>,
    pub participant_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl InvitationChanges {
    pub fn new() -> Self {
        InvitationChanges {
            status: None,
            sent_at: None,
            responded_at: None,
            expires_at: None,
            admin_override: None,
            overridden_by: None,
            override_reason: None,
            overridden_at: None,
            participant_id: None,
            updated_at: Utc::now(),
        }
    }
}

impl Default for InvitationChanges {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = calendar_invitation_settings)]
pub struct InvitationSettings {
    pub id: i64,
    pub user_id: i64,
    pub auto_accept_all: bool,
    pub auto_accept_from_users: Option<Vec<i64>>,
    pub auto_accept_event_types: Option<Vec<String>>,
    pub auto_accept_modules: Option<Vec<String>>,
    pub notify_on_invitation: bool,
    pub notify_on_auto_accept: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = calendar_invitation_settings)]
pub struct NewInvitationSettings {
    pub user_id: i64,
    pub auto_accept_all: bool,
    pub auto_accept_from_users: Option<Vec<i64>>,
    pub auto_accept_event_types: Option<Vec<String>>,
    pub auto_accept_modules: Option<Vec<String>>,
    pub notify_on_invitation: bool,
    pub notify_on_auto_accept: bool,
}

impl NewInvitationSettings {
    /// Safe defaults used when a user touches their settings for the first
    /// time: nothing auto-accepts, everything notifies.
    pub fn defaults_for(user_id: i64) -> Self {
        NewInvitationSettings {
            user_id,
            auto_accept_all: false,
            auto_accept_from_users: None,
            auto_accept_event_types: None,
            auto_accept_modules: None,
            notify_on_invitation: true,
            notify_on_auto_accept: true,
        }
    }
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = calendar_invitation_settings)]
pub struct InvitationSettingsChanges {
    pub auto_accept_all: Option<bool>,
    pub auto_accept_from_users: Option<Vec<i64>>,
    pub auto_accept_event_types: Option<Vec<String>>,
    pub auto_accept_modules: Option<Vec<String>>,
    pub notify_on_invitation: Option<bool>,
    pub notify_on_auto_accept: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = calendar_event_participants)]
pub struct EventParticipant {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub role: String,
    pub response_status: String,
    pub notify_on_creation: bool,
    pub notify_on_update: bool,
    pub added_by: i64,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = calendar_event_participants)]
pub struct NewEventParticipant {
    pub event_id: i64,
    pub user_id: i64,
    pub role: String,
    pub response_status: String,
    pub notify_on_creation: bool,
    pub notify_on_update: bool,
    pub added_by: i64,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = calendar_event_history)]
pub struct EventHistoryRow {
    pub id: i64,
    pub event_id: i64,
    pub action: String,
    pub field_name: Option<String>,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub performed_by: Option<i64>,
    pub checksum: String,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = calendar_event_history)]
pub struct NewEventHistoryRow {
    pub event_id: i64,
    pub action: String,
    pub field_name: Option<String>,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub performed_by: Option<i64>,
    pub checksum: String,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize)]
#[diesel(table_name = calendar_invitation_history)]
pub struct InvitationHistoryRow {
    pub id: i64,
    pub invitation_id: i64,
    pub action: String,
    pub performed_by: Option<i64>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub checksum: String,
    pub performed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = calendar_invitation_history)]
pub struct NewInvitationHistoryRow {
    pub invitation_id: i64,
    pub action: String,
    pub performed_by: Option<i64>,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub checksum: String,
    pub performed_at: DateTime<Utc>,
}

pub mod schema {
    diesel::table! {
        calendar_events (id) {
            id -> Int8,
            title -> Text,
            description -> Nullable<Text>,
            location -> Nullable<Text>,
            start_time -> Timestamptz,
            end_time -> Timestamptz,
            all_day -> Bool,
            event_type -> Nullable<Text>,
            module -> Nullable<Text>,
            visibility -> Text,
            created_by -> Int8,
            assigned_to -> Nullable<Int8>,
            is_recurring -> Bool,
            deleted_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        calendar_event_permissions (id) {
            id -> Int8,
            event_id -> Int8,
            grant_type -> Text,
            grantee_id -> Int8,
            permission -> Text,
            granted_by -> Int8,
            granted_at -> Timestamptz,
        }
    }

    diesel::table! {
        calendar_recurrence_rules (id) {
            id -> Int8,
            event_id -> Int8,
            frequency -> Text,
            interval -> Int4,
            by_day -> Nullable<Array<Int4>>,
            by_month_day -> Nullable<Array<Int4>>,
            start_date -> Date,
            end_date -> Nullable<Date>,
            count -> Nullable<Int4>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        calendar_event_instances (id) {
            id -> Int8,
            parent_event_id -> Int8,
            instance_date -> Date,
            status -> Text,
            title -> Nullable<Text>,
            description -> Nullable<Text>,
            location -> Nullable<Text>,
            assigned_to -> Nullable<Int8>,
            modified_by -> Nullable<Int8>,
            modified_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        calendar_invitations (id) {
            id -> Int8,
            event_id -> Int8,
            invitee_type -> Text,
            user_id -> Nullable<Int8>,
            client_id -> Nullable<Int8>,
            external_email -> Nullable<Text>,
            external_name -> Nullable<Text>,
            role -> Text,
            status -> Text,
            auto_accept -> Bool,
            auto_accept_reason -> Nullable<Text>,
            message -> Nullable<Text>,
            invited_by -> Int8,
            sent_at -> Nullable<Timestamptz>,
            responded_at -> Nullable<Timestamptz>,
            expires_at -> Nullable<Timestamptz>,
            admin_override -> Bool,
            overridden_by -> Nullable<Int8>,
            override_reason -> Nullable<Text>,
            overridden_at -> Nullable<Timestamptz>,
            participant_id -> Nullable<Int8>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        calendar_invitation_settings (id) {
            id -> Int8,
            user_id -> Int8,
            auto_accept_all -> Bool,
            auto_accept_from_users -> Nullable<Array<Int8>>,
            auto_accept_event_types -> Nullable<Array<Text>>,
            auto_accept_modules -> Nullable<Array<Text>>,
            notify_on_invitation -> Bool,
            notify_on_auto_accept -> Bool,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        calendar_event_participants (id) {
            id -> Int8,
            event_id -> Int8,
            user_id -> Int8,
            role -> Text,
            response_status -> Text,
            notify_on_creation -> Bool,
            notify_on_update -> Bool,
            added_by -> Int8,
            responded_at -> Nullable<Timestamptz>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        calendar_event_history (id) {
            id -> Int8,
            event_id -> Int8,
            action -> Text,
            field_name -> Nullable<Text>,
            previous_value -> Nullable<Text>,
            new_value -> Nullable<Text>,
            reason -> Nullable<Text>,
            performed_by -> Nullable<Int8>,
            checksum -> Text,
            performed_at -> Timestamptz,
        }
    }

    diesel::table! {
        calendar_invitation_history (id) {
            id -> Int8,
            invitation_id -> Int8,
            action -> Text,
            performed_by -> Nullable<Int8>,
            notes -> Nullable<Text>,
            metadata -> Nullable<Jsonb>,
            checksum -> Text,
            performed_at -> Timestamptz,
        }
    }

    diesel::allow_tables_to_appear_in_same_query!(
        calendar_events,
        calendar_event_permissions,
        calendar_recurrence_rules,
        calendar_event_instances,
        calendar_invitations,
        calendar_invitation_settings,
        calendar_event_participants,
        calendar_event_history,
        calendar_invitation_history,
    );
}

pub use schema::*;
