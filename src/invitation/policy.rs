use crate::shared::models::InvitationSettings;

/// One user's auto-accept preferences, lifted out of the settings row into
/// plain sets so the evaluation itself needs no storage.
#[derive(Debug, Clone, Default)]
pub struct AutoAcceptPolicy {
    pub accept_all: bool,
    pub from_organizers: Vec<i64>,
    pub event_types: Vec<String>,
    pub modules: Vec<String>,
}

impl From<&InvitationSettings> for AutoAcceptPolicy {
    fn from(settings: &InvitationSettings) -> Self {
        AutoAcceptPolicy {
            accept_all: settings.auto_accept_all,
            from_organizers: settings.auto_accept_from_users.clone().unwrap_or_default(),
            event_types: settings.auto_accept_event_types.clone().unwrap_or_default(),
            modules: settings.auto_accept_modules.clone().unwrap_or_default(),
        }
    }
}

/// Facts about the invitation the policy can match on. The organizer here
/// is the user sending the invitation, not necessarily the event creator.
#[derive(Debug, Clone, Default)]
pub struct EventPolicyContext {
    pub organizer_id: i64,
    pub event_type: Option<String>,
    pub module: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoAcceptDecision {
    pub auto_accept: bool,
    pub reason: Option<String>,
}

impl AutoAcceptDecision {
    fn declined() -> Self {
        AutoAcceptDecision {
            auto_accept: false,
            reason: None,
        }
    }

    fn accepted(reason: String) -> Self {
        AutoAcceptDecision {
            auto_accept: true,
            reason: Some(reason),
        }
    }
}

/// First-match evaluation: the blanket flag, then the organizer list, then
/// the event-type list, then the module list. The reason string is stored
/// on the invitation and later surfaces in its history.
pub fn evaluate_auto_accept(
    policy: &AutoAcceptPolicy,
    ctx: &EventPolicyContext,
) -> AutoAcceptDecision {
    if policy.accept_all {
        return AutoAcceptDecision::accepted("User setting: auto-accept all".to_string());
    }
    if policy.from_organizers.contains(&ctx.organizer_id) {
        return AutoAcceptDecision::accepted("User setting: auto-accept from organizer".to_string());
    }
    if let Some(event_type) = &ctx.event_type {
        if policy.event_types.iter().any(|t| t == event_type) {
            return AutoAcceptDecision::accepted(format!(
                "User setting: auto-accept {} events",
                event_type
            ));
        }
    }
    if let Some(module) = &ctx.module {
        if policy.modules.iter().any(|m| m == module) {
            return AutoAcceptDecision::accepted(format!(
                "User setting: auto-accept {} events",
                module
            ));
        }
    }
    AutoAcceptDecision::declined()
}
