// Topic request state machine: Pending -> Accepted -> Completed.
// No transition leaves Completed and there is no cancellation state.

use spacetimedb::{SpacetimeType, Timestamp};

use crate::error::TutoringError;
use crate::ledger::can_teach;
use crate::{Account, TopicRequest};

/// Topics offered in the learner's picker. Free text is allowed too.
pub const TOPIC_CATALOG: [&str; 10] = [
    "Linear Algebra",
    "Calculus I",
    "Calculus II",
    "Statistics",
    "Physics I",
    "Chemistry",
    "Programming Basics",
    "Data Structures",
    "Machine Learning",
    "Web Development",
];

/// Picker value meaning "use the free-text field instead"
pub const CUSTOM_TOPIC_SELECTION: &str = "custom";

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,   // Waiting for a tutor
    Accepted,  // Tutor and meeting link attached, assessment may be taken
    Completed, // Learner passed; both sides credited
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "completed" => Some(RequestStatus::Completed),
            _ => None,
        }
    }
}

/// What a graded assessment did to its request
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Assessment failed; request stays Accepted and may be retried
    Unchanged,
    /// Request moved to Completed; caller credits both accounts
    Completed(TopicRequest),
}

pub fn is_catalog_topic(topic: &str) -> bool {
    TOPIC_CATALOG.iter().any(|t| t.eq_ignore_ascii_case(topic.trim()))
}

/// Turn the picker selection (catalog entry or "custom") into the topic text
pub fn resolve_topic(selection: &str, custom_text: &str) -> Result<String, TutoringError> {
    let topic = if selection.trim().eq_ignore_ascii_case(CUSTOM_TOPIC_SELECTION) {
        custom_text
    } else {
        selection
    };
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(TutoringError::EmptyTopic);
    }
    Ok(topic.to_string())
}

/// New Pending request. `id` is 0 until the store assigns one.
pub fn create_request(learner_id: &str, topic: &str, now: Timestamp) -> Result<TopicRequest, TutoringError> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(TutoringError::EmptyTopic);
    }
    Ok(TopicRequest {
        id: 0, // auto_inc
        learner_id: learner_id.to_string(),
        topic: topic.to_string(),
        status: RequestStatus::Pending,
        tutor_id: None,
        tutor_reference: None,
        meeting_reference: None,
        learner_reference: None,
        requested_at: now,
        accepted_at: None,
        completed_at: None,
    })
}

/// Pending -> Accepted.
///
/// The badge gate is checked before anything else, so a tutor without a
/// badge is told so even when the meeting link is also missing.
pub fn accept_request(
    request: &TopicRequest,
    tutor: &Account,
    meeting_reference: &str,
    now: Timestamp,
) -> Result<TopicRequest, TutoringError> {
    if !can_teach(tutor) {
        return Err(TutoringError::TutorNotEligible(tutor.identity.clone()));
    }
    let meeting_reference = meeting_reference.trim();
    if meeting_reference.is_empty() {
        return Err(TutoringError::MissingMeetingReference);
    }
    if request.status != RequestStatus::Pending {
        return Err(TutoringError::AlreadyAccepted(request.id));
    }

    let mut next = request.clone();
    next.status = RequestStatus::Accepted;
    next.tutor_id = Some(tutor.identity.clone());
    next.tutor_reference = Some(tutor.display_name.clone());
    next.meeting_reference = Some(meeting_reference.to_string());
    next.learner_reference = Some(request.learner_id.clone());
    next.accepted_at = Some(now);
    Ok(next)
}

/// Accepted -> Completed on a pass. A failed attempt changes nothing.
/// Completing twice is rejected, which keeps duplicate deliveries from
/// double-crediting the ledger.
pub fn complete_request(request: &TopicRequest, passed: bool, now: Timestamp) -> Result<CompletionOutcome, TutoringError> {
    if !passed {
        return Ok(CompletionOutcome::Unchanged);
    }
    if request.status != RequestStatus::Accepted {
        return Err(TutoringError::NotAccepted(request.id));
    }

    let mut next = request.clone();
    next.status = RequestStatus::Completed;
    next.completed_at = Some(now);
    Ok(CompletionOutcome::Completed(next))
}

/// Tutor and meeting references are present exactly when the request has
/// been accepted (or completed).
pub fn references_consistent(request: &TopicRequest) -> bool {
    let attached = request.tutor_id.is_some()
        && request.tutor_reference.is_some()
        && request.meeting_reference.is_some();
    let detached = request.tutor_id.is_none()
        && request.tutor_reference.is_none()
        && request.meeting_reference.is_none();
    match request.status {
        RequestStatus::Pending => detached,
        RequestStatus::Accepted | RequestStatus::Completed => attached,
    }
}
