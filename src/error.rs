use thiserror::Error;

/// Every way a ledger, lifecycle or assessment operation can be rejected.
/// A rejected operation leaves all prior state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TutoringError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(u32),

    #[error("Amount {0} is not a multiple of 10")]
    NotMultipleOfTen(u32),

    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u32, required: u32 },

    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("A meeting link is required to accept a request")]
    MissingMeetingReference,

    #[error("Tutor {0} needs at least one badge to teach")]
    TutorNotEligible(String),

    #[error("Request {0} has already been accepted")]
    AlreadyAccepted(u64),

    #[error("Request {0} is not in the accepted state")]
    NotAccepted(u64),

    #[error("Email must not be empty")]
    MissingIdentity,

    #[error("No session found - sign in first")]
    NoSession,

    #[error("Account not found: {0}")]
    UnknownAccount(String),

    #[error("Topic request not found: {0}")]
    UnknownRequest(u64),

    #[error("Assessment not found: {0}")]
    UnknownAssessment(u64),

    #[error("Request {0} belongs to another learner")]
    NotRequestLearner(u64),

    #[error("Request {0} already has an open assessment")]
    AssessmentInProgress(u64),

    #[error("Assessment {0} is already closed")]
    AssessmentClosed(u64),

    #[error("Invalid answer: item {item}, option {option}")]
    InvalidAnswer { item: u8, option: u8 },

    #[error("Malformed assessment content: {0}")]
    MalformedAssessment(String),

    #[error("Unknown reward kind: {0}")]
    UnknownRewardKind(String),

    #[error("Invalid import: {0}")]
    InvalidImport(String),
}
