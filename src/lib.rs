use spacetimedb::{
    ReducerContext, Identity, Local, Table, Timestamp, ScheduleAt,
    table, reducer, view, SpacetimeType,
};

mod error;
mod ledger;
mod lifecycle;
mod assessment;
mod store;
mod workflow;

// Import of the legacy browser-storage snapshot
mod restore;

use error::TutoringError;
use assessment::TemplateSource;
use ledger::RewardKind;
use lifecycle::RequestStatus;
use store::TutoringStore;
use workflow::{who, GradedAssessment};

// ==================== HELPER FUNCTIONS ====================

/// Resolve the caller's account identity from their session
fn session_account(ctx: &ReducerContext) -> Result<String, TutoringError> {
    ctx.db.session()
        .connection_id()
        .find(&ctx.sender)
        .map(|s| s.account_identity)
        .ok_or(TutoringError::NoSession)
}

/// Cancel the pending deadline for an assessment (idempotent)
fn cancel_assessment_deadline(ctx: &ReducerContext, assessment_id: u64) {
    let pending: Vec<u64> = ctx.db.assessment_deadline_schedule()
        .iter()
        .filter(|s| s.assessment_id == assessment_id)
        .map(|s| s.id)
        .collect();
    for id in pending {
        ctx.db.assessment_deadline_schedule().id().delete(&id);
    }
}

/// Reveal per-item correctness and stop the clock for a graded assessment
fn publish_grade(ctx: &ReducerContext, graded: &GradedAssessment) {
    let assessment_id = graded.session.id;
    let items: Vec<AssessmentItem> = ctx.db.assessment_item()
        .assessment_id()
        .filter(&assessment_id)
        .collect();
    for mut item in items {
        item.correct = graded.grade.per_item.get(item.position as usize).copied();
        ctx.db.assessment_item().id().update(item);
    }
    cancel_assessment_deadline(ctx, assessment_id);
}

// ==================== TABLES ====================

/// Session links ephemeral connection to an account
/// PRIVATE: Links connection identity to account email
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Account email this connection signed in as
    pub account_identity: String,

    /// When this session was created
    pub connected_at: Timestamp,
}

/// Balances and progression for one participant (learner or tutor)
/// PRIVATE: Clients read their own row through the my_account view
#[table(name = account)]
#[derive(Clone, Debug, PartialEq)]
pub struct Account {
    /// Email
    #[primary_key]
    pub identity: String,

    /// Shown to learners as the tutor's name
    pub display_name: String,

    pub silver_balance: u32,
    pub gold_balance: u32,
    pub badge_count: u32,

    /// Never decreases; drives badge minting
    pub completed_topic_count: u32,

    pub created_at: Timestamp,
    pub last_seen: Timestamp,
}

/// A learner's request for instruction on a topic
/// Public so tutors can browse pending requests
#[table(name = topic_request, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct TopicRequest {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// Learner who asked (credited on completion)
    #[index(btree)]
    pub learner_id: String,

    pub topic: String,

    pub status: RequestStatus,

    /// Accepting tutor's account (credited on completion)
    pub tutor_id: Option<String>,

    /// Tutor display name, set on accept
    pub tutor_reference: Option<String>,

    /// Meeting URI, required to accept
    pub meeting_reference: Option<String>,

    /// Learner identity attached for the tutor on accept
    pub learner_reference: Option<String>,

    pub requested_at: Timestamp,
    pub accepted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Gold spent on a reward; fulfilment happens outside this module
/// PRIVATE: Owners read their tokens through my_redemptions
#[table(name = redemption)]
#[derive(Clone, Debug, PartialEq)]
pub struct Redemption {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub account_identity: String,

    pub kind: RewardKind,

    pub gold_spent: u32,

    /// Opaque confirmation, e.g. GIFT-20240301-000001
    pub token: String,

    pub redeemed_at: Timestamp,
}

/// One attempt at the quiz gating a topic request
/// PRIVATE: Holds the answer key; learners read it through my_assessments
#[table(name = assessment_session)]
#[derive(Clone, Debug, PartialEq)]
pub struct AssessmentSession {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub request_id: u64,

    #[index(btree)]
    pub learner_id: String,

    pub topic: String,

    /// Correct option per item
    pub answer_key: Vec<u8>,

    /// Selected option per item (None = unanswered)
    pub answers: Vec<Option<u8>>,

    pub state: AssessmentState,

    pub started_at: Timestamp,

    /// started_at + time budget; auto-submit fires here
    pub deadline: Timestamp,

    pub correct_count: Option<u8>,
    pub passed: Option<bool>,
    pub graded_at: Option<Timestamp>,
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq)]
pub enum AssessmentState {
    Open,       // Accepting answers
    Submitted,  // Learner submitted
    Expired,    // Time budget ran out, auto-submitted
    Abandoned,  // Learner disconnected; never graded
}

impl AssessmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentState::Open => "open",
            AssessmentState::Submitted => "submitted",
            AssessmentState::Expired => "expired",
            AssessmentState::Abandoned => "abandoned",
        }
    }
}

/// Assessment as shown to its learner: everything but the answer key
#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub struct AssessmentSummary {
    pub id: u64,
    pub request_id: u64,
    pub topic: String,
    pub answers: Vec<Option<u8>>,
    pub state: AssessmentState,
    pub started_at: Timestamp,
    pub deadline: Timestamp,
    pub correct_count: Option<u8>,
    pub passed: Option<bool>,
    pub graded_at: Option<Timestamp>,
}

impl From<&AssessmentSession> for AssessmentSummary {
    fn from(session: &AssessmentSession) -> Self {
        Self {
            id: session.id,
            request_id: session.request_id,
            topic: session.topic.clone(),
            answers: session.answers.clone(),
            state: session.state,
            started_at: session.started_at,
            deadline: session.deadline,
            correct_count: session.correct_count,
            passed: session.passed,
            graded_at: session.graded_at,
        }
    }
}

/// Question as shown to the learner (no answer key)
#[table(name = assessment_item, public)]
pub struct AssessmentItem {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub assessment_id: u64,

    /// 0-based position in the assessment
    pub position: u8,

    pub prompt: String,

    pub options: Vec<String>,

    /// Filled in after grading
    pub correct: Option<bool>,
}

/// Schedule table for assessment time budgets
/// Row is deleted when the learner submits or disconnects first
#[table(name = assessment_deadline_schedule, scheduled(assessment_deadline))]
pub struct AssessmentDeadlineSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// Which assessment this deadline is for
    pub assessment_id: u64,

    /// When the assessment auto-submits
    pub scheduled_at: ScheduleAt,
}

/// Authorized identities that can call admin reducers (legacy import)
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

// ==================== VIEWS ====================

/// View: Returns only the current user's account
#[view(name = my_account, public)]
fn my_account(ctx: &spacetimedb::ViewContext) -> Option<Account> {
    let session = ctx.db.session().connection_id().find(ctx.sender)?;
    ctx.db.account().identity().find(&session.account_identity)
}

/// View: Current user's redemptions, with confirmation tokens
#[view(name = my_redemptions, public)]
fn my_redemptions(ctx: &spacetimedb::ViewContext) -> Vec<Redemption> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    ctx.db.redemption()
        .account_identity()
        .filter(&session.account_identity)
        .collect()
}

/// View: Current user's assessments and their results (answer key withheld)
#[view(name = my_assessments, public)]
fn my_assessments(ctx: &spacetimedb::ViewContext) -> Vec<AssessmentSummary> {
    let Some(session) = ctx.db.session().connection_id().find(ctx.sender) else {
        return Vec::new();
    };
    ctx.db.assessment_session()
        .learner_id()
        .filter(&session.account_identity)
        .map(|a| AssessmentSummary::from(&a))
        .collect()
}

// ==================== STORE ====================

impl TutoringStore for Local {
    fn find_account(&self, identity: &str) -> Option<Account> {
        self.account().identity().find(identity.to_string())
    }

    fn insert_account(&self, account: Account) -> Account {
        self.account().insert(account)
    }

    fn update_account(&self, account: Account) -> Account {
        self.account().identity().update(account)
    }

    fn find_request(&self, id: u64) -> Option<TopicRequest> {
        self.topic_request().id().find(id)
    }

    fn insert_request(&self, request: TopicRequest) -> TopicRequest {
        self.topic_request().insert(request)
    }

    fn update_request(&self, request: TopicRequest) -> TopicRequest {
        self.topic_request().id().update(request)
    }

    fn insert_redemption(&self, redemption: Redemption) -> Redemption {
        self.redemption().insert(redemption)
    }

    fn update_redemption(&self, redemption: Redemption) -> Redemption {
        self.redemption().id().update(redemption)
    }

    fn find_assessment(&self, id: u64) -> Option<AssessmentSession> {
        self.assessment_session().id().find(id)
    }

    fn insert_assessment(&self, session: AssessmentSession) -> AssessmentSession {
        self.assessment_session().insert(session)
    }

    fn update_assessment(&self, session: AssessmentSession) -> AssessmentSession {
        self.assessment_session().id().update(session)
    }

    fn assessments_for_request(&self, request_id: u64) -> Vec<AssessmentSession> {
        self.assessment_session().request_id().filter(&request_id).collect()
    }

    fn assessments_for_learner(&self, learner_id: &str) -> Vec<AssessmentSession> {
        self.assessment_session().learner_id().filter(&learner_id.to_string()).collect()
    }
}

// ==================== REDUCERS ====================

/// Sign in with an email. First sign-in creates the account with the starting grant.
/// There is no password check: identity is whatever the client claims.
#[reducer]
pub fn sign_in(ctx: &ReducerContext, email: String, display_name: Option<String>) -> Result<(), String> {
    let account = workflow::sign_in(&ctx.db, &email, display_name.as_deref(), ctx.timestamp)
        .map_err(|e| e.to_string())?;

    // Delete stale sessions: same account (unclean reconnect) OR same connection_id (prevents PK conflict)
    let stale_sessions: Vec<_> = ctx.db.session()
        .iter()
        .filter(|s| s.account_identity == account.identity || s.connection_id == ctx.sender)
        .map(|s| s.connection_id)
        .collect();
    for conn_id in stale_sessions {
        ctx.db.session().connection_id().delete(&conn_id);
    }

    ctx.db.session().insert(Session {
        connection_id: ctx.sender,
        account_identity: account.identity.clone(),
        connected_at: ctx.timestamp,
    });

    log::info!("[SESSION] created account={}", who(&account.identity));
    Ok(())
}

/// Clean up session when the client disconnects.
/// Open assessments are abandoned so their deadline can't credit anyone later.
#[reducer(client_disconnected)]
pub fn on_disconnect(ctx: &ReducerContext) {
    let Some(session) = ctx.db.session().connection_id().find(&ctx.sender) else {
        return;
    };

    for assessment_id in workflow::abandon_open_assessments(&ctx.db, &session.account_identity) {
        cancel_assessment_deadline(ctx, assessment_id);
    }

    let session_duration_secs = ctx.timestamp.duration_since(session.connected_at)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    log::info!("[DISCONNECT] account={} session_min:{:.1}",
        who(&session.account_identity), session_duration_secs as f32 / 60.0);

    ctx.db.session().connection_id().delete(&ctx.sender);
}

/// Learner requests a topic. `selection` is a catalog entry or "custom",
/// in which case `custom_text` is used.
#[reducer]
pub fn request_topic(ctx: &ReducerContext, selection: String, custom_text: String) -> Result<(), String> {
    let learner_id = session_account(ctx).map_err(|e| e.to_string())?;
    workflow::request_topic(&ctx.db, &learner_id, &selection, &custom_text, ctx.timestamp)
        .map_err(|e| {
            log::warn!("request_topic: {} learner={}", e, who(&learner_id));
            e.to_string()
        })?;
    Ok(())
}

/// Tutor accepts a pending request and attaches a meeting link
#[reducer]
pub fn accept_request(ctx: &ReducerContext, request_id: u64, meeting_reference: String) -> Result<(), String> {
    let tutor_id = session_account(ctx).map_err(|e| e.to_string())?;
    workflow::on_tutor_accepted(&ctx.db, request_id, &tutor_id, &meeting_reference, ctx.timestamp)
        .map_err(|e| {
            log::warn!("accept_request: {} request={} tutor={}", e, request_id, who(&tutor_id));
            e.to_string()
        })?;
    Ok(())
}

/// Learner starts the assessment for an accepted request.
/// A failed attempt can be retried by starting again.
#[reducer]
pub fn start_assessment(ctx: &ReducerContext, request_id: u64) -> Result<(), String> {
    let learner_id = session_account(ctx).map_err(|e| e.to_string())?;
    let mut source = TemplateSource::new(ctx.rng());
    let (session, items) = workflow::start_assessment(&ctx.db, &mut source, &learner_id, request_id, ctx.timestamp)
        .map_err(|e| {
            log::warn!("start_assessment: {} request={} learner={}", e, request_id, who(&learner_id));
            e.to_string()
        })?;

    for (position, item) in items.into_iter().enumerate() {
        ctx.db.assessment_item().insert(AssessmentItem {
            id: 0, // auto_inc
            assessment_id: session.id,
            position: position as u8,
            prompt: item.prompt,
            options: item.options,
            correct: None,
        });
    }

    ctx.db.assessment_deadline_schedule().insert(AssessmentDeadlineSchedule {
        id: 0, // auto_inc
        assessment_id: session.id,
        scheduled_at: ScheduleAt::Time(session.deadline.into()),
    });
    Ok(())
}

/// Record (or change) the answer to one item of an open assessment
#[reducer]
pub fn answer_item(ctx: &ReducerContext, assessment_id: u64, item: u8, option: u8) -> Result<(), String> {
    let learner_id = session_account(ctx).map_err(|e| e.to_string())?;
    workflow::answer_item(&ctx.db, &learner_id, assessment_id, item, option, ctx.timestamp)
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Learner submits; unanswered items count as wrong
#[reducer]
pub fn submit_assessment(ctx: &ReducerContext, assessment_id: u64) -> Result<(), String> {
    let learner_id = session_account(ctx).map_err(|e| e.to_string())?;
    let graded = workflow::submit_assessment(&ctx.db, &learner_id, assessment_id, ctx.timestamp)
        .map_err(|e| {
            log::warn!("submit_assessment: {} assessment={}", e, assessment_id);
            e.to_string()
        })?;
    publish_grade(ctx, &graded);
    Ok(())
}

/// Time budget ran out (scheduled reducer) - auto-submit whatever was recorded
#[reducer]
pub fn assessment_deadline(ctx: &ReducerContext, schedule: AssessmentDeadlineSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call assessment_deadline", ctx.sender);
        return;
    }

    match workflow::expire_assessment(&ctx.db, schedule.assessment_id, ctx.timestamp) {
        Ok(Some(graded)) => publish_grade(ctx, &graded),
        Ok(None) => {}
        Err(e) => log::warn!("Deadline for assessment {} not applied: {}", schedule.assessment_id, e),
    }

    // Clean up schedule row after handling event
    ctx.db.assessment_deadline_schedule().id().delete(&schedule.id);
}

/// Trade silver for gold at 10:1 (multiples of 10 only)
#[reducer]
pub fn convert_silver_to_gold(ctx: &ReducerContext, amount: u32) -> Result<(), String> {
    let identity = session_account(ctx).map_err(|e| e.to_string())?;
    workflow::convert_silver_to_gold(&ctx.db, &identity, amount).map_err(|e| e.to_string())?;
    Ok(())
}

/// Trade one badge for 25 silver
#[reducer]
pub fn convert_badge_to_silver(ctx: &ReducerContext) -> Result<(), String> {
    let identity = session_account(ctx).map_err(|e| e.to_string())?;
    workflow::convert_badge_to_silver(&ctx.db, &identity).map_err(|e| e.to_string())?;
    Ok(())
}

/// Buy gold 1:1 with dollars (no payment processing)
#[reducer]
pub fn purchase_gold(ctx: &ReducerContext, usd_amount: u32) -> Result<(), String> {
    let identity = session_account(ctx).map_err(|e| e.to_string())?;
    workflow::purchase_gold(&ctx.db, &identity, usd_amount).map_err(|e| e.to_string())?;
    Ok(())
}

/// Spend 10 gold on a reward ("giftcard", "cashback", "coupon")
#[reducer]
pub fn redeem_reward(ctx: &ReducerContext, reward_kind: String) -> Result<(), String> {
    let identity = session_account(ctx).map_err(|e| e.to_string())?;
    workflow::redeem_reward(&ctx.db, &identity, &reward_kind, ctx.timestamp).map_err(|e| e.to_string())?;
    Ok(())
}

/// Initialize module
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // Add module owner to authorized workers for admin reducer access control
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    log::info!("LearnCoin module initialized successfully");
}
