// Account and request workflows. Each function loads what it needs from the
// store, runs the pure ledger/lifecycle rules, and writes back only once every
// check has passed. Reducers in lib.rs are thin wrappers around these.

use spacetimedb::Timestamp;

use crate::assessment::{self, AssessmentSource, Grade, QuizItem};
use crate::error::TutoringError;
use crate::ledger::{self, RewardKind, Track};
use crate::lifecycle::{self, CompletionOutcome, RequestStatus};
use crate::store::TutoringStore;
use crate::{Account, AssessmentSession, AssessmentState, Redemption, TopicRequest};

/// Both sides of a completed session after crediting
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCredit {
    pub request: TopicRequest,
    pub learner: Account,
    pub tutor: Account,
    pub learner_badge: bool,
    pub tutor_badge: bool,
}

/// Log-friendly handle for an identity (drops the email domain)
pub fn who(identity: &str) -> &str {
    identity.split('@').next().unwrap_or(identity)
}

fn load_account<S: TutoringStore>(store: &S, identity: &str) -> Result<Account, TutoringError> {
    store
        .find_account(identity)
        .ok_or_else(|| TutoringError::UnknownAccount(identity.to_string()))
}

fn load_request<S: TutoringStore>(store: &S, request_id: u64) -> Result<TopicRequest, TutoringError> {
    store
        .find_request(request_id)
        .ok_or(TutoringError::UnknownRequest(request_id))
}

/// Get or create the account for an email. New accounts get the starting grant.
pub fn sign_in<S: TutoringStore>(
    store: &S,
    email: &str,
    display_name: Option<&str>,
    now: Timestamp,
) -> Result<Account, TutoringError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(TutoringError::MissingIdentity);
    }
    let display_name = display_name.map(str::trim).filter(|n| !n.is_empty());

    if let Some(mut existing) = store.find_account(email) {
        existing.last_seen = now;
        if let Some(name) = display_name {
            existing.display_name = name.to_string();
        }
        log::info!("[ACCOUNT] account={} type=returning silver={} gold={} badges={} completed={}",
            who(email), existing.silver_balance, existing.gold_balance,
            existing.badge_count, existing.completed_topic_count);
        return Ok(store.update_account(existing));
    }

    let account = ledger::new_account(email, display_name.unwrap_or(who(email)), now);
    log::info!("[ACCOUNT] account={} type=new silver={} gold={} badges={} completed={}",
        who(email), account.silver_balance, account.gold_balance,
        account.badge_count, account.completed_topic_count);
    Ok(store.insert_account(account))
}

/// Learner asks for a topic. Duplicate pending requests are allowed.
pub fn request_topic<S: TutoringStore>(
    store: &S,
    learner_id: &str,
    selection: &str,
    custom_text: &str,
    now: Timestamp,
) -> Result<TopicRequest, TutoringError> {
    load_account(store, learner_id)?;
    let topic = lifecycle::resolve_topic(selection, custom_text)?;
    let request = store.insert_request(lifecycle::create_request(learner_id, &topic, now)?);

    log::info!("[REQUEST] created id={} learner={} topic=\"{}\" catalog={}",
        request.id, who(learner_id), request.topic, lifecycle::is_catalog_topic(&request.topic));
    Ok(request)
}

/// A tutor picked up a pending request
pub fn on_tutor_accepted<S: TutoringStore>(
    store: &S,
    request_id: u64,
    tutor_id: &str,
    meeting_reference: &str,
    now: Timestamp,
) -> Result<TopicRequest, TutoringError> {
    let tutor = load_account(store, tutor_id)?;
    let request = load_request(store, request_id)?;
    let accepted = lifecycle::accept_request(&request, &tutor, meeting_reference, now)?;

    log::info!("[REQUEST] accepted id={} tutor={} learner={} topic=\"{}\"",
        accepted.id, who(tutor_id), who(&accepted.learner_id), accepted.topic);
    Ok(store.update_request(accepted))
}

/// An assessment for `request_id` was graded.
///
/// A failure leaves everything as it was (`Ok(None)`). A pass completes the
/// request and credits learner silver and tutor gold, each with its own badge
/// check. A second pass for the same request fails with `NotAccepted`.
pub fn on_assessment_graded<S: TutoringStore>(
    store: &S,
    request_id: u64,
    passed: bool,
    now: Timestamp,
) -> Result<Option<SessionCredit>, TutoringError> {
    let request = load_request(store, request_id)?;
    let completed = match lifecycle::complete_request(&request, passed, now)? {
        CompletionOutcome::Unchanged => {
            log::info!("[REQUEST] attempt failed id={} learner={} status={}",
                request.id, who(&request.learner_id), request.status.as_str());
            return Ok(None);
        }
        CompletionOutcome::Completed(r) => r,
    };

    let tutor_id = completed
        .tutor_id
        .clone()
        .ok_or_else(|| TutoringError::UnknownAccount(String::new()))?;
    let learner = load_account(store, &completed.learner_id)?;
    let (learner, learner_badge) = ledger::apply_completion_credit(&learner, Track::Learner);

    // Someone may tutor their own request; credit the already-updated row then
    let tutor = if tutor_id == learner.identity {
        learner.clone()
    } else {
        load_account(store, &tutor_id)?
    };
    let (tutor, tutor_badge) = ledger::apply_completion_credit(&tutor, Track::Tutor);

    let request = store.update_request(completed);
    let learner = if tutor.identity == learner.identity {
        tutor.clone()
    } else {
        store.update_account(learner)
    };
    let tutor = store.update_account(tutor);

    log::info!("[REQUEST] completed id={} topic=\"{}\" learner={} silver={} tutor={} gold={}",
        request.id, request.topic, who(&learner.identity), learner.silver_balance,
        who(&tutor.identity), tutor.gold_balance);
    if learner_badge {
        log::info!("[BADGE] minted account={} track={} badges={} completed={}",
            who(&learner.identity), Track::Learner.as_str(), learner.badge_count, learner.completed_topic_count);
    }
    if tutor_badge {
        log::info!("[BADGE] minted account={} track={} badges={} completed={}",
            who(&tutor.identity), Track::Tutor.as_str(), tutor.badge_count, tutor.completed_topic_count);
    }

    Ok(Some(SessionCredit { request, learner, tutor, learner_badge, tutor_badge }))
}

pub fn convert_silver_to_gold<S: TutoringStore>(store: &S, identity: &str, amount: u32) -> Result<Account, TutoringError> {
    let account = load_account(store, identity)?;
    let next = ledger::convert_silver_to_gold(&account, amount)?;
    log::info!("[WALLET] silver_to_gold account={} silver={} gold={} -> silver={} gold={}",
        who(identity), account.silver_balance, account.gold_balance, next.silver_balance, next.gold_balance);
    Ok(store.update_account(next))
}

pub fn convert_badge_to_silver<S: TutoringStore>(store: &S, identity: &str) -> Result<Account, TutoringError> {
    let account = load_account(store, identity)?;
    let next = ledger::convert_badge_to_silver(&account)?;
    log::info!("[WALLET] badge_to_silver account={} badges={} silver={}",
        who(identity), next.badge_count, next.silver_balance);
    Ok(store.update_account(next))
}

pub fn purchase_gold<S: TutoringStore>(store: &S, identity: &str, usd_amount: u32) -> Result<Account, TutoringError> {
    let account = load_account(store, identity)?;
    let next = ledger::purchase_gold(&account, usd_amount)?;
    log::info!("[WALLET] purchase account={} usd={} gold={}", who(identity), usd_amount, next.gold_balance);
    Ok(store.update_account(next))
}

/// Spend gold on a reward and record a redemption with its confirmation token
pub fn redeem_reward<S: TutoringStore>(
    store: &S,
    identity: &str,
    reward_kind: &str,
    now: Timestamp,
) -> Result<Redemption, TutoringError> {
    let kind: RewardKind = reward_kind.parse()?;
    let account = load_account(store, identity)?;
    let (next, receipt) = ledger::redeem_reward(&account, kind)?;
    store.update_account(next);

    let mut redemption = store.insert_redemption(Redemption {
        id: 0, // auto_inc
        account_identity: identity.to_string(),
        kind: receipt.kind,
        gold_spent: receipt.gold_spent,
        token: String::new(),
        redeemed_at: now,
    });
    redemption.token = confirmation_token(receipt.kind, redemption.id, now);
    let redemption = store.update_redemption(redemption);

    log::info!("[WALLET] redeemed account={} reward=\"{}\" gold_spent={} token={}",
        who(identity), kind.label(), receipt.gold_spent, redemption.token);
    Ok(redemption)
}

/// Opaque confirmation handed to fulfilment: KIND-YYYYMMDD-000042
pub fn confirmation_token(kind: RewardKind, redemption_id: u64, at: Timestamp) -> String {
    let secs = at.to_micros_since_unix_epoch().div_euclid(1_000_000);
    let date = chrono::DateTime::from_timestamp(secs, 0)
        .map(|d| d.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "00000000".to_string());
    format!("{}-{}-{:06}", kind.code(), date, redemption_id)
}

// ==================== ASSESSMENT SESSIONS ====================

/// A closed assessment with its grade, plus the credit when it completed the request
#[derive(Debug, Clone, PartialEq)]
pub struct GradedAssessment {
    pub session: AssessmentSession,
    pub grade: Grade,
    pub credit: Option<SessionCredit>,
}

fn owned_assessment<S: TutoringStore>(
    store: &S,
    learner_id: &str,
    assessment_id: u64,
) -> Result<AssessmentSession, TutoringError> {
    let session = store
        .find_assessment(assessment_id)
        .ok_or(TutoringError::UnknownAssessment(assessment_id))?;
    if session.learner_id != learner_id {
        return Err(TutoringError::NotRequestLearner(session.request_id));
    }
    Ok(session)
}

/// Open an assessment for an accepted request. Only the request's learner may
/// start one, and only one may be open per request at a time. Returns the
/// stored session and the generated items so the caller can publish them.
pub fn start_assessment<S: TutoringStore, A: AssessmentSource>(
    store: &S,
    source: &mut A,
    learner_id: &str,
    request_id: u64,
    now: Timestamp,
) -> Result<(AssessmentSession, Vec<QuizItem>), TutoringError> {
    let request = load_request(store, request_id)?;
    if request.learner_id != learner_id {
        return Err(TutoringError::NotRequestLearner(request_id));
    }
    if request.status != RequestStatus::Accepted {
        return Err(TutoringError::NotAccepted(request_id));
    }
    if store
        .assessments_for_request(request_id)
        .iter()
        .any(|a| a.state == AssessmentState::Open)
    {
        return Err(TutoringError::AssessmentInProgress(request_id));
    }

    let items = source.generate(&request.topic);
    assessment::check_items(&items).inspect_err(|e| {
        log::error!("start_assessment: {} topic=\"{}\"", e, request.topic);
    })?;

    let session = store.insert_assessment(AssessmentSession {
        id: 0, // auto_inc
        request_id,
        learner_id: learner_id.to_string(),
        topic: request.topic.clone(),
        answer_key: items.iter().map(|i| i.correct_index).collect(),
        answers: vec![None; items.len()],
        state: AssessmentState::Open,
        started_at: now,
        deadline: assessment::deadline_for(now),
        correct_count: None,
        passed: None,
        graded_at: None,
    });

    log::info!("[ASSESSMENT] started id={} request={} learner={} topic=\"{}\" budget={}",
        session.id, request_id, who(learner_id), request.topic,
        assessment::format_clock(assessment::TIME_BUDGET_SECS));
    Ok((session, items))
}

/// Record (or change) the answer to one item. Closed once the deadline passes.
pub fn answer_item<S: TutoringStore>(
    store: &S,
    learner_id: &str,
    assessment_id: u64,
    item: u8,
    option: u8,
    now: Timestamp,
) -> Result<AssessmentSession, TutoringError> {
    let mut session = owned_assessment(store, learner_id, assessment_id)?;
    if session.state != AssessmentState::Open || assessment::is_expired(session.deadline, now) {
        return Err(TutoringError::AssessmentClosed(assessment_id));
    }
    assessment::validate_answer(item, option)?;

    if let Some(slot) = session.answers.get_mut(item as usize) {
        *slot = Some(option);
    }
    log::debug!("[ASSESSMENT] answer id={} item={} option={} remaining={}",
        assessment_id, item, option,
        assessment::format_clock(assessment::seconds_remaining(session.deadline, now)));
    Ok(store.update_assessment(session))
}

/// Grade an open assessment, feed the outcome to the request lifecycle, then
/// close the assessment. The lifecycle runs first: if it rejects, the
/// assessment is left untouched.
fn finalize_assessment<S: TutoringStore>(
    store: &S,
    mut session: AssessmentSession,
    closed_as: AssessmentState,
    now: Timestamp,
) -> Result<GradedAssessment, TutoringError> {
    let grade = assessment::grade(&session.answer_key, &session.answers);
    let credit = on_assessment_graded(store, session.request_id, grade.passed, now)?;

    let answered = session.answers.iter().filter(|a| a.is_some()).count();
    session.state = closed_as;
    session.correct_count = Some(grade.correct);
    session.passed = Some(grade.passed);
    session.graded_at = Some(now);
    let session = store.update_assessment(session);

    log::info!("[ASSESSMENT] graded id={} request={} learner={} closed_as={} score={}/{} answered={} passed={} completed={}",
        session.id, session.request_id, who(&session.learner_id), closed_as.as_str(),
        grade.correct, grade.total, answered, grade.passed, credit.is_some());
    Ok(GradedAssessment { session, grade, credit })
}

/// Learner submits; unanswered items count as wrong
pub fn submit_assessment<S: TutoringStore>(
    store: &S,
    learner_id: &str,
    assessment_id: u64,
    now: Timestamp,
) -> Result<GradedAssessment, TutoringError> {
    let session = owned_assessment(store, learner_id, assessment_id)?;
    if session.state != AssessmentState::Open {
        return Err(TutoringError::AssessmentClosed(assessment_id));
    }
    finalize_assessment(store, session, AssessmentState::Submitted, now)
}

/// Time budget ran out: auto-submit whatever was recorded.
///
/// Returns `Ok(None)` when the assessment was already closed. If grading is
/// rejected the session is closed as `Abandoned`, so the learner can start
/// again, and the error is returned.
pub fn expire_assessment<S: TutoringStore>(
    store: &S,
    assessment_id: u64,
    now: Timestamp,
) -> Result<Option<GradedAssessment>, TutoringError> {
    let session = store
        .find_assessment(assessment_id)
        .ok_or(TutoringError::UnknownAssessment(assessment_id))?;
    if session.state != AssessmentState::Open {
        log::debug!("Deadline fired but assessment {} is {}, ignoring", session.id, session.state.as_str());
        return Ok(None);
    }

    match finalize_assessment(store, session.clone(), AssessmentState::Expired, now) {
        Ok(graded) => Ok(Some(graded)),
        Err(e) => {
            let mut closed = session;
            closed.state = AssessmentState::Abandoned;
            store.update_assessment(closed);
            log::error!("[ASSESSMENT] auto-submit failed id={} closed_as=abandoned error:{}", assessment_id, e);
            Err(e)
        }
    }
}

/// Abandon every open assessment of a learner. Returns the ids so their
/// deadlines can be cancelled.
pub fn abandon_open_assessments<S: TutoringStore>(store: &S, learner_id: &str) -> Vec<u64> {
    store
        .assessments_for_learner(learner_id)
        .into_iter()
        .filter(|a| a.state == AssessmentState::Open)
        .map(|mut a| {
            a.state = AssessmentState::Abandoned;
            let a = store.update_assessment(a);
            log::info!("[ASSESSMENT] abandoned id={} learner={}", a.id, who(learner_id));
            a.id
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{TemplateSource, TIME_BUDGET_SECS};
    use crate::store::memory::MemoryStore;
    use spacetimedb::rand::rngs::mock::StepRng;

    const LEARNER: &str = "ada@example.com";
    const TUTOR: &str = "grace@example.com";
    const LINK: &str = "https://zoom.us/j/1234567890";

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_micros_since_unix_epoch(secs * 1_000_000)
    }

    /// Learner with the starting grant, tutor holding one badge
    fn setup() -> MemoryStore {
        let store = MemoryStore::default();
        sign_in(&store, LEARNER, None, ts(0)).unwrap();
        let mut tutor = sign_in(&store, TUTOR, Some("Grace"), ts(0)).unwrap();
        tutor.badge_count = 1;
        store.update_account(tutor);
        store
    }

    fn accepted_request(store: &MemoryStore) -> TopicRequest {
        let request = request_topic(store, LEARNER, "Calculus I", "", ts(1)).unwrap();
        on_tutor_accepted(store, request.id, TUTOR, LINK, ts(2)).unwrap()
    }

    #[test]
    fn test_sign_in() {
        let store = MemoryStore::default();
        assert_eq!(sign_in(&store, "  ", None, ts(0)), Err(TutoringError::MissingIdentity));

        let first = sign_in(&store, LEARNER, None, ts(0)).unwrap();
        assert_eq!(first.display_name, "ada");
        assert_eq!(first.silver_balance, 25);

        // Returning sign-in never re-grants the starting balance
        let mut spent = first.clone();
        spent.silver_balance = 3;
        store.update_account(spent);
        let again = sign_in(&store, LEARNER, Some("Ada L."), ts(50)).unwrap();
        assert_eq!(again.silver_balance, 3);
        assert_eq!(again.display_name, "Ada L.");
        assert_eq!(again.last_seen, ts(50));
        assert_eq!(again.created_at, ts(0));
    }

    #[test]
    fn test_request_topic() {
        let store = setup();
        assert_eq!(
            request_topic(&store, "nobody@example.com", "Chemistry", "", ts(1)),
            Err(TutoringError::UnknownAccount("nobody@example.com".to_string()))
        );
        assert_eq!(request_topic(&store, LEARNER, "custom", " ", ts(1)), Err(TutoringError::EmptyTopic));

        let a = request_topic(&store, LEARNER, "custom", "Topology", ts(1)).unwrap();
        assert_eq!(a.topic, "Topology");
        assert_eq!(a.status, RequestStatus::Pending);

        // Same topic twice is allowed
        let b = request_topic(&store, LEARNER, "custom", "Topology", ts(2)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.requests.borrow().len(), 2);
    }

    #[test]
    fn test_accept_gated_by_badge() {
        let store = setup();
        let request = request_topic(&store, LEARNER, "Statistics", "", ts(1)).unwrap();

        // The learner has no badge
        assert_eq!(
            on_tutor_accepted(&store, request.id, LEARNER, LINK, ts(2)),
            Err(TutoringError::TutorNotEligible(LEARNER.to_string()))
        );
        assert_eq!(store.find_request(request.id).unwrap().status, RequestStatus::Pending);

        assert_eq!(
            on_tutor_accepted(&store, 999, TUTOR, LINK, ts(2)),
            Err(TutoringError::UnknownRequest(999))
        );
    }

    #[test]
    fn test_failed_assessment_changes_nothing() {
        let store = setup();
        let request = accepted_request(&store);
        let before_learner = store.find_account(LEARNER).unwrap();
        let before_tutor = store.find_account(TUTOR).unwrap();

        assert_eq!(on_assessment_graded(&store, request.id, false, ts(3)), Ok(None));

        assert_eq!(store.find_request(request.id).unwrap().status, RequestStatus::Accepted);
        assert_eq!(store.find_account(LEARNER).unwrap(), before_learner);
        assert_eq!(store.find_account(TUTOR).unwrap(), before_tutor);
    }

    #[test]
    fn test_passed_assessment_credits_both_sides_once() {
        let store = setup();
        let request = accepted_request(&store);

        let credit = on_assessment_graded(&store, request.id, true, ts(3)).unwrap().unwrap();
        assert_eq!(credit.request.status, RequestStatus::Completed);
        assert_eq!(credit.learner.silver_balance, 30);
        assert_eq!(credit.learner.completed_topic_count, 4);
        assert_eq!(credit.tutor.gold_balance, 7);
        assert_eq!(credit.tutor.completed_topic_count, 4);
        assert!(!credit.learner_badge);
        assert!(!credit.tutor_badge);

        // Duplicate delivery
        assert_eq!(
            on_assessment_graded(&store, request.id, true, ts(4)),
            Err(TutoringError::NotAccepted(request.id))
        );
        assert_eq!(store.find_account(LEARNER).unwrap().silver_balance, 30);
        assert_eq!(store.find_account(TUTOR).unwrap().gold_balance, 7);
    }

    #[test]
    fn test_pass_before_accept_is_rejected() {
        let store = setup();
        let request = request_topic(&store, LEARNER, "Chemistry", "", ts(1)).unwrap();
        assert_eq!(
            on_assessment_graded(&store, request.id, true, ts(2)),
            Err(TutoringError::NotAccepted(request.id))
        );
        assert_eq!(store.find_account(LEARNER).unwrap().silver_balance, 25);
    }

    #[test]
    fn test_completion_mints_badges() {
        let store = setup();
        let mut learner = store.find_account(LEARNER).unwrap();
        learner.completed_topic_count = 9;
        store.update_account(learner);
        let mut tutor = store.find_account(TUTOR).unwrap();
        tutor.completed_topic_count = 9;
        store.update_account(tutor);

        let request = accepted_request(&store);
        let credit = on_assessment_graded(&store, request.id, true, ts(3)).unwrap().unwrap();

        assert!(credit.learner_badge);
        assert_eq!(credit.learner.badge_count, 1);
        assert_eq!(credit.learner.silver_balance, 25 + 5 + 25);

        assert!(credit.tutor_badge);
        assert_eq!(credit.tutor.badge_count, 2);
        assert_eq!(credit.tutor.gold_balance, 2 + 5 + 5);

        // Learner can now teach
        assert!(ledger::can_teach(&store.find_account(LEARNER).unwrap()));
    }

    #[test]
    fn test_self_tutoring_credits_one_row_twice() {
        let store = setup();
        let mut both = store.find_account(TUTOR).unwrap();
        both.completed_topic_count = 8;
        store.update_account(both);

        let request = request_topic(&store, TUTOR, "Data Structures", "", ts(1)).unwrap();
        on_tutor_accepted(&store, request.id, TUTOR, LINK, ts(2)).unwrap();
        let credit = on_assessment_graded(&store, request.id, true, ts(3)).unwrap().unwrap();

        let stored = store.find_account(TUTOR).unwrap();
        assert_eq!(stored, credit.tutor);
        assert_eq!(stored.completed_topic_count, 10);
        assert_eq!(stored.silver_balance, 25 + 5);
        // Crossing happened on the tutor credit: +5 gold bonus, one badge
        assert_eq!(stored.gold_balance, 2 + 5 + 5);
        assert_eq!(stored.badge_count, 2);
    }

    #[test]
    fn test_wallet_operations() {
        let store = setup();

        assert_eq!(
            convert_silver_to_gold(&store, LEARNER, 15),
            Err(TutoringError::NotMultipleOfTen(15))
        );
        let after = convert_silver_to_gold(&store, LEARNER, 10).unwrap();
        assert_eq!((after.silver_balance, after.gold_balance), (15, 3));

        assert!(convert_badge_to_silver(&store, LEARNER).is_err());
        let tutor = convert_badge_to_silver(&store, TUTOR).unwrap();
        assert_eq!((tutor.badge_count, tutor.silver_balance), (0, 50));

        assert_eq!(purchase_gold(&store, LEARNER, 0), Err(TutoringError::InvalidAmount(0)));
        assert_eq!(purchase_gold(&store, LEARNER, 7).unwrap().gold_balance, 10);
        assert_eq!(store.find_account(LEARNER).unwrap().gold_balance, 10);
    }

    #[test]
    fn test_redeem_reward() {
        let store = setup();
        assert_eq!(
            redeem_reward(&store, LEARNER, "giftcard", ts(0)),
            Err(TutoringError::InsufficientFunds { available: 2, required: 10 })
        );
        assert!(store.redemptions.borrow().is_empty());

        purchase_gold(&store, LEARNER, 8).unwrap();
        // 2024-03-01T12:00:00Z
        let redemption = redeem_reward(&store, LEARNER, "giftcard", ts(1_709_294_400)).unwrap();
        assert_eq!(redemption.kind, RewardKind::GiftCard);
        assert_eq!(redemption.gold_spent, 10);
        assert_eq!(redemption.token, "GIFT-20240301-000001");
        assert_eq!(store.find_account(LEARNER).unwrap().gold_balance, 0);
        assert_eq!(store.redemptions.borrow()[0].token, redemption.token);

        assert_eq!(
            redeem_reward(&store, LEARNER, "yacht", ts(0)),
            Err(TutoringError::UnknownRewardKind("yacht".to_string()))
        );
    }

    fn start(store: &MemoryStore, request_id: u64, at: i64) -> AssessmentSession {
        let mut source = TemplateSource::new(StepRng::new(0, 1 << 30));
        start_assessment(store, &mut source, LEARNER, request_id, ts(at)).unwrap().0
    }

    #[test]
    fn test_start_assessment_requires_accepted_request() {
        let store = setup();
        let mut source = TemplateSource::new(StepRng::new(0, 1 << 30));
        let pending = request_topic(&store, LEARNER, "Chemistry", "", ts(1)).unwrap();
        assert_eq!(
            start_assessment(&store, &mut source, LEARNER, pending.id, ts(2)).map(|r| r.0),
            Err(TutoringError::NotAccepted(pending.id))
        );

        let request = accepted_request(&store);
        assert_eq!(
            start_assessment(&store, &mut source, TUTOR, request.id, ts(3)).map(|r| r.0),
            Err(TutoringError::NotRequestLearner(request.id))
        );

        let (session, items) = start_assessment(&store, &mut source, LEARNER, request.id, ts(3)).unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(session.state, AssessmentState::Open);
        assert_eq!(session.answers, vec![None; 5]);
        assert_eq!(session.deadline, ts(3 + TIME_BUDGET_SECS as i64));
    }

    #[test]
    fn test_one_open_assessment_per_request() {
        let store = setup();
        let request = accepted_request(&store);
        let first = start(&store, request.id, 3);

        let mut source = TemplateSource::new(StepRng::new(0, 1));
        assert_eq!(
            start_assessment(&store, &mut source, LEARNER, request.id, ts(4)).map(|r| r.0),
            Err(TutoringError::AssessmentInProgress(request.id))
        );

        // A failed attempt frees the request for a retry
        let graded = submit_assessment(&store, LEARNER, first.id, ts(5)).unwrap();
        assert!(!graded.grade.passed);
        assert_eq!(graded.credit, None);
        assert_eq!(store.find_request(request.id).unwrap().status, RequestStatus::Accepted);
        let retry = start(&store, request.id, 6);
        assert_ne!(retry.id, first.id);
    }

    #[test]
    fn test_answers_rejected_after_deadline() {
        let store = setup();
        let request = accepted_request(&store);
        let session = start(&store, request.id, 10);

        assert_eq!(
            answer_item(&store, LEARNER, session.id, 5, 0, ts(11)),
            Err(TutoringError::InvalidAnswer { item: 5, option: 0 })
        );
        assert_eq!(
            answer_item(&store, TUTOR, session.id, 0, 0, ts(11)),
            Err(TutoringError::NotRequestLearner(request.id))
        );
        let answered = answer_item(&store, LEARNER, session.id, 2, 1, ts(11)).unwrap();
        assert_eq!(answered.answers[2], Some(1));

        let late = ts(10 + TIME_BUDGET_SECS as i64);
        assert_eq!(
            answer_item(&store, LEARNER, session.id, 3, 1, late),
            Err(TutoringError::AssessmentClosed(session.id))
        );
        assert_eq!(store.find_assessment(session.id).unwrap().answers[3], None);
    }

    #[test]
    fn test_expiry_auto_submits_partial_answers_once() {
        let store = setup();
        let request = accepted_request(&store);
        let session = start(&store, request.id, 10);

        // Four right answers, the fifth left blank
        for (item, key) in session.answer_key.iter().enumerate().take(4) {
            answer_item(&store, LEARNER, session.id, item as u8, *key, ts(20)).unwrap();
        }

        let deadline = ts(10 + TIME_BUDGET_SECS as i64);
        let graded = expire_assessment(&store, session.id, deadline).unwrap().unwrap();
        assert_eq!(graded.session.state, AssessmentState::Expired);
        assert_eq!(graded.grade.correct, 4);
        assert_eq!(graded.grade.per_item, vec![true, true, true, true, false]);
        assert!(graded.grade.passed);
        assert!(graded.credit.is_some());
        assert_eq!(store.find_account(LEARNER).unwrap().silver_balance, 30);
        assert_eq!(store.find_account(TUTOR).unwrap().gold_balance, 7);

        // A second firing, or a late submit, credits nothing
        assert_eq!(expire_assessment(&store, session.id, deadline), Ok(None));
        assert_eq!(
            submit_assessment(&store, LEARNER, session.id, deadline).map(|g| g.session),
            Err(TutoringError::AssessmentClosed(session.id))
        );
        assert_eq!(store.find_account(LEARNER).unwrap().silver_balance, 30);
        assert_eq!(store.find_account(TUTOR).unwrap().gold_balance, 7);
        assert_eq!(store.find_request(request.id).unwrap().status, RequestStatus::Completed);
    }

    #[test]
    fn test_deadline_after_abandon_credits_nothing() {
        let store = setup();
        let request = accepted_request(&store);
        let session = start(&store, request.id, 10);
        for (item, key) in session.answer_key.iter().enumerate() {
            answer_item(&store, LEARNER, session.id, item as u8, *key, ts(20)).unwrap();
        }

        assert_eq!(abandon_open_assessments(&store, LEARNER), vec![session.id]);
        assert_eq!(abandon_open_assessments(&store, LEARNER), Vec::<u64>::new());

        assert_eq!(expire_assessment(&store, session.id, ts(10 + TIME_BUDGET_SECS as i64)), Ok(None));
        assert_eq!(store.find_assessment(session.id).unwrap().state, AssessmentState::Abandoned);
        assert_eq!(store.find_assessment(session.id).unwrap().passed, None);
        assert_eq!(store.find_request(request.id).unwrap().status, RequestStatus::Accepted);
        assert_eq!(store.find_account(LEARNER).unwrap().silver_balance, 25);
        assert_eq!(store.find_account(TUTOR).unwrap().gold_balance, 2);

        // The request can be attempted again
        start(&store, request.id, 400);
    }

    #[test]
    fn test_failed_auto_submit_frees_the_request() {
        let store = setup();
        let request = accepted_request(&store);
        let session = start(&store, request.id, 10);
        for (item, key) in session.answer_key.iter().enumerate() {
            answer_item(&store, LEARNER, session.id, item as u8, *key, ts(20)).unwrap();
        }
        // Tutor account vanished before the deadline
        store.accounts.borrow_mut().remove(TUTOR);

        assert_eq!(
            expire_assessment(&store, session.id, ts(10 + TIME_BUDGET_SECS as i64)),
            Err(TutoringError::UnknownAccount(TUTOR.to_string()))
        );
        assert_eq!(store.find_assessment(session.id).unwrap().state, AssessmentState::Abandoned);
        assert_eq!(store.find_account(LEARNER).unwrap().silver_balance, 25);
        assert_eq!(store.find_request(request.id).unwrap().status, RequestStatus::Accepted);
        start(&store, request.id, 400);
    }

    #[test]
    fn test_who() {
        assert_eq!(who("ada@example.com"), "ada");
        assert_eq!(who("plain"), "plain");
    }
}
