// Repository seam between the workflows and persistence.
// The module database implements this in lib.rs; tests use MemoryStore.

use crate::{Account, AssessmentSession, Redemption, TopicRequest};

/// Row access needed by the account, request and assessment workflows.
/// `insert_*` returns the stored row with any auto-assigned id filled in.
pub trait TutoringStore {
    fn find_account(&self, identity: &str) -> Option<Account>;
    fn insert_account(&self, account: Account) -> Account;
    fn update_account(&self, account: Account) -> Account;

    fn find_request(&self, id: u64) -> Option<TopicRequest>;
    fn insert_request(&self, request: TopicRequest) -> TopicRequest;
    fn update_request(&self, request: TopicRequest) -> TopicRequest;

    fn insert_redemption(&self, redemption: Redemption) -> Redemption;
    fn update_redemption(&self, redemption: Redemption) -> Redemption;

    fn find_assessment(&self, id: u64) -> Option<AssessmentSession>;
    fn insert_assessment(&self, session: AssessmentSession) -> AssessmentSession;
    fn update_assessment(&self, session: AssessmentSession) -> AssessmentSession;
    fn assessments_for_request(&self, request_id: u64) -> Vec<AssessmentSession>;
    fn assessments_for_learner(&self, learner_id: &str) -> Vec<AssessmentSession>;
}
