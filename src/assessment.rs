// Assessment engine: content generation, answer validation, grading and the
// session time budget.

use spacetimedb::rand::Rng;
use spacetimedb::Timestamp;

use crate::error::TutoringError;

/// Items per assessment
pub const ASSESSMENT_LENGTH: usize = 5;

/// Options per item (exactly one correct)
pub const OPTIONS_PER_ITEM: usize = 4;

/// Correct answers needed to pass (4/5 = 80%)
pub const PASS_THRESHOLD: u8 = 4;

/// Session time budget; the assessment auto-submits when it runs out
pub const TIME_BUDGET_SECS: u64 = 5 * 60;

/// One multiple-choice item including its answer key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizItem {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: u8,
}

/// Anything that can turn a topic into a fresh assessment.
/// Implementations must return ASSESSMENT_LENGTH items, each with
/// OPTIONS_PER_ITEM options and an in-range correct index.
pub trait AssessmentSource {
    fn generate(&mut self, topic: &str) -> Vec<QuizItem>;
}

/// Placeholder content: templated text, correct option picked uniformly at
/// random per item. Generic over the RNG so tests can seed it.
pub struct TemplateSource<R> {
    rng: R,
}

impl<R: Rng> TemplateSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> AssessmentSource for TemplateSource<R> {
    fn generate(&mut self, topic: &str) -> Vec<QuizItem> {
        (1..=ASSESSMENT_LENGTH)
            .map(|n| QuizItem {
                prompt: format!("Which of the following is a key concept in {}? (Question {})", topic, n),
                options: vec![
                    format!("Basic principle of {}", topic),
                    format!("Advanced theorem in {}", topic),
                    format!("Fundamental law of {}", topic),
                    format!("Core methodology of {}", topic),
                ],
                correct_index: self.rng.gen_range(0..OPTIONS_PER_ITEM as u8),
            })
            .collect()
    }
}

/// Check a source's output against the content contract
pub fn check_items(items: &[QuizItem]) -> Result<(), TutoringError> {
    if items.len() != ASSESSMENT_LENGTH {
        return Err(TutoringError::MalformedAssessment(format!(
            "expected {} items, got {}",
            ASSESSMENT_LENGTH,
            items.len()
        )));
    }
    for (i, item) in items.iter().enumerate() {
        if item.options.len() != OPTIONS_PER_ITEM || item.correct_index as usize >= OPTIONS_PER_ITEM {
            return Err(TutoringError::MalformedAssessment(format!("item {} has a bad option set", i)));
        }
    }
    Ok(())
}

/// Reject answers that point outside the assessment
pub fn validate_answer(item: u8, option: u8) -> Result<(), TutoringError> {
    if item as usize >= ASSESSMENT_LENGTH || option as usize >= OPTIONS_PER_ITEM {
        return Err(TutoringError::InvalidAnswer { item, option });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grade {
    pub correct: u8,
    pub total: u8,
    pub passed: bool,
    /// Correctness per item, in item order
    pub per_item: Vec<bool>,
}

/// Score recorded answers against the key. Missing answers count as wrong.
pub fn grade(answer_key: &[u8], answers: &[Option<u8>]) -> Grade {
    let per_item: Vec<bool> = answer_key
        .iter()
        .enumerate()
        .map(|(i, key)| answers.get(i).copied().flatten() == Some(*key))
        .collect();
    let correct = per_item.iter().filter(|ok| **ok).count() as u8;
    Grade {
        correct,
        total: answer_key.len() as u8,
        passed: correct >= PASS_THRESHOLD,
        per_item,
    }
}

pub fn deadline_for(started_at: Timestamp) -> Timestamp {
    started_at + std::time::Duration::from_secs(TIME_BUDGET_SECS)
}

pub fn seconds_remaining(deadline: Timestamp, now: Timestamp) -> u64 {
    let remaining_micros = deadline
        .to_micros_since_unix_epoch()
        .saturating_sub(now.to_micros_since_unix_epoch());
    (remaining_micros.max(0) as u64) / 1_000_000
}

pub fn is_expired(deadline: Timestamp, now: Timestamp) -> bool {
    now.to_micros_since_unix_epoch() >= deadline.to_micros_since_unix_epoch()
}

/// m:ss, as shown on the quiz clock
pub fn format_clock(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
