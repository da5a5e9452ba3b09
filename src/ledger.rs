// Account ledger: every balance-changing rule for a single account.
// Functions here are pure - they take the current account and return the
// next one (or a typed rejection). Persistence happens in workflow.rs.

use std::str::FromStr;

use spacetimedb::{SpacetimeType, Timestamp};

use crate::error::TutoringError;
use crate::Account;

// ==================== CONSTANTS ====================

/// Starting grant for a brand-new account
pub const STARTING_SILVER: u32 = 25;
pub const STARTING_GOLD: u32 = 2;
pub const STARTING_BADGES: u32 = 0;
pub const STARTING_COMPLETED_TOPICS: u32 = 3;

/// Learner earns this much silver per passed assessment
pub const QUIZ_SILVER_REWARD: u32 = 5;

/// Tutor earns this much gold when their learner passes
pub const TEACHING_GOLD_REWARD: u32 = 5;

/// A badge is minted every time completed topics reach a multiple of this
pub const BADGE_INTERVAL: u32 = 10;

/// Badge bonus: learner track pays silver, tutor track pays gold
pub const LEARNER_BADGE_SILVER_BONUS: u32 = 25;
pub const TUTOR_BADGE_GOLD_BONUS: u32 = 5;

/// 10 silver buys 1 gold (one-way)
pub const SILVER_PER_GOLD: u32 = 10;

/// Trading a badge back in pays this much silver
pub const BADGE_SILVER_VALUE: u32 = 25;

/// Every reward in the catalog costs the same
pub const REWARD_GOLD_COST: u32 = 10;

// ==================== TYPES ====================

/// Which side of a session earned the credit. Decides the badge bonus currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Learner,
    Tutor,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Learner => "learner",
            Track::Tutor => "tutor",
        }
    }
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardKind {
    GiftCard,
    Cashback,
    DiscountCoupon,
}

impl RewardKind {
    /// Short prefix used in confirmation tokens
    pub fn code(&self) -> &'static str {
        match self {
            RewardKind::GiftCard => "GIFT",
            RewardKind::Cashback => "CASH",
            RewardKind::DiscountCoupon => "DISC",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RewardKind::GiftCard => "$5 Gift Card",
            RewardKind::Cashback => "$5 Cashback",
            RewardKind::DiscountCoupon => "Discount Coupon",
        }
    }
}

impl FromStr for RewardKind {
    type Err = TutoringError;

    /// Accepts machine keys ("giftcard", "discount_coupon") as well as the
    /// catalog labels ("$5 Gift Card").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "giftcard" | "gift" => Ok(RewardKind::GiftCard),
            "cashback" => Ok(RewardKind::Cashback),
            "discountcoupon" | "discount" | "coupon" => Ok(RewardKind::DiscountCoupon),
            _ => Err(TutoringError::UnknownRewardKind(s.to_string())),
        }
    }
}

/// Result of a successful redemption. Fulfilment happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionReceipt {
    pub kind: RewardKind,
    pub gold_spent: u32,
}

// ==================== OPERATIONS ====================

/// Fresh account with the starting grant
pub fn new_account(identity: &str, display_name: &str, now: Timestamp) -> Account {
    Account {
        identity: identity.to_string(),
        display_name: display_name.to_string(),
        silver_balance: STARTING_SILVER,
        gold_balance: STARTING_GOLD,
        badge_count: STARTING_BADGES,
        completed_topic_count: STARTING_COMPLETED_TOPICS,
        created_at: now,
        last_seen: now,
    }
}

pub fn credit_quiz_reward(account: &Account) -> Account {
    let mut next = account.clone();
    next.silver_balance = next.silver_balance.saturating_add(QUIZ_SILVER_REWARD);
    next.completed_topic_count = next.completed_topic_count.saturating_add(1);
    next
}

pub fn credit_teaching_reward(account: &Account) -> Account {
    let mut next = account.clone();
    next.gold_balance = next.gold_balance.saturating_add(TEACHING_GOLD_REWARD);
    next.completed_topic_count = next.completed_topic_count.saturating_add(1);
    next
}

/// Mint a badge (plus the track's bonus) when the completed-topic counter has
/// just landed on a multiple of BADGE_INTERVAL.
///
/// `previous_completed` is the counter before the credit that produced
/// `account`. Replaying with an unchanged counter never mints again.
/// Returns the account and whether a badge was minted.
pub fn evaluate_badge_threshold(previous_completed: u32, account: Account, track: Track) -> (Account, bool) {
    let completed = account.completed_topic_count;
    if completed <= previous_completed || completed % BADGE_INTERVAL != 0 {
        return (account, false);
    }

    let mut next = account;
    next.badge_count = next.badge_count.saturating_add(1);
    match track {
        Track::Learner => {
            next.silver_balance = next.silver_balance.saturating_add(LEARNER_BADGE_SILVER_BONUS);
        }
        Track::Tutor => {
            next.gold_balance = next.gold_balance.saturating_add(TUTOR_BADGE_GOLD_BONUS);
        }
    }
    (next, true)
}

/// Session-completion credit for one side, including the badge check
pub fn apply_completion_credit(account: &Account, track: Track) -> (Account, bool) {
    let credited = match track {
        Track::Learner => credit_quiz_reward(account),
        Track::Tutor => credit_teaching_reward(account),
    };
    evaluate_badge_threshold(account.completed_topic_count, credited, track)
}

pub fn convert_silver_to_gold(account: &Account, amount: u32) -> Result<Account, TutoringError> {
    if amount < SILVER_PER_GOLD {
        return Err(TutoringError::InvalidAmount(amount));
    }
    if amount % SILVER_PER_GOLD != 0 {
        return Err(TutoringError::NotMultipleOfTen(amount));
    }
    if amount > account.silver_balance {
        return Err(TutoringError::InsufficientFunds {
            available: account.silver_balance,
            required: amount,
        });
    }

    let mut next = account.clone();
    next.gold_balance = next.gold_balance
        .checked_add(amount / SILVER_PER_GOLD)
        .ok_or(TutoringError::InvalidAmount(amount))?;
    next.silver_balance -= amount;
    Ok(next)
}

pub fn convert_badge_to_silver(account: &Account) -> Result<Account, TutoringError> {
    if account.badge_count < 1 {
        return Err(TutoringError::InsufficientFunds {
            available: account.badge_count,
            required: 1,
        });
    }

    let mut next = account.clone();
    next.badge_count -= 1;
    next.silver_balance = next.silver_balance.saturating_add(BADGE_SILVER_VALUE);
    Ok(next)
}

/// Buy gold at 1 USD : 1 gold. No payment processing happens here.
pub fn purchase_gold(account: &Account, usd_amount: u32) -> Result<Account, TutoringError> {
    if usd_amount < 1 {
        return Err(TutoringError::InvalidAmount(usd_amount));
    }

    let mut next = account.clone();
    next.gold_balance = next.gold_balance
        .checked_add(usd_amount)
        .ok_or(TutoringError::InvalidAmount(usd_amount))?;
    Ok(next)
}

pub fn redeem_reward(account: &Account, kind: RewardKind) -> Result<(Account, RedemptionReceipt), TutoringError> {
    if account.gold_balance < REWARD_GOLD_COST {
        return Err(TutoringError::InsufficientFunds {
            available: account.gold_balance,
            required: REWARD_GOLD_COST,
        });
    }

    let mut next = account.clone();
    next.gold_balance -= REWARD_GOLD_COST;
    Ok((next, RedemptionReceipt { kind, gold_spent: REWARD_GOLD_COST }))
}

/// Only badge holders may accept topic requests
pub fn can_teach(account: &Account) -> bool {
    account.badge_count >= 1
}
