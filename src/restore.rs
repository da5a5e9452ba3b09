// Bulk import of the browser-storage snapshot the old client kept
// Accepts the JSON written under the `user` and `topicRequests` keys

use spacetimedb::{reducer, ReducerContext, Timestamp, log};
use serde_json::Value;

use crate::error::TutoringError;
use crate::ledger;
use crate::lifecycle::{self, RequestStatus};
use crate::store::TutoringStore;
use crate::workflow::who;
use crate::{Account, TopicRequest, authorized_worker};

fn invalid(msg: String) -> TutoringError {
    TutoringError::InvalidImport(msg)
}

/// Only authorized workers may import
fn require_worker(ctx: &ReducerContext, reducer_name: &str) -> Result<(), String> {
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        log::warn!("Unauthorized {} attempt by {}", reducer_name, ctx.sender);
        return Err("Unauthorized".to_string());
    }
    Ok(())
}

/// Read a non-negative counter that fits in u32
fn parse_counter(val: &Value, field: &str, what: &str) -> Result<u32, TutoringError> {
    let raw = val.get(field)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| invalid(format!("{}: missing or negative {}", what, field)))?;
    u32::try_from(raw).map_err(|_| invalid(format!("{}: {} out of range", what, field)))
}

fn parse_optional_str(val: &Value, field: &str) -> Option<String> {
    val.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Legacy ids are `Date.now()` strings (milliseconds since epoch)
fn parse_legacy_timestamp(val: &Value) -> Option<Timestamp> {
    let millis: i64 = match val.get("id")? {
        Value::String(s) => s.parse().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    millis.checked_mul(1_000).map(Timestamp::from_micros_since_unix_epoch)
}

/// Parse one legacy `user` record
fn parse_account(val: &Value, index: usize, now: Timestamp) -> Result<Account, TutoringError> {
    let what = format!("Account {}", index);
    let email = parse_optional_str(val, "email")
        .ok_or_else(|| invalid(format!("{}: missing email", what)))?;

    let mut account = ledger::new_account(&email, who(&email), now);
    account.silver_balance = parse_counter(val, "silverCoins", &what)?;
    account.gold_balance = parse_counter(val, "goldCoins", &what)?;
    account.badge_count = parse_counter(val, "badges", &what)?;
    account.completed_topic_count = parse_counter(val, "completedTopics", &what)?;
    Ok(account)
}

/// Parse one legacy topic request and check the reference invariant.
/// Accepted and completed requests must name the tutor's account via `tutorEmail`.
fn parse_topic_request(
    val: &Value,
    index: usize,
    learner_email: &str,
    now: Timestamp,
) -> Result<TopicRequest, TutoringError> {
    let what = format!("Request {}", index);
    let topic = parse_optional_str(val, "topic")
        .ok_or_else(|| invalid(format!("{}: missing topic", what)))?;
    let status_str = val.get("status")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid(format!("{}: missing status", what)))?;
    let status = RequestStatus::parse(status_str)
        .ok_or_else(|| invalid(format!("{}: unknown status {}", what, status_str)))?;

    let mut request = lifecycle::create_request(learner_email, &topic, now)?;
    request.requested_at = parse_legacy_timestamp(val).unwrap_or(now);
    request.status = status;

    if status != RequestStatus::Pending {
        request.tutor_id = parse_optional_str(val, "tutorEmail");
        request.tutor_reference = parse_optional_str(val, "tutorName");
        request.meeting_reference = parse_optional_str(val, "zoomLink");
        request.learner_reference = Some(
            parse_optional_str(val, "learnerEmail").unwrap_or_else(|| learner_email.to_string()),
        );
        request.accepted_at = Some(now);
    }
    if status == RequestStatus::Completed {
        request.completed_at = Some(now);
    }

    if !lifecycle::references_consistent(&request) {
        return Err(invalid(format!(
            "{}: status {} needs tutorEmail, tutorName and zoomLink exactly when accepted",
            what, status.as_str()
        )));
    }
    Ok(request)
}

/// Bulk restore accounts from the legacy `user` JSON (one object or an array)
/// Existing accounts are overwritten with the imported balances
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_accounts(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    require_worker(ctx, "bulk_restore_accounts")?;

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;
    let records = match data {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return Err("Expected a JSON object or array of accounts".to_string()),
    };

    let mut count = 0;
    for (i, record) in records.iter().enumerate() {
        let account = parse_account(record, i, ctx.timestamp).map_err(|e| e.to_string())?;
        match ctx.db.find_account(&account.identity) {
            Some(existing) => {
                ctx.db.update_account(Account {
                    display_name: existing.display_name,
                    created_at: existing.created_at,
                    ..account
                });
            }
            None => {
                ctx.db.insert_account(account);
            }
        }
        count += 1;
    }

    log::info!("[RESTORE] accounts={}", count);
    Ok(())
}

/// Bulk restore topic requests from the legacy `topicRequests` JSON array
/// The old client stored requests per browser, so the learner is passed in
/// Protected by authorization check - only authorized workers can call this
#[reducer]
pub fn bulk_restore_topic_requests(ctx: &ReducerContext, learner_email: String, json_data: String) -> Result<(), String> {
    require_worker(ctx, "bulk_restore_topic_requests")?;

    let learner_email = learner_email.trim().to_string();
    if ctx.db.find_account(&learner_email).is_none() {
        return Err(TutoringError::UnknownAccount(learner_email).to_string());
    }

    let data: Value = serde_json::from_str(&json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;
    let requests = data.as_array()
        .ok_or("Expected JSON array of topic requests")?;

    // Validate everything first so a bad row leaves nothing behind
    let parsed: Vec<TopicRequest> = requests.iter()
        .enumerate()
        .map(|(i, r)| parse_topic_request(r, i, &learner_email, ctx.timestamp))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    for request in &parsed {
        if let Some(tutor_id) = &request.tutor_id {
            if ctx.db.find_account(tutor_id).is_none() {
                return Err(TutoringError::UnknownAccount(tutor_id.clone()).to_string());
            }
        }
    }

    let count = parsed.len();
    for request in parsed {
        ctx.db.insert_request(request);
    }

    log::info!("[RESTORE] topic_requests={} learner={}", count, who(&learner_email));
    Ok(())
}
