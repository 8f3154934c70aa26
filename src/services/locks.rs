use thiserror::Error;
use time::{Duration, PrimitiveDateTime};
use uuid::Uuid;

use crate::core::security;
use crate::core::state::AppState;
use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::models::CopyLock;
use crate::db::types::{CopyStatus, GradingAction};
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum LockError {
    #[error("Copy not found")]
    NotFound,
    #[error("{0}")]
    BadTtl(String),
    #[error("{0}")]
    WrongStatus(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Too many lock requests")]
    RateLimited,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub(crate) struct AcquireOutcome {
    /// True when a new lease was created or an expired one reclaimed (201);
    /// false for a refresh by the current owner (200).
    pub(crate) created: bool,
    pub(crate) token: String,
    pub(crate) expires_at: PrimitiveDateTime,
}

/// Resolve the requested TTL. Missing means the configured default; numbers
/// clamp into `[1, max_ttl]`; anything non-integer or negative is rejected.
pub(crate) fn resolve_ttl(
    raw: Option<&serde_json::Value>,
    default_ttl: i64,
    max_ttl: i64,
) -> Result<i64, LockError> {
    let Some(value) = raw else {
        return Ok(default_ttl.clamp(1, max_ttl));
    };

    let ttl = value
        .as_i64()
        .ok_or_else(|| LockError::BadTtl("ttl_seconds must be an integer".to_string()))?;
    if ttl < 0 {
        return Err(LockError::BadTtl("ttl_seconds must not be negative".to_string()));
    }

    Ok(ttl.clamp(1, max_ttl))
}

pub(crate) async fn acquire(
    state: &AppState,
    copy_id: &str,
    owner_id: &str,
    ttl_seconds: i64,
) -> Result<AcquireOutcome, LockError> {
    let limit = state.settings().locks().acquire_rate_limit_per_minute;
    if limit > 0 {
        let allowed = state
            .redis()
            .rate_limit(&format!("lock-acquire:{owner_id}"), limit, 60)
            .await
            .unwrap_or(true);
        if !allowed {
            return Err(LockError::RateLimited);
        }
    }

    let now = primitive_now_utc();
    let expires_at = now + Duration::seconds(ttl_seconds);

    let mut tx = state.db().begin().await?;

    let copy = repositories::copies::find_by_id_for_update(&mut tx, copy_id)
        .await?
        .ok_or(LockError::NotFound)?;
    if copy.status != CopyStatus::Ready && copy.status != CopyStatus::Locked {
        return Err(LockError::WrongStatus(format!(
            "Copy in status {:?} cannot be locked",
            copy.status
        )));
    }

    let existing = repositories::locks::find_by_copy_for_update(&mut tx, copy_id).await?;

    let outcome = match existing {
        Some(lock) if lock.expires_at > now => {
            if lock.owner_id == owner_id {
                repositories::locks::extend(&mut tx, copy_id, expires_at).await?;
                AcquireOutcome { created: false, token: lock.token, expires_at }
            } else {
                tx.rollback().await?;
                return Err(LockError::Conflict(format!(
                    "Copy is locked by another user until {}",
                    format_primitive(lock.expires_at)
                )));
            }
        }
        other => {
            let reclaimed = other.is_some();
            let token = security::generate_lock_token();
            repositories::locks::upsert(&mut tx, copy_id, owner_id, &token, now, expires_at)
                .await?;
            if copy.status == CopyStatus::Ready {
                repositories::copies::set_status(&mut tx, copy_id, CopyStatus::Locked, now)
                    .await?;
            }
            repositories::copies::set_locked_snapshot(
                &mut tx,
                copy_id,
                Some(owner_id),
                Some(now),
                now,
            )
            .await?;
            repositories::events::append(
                &mut tx,
                repositories::events::AppendEvent {
                    id: &Uuid::new_v4().to_string(),
                    copy_id,
                    actor_id: Some(owner_id),
                    action: GradingAction::Lock,
                    metadata: serde_json::json!({
                        "ttl_seconds": ttl_seconds,
                        "reclaimed": reclaimed,
                    }),
                    created_at: now,
                },
            )
            .await?;
            AcquireOutcome { created: true, token, expires_at }
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

pub(crate) async fn heartbeat(
    state: &AppState,
    copy_id: &str,
    owner_id: &str,
    token: &str,
) -> Result<PrimitiveDateTime, LockError> {
    let now = primitive_now_utc();
    let ttl = state.settings().locks().default_ttl_seconds as i64;
    let expires_at = now + Duration::seconds(ttl);

    let mut tx = state.db().begin().await?;

    let lock = repositories::locks::find_by_copy_for_update(&mut tx, copy_id)
        .await?
        .ok_or_else(|| LockError::Conflict("No active lock on this copy".to_string()))?;
    check_gate(&lock, owner_id, token, now)?;

    repositories::locks::extend(&mut tx, copy_id, expires_at).await?;
    tx.commit().await?;

    Ok(expires_at)
}

/// Idempotent: Ok(false) when no lock existed. Releasing someone else's lock
/// fails unless `force` (admin unlock) is set.
pub(crate) async fn release(
    state: &AppState,
    copy_id: &str,
    owner_id: &str,
    token: Option<&str>,
    force: bool,
) -> Result<bool, LockError> {
    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;

    let Some(lock) = repositories::locks::find_by_copy_for_update(&mut tx, copy_id).await? else {
        tx.rollback().await?;
        return Ok(false);
    };

    if !force {
        let token =
            token.ok_or_else(|| LockError::Forbidden("Lock token required".to_string()))?;
        if lock.token != token {
            return Err(LockError::Forbidden("Lock token does not match".to_string()));
        }
        if lock.owner_id != owner_id {
            return Err(LockError::Forbidden("Lock is owned by another user".to_string()));
        }
    }

    repositories::locks::delete(&mut tx, copy_id).await?;
    if let Some(copy) = repositories::copies::find_by_id_for_update(&mut tx, copy_id).await? {
        if copy.status == CopyStatus::Locked {
            repositories::copies::set_status(&mut tx, copy_id, CopyStatus::Ready, now).await?;
        }
        repositories::copies::set_locked_snapshot(&mut tx, copy_id, None, None, now).await?;
    }
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id,
            actor_id: Some(owner_id),
            action: GradingAction::Unlock,
            metadata: serde_json::json!({ "forced": force }),
            created_at: now,
        },
    )
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Gate for every lock-protected mutation: token must match, the caller must
/// own the lease, and the lease must still be live.
pub(crate) async fn verify_mutation_gate(
    state: &AppState,
    copy_id: &str,
    owner_id: &str,
    token: &str,
) -> Result<CopyLock, LockError> {
    let now = primitive_now_utc();
    let lock = repositories::locks::find_by_copy(state.db(), copy_id)
        .await?
        .ok_or_else(|| LockError::Conflict("No active lock on this copy".to_string()))?;
    check_gate(&lock, owner_id, token, now)?;
    Ok(lock)
}

fn check_gate(
    lock: &CopyLock,
    owner_id: &str,
    token: &str,
    now: PrimitiveDateTime,
) -> Result<(), LockError> {
    if lock.token != token {
        return Err(LockError::Forbidden("Lock token does not match".to_string()));
    }
    if lock.owner_id != owner_id {
        return Err(LockError::Conflict("Lock is owned by another user".to_string()));
    }
    if lock.expires_at <= now {
        return Err(LockError::Conflict("Lock has expired".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_defaults_when_missing() {
        assert_eq!(resolve_ttl(None, 600, 3600).unwrap(), 600);
    }

    #[test]
    fn ttl_clamps_into_range() {
        let huge = serde_json::json!(999_999);
        assert_eq!(resolve_ttl(Some(&huge), 600, 3600).unwrap(), 3600);

        let zero = serde_json::json!(0);
        assert_eq!(resolve_ttl(Some(&zero), 600, 3600).unwrap(), 1);
    }

    #[test]
    fn ttl_rejects_negative_and_non_integer() {
        let negative = serde_json::json!(-5);
        assert!(matches!(resolve_ttl(Some(&negative), 600, 3600), Err(LockError::BadTtl(_))));

        let text = serde_json::json!("abc");
        assert!(matches!(resolve_ttl(Some(&text), 600, 3600), Err(LockError::BadTtl(_))));

        let fractional = serde_json::json!(1.5);
        assert!(matches!(resolve_ttl(Some(&fractional), 600, 3600), Err(LockError::BadTtl(_))));
    }

    #[test]
    fn gate_rejects_wrong_token_owner_and_expiry() {
        let now = crate::core::time::primitive_now_utc();
        let lock = CopyLock {
            copy_id: "copy-1".to_string(),
            owner_id: "user-a".to_string(),
            token: "tok".to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(60),
        };

        assert!(check_gate(&lock, "user-a", "tok", now).is_ok());
        assert!(matches!(
            check_gate(&lock, "user-a", "bad", now),
            Err(LockError::Forbidden(_))
        ));
        assert!(matches!(
            check_gate(&lock, "user-b", "tok", now),
            Err(LockError::Conflict(_))
        ));
        assert!(matches!(
            check_gate(&lock, "user-a", "tok", now + Duration::seconds(61)),
            Err(LockError::Conflict(_))
        ));
    }
}
