//! Staged mutations awaiting explicit confirmation.
//!
//! At most one row exists per account: staging a new action replaces whatever
//! was there. Rows are never updated in place; they are claimed (deleted) on
//! confirmation or cancellation, or dropped once expired.

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::models::text_enum;
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};

text_enum!(
    /// Mutation kinds the assistant can stage.
    ActionKind {
        CreateEvent => "create_event",
        UpdateEvent => "update_event",
        DeleteEvent => "delete_event",
        CreateVenue => "create_venue",
        CancelBooking => "cancel_booking",
    }
);

/// Parameter object exactly as extracted by the classifier.
pub type ActionParams = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAction {
    pub id: i64,
    pub account_id: i64,
    pub kind: ActionKind,
    pub params: ActionParams,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

const PENDING_COLUMNS: &str = "id, account_id, kind, params_json, created_at, expires_at";

impl Store {
    /// Stages an action for the account, superseding any earlier one.
    /// Expiry is fixed here at `now + ttl_minutes` and never extended.
    #[tracing::instrument(level = "debug", skip(self, params))]
    pub async fn create_pending_for(
        &self,
        account_id: i64,
        kind: ActionKind,
        params: ActionParams,
        ttl_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<PendingAction> {
        if ttl_minutes == 0 {
            return Err(StoreError::InvalidValue(
                "pending action ttl must be positive".to_string(),
            ));
        }
        let expires_at = now + Duration::minutes(i64::from(ttl_minutes));
        let params_json = serde_json::to_string(&params)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let superseded = tx.execute(
                "DELETE FROM pending_actions WHERE account_id = ?1",
                params![account_id],
            )?;
            tx.execute(
                "INSERT INTO pending_actions (account_id, kind, params_json, created_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![account_id, kind, params_json, now, expires_at],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            if superseded > 0 {
                tracing::debug!(account_id, superseded, "earlier pending action superseded");
            }
            Ok(PendingAction {
                id,
                account_id,
                kind,
                params,
                created_at: now,
                expires_at,
            })
        })
        .await
    }

    /// Most recent row for the account, expired or not.
    pub async fn most_recent_pending_for(&self, account_id: i64) -> Result<Option<PendingAction>> {
        self.with_conn(move |conn| {
            Ok(pending_rows(conn, account_id)?.into_iter().next())
        })
        .await
    }

    /// Most recent unexpired row. Expired rows found on the way are deleted.
    pub async fn live_pending_for(
        &self,
        account_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingAction>> {
        self.with_conn(move |conn| {
            let mut live = None;
            for action in pending_rows(conn, account_id)? {
                if action.is_expired_at(now) {
                    conn.execute(
                        "DELETE FROM pending_actions WHERE id = ?1",
                        params![action.id],
                    )?;
                    tracing::debug!(
                        account_id,
                        pending_id = action.id,
                        kind = %action.kind,
                        "expired pending action dropped"
                    );
                } else if live.is_none() {
                    live = Some(action);
                }
            }
            Ok(live)
        })
        .await
    }

    /// Deletes the row if it still exists. Returns whether this call removed
    /// it, so only one of several racing callers proceeds.
    pub async fn claim_pending(&self, pending_id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM pending_actions WHERE id = ?1",
                params![pending_id],
            )?;
            Ok(removed == 1)
        })
        .await
    }

    pub async fn purge_expired_pending(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {PENDING_COLUMNS} FROM pending_actions"
            ))?;
            let expired: Vec<i64> = stmt
                .query_map([], pending_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .map(|raw| raw.into_action())
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .filter(|action| action.is_expired_at(now))
                .map(|action| action.id)
                .collect();
            drop(stmt);
            let tx = conn.transaction()?;
            for id in &expired {
                tx.execute("DELETE FROM pending_actions WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            Ok(expired.len())
        })
        .await
    }

    pub async fn count_pending_for(&self, account_id: i64) -> Result<usize> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pending_actions WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }
}

struct RawPending {
    id: i64,
    account_id: i64,
    kind: ActionKind,
    params_json: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl RawPending {
    fn into_action(self) -> Result<PendingAction> {
        let params: ActionParams = serde_json::from_str(&self.params_json)?;
        Ok(PendingAction {
            id: self.id,
            account_id: self.account_id,
            kind: self.kind,
            params,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

fn pending_from_row(row: &Row<'_>) -> rusqlite::Result<RawPending> {
    Ok(RawPending {
        id: row.get(0)?,
        account_id: row.get(1)?,
        kind: row.get(2)?,
        params_json: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
    })
}

/// Rows for one account, newest first; ties broken by insertion order.
fn pending_rows(conn: &Connection, account_id: i64) -> Result<Vec<PendingAction>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PENDING_COLUMNS} FROM pending_actions WHERE account_id = ?1 \
         ORDER BY created_at DESC, id DESC"
    ))?;
    let raw = stmt
        .query_map(params![account_id], pending_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.into_iter().map(RawPending::into_action).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().expect("valid ts")
            + Duration::seconds(secs)
    }

    fn params(value: serde_json::Value) -> ActionParams {
        value.as_object().cloned().expect("object params")
    }

    async fn store_with_account() -> (Store, i64) {
        let store = Store::open_in_memory().await.expect("open store");
        let account = store
            .create_account("olga", "olga@example.com")
            .await
            .expect("account");
        (store, account.id)
    }

    #[test]
    fn action_kinds_use_snake_case_names() {
        assert_eq!(ActionKind::CancelBooking.as_str(), "cancel_booking");
        assert_eq!(
            "DELETE_EVENT".parse::<ActionKind>().expect("kind"),
            ActionKind::DeleteEvent
        );
        assert!("none".parse::<ActionKind>().is_err());
        assert_eq!(ActionKind::ALL.len(), 5);
    }

    #[tokio::test]
    async fn expiry_is_exactly_ttl_after_creation() {
        let (store, account_id) = store_with_account().await;
        let created = store
            .create_pending_for(
                account_id,
                ActionKind::CreateEvent,
                params(json!({"title": "Launch"})),
                5,
                ts(0),
            )
            .await
            .expect("create");
        assert_eq!(created.expires_at, ts(0) + Duration::minutes(5));

        let live = store
            .live_pending_for(account_id, ts(299))
            .await
            .expect("lookup")
            .expect("still live");
        assert_eq!(live.params, created.params);

        let gone = store
            .live_pending_for(account_id, ts(301))
            .await
            .expect("lookup");
        assert!(gone.is_none());
        assert_eq!(store.count_pending_for(account_id).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn action_expires_at_the_boundary_instant() {
        let (store, account_id) = store_with_account().await;
        store
            .create_pending_for(account_id, ActionKind::DeleteEvent, ActionParams::new(), 5, ts(0))
            .await
            .expect("create");
        assert!(
            store
                .live_pending_for(account_id, ts(300))
                .await
                .expect("lookup")
                .is_none()
        );
    }

    #[tokio::test]
    async fn staging_supersedes_the_previous_action() {
        let (store, account_id) = store_with_account().await;
        let first = store
            .create_pending_for(account_id, ActionKind::DeleteEvent, ActionParams::new(), 5, ts(0))
            .await
            .expect("first");
        let second = store
            .create_pending_for(
                account_id,
                ActionKind::CancelBooking,
                params(json!({"booking_id": 4})),
                5,
                ts(10),
            )
            .await
            .expect("second");

        assert_eq!(store.count_pending_for(account_id).await.expect("count"), 1);
        let current = store
            .most_recent_pending_for(account_id)
            .await
            .expect("lookup")
            .expect("current");
        assert_eq!(current.id, second.id);
        assert!(!store.claim_pending(first.id).await.expect("claim stale"));
    }

    #[tokio::test]
    async fn claim_succeeds_once() {
        let (store, account_id) = store_with_account().await;
        let action = store
            .create_pending_for(account_id, ActionKind::CreateVenue, ActionParams::new(), 5, ts(0))
            .await
            .expect("create");
        assert!(store.claim_pending(action.id).await.expect("first claim"));
        assert!(!store.claim_pending(action.id).await.expect("second claim"));
        assert!(
            store
                .most_recent_pending_for(account_id)
                .await
                .expect("lookup")
                .is_none()
        );
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let store = Store::open_in_memory().await.expect("open store");
        let early = store.create_account("early", "e@example.com").await.expect("a");
        let late = store.create_account("late", "l@example.com").await.expect("b");
        store
            .create_pending_for(early.id, ActionKind::CreateEvent, ActionParams::new(), 5, ts(0))
            .await
            .expect("early action");
        store
            .create_pending_for(late.id, ActionKind::CreateEvent, ActionParams::new(), 5, ts(240))
            .await
            .expect("late action");

        let purged = store.purge_expired_pending(ts(360)).await.expect("purge");
        assert_eq!(purged, 1);
        assert_eq!(store.count_pending_for(early.id).await.expect("count"), 0);
        assert_eq!(store.count_pending_for(late.id).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn rows_with_equal_timestamps_resolve_to_latest_insert() {
        let (store, account_id) = store_with_account().await;
        // Bypass the supersede path to force a tie.
        store
            .with_conn(move |conn| {
                for kind in [ActionKind::DeleteEvent, ActionKind::CancelBooking] {
                    conn.execute(
                        "INSERT INTO pending_actions (account_id, kind, params_json, created_at, expires_at) \
                         VALUES (?1, ?2, '{}', ?3, ?4)",
                        params![account_id, kind, ts(0), ts(300)],
                    )?;
                }
                Ok(())
            })
            .await
            .expect("seed");
        let current = store
            .most_recent_pending_for(account_id)
            .await
            .expect("lookup")
            .expect("current");
        assert_eq!(current.kind, ActionKind::CancelBooking);
    }
}
