//! Points ledger.
//!
//! Balances live on `users.points` (never negative, enforced by a CHECK
//! constraint) and every movement is written to `point_transactions` in the
//! same database transaction as the balance change.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    AppState,
    error::{ApiError, ApiResult},
    models::{PointTransaction, TRANSACTION_COLUMNS, TransactionKind},
    services::{ChatEvent, NotificationKind},
};

/// Ledger entries returned by the history endpoint.
pub const HISTORY_LIMIT: i64 = 100;

/// Result of a completed transfer.
#[derive(Debug, Serialize)]
pub struct TransferReceipt {
    pub transaction: PointTransaction,
    pub new_balance: i64,
}

/// Public view of a balance.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PublicPoints {
    pub user_id: Uuid,
    pub name: String,
    pub points: i64,
}

/// Rejects transfers that could never succeed, before touching the database.
pub fn validate_transfer(from: Uuid, to: Uuid, amount: i64) -> ApiResult<()> {
    if amount <= 0 {
        return Err(ApiError::bad_request("Amount must be greater than zero"));
    }
    if from == to {
        return Err(ApiError::bad_request("Cannot transfer points to yourself"));
    }
    Ok(())
}

pub struct PointsService;

impl PointsService {
    /// Adds `amount` to a balance and returns the new balance.
    pub async fn credit(conn: &mut PgConnection, user_id: Uuid, amount: i64) -> ApiResult<i64> {
        let balance: Option<i64> =
            sqlx::query_scalar("UPDATE users SET points = points + $1 WHERE id = $2 RETURNING points")
                .bind(amount)
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;
        balance.ok_or_else(|| ApiError::not_found("User not found"))
    }

    /// Subtracts `amount` only if the balance covers it. `None` means it did not.
    pub async fn debit(
        conn: &mut PgConnection,
        user_id: Uuid,
        amount: i64,
    ) -> ApiResult<Option<i64>> {
        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET points = points - $1 WHERE id = $2 AND points >= $1 RETURNING points",
        )
        .bind(amount)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(balance)
    }

    /// Appends a ledger row. `None` on either side is the system.
    pub async fn record(
        conn: &mut PgConnection,
        from_user_id: Option<Uuid>,
        to_user_id: Option<Uuid>,
        amount: i64,
        kind: TransactionKind,
        note: Option<&str>,
    ) -> ApiResult<PointTransaction> {
        let sql = format!(
            "INSERT INTO point_transactions (id, from_user_id, to_user_id, amount, kind, note) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {TRANSACTION_COLUMNS}"
        );
        let tx = sqlx::query_as::<_, PointTransaction>(&sql)
            .bind(Uuid::new_v4())
            .bind(from_user_id)
            .bind(to_user_id)
            .bind(amount)
            .bind(kind.as_str())
            .bind(note)
            .fetch_one(&mut *conn)
            .await?;
        Ok(tx)
    }

    /// Moves points between two users atomically and notifies both.
    ///
    /// Both rows are locked in id order so concurrent opposite transfers
    /// cannot deadlock.
    pub async fn transfer(
        state: &AppState,
        from: Uuid,
        to: Uuid,
        amount: i64,
        note: Option<&str>,
    ) -> ApiResult<TransferReceipt> {
        validate_transfer(from, to, amount)?;

        let mut tx = state.db.begin().await?;

        let locked: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT id, name FROM users WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(vec![from, to])
        .fetch_all(&mut *tx)
        .await?;

        let Some((_, recipient_name)) = locked.iter().find(|(id, _)| *id == to).cloned() else {
            return Err(ApiError::not_found("Recipient not found"));
        };
        let Some((_, sender_name)) = locked.iter().find(|(id, _)| *id == from).cloned() else {
            return Err(ApiError::not_found("User not found"));
        };

        let new_balance = Self::debit(&mut tx, from, amount)
            .await?
            .ok_or_else(|| ApiError::bad_request("Insufficient points"))?;
        Self::credit(&mut tx, to, amount).await?;
        let transaction =
            Self::record(&mut tx, Some(from), Some(to), amount, TransactionKind::Transfer, note)
                .await?;

        tx.commit().await?;

        tracing::info!(
            from_user_id = %from,
            to_user_id = %to,
            amount,
            transaction_id = %transaction.id,
            "Points transferred"
        );

        state.chat.publish(
            to,
            ChatEvent::Notification {
                kind: NotificationKind::PointsReceived,
                text: format!("{sender_name} sent you {amount} points"),
                ad_id: None,
                from_user_id: Some(from),
            },
        );
        state.chat.publish(
            from,
            ChatEvent::Notification {
                kind: NotificationKind::PointsSent,
                text: format!("You sent {amount} points to {recipient_name}"),
                ad_id: None,
                from_user_id: None,
            },
        );

        Ok(TransferReceipt { transaction, new_balance })
    }

    /// Credits points from the system on behalf of an admin.
    pub async fn admin_grant(
        pool: &PgPool,
        admin_id: Uuid,
        user_id: Uuid,
        amount: i64,
        note: Option<&str>,
    ) -> ApiResult<TransferReceipt> {
        if amount <= 0 {
            return Err(ApiError::bad_request("Amount must be greater than zero"));
        }

        let mut tx = pool.begin().await?;
        let new_balance = Self::credit(&mut tx, user_id, amount).await?;
        let transaction =
            Self::record(&mut tx, None, Some(user_id), amount, TransactionKind::AdminGrant, note)
                .await?;
        tx.commit().await?;

        tracing::info!(admin_id = %admin_id, user_id = %user_id, amount, "Admin granted points");
        Ok(TransferReceipt { transaction, new_balance })
    }

    pub async fn balance(pool: &PgPool, user_id: Uuid) -> ApiResult<i64> {
        let points: Option<i64> = sqlx::query_scalar("SELECT points FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        points.ok_or_else(|| ApiError::not_found("User not found"))
    }

    pub async fn public_points(pool: &PgPool, user_id: Uuid) -> ApiResult<PublicPoints> {
        sqlx::query_as::<_, PublicPoints>(
            "SELECT id AS user_id, name, points FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
    }

    /// Entries sent or received by `user_id`, newest first.
    pub async fn history(pool: &PgPool, user_id: Uuid) -> ApiResult<Vec<PointTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM point_transactions \
             WHERE from_user_id = $1 OR to_user_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, PointTransaction>(&sql)
            .bind(user_id)
            .bind(HISTORY_LIMIT)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_rules() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(validate_transfer(a, b, 10).is_ok());

        let err = validate_transfer(a, b, 0).unwrap_err();
        assert_eq!(err.to_string(), "Amount must be greater than zero");
        assert!(validate_transfer(a, b, -5).is_err());

        let err = validate_transfer(a, a, 10).unwrap_err();
        assert_eq!(err.to_string(), "Cannot transfer points to yourself");
    }
}
