use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::WalletMember;
use crate::error::{AppError, AppResult};

/// Read access to wallet membership.
///
/// `user_wallets` belongs to the wallet subsystem; this service only reads it,
/// apart from `add_member` used when seeding a standalone database.
pub struct WalletMemberRepository;

impl WalletMemberRepository {
    /// Seeds membership when the service runs against its own database.
    #[allow(dead_code)]
    pub async fn add_member(
        pool: &SqlitePool,
        wallet_id: &str,
        user_id: &str,
    ) -> AppResult<WalletMember> {
        let now = Utc::now().naive_utc();

        sqlx::query("INSERT OR IGNORE INTO user_wallets (wallet_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(wallet_id)
            .bind(user_id)
            .bind(now)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        sqlx::query_as::<_, WalletMember>(
            "SELECT wallet_id, user_id, created_at FROM user_wallets WHERE wallet_id = ? AND user_id = ?",
        )
        .bind(wallet_id)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn is_member(pool: &SqlitePool, wallet_id: &str, user_id: &str) -> AppResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_wallets WHERE wallet_id = ? AND user_id = ?",
        )
        .bind(wallet_id)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(found > 0)
    }
}
