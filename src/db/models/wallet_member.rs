use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Wallet membership (read model of the wallet subsystem's `user_wallets`)
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WalletMember {
    pub wallet_id: String,
    pub user_id: String,
    pub created_at: NaiveDateTime,
}
