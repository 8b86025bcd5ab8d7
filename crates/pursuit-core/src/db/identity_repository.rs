//! Account identity cache repository

use crate::error::Result;
use crate::models::{AccountIdentity, AccountKey};
use libsql::{params, Connection};

/// Trait for the durable single-slot identity cache (async)
#[allow(async_fn_in_trait)]
pub trait IdentityRepository {
    /// Load the cached identity, if any
    async fn load(&self) -> Result<Option<AccountIdentity>>;

    /// Replace the cached identity
    async fn save(&self, identity: &AccountIdentity) -> Result<()>;

    /// Drop the cached identity
    async fn clear(&self) -> Result<()>;
}

/// libSQL implementation of `IdentityRepository`
pub struct LibSqlIdentityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlIdentityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl IdentityRepository for LibSqlIdentityRepository<'_> {
    async fn load(&self) -> Result<Option<AccountIdentity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT session_id, account_key, resolved_at FROM account_identity WHERE slot = 1",
                (),
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(AccountIdentity {
                session_id: row.get(0)?,
                account_key: AccountKey(row.get(1)?),
                resolved_at: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    async fn save(&self, identity: &AccountIdentity) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO account_identity (slot, session_id, account_key, resolved_at)
                 VALUES (1, ?, ?, ?)",
                params![
                    identity.session_id.as_str(),
                    identity.account_key.get(),
                    identity.resolved_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM account_identity", ())
            .await?;
        Ok(())
    }
}
