// User records and administration

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::ledger::create_wallet_tx;
use crate::models::User;
use crate::store::{abort, tx_get, tx_put};
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::info;

const MAX_USER_ID_LEN: usize = 40;

static NON_SLUG: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(r"[^a-z0-9_-]+"));

/// Derive a stable user id from a display name.
///
/// Lowercases, collapses every run of characters outside `[a-z0-9_-]` into a
/// single `_` and truncates to 40 characters. Empty input yields `"user"`.
pub fn slug_user_id(name: &str) -> EngineResult<String> {
    let non_slug = NON_SLUG.as_ref().map_err(|e| EngineError::Pattern(e.clone()))?;
    let lowered = name.trim().to_lowercase();
    let slug: String = non_slug
        .replace_all(&lowered, "_")
        .chars()
        .take(MAX_USER_ID_LEN)
        .collect();
    if slug.is_empty() {
        Ok("user".to_string())
    } else {
        Ok(slug)
    }
}

fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// User record together with its current balance (admin listing)
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: User,
    pub balance: u64,
}

impl Engine {
    /// Create a user, its wallet and the initial grant in one transaction.
    ///
    /// `user_id` defaults to the slug of `display_name`; `initial_balance`
    /// defaults to the configured grant.
    pub fn create_user(
        &self,
        user_id: Option<&str>,
        display_name: &str,
        initial_balance: Option<i64>,
    ) -> EngineResult<User> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(EngineError::InvalidUser("display name is required".into()));
        }
        let user_id = match user_id {
            Some(id) => id.trim().to_string(),
            None => slug_user_id(display_name)?,
        };
        if !is_valid_user_id(&user_id) {
            return Err(EngineError::InvalidUser(format!(
                "'{}' is not a valid id (use a-z, 0-9, '_' or '-', at most {} chars)",
                user_id, MAX_USER_ID_LEN
            )));
        }
        let initial_balance = match initial_balance {
            Some(amount) if amount < 0 => return Err(EngineError::InvalidAmount(amount)),
            Some(amount) => amount as u64,
            None => self.config.initial_balance,
        };

        let now = Utc::now();
        let user = User {
            user_id: user_id.clone(),
            display_name: display_name.to_string(),
            is_disabled: false,
            created_at: now,
        };

        self.store.transact(
            "create_user",
            (&self.store.users, &self.store.wallets, &self.store.ledger),
            |(users, wallets, ledger)| {
                if tx_get::<User>(users, user.user_id.as_bytes())?.is_some() {
                    return abort(EngineError::UserExists(user.user_id.clone()));
                }
                tx_put(users, user.user_id.as_bytes(), &user)?;
                create_wallet_tx(wallets, ledger, &user.user_id, initial_balance, now)?;
                Ok(())
            },
        )?;

        info!(user_id = %user.user_id, display_name = %user.display_name, initial_balance, "user created");
        Ok(user)
    }

    pub fn get_user(&self, user_id: &str) -> EngineResult<Option<User>> {
        self.store.get(&self.store.users, user_id.as_bytes())
    }

    /// All users ordered by id, each with its balance.
    pub fn list_users(&self) -> EngineResult<Vec<UserSummary>> {
        let users: Vec<User> = self.store.scan_prefix(&self.store.users, b"")?;
        users
            .into_iter()
            .map(|user| {
                let balance = self.get_balance(&user.user_id)?;
                Ok(UserSummary { user, balance })
            })
            .collect()
    }

    pub fn set_user_disabled(&self, user_id: &str, disabled: bool) -> EngineResult<User> {
        let user = self.store.transact("set_user_disabled", &self.store.users, |users| {
            let Some(mut user) = tx_get::<User>(users, user_id.as_bytes())? else {
                return abort(EngineError::UserNotFound(user_id.to_string()));
            };
            user.is_disabled = disabled;
            tx_put(users, user_id.as_bytes(), &user)?;
            Ok(user)
        })?;
        info!(user_id, disabled, "user status updated");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LedgerKind, INITIAL_GRANT_REF};

    #[test]
    fn test_slug_pattern_compiles() {
        assert!(NON_SLUG.is_ok(), "{:?}", NON_SLUG.as_ref().err());
    }

    #[test]
    fn test_slug_user_id() {
        let slug = |name: &str| slug_user_id(name).unwrap();
        assert_eq!(slug("João Silva"), "jo_o_silva");
        assert_eq!(slug("  Ana-Maria_2 "), "ana-maria_2");
        assert_eq!(slug("!!!"), "_");
        assert_eq!(slug("   "), "user");
        assert_eq!(slug(&"x".repeat(60)).len(), 40);
    }

    #[test]
    fn test_create_user_with_default_grant() {
        let engine = Engine::temporary().unwrap();
        let user = engine.create_user(None, "Rui Costa", None).unwrap();

        assert_eq!(user.user_id, "rui_costa");
        assert_eq!(engine.get_balance("rui_costa").unwrap(), 10_000);
        let ledger = engine.list_ledger("rui_costa", 5).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].kind, LedgerKind::Credit);
        assert_eq!(ledger[0].reference, INITIAL_GRANT_REF);
    }

    #[test]
    fn test_duplicate_user_rejected_without_side_effects() {
        let engine = Engine::temporary().unwrap();
        engine.create_user(Some("ana"), "Ana", Some(500)).unwrap();
        let err = engine.create_user(Some("ana"), "Ana Again", Some(900)).unwrap_err();

        assert!(matches!(err, EngineError::UserExists(_)));
        assert_eq!(engine.get_balance("ana").unwrap(), 500);
        assert_eq!(engine.list_ledger("ana", 10).unwrap().len(), 1);
        assert_eq!(engine.get_user("ana").unwrap().unwrap().display_name, "Ana");
    }

    #[test]
    fn test_create_user_rejects_bad_input() {
        let engine = Engine::temporary().unwrap();
        assert!(matches!(engine.create_user(None, "  ", None), Err(EngineError::InvalidUser(_))));
        assert!(matches!(engine.create_user(Some("Bad Id"), "x", None), Err(EngineError::InvalidUser(_))));
        assert!(matches!(engine.create_user(None, "x", Some(-1)), Err(EngineError::InvalidAmount(-1))));
    }

    #[test]
    fn test_disable_and_list_users() {
        let engine = Engine::temporary().unwrap();
        engine.create_user(Some("zed"), "Zed", Some(5)).unwrap();
        engine.create_user(Some("amy"), "Amy", Some(7)).unwrap();

        let user = engine.set_user_disabled("zed", true).unwrap();
        assert!(user.is_disabled);

        let users = engine.list_users().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user.user_id, "amy");
        assert_eq!(users[0].balance, 7);
        assert!(users[1].user.is_disabled);

        assert!(matches!(
            engine.set_user_disabled("nobody", true),
            Err(EngineError::UserNotFound(_))
        ));
    }
}
