// Authorization for the HTTP surface
//
// The engine never authenticates; handlers ask an `Authorizer` first.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

pub const USER_HEADER: &str = "x-user-id";
pub const ADMIN_PIN_HEADER: &str = "x-admin-pin";

/// What a request is trying to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ManageUsers,
    ManageMarkets,
    PlaceBet { user_id: String },
    ViewWallet { user_id: String },
}

/// Who is asking, as claimed by the request headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<String>,
    pub admin_pin: Option<String>,
}

impl Actor {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            user_id: read(USER_HEADER),
            admin_pin: read(ADMIN_PIN_HEADER),
        }
    }

    pub fn user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            admin_pin: None,
        }
    }

    pub fn admin(pin: &str) -> Self {
        Self {
            user_id: None,
            admin_pin: Some(pin.to_string()),
        }
    }
}

pub trait Authorizer: Send + Sync {
    fn authorize(&self, action: &Action, actor: &Actor) -> bool;
}

fn pin_digest(pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hex::encode(hasher.finalize())
}

/// Admin PIN check plus "users act only for themselves".
pub struct PinAuthorizer {
    /// SHA-256 hex of the admin PIN; `None` disables every admin action
    pin_hash: Option<String>,
}

impl PinAuthorizer {
    pub fn new(admin_pin: Option<&str>) -> Self {
        Self {
            pin_hash: admin_pin.filter(|p| !p.is_empty()).map(pin_digest),
        }
    }

    fn is_admin(&self, actor: &Actor) -> bool {
        match (&self.pin_hash, &actor.admin_pin) {
            (Some(expected), Some(given)) => pin_digest(given) == *expected,
            _ => false,
        }
    }
}

impl Authorizer for PinAuthorizer {
    fn authorize(&self, action: &Action, actor: &Actor) -> bool {
        match action {
            Action::ManageUsers | Action::ManageMarkets => self.is_admin(actor),
            Action::PlaceBet { user_id } => actor.user_id.as_deref() == Some(user_id.as_str()),
            Action::ViewWallet { user_id } => {
                actor.user_id.as_deref() == Some(user_id.as_str()) || self.is_admin(actor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_admin_actions_need_matching_pin() {
        let auth = PinAuthorizer::new(Some("2468"));
        assert!(auth.authorize(&Action::ManageMarkets, &Actor::admin("2468")));
        assert!(!auth.authorize(&Action::ManageMarkets, &Actor::admin("1357")));
        assert!(!auth.authorize(&Action::ManageUsers, &Actor::default()));
        assert!(!auth.authorize(&Action::ManageUsers, &Actor::user("alice")));
    }

    #[test]
    fn test_no_pin_configured_denies_admin() {
        let auth = PinAuthorizer::new(None);
        assert!(!auth.authorize(&Action::ManageUsers, &Actor::admin("")));
        assert!(!auth.authorize(&Action::ManageMarkets, &Actor::admin("anything")));
        let empty = PinAuthorizer::new(Some(""));
        assert!(!empty.authorize(&Action::ManageUsers, &Actor::admin("")));
    }

    #[test]
    fn test_users_act_only_for_themselves() {
        let auth = PinAuthorizer::new(Some("2468"));
        let bet = Action::PlaceBet { user_id: "alice".into() };
        assert!(auth.authorize(&bet, &Actor::user("alice")));
        assert!(!auth.authorize(&bet, &Actor::user("bob")));
        // admins cannot bet on someone's behalf
        assert!(!auth.authorize(&bet, &Actor::admin("2468")));

        let view = Action::ViewWallet { user_id: "alice".into() };
        assert!(auth.authorize(&view, &Actor::user("alice")));
        assert!(auth.authorize(&view, &Actor::admin("2468")));
        assert!(!auth.authorize(&view, &Actor::user("bob")));
    }

    #[test]
    fn test_actor_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static(" alice "));
        headers.insert(ADMIN_PIN_HEADER, HeaderValue::from_static(""));
        let actor = Actor::from_headers(&headers);
        assert_eq!(actor.user_id.as_deref(), Some("alice"));
        assert_eq!(actor.admin_pin, None);
    }

    #[test]
    fn test_pin_digest_is_sha256_hex() {
        assert_eq!(
            pin_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
