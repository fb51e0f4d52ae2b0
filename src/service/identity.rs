//! Maps an inbound request identity to a single cart owner.

use uuid::Uuid;

use crate::domain::value_objects::CartOwner;

/// A verified user identity always wins over a session token; a blank session
/// token counts as no identity at all. `None` is a caller-level concern.
pub fn resolve(user_id: Option<Uuid>, session_token: Option<&str>) -> Option<CartOwner> {
    if let Some(id) = user_id {
        return Some(CartOwner::User(id));
    }
    session_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| CartOwner::Session(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_wins_over_session() {
        let id = Uuid::new_v4();
        let owner = resolve(Some(id), Some("sess-1")).unwrap();
        assert_eq!(owner, CartOwner::User(id));
    }

    #[test]
    fn test_session_fallback() {
        let owner = resolve(None, Some("sess-1")).unwrap();
        assert_eq!(owner, CartOwner::Session("sess-1".into()));
    }

    #[test]
    fn test_blank_session_is_no_identity() {
        assert!(resolve(None, Some("   ")).is_none());
        assert!(resolve(None, None).is_none());
    }
}
