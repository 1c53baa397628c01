//! Deterministic conversation identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ChatError;

/// Separator between the two handles of a conversation id.
pub const SEPARATOR: &str = "_vs_";

/// Characters that cannot appear in a handle because handles are used as
/// backend path segments.
const RESERVED: [char; 6] = ['/', '.', '#', '$', '[', ']'];

/// Check that `handle` can be stored and used in a conversation id.
///
/// Besides the reserved path characters, a handle may not contain the
/// separator, start with `vs_` or end with `_vs`. With those rules the
/// separator occurs exactly once in every id, so two different pairs can
/// never produce the same id.
///
/// # Errors
/// Returns `InvalidArgument` describing the first rule the handle breaks.
pub fn validate_handle(handle: &str) -> Result<(), ChatError> {
    if handle.is_empty() {
        return Err(ChatError::invalid("handle is empty"));
    }
    if handle.trim() != handle {
        return Err(ChatError::invalid(format!(
            "handle {handle:?} has surrounding whitespace"
        )));
    }
    if let Some(c) = handle
        .chars()
        .find(|c| c.is_control() || RESERVED.contains(c))
    {
        return Err(ChatError::invalid(format!(
            "handle {handle:?} contains reserved character {c:?}"
        )));
    }
    if handle.contains(SEPARATOR) || handle.starts_with("vs_") || handle.ends_with("_vs") {
        return Err(ChatError::invalid(format!(
            "handle {handle:?} collides with the conversation separator"
        )));
    }
    Ok(())
}

/// Canonical identifier of the conversation between two handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Derive the id for the unordered pair `{a, b}`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if either handle is invalid or `a == b`.
    pub fn between(a: &str, b: &str) -> Result<Self, ChatError> {
        validate_handle(a)?;
        validate_handle(b)?;
        if a == b {
            return Err(ChatError::invalid(format!(
                "cannot open a conversation between {a:?} and itself"
            )));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self(format!("{low}{SEPARATOR}{high}")))
    }

    /// The id as stored in backend paths.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participants, in canonical order.
    #[must_use]
    pub fn participants(&self) -> (&str, &str) {
        self.0.split_once(SEPARATOR).unwrap_or((self.0.as_str(), ""))
    }

    /// Whether `handle` takes part in this conversation.
    #[must_use]
    pub fn involves(&self, handle: &str) -> bool {
        let (a, b) = self.participants();
        a == handle || b == handle
    }

    /// The other participant, if `handle` takes part.
    #[must_use]
    pub fn partner_of(&self, handle: &str) -> Option<&str> {
        match self.participants() {
            (a, b) if a == handle => Some(b),
            (a, b) if b == handle => Some(a),
            _ => None,
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the conversation id for two handles.
///
/// # Errors
/// See [`ConversationId::between`].
pub fn conversation_id(a: &str, b: &str) -> Result<ConversationId, ChatError> {
    ConversationId::between(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_independent() {
        let pairs = [("alice", "bob"), ("Zed", "amy"), ("x", "x_y"), ("ß", "s")];
        for (a, b) in pairs {
            assert_eq!(conversation_id(a, b).unwrap(), conversation_id(b, a).unwrap());
        }
    }

    #[test]
    fn test_matches_legacy_layout() {
        let id = conversation_id("bob", "alice").unwrap();
        assert_eq!(id.as_str(), "alice_vs_bob");
        assert_eq!(id.participants(), ("alice", "bob"));
    }

    #[test]
    fn test_self_conversation_rejected() {
        for handle in ["alice", "a", "Bob"] {
            assert!(matches!(
                conversation_id(handle, handle),
                Err(ChatError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_empty_handle_rejected() {
        assert!(matches!(conversation_id("", "bob"), Err(ChatError::InvalidArgument(_))));
        assert!(matches!(conversation_id("bob", ""), Err(ChatError::InvalidArgument(_))));
    }

    #[test]
    fn test_case_sensitive() {
        let lower = conversation_id("alice", "bob").unwrap();
        let upper = conversation_id("Alice", "bob").unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_separator_overlap_rejected() {
        // ("p_vs", "q") and ("p", "vs_q") would both concatenate to "p_vs_vs_q".
        assert!(validate_handle("p_vs").is_err());
        assert!(validate_handle("vs_q").is_err());
        assert!(validate_handle("a_vs_b").is_err());
        assert!(validate_handle("p_v").is_ok());
        assert!(validate_handle("vsq").is_ok());
    }

    #[test]
    fn test_reserved_characters_rejected() {
        for bad in ["a/b", "a.b", "a#", "$a", "[a]", " alice", "bob\n", "tab\there"] {
            assert!(validate_handle(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_handle("алиса").is_ok());
    }

    #[test]
    fn test_distinct_pairs_distinct_ids() {
        let handles = ["a", "b", "a_", "_b", "a_v", "s_b", "ab", "vsb", "a_s"];
        let mut seen = std::collections::HashMap::new();
        for (i, a) in handles.iter().enumerate() {
            for b in &handles[i + 1..] {
                let id = conversation_id(a, b).unwrap();
                let mut pair = [*a, *b];
                pair.sort_unstable();
                if let Some(previous) = seen.insert(id.clone(), pair) {
                    panic!("{id} produced by {previous:?} and {pair:?}");
                }
            }
        }
    }

    #[test]
    fn test_partner_of() {
        let id = conversation_id("alice", "bob").unwrap();
        assert_eq!(id.partner_of("alice"), Some("bob"));
        assert_eq!(id.partner_of("bob"), Some("alice"));
        assert_eq!(id.partner_of("carol"), None);
        assert!(id.involves("bob"));
        assert!(!id.involves("carol"));
    }
}
