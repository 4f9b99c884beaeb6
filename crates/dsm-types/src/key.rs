use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A single `(kind, id)` element of a [`Key`].
///
/// At most one of `int_id` / `string_id` is populated. A token with neither
/// populated is *incomplete*: it names a kind but is waiting for the store to
/// assign an id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyTok {
    pub kind: String,
    pub int_id: i64,
    pub string_id: String,
}

impl KeyTok {
    /// Create a token. Pass `""` / `0` for the id that is not used.
    pub fn new(kind: impl Into<String>, string_id: impl Into<String>, int_id: i64) -> Self {
        Self {
            kind: kind.into(),
            int_id,
            string_id: string_id.into(),
        }
    }

    /// Returns `true` if neither id is populated.
    pub fn is_incomplete(&self) -> bool {
        self.int_id == 0 && self.string_id.is_empty()
    }

    /// Returns `true` for reserved kinds (`__kind__`, `__key__`, ...).
    pub fn is_special(&self) -> bool {
        self.kind.starts_with("__")
    }

    fn check(&self, index: usize) -> Result<(), TypeError> {
        let reason = if self.kind.is_empty() {
            "empty kind"
        } else if self.int_id < 0 {
            "negative int id"
        } else if self.int_id != 0 && !self.string_id.is_empty() {
            "both int id and string id are set"
        } else {
            return Ok(());
        };
        Err(TypeError::InvalidToken {
            index,
            reason: reason.to_string(),
        })
    }
}

impl fmt::Display for KeyTok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.string_id.is_empty() {
            write!(f, "{},{:?}", self.kind, self.string_id)
        } else {
            write!(f, "{},{}", self.kind, self.int_id)
        }
    }
}

/// Hierarchical identifier for a stored entity.
///
/// A key is an ordered, non-empty sequence of [`KeyTok`]s plus an
/// `(app_id, namespace)` scoping pair. The last token names the entity
/// itself; the preceding tokens form its ancestor chain. Keys are immutable:
/// an incomplete key is never patched in place, the store hands back a new
/// complete key instead (see [`Key::with_int_id`]).
///
/// Two keys are equal iff their scoping and full token sequences are equal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "KeyRepr", into = "KeyRepr")]
pub struct Key {
    app_id: String,
    namespace: String,
    toks: Vec<KeyTok>,
}

/// Struct name a [`Key`] serializes under.
///
/// Serializers that store keys natively match on it; it must equal the
/// `rename` on `KeyRepr`.
pub const KEY_STRUCT_NAME: &str = "$__dsm_private_key";

/// Serialized form of a [`Key`]; decoding goes through [`Key::from_toks`]
/// so a deserialized key always holds at least one token.
#[derive(Serialize, Deserialize)]
#[serde(rename = "$__dsm_private_key")]
struct KeyRepr {
    app_id: String,
    namespace: String,
    toks: Vec<KeyTok>,
}

impl TryFrom<KeyRepr> for Key {
    type Error = TypeError;

    fn try_from(repr: KeyRepr) -> Result<Self, Self::Error> {
        Key::from_toks(repr.app_id, repr.namespace, repr.toks)
    }
}

impl From<Key> for KeyRepr {
    fn from(key: Key) -> Self {
        Self {
            app_id: key.app_id,
            namespace: key.namespace,
            toks: key.toks,
        }
    }
}

impl Key {
    /// Create a key for `kind` with the given id under an optional parent.
    ///
    /// The parent's tokens become the new key's ancestor chain; scoping comes
    /// from `app_id` / `namespace`.
    pub fn new(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        string_id: impl Into<String>,
        int_id: i64,
        parent: Option<&Key>,
    ) -> Self {
        let mut toks = parent.map(|p| p.toks.clone()).unwrap_or_default();
        toks.push(KeyTok::new(kind, string_id, int_id));
        Self {
            app_id: app_id.into(),
            namespace: namespace.into(),
            toks,
        }
    }

    /// Create an incomplete key for `kind`, to be completed by the store.
    pub fn incomplete(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        parent: Option<&Key>,
    ) -> Self {
        Self::new(app_id, namespace, kind, "", 0, parent)
    }

    /// Build a key from an explicit token sequence.
    ///
    /// Every token must have a kind and at most one id; every token except
    /// the last must be complete.
    pub fn from_toks(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        toks: Vec<KeyTok>,
    ) -> Result<Self, TypeError> {
        if toks.is_empty() {
            return Err(TypeError::EmptyKey);
        }
        let last = toks.len() - 1;
        for (index, tok) in toks.iter().enumerate() {
            tok.check(index)?;
            if index != last && tok.is_incomplete() {
                return Err(TypeError::InvalidToken {
                    index,
                    reason: "ancestor token is incomplete".to_string(),
                });
            }
        }
        Ok(Self {
            app_id: app_id.into(),
            namespace: namespace.into(),
            toks,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// All tokens, root first.
    pub fn toks(&self) -> &[KeyTok] {
        &self.toks
    }

    /// The token naming this entity.
    pub fn last(&self) -> &KeyTok {
        // Every constructor pushes at least one token.
        &self.toks[self.toks.len() - 1]
    }

    pub fn kind(&self) -> &str {
        &self.last().kind
    }

    pub fn string_id(&self) -> &str {
        &self.last().string_id
    }

    pub fn int_id(&self) -> i64 {
        self.last().int_id
    }

    /// Returns `true` if the last token carries an id.
    pub fn is_complete(&self) -> bool {
        !self.last().is_incomplete()
    }

    /// Returns `true` if this key names a reserved kind.
    pub fn is_special(&self) -> bool {
        self.last().is_special()
    }

    /// Number of tokens, including this entity's own.
    pub fn depth(&self) -> usize {
        self.toks.len()
    }

    /// The parent key, or `None` for a root key.
    pub fn parent(&self) -> Option<Key> {
        if self.toks.len() <= 1 {
            return None;
        }
        Some(Self {
            app_id: self.app_id.clone(),
            namespace: self.namespace.clone(),
            toks: self.toks[..self.toks.len() - 1].to_vec(),
        })
    }

    /// The root of this key's ancestor chain (itself for a root key).
    pub fn root(&self) -> Key {
        Self {
            app_id: self.app_id.clone(),
            namespace: self.namespace.clone(),
            toks: self.toks[..1].to_vec(),
        }
    }

    /// Returns `true` if `ancestor` is this key or one of its ancestors.
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        self.app_id == ancestor.app_id
            && self.namespace == ancestor.namespace
            && self.toks.len() >= ancestor.toks.len()
            && self.toks[..ancestor.toks.len()] == ancestor.toks[..]
    }

    /// Returns a copy of this key whose last token carries `int_id`.
    pub fn with_int_id(&self, int_id: i64) -> Key {
        let mut toks = self.toks.clone();
        let last = toks.len() - 1;
        toks[last].int_id = int_id;
        toks[last].string_id.clear();
        Self {
            app_id: self.app_id.clone(),
            namespace: self.namespace.clone(),
            toks,
        }
    }

    /// Returns `true` if the key is complete, well formed, and scoped to
    /// `app_id` / `namespace`. Reserved kinds are rejected unless
    /// `allow_special` is set.
    pub fn valid(&self, allow_special: bool, app_id: &str, namespace: &str) -> bool {
        self.is_complete() && self.partial_valid(allow_special, app_id, namespace)
    }

    /// Like [`Key::valid`], but the last token may be incomplete.
    pub fn partial_valid(&self, allow_special: bool, app_id: &str, namespace: &str) -> bool {
        if self.app_id != app_id || self.namespace != namespace {
            return false;
        }
        let last = self.toks.len() - 1;
        self.toks.iter().enumerate().all(|(index, tok)| {
            if tok.check(index).is_err() {
                return false;
            }
            if !allow_special && tok.is_special() {
                return false;
            }
            index == last || !tok.is_incomplete()
        })
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

/// Human-readable rendering, e.g. `app:ns:/User,"a"/Post,5`. This is for
/// logs and error messages only.
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.app_id.is_empty() || !self.namespace.is_empty() {
            write!(f, "{}:{}:", self.app_id, self.namespace)?;
        }
        for tok in &self.toks {
            write!(f, "/{tok}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user(id: &str) -> Key {
        Key::new("app", "ns", "User", id, 0, None)
    }

    #[test]
    fn new_key_accessors() {
        let key = user("a");
        assert_eq!(key.kind(), "User");
        assert_eq!(key.string_id(), "a");
        assert_eq!(key.int_id(), 0);
        assert_eq!(key.app_id(), "app");
        assert_eq!(key.namespace(), "ns");
        assert!(key.is_complete());
        assert!(key.parent().is_none());
    }

    #[test]
    fn parent_chain() {
        let parent = user("a");
        let child = Key::new("app", "ns", "Post", "", 5, Some(&parent));
        assert_eq!(child.depth(), 2);
        assert_eq!(child.parent(), Some(parent.clone()));
        assert_eq!(child.root(), parent);
        assert!(child.has_ancestor(&parent));
        assert!(child.has_ancestor(&child));
        assert!(!parent.has_ancestor(&child));
    }

    #[test]
    fn incomplete_key_completes_into_new_key() {
        let key = Key::incomplete("app", "ns", "User", None);
        assert!(!key.is_complete());
        let done = key.with_int_id(42);
        assert!(done.is_complete());
        assert_eq!(done.int_id(), 42);
        assert!(!key.is_complete());
        assert_ne!(key, done);
    }

    #[test]
    fn scoping_participates_in_equality() {
        let a = Key::new("app", "ns", "User", "a", 0, None);
        let b = Key::new("app", "other", "User", "a", 0, None);
        assert_ne!(a, b);
        assert!(!b.has_ancestor(&a));
    }

    #[test]
    fn from_toks_rejects_bad_tokens() {
        assert_eq!(
            Key::from_toks("", "", vec![]).unwrap_err(),
            TypeError::EmptyKey
        );
        let err = Key::from_toks("", "", vec![KeyTok::new("User", "a", 1)]).unwrap_err();
        assert!(matches!(err, TypeError::InvalidToken { index: 0, .. }));
        let err = Key::from_toks(
            "",
            "",
            vec![KeyTok::new("User", "", 0), KeyTok::new("Post", "", 1)],
        )
        .unwrap_err();
        assert!(matches!(err, TypeError::InvalidToken { index: 0, .. }));
    }

    #[test]
    fn from_toks_allows_incomplete_last_token() {
        let key = Key::from_toks(
            "",
            "",
            vec![KeyTok::new("User", "a", 0), KeyTok::new("Post", "", 0)],
        )
        .unwrap();
        assert!(!key.is_complete());
        assert!(key.partial_valid(false, "", ""));
        assert!(!key.valid(false, "", ""));
    }

    #[test]
    fn valid_checks_scope_and_special_kinds() {
        let key = user("a");
        assert!(key.valid(false, "app", "ns"));
        assert!(!key.valid(false, "app", "elsewhere"));
        let special = Key::new("app", "ns", "__kind__", "User", 0, None);
        assert!(!special.valid(false, "app", "ns"));
        assert!(special.valid(true, "app", "ns"));
    }

    #[test]
    fn display_format() {
        let parent = user("a");
        let child = Key::new("app", "ns", "Post", "", 5, Some(&parent));
        assert_eq!(child.to_string(), "app:ns:/User,\"a\"/Post,5");
        let bare = Key::new("", "", "User", "", 7, None);
        assert_eq!(bare.to_string(), "/User,7");
    }

    #[test]
    fn deserialize_rejects_empty_token_list() {
        let json = r#"{"app_id":"","namespace":"","toks":[]}"#;
        assert!(serde_json::from_str::<Key>(json).is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let key = Key::new("app", "ns", "Post", "", 5, Some(&user("a")));
        let json = serde_json::to_string(&key).unwrap();
        let parsed: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(key, parsed);
    }

    fn arb_tok() -> impl Strategy<Value = KeyTok> {
        ("[A-Z][a-z]{0,4}", prop_oneof![Just(String::new()), "[a-z]{1,3}"], 0i64..4)
            .prop_map(|(kind, sid, iid)| {
                if sid.is_empty() {
                    KeyTok::new(kind, "", iid)
                } else {
                    KeyTok::new(kind, sid, 0)
                }
            })
    }

    proptest! {
        #[test]
        fn equality_matches_scope_and_tokens(
            a in proptest::collection::vec(arb_tok(), 1..4),
            b in proptest::collection::vec(arb_tok(), 1..4),
            ns_a in "[a-b]?",
            ns_b in "[a-b]?",
        ) {
            let ka = Key { app_id: "app".into(), namespace: ns_a.clone(), toks: a.clone() };
            let kb = Key { app_id: "app".into(), namespace: ns_b.clone(), toks: b.clone() };
            prop_assert_eq!(ka == kb, ns_a == ns_b && a == b);
        }
    }
}
