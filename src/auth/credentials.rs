//! Configured proxy users.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use subtle::{Choice, ConstantTimeEq};

/// One configured user/password pair, kept as raw bytes.
#[derive(Clone)]
pub struct Credential {
    user: Vec<u8>,
    password: Vec<u8>,
}

impl Credential {
    pub fn new(user: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Compares both fields in constant time.
    ///
    /// Each field is compared on its own and the results are combined
    /// afterwards, so a wrong password takes as long as a wrong user.
    pub fn matches(&self, user: &[u8], password: &[u8]) -> Choice {
        let user_ok = self.user.as_slice().ct_eq(user);
        let password_ok = self.password.as_slice().ct_eq(password);
        user_ok & password_ok
    }

    pub fn user(&self) -> &[u8] {
        &self.user
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &String::from_utf8_lossy(&self.user))
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The immutable set of users allowed through the proxy.
///
/// Deserializes from a `{ "user": "password" }` map.
///
/// ```
/// use rttp_proxy::auth::CredentialStore;
///
/// let store: CredentialStore = [("alice", "secret"), ("bob", "hunter2")].into_iter().collect();
/// assert_eq!(store.len(), 2);
/// assert!(bool::from(store.matches(b"bob", b"hunter2")));
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "BTreeMap<String, String>")]
pub struct CredentialStore {
    credentials: Vec<Credential>,
}

impl CredentialStore {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self { credentials }
    }

    /// Checks the pair against every configured credential.
    ///
    /// All credentials are visited even after a match.
    pub fn matches(&self, user: &[u8], password: &[u8]) -> Choice {
        let mut found = Choice::from(0);
        for credential in &self.credentials {
            found |= credential.matches(user, password);
        }
        found
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl From<BTreeMap<String, String>> for CredentialStore {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl<U, P> FromIterator<(U, P)> for CredentialStore
where
    U: Into<Vec<u8>>,
    P: Into<Vec<u8>>,
{
    fn from_iter<I: IntoIterator<Item = (U, P)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(user, password)| Credential::new(user, password))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_fields_must_match() {
        let credential = Credential::new("alice", "secret");
        assert!(bool::from(credential.matches(b"alice", b"secret")));
        assert!(!bool::from(credential.matches(b"alice", b"wrong")));
        assert!(!bool::from(credential.matches(b"mallory", b"secret")));
        assert!(!bool::from(credential.matches(b"alic", b"secret")));
    }

    #[test]
    fn any_pair_may_match() {
        let store: CredentialStore = [("alice", "a"), ("bob", "b")].into_iter().collect();
        assert!(bool::from(store.matches(b"bob", b"b")));
        assert!(!bool::from(store.matches(b"bob", b"a")));
    }

    #[test]
    fn deserializes_from_map() {
        let store: CredentialStore =
            serde_json::from_str(r#"{ "alice": "secret", "bob": "pw" }"#).unwrap();
        assert_eq!(store.len(), 2);
        assert!(bool::from(store.matches(b"alice", b"secret")));
    }

    #[test]
    fn debug_hides_passwords() {
        let store: CredentialStore = [("alice", "secret")].into_iter().collect();
        let printed = format!("{store:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("secret"));
    }
}
