use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Textual principal of the well-known anonymous identity.
pub const ANONYMOUS_PRINCIPAL: &str = "2vxsx-fae";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new<S: Into<String>>(text: S) -> Self { Principal(text.into()) }
    pub fn anonymous() -> Self { Principal(ANONYMOUS_PRINCIPAL.to_string()) }
    pub fn is_anonymous(&self) -> bool { self.0 == ANONYMOUS_PRINCIPAL }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl Display for Principal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// An authenticated credential: the principal plus the delegation the
/// identity provider issued for it. Opaque to everything but the transport.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub principal: Principal,
    pub delegation: String,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { self.expires_at <= now }
    pub fn is_expired(&self) -> bool { self.is_expired_at(Utc::now()) }
}

// Keep the delegation out of logs.
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("principal", &self.principal)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn anonymous_principal_roundtrip() {
        let p = Principal::anonymous();
        assert!(p.is_anonymous());
        assert_eq!(p.to_string(), "2vxsx-fae");
        assert!(!Principal::new("aaaaa-bbbbb").is_anonymous());
    }

    #[test]
    fn expiry_is_inclusive_of_now() {
        let now = Utc::now();
        let id = Identity { principal: Principal::new("p"), delegation: "d".into(), expires_at: now };
        assert!(id.is_expired_at(now));
        assert!(!id.is_expired_at(now - Duration::seconds(1)));
    }

    #[test]
    fn debug_hides_delegation() {
        let id = Identity { principal: Principal::new("p"), delegation: "secret-token".into(), expires_at: Utc::now() };
        assert!(!format!("{:?}", id).contains("secret-token"));
    }
}
