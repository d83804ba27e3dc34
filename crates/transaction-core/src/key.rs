//! Transaction identification.
//!
//! A response matches a client transaction iff the top Via branch equals the
//! transaction's branch and the CSeq method equals the transaction method;
//! ACK matches the INVITE transaction (RFC 3261 §17.1.3).

use std::fmt;

use rand::Rng;

use crate::message::{Method, Response};

/// The RFC 3261 magic cookie every compliant branch starts with.
pub const BRANCH_MAGIC: &str = "z9hG4bK";

/// Transaction role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// User agent client: we sent the request
    Client,
    /// User agent server: we received the request
    Server,
}

/// Unique transaction identity inside the layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    /// Via branch parameter
    pub branch: String,
    /// Transaction method (ACK folded into INVITE)
    pub method: Method,
    /// Role
    pub role: Role,
}

impl TransactionKey {
    /// Key for a client transaction.
    pub fn client(branch: impl Into<String>, method: Method) -> Self {
        Self {
            branch: branch.into(),
            method: normalize(method),
            role: Role::Client,
        }
    }

    /// The key an incoming response matches.
    pub fn from_response(response: &Response) -> Self {
        Self::client(response.branch.clone(), response.cseq_method)
    }
}

fn normalize(method: Method) -> Method {
    if method == Method::Ack {
        Method::Invite
    } else {
        method
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Client => "uac",
            Role::Server => "uas",
        };
        write!(f, "{role}:{}:{}", self.method, self.branch)
    }
}

/// Generate a fresh branch parameter with the RFC 3261 cookie.
pub fn generate_branch() -> String {
    let mut rng = rand::thread_rng();
    format!("{BRANCH_MAGIC}{:016x}", rng.gen::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn branch_carries_cookie_and_is_unique() {
        let a = generate_branch();
        let b = generate_branch();
        assert!(a.starts_with(BRANCH_MAGIC));
        assert_ne!(a, b);
    }

    #[test]
    fn ack_matches_invite_key() {
        let invite = TransactionKey::client("z9hG4bKabc", Method::Invite);
        let ack_response = Response {
            status_code: 200,
            branch: "z9hG4bKabc".into(),
            cseq_method: Method::Ack,
            data: Bytes::new(),
        };
        assert_eq!(TransactionKey::from_response(&ack_response), invite);
    }
}
