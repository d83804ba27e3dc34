//! The thin message surface the transaction layer observes.
//!
//! Parsing and printing of SIP messages belong to an external collaborator;
//! the transaction layer only needs the Via branch, the CSeq method and the
//! status code. Everything else travels as opaque bytes.

use std::fmt;

use bytes::Bytes;

/// SIP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Subscribe,
    Notify,
    Message,
    Info,
    Update,
    Refer,
}

impl Method {
    /// True for the INVITE method, which has its own transaction machine.
    pub fn is_invite(&self) -> bool {
        matches!(self, Method::Invite)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Message => "MESSAGE",
            Method::Info => "INFO",
            Method::Update => "UPDATE",
            Method::Refer => "REFER",
        };
        f.write_str(s)
    }
}

/// An outgoing request, already printed by the message layer.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request method (also the CSeq method)
    pub method: Method,
    /// Via branch parameter; the transaction key
    pub branch: String,
    /// Call-ID value
    pub call_id: String,
    /// CSeq number
    pub cseq: u32,
    /// The complete message as it goes on the wire
    pub data: Bytes,
}

/// An incoming response, already parsed by the message layer.
#[derive(Debug, Clone)]
pub struct Response {
    /// Status code, 100..=699
    pub status_code: u16,
    /// Branch parameter of the top Via
    pub branch: String,
    /// Method from the CSeq header
    pub cseq_method: Method,
    /// The complete message bytes
    pub data: Bytes,
}

impl Response {
    /// 1xx
    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status_code)
    }

    /// 2xx..6xx
    pub fn is_final(&self) -> bool {
        self.status_code >= 200
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let mut r = Response {
            status_code: 180,
            branch: "z9hG4bKtest".into(),
            cseq_method: Method::Register,
            data: Bytes::new(),
        };
        assert!(r.is_provisional());
        assert!(!r.is_final());
        r.status_code = 200;
        assert!(r.is_final());
        r.status_code = 481;
        assert!(r.is_final());
    }
}
