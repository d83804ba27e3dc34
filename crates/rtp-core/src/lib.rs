//! # RTP core library for the sipline stack
//!
//! `sipline-rtp-core` implements the RTP packet wire format and per-peer
//! session state from RFC 3550:
//!
//! - **Packet codec**: 12-byte fixed header, CSRC list, extension header and
//!   padding ([`packet`])
//! - **Sequence tracking**: the Appendix A.1 probation/restart/bad-sequence
//!   machine ([`sequence`])
//! - **Session engine**: outbound header generation and inbound validation
//!   ([`session`])
//!
//! The crate depends on no transport: `encode_rtp` returns the header so the
//! caller can send header and payload together (scatter/gather friendly), and
//! the decode path operates on received byte slices. RTCP is not implemented,
//! but [`sequence::RtpSeqSession`] is free-standing so an RTCP module can
//! share it.

pub mod error;
pub mod packet;
pub mod sequence;
pub mod session;

pub use error::{Error, Result};
pub use packet::{RtpExtension, RtpHeader, RtpPacket, RTP_HEADER_LEN, RTP_VERSION};
pub use sequence::{RtpSeqSession, SeqEvent, MAX_DROPOUT, MAX_MISORDER, MIN_SEQUENTIAL};
pub use session::RtpSession;
