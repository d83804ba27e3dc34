//! RTP session engine
//!
//! Keeps the outbound header state (payload type, SSRC, sequence, timestamp)
//! and the inbound sequence tracker for one peer. The session does not own a
//! socket: `encode_rtp` hands back the serialized header so the caller can
//! send header and payload together, and `decode_rtp`/`update` are fed with
//! packets received elsewhere.

use bytes::Bytes;
use rand::Rng;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::packet::{RtpHeader, RtpPacket, RTP_HEADER_LEN, RTP_VERSION};
use crate::sequence::{RtpSeqSession, SeqEvent};

/// Per-peer RTP session state.
///
/// The encode side (outbound header) and the decode side (peer SSRC, sequence
/// tracker) are both kept here; per the threading model each side has a
/// single writer.
#[derive(Debug)]
pub struct RtpSession {
    /// Serialized header for outgoing packets, rewritten by `encode_rtp`
    out_hdr: [u8; RTP_HEADER_LEN],
    /// Default outgoing payload type
    out_pt: u8,
    /// Outgoing extended sequence number
    out_extseq: u32,
    /// Outgoing media timestamp
    out_ts: u32,
    /// Outgoing SSRC
    out_ssrc: u32,
    /// Peer SSRC, learned from the first inbound packet
    peer_ssrc: u32,
    /// Number of inbound packets accepted
    received: u32,
    /// Inbound sequence tracking
    seq_ctrl: RtpSeqSession,
}

impl RtpSession {
    /// Create a session with the given default payload type.
    ///
    /// When `sender_ssrc` is `None` (or zero), the SSRC and the initial
    /// sequence number are drawn from the thread RNG; a caller-supplied SSRC
    /// still gets a random initial sequence.
    pub fn new(default_pt: u8, sender_ssrc: Option<u32>) -> Result<Self> {
        if default_pt > 0x7f {
            return Err(Error::InvalidArgument("payload type exceeds 7 bits"));
        }

        let mut rng = rand::thread_rng();
        let out_ssrc = match sender_ssrc {
            Some(ssrc) if ssrc != 0 => ssrc,
            _ => rng.gen(),
        };
        let out_extseq = rng.gen::<u16>() as u32;

        debug!(pt = default_pt, ssrc = out_ssrc, "rtp session created");

        Ok(Self {
            out_hdr: [0u8; RTP_HEADER_LEN],
            out_pt: default_pt,
            out_extseq,
            out_ts: 0,
            out_ssrc,
            peer_ssrc: 0,
            received: 0,
            seq_ctrl: RtpSeqSession::default(),
        })
    }

    /// Outgoing SSRC.
    pub fn ssrc(&self) -> u32 {
        self.out_ssrc
    }

    /// Peer SSRC, zero until the first inbound packet.
    pub fn peer_ssrc(&self) -> u32 {
        self.peer_ssrc
    }

    /// Number of inbound packets accepted so far.
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Inbound sequence tracker state.
    pub fn seq_state(&self) -> &RtpSeqSession {
        &self.seq_ctrl
    }

    /// Build the header for the next outgoing packet.
    ///
    /// Advances the sequence number by one and the timestamp by `ts_delta`
    /// samples, then returns the serialized 12-byte header. The caller sends
    /// this header followed by `payload_len` bytes of payload; `pt = None`
    /// selects the session default.
    pub fn encode_rtp(
        &mut self,
        pt: Option<u8>,
        marker: bool,
        payload_len: usize,
        ts_delta: u32,
    ) -> &[u8] {
        let _ = payload_len;

        self.out_extseq = self.out_extseq.wrapping_add(1);
        self.out_ts = self.out_ts.wrapping_add(ts_delta);

        let pt = pt.unwrap_or(self.out_pt) & 0x7f;
        let seq = self.out_extseq as u16;

        trace!(pt, seq, ts = self.out_ts, "encode rtp header");

        self.out_hdr[0] = RTP_VERSION << 6;
        self.out_hdr[1] = (if marker { 0x80 } else { 0 }) | pt;
        self.out_hdr[2..4].copy_from_slice(&seq.to_be_bytes());
        self.out_hdr[4..8].copy_from_slice(&self.out_ts.to_be_bytes());
        self.out_hdr[8..12].copy_from_slice(&self.out_ssrc.to_be_bytes());
        &self.out_hdr
    }

    /// Decode an inbound packet into header and payload.
    ///
    /// The payload is located correctly regardless of CSRC entries, an
    /// extension header, or padding.
    pub fn decode_rtp(&self, pkt: &[u8]) -> Result<(RtpHeader, Bytes)> {
        let packet = RtpPacket::parse(pkt)?;
        Ok((packet.header, packet.payload))
    }

    /// Run the inbound sequence tracker for a decoded header.
    ///
    /// Learns the peer SSRC on the first packet and verifies the payload
    /// type against the session default. On [`SeqEvent::Restarted`] the
    /// tracker is resynced here, so callers only need to flush their own
    /// downstream state (e.g. the jitter buffer).
    pub fn update(&mut self, hdr: &RtpHeader) -> Result<SeqEvent> {
        if self.peer_ssrc == 0 {
            self.peer_ssrc = hdr.ssrc;
        }

        if hdr.payload_type != self.out_pt {
            debug!(
                got = hdr.payload_type,
                expected = self.out_pt,
                "inbound payload type mismatch"
            );
            return Err(Error::PayloadTypeMismatch {
                got: hdr.payload_type,
                expected: self.out_pt,
            });
        }

        if self.received == 0 {
            self.seq_ctrl.init(hdr.sequence);
        }

        let event = self.seq_ctrl.update(hdr.sequence);
        match event {
            SeqEvent::Restarted => {
                debug!(seq = hdr.sequence, "peer restarted, resyncing tracker");
                self.seq_ctrl.restart(hdr.sequence);
                self.received = self.received.wrapping_add(1);
            }
            SeqEvent::Accepted | SeqEvent::Probation => {
                self.received = self.received.wrapping_add(1);
            }
            SeqEvent::BadSeq => {}
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_advances_seq_and_ts() {
        let mut ses = RtpSession::new(0, Some(0xdead)).unwrap();
        let hdr1 = ses.encode_rtp(None, false, 160, 160).to_vec();
        let hdr2 = ses.encode_rtp(None, false, 160, 160).to_vec();
        let seq1 = u16::from_be_bytes([hdr1[2], hdr1[3]]);
        let seq2 = u16::from_be_bytes([hdr2[2], hdr2[3]]);
        let ts1 = u32::from_be_bytes([hdr1[4], hdr1[5], hdr1[6], hdr1[7]]);
        let ts2 = u32::from_be_bytes([hdr2[4], hdr2[5], hdr2[6], hdr2[7]]);
        assert_eq!(seq2, seq1.wrapping_add(1));
        assert_eq!(ts2, ts1.wrapping_add(160));
        assert_eq!(&hdr1[8..12], &0xdeadu32.to_be_bytes());
    }

    #[test]
    fn marker_and_pt_override() {
        let mut ses = RtpSession::new(0, Some(1)).unwrap();
        let hdr = ses.encode_rtp(Some(8), true, 160, 160);
        assert_eq!(hdr[1], 0x80 | 8);
        let hdr = ses.encode_rtp(None, false, 160, 160);
        assert_eq!(hdr[1], 0);
    }

    #[test]
    fn rejects_oversized_pt() {
        assert!(matches!(
            RtpSession::new(0x80, None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn update_checks_payload_type() {
        let mut ses = RtpSession::new(0, Some(1)).unwrap();
        let hdr = RtpHeader::new(8, 100, 0, 0xfeed);
        assert!(matches!(
            ses.update(&hdr),
            Err(Error::PayloadTypeMismatch { got: 8, expected: 0 })
        ));
    }

    #[test]
    fn update_learns_peer_ssrc_and_warms_up() {
        let mut ses = RtpSession::new(0, Some(1)).unwrap();
        let mk = |seq| RtpHeader::new(0, seq, 0, 0xfeed);
        assert_eq!(ses.update(&mk(500)).unwrap(), SeqEvent::Probation);
        assert_eq!(ses.peer_ssrc(), 0xfeed);
        assert_eq!(ses.update(&mk(501)).unwrap(), SeqEvent::Restarted);
        assert_eq!(ses.update(&mk(502)).unwrap(), SeqEvent::Accepted);
        assert_eq!(ses.received(), 3);
    }
}
