//! End-to-end RTP session tests: encode on one session, decode and track on
//! its peer.

use bytes::{BufMut, BytesMut};
use sipline_rtp_core::{RtpSession, SeqEvent};

/// Build a full packet the way a sender does: header from `encode_rtp`
/// followed by the payload.
fn encode_packet(ses: &mut RtpSession, payload: &[u8], ts_delta: u32) -> Vec<u8> {
    let hdr = ses.encode_rtp(None, false, payload.len(), ts_delta);
    let mut pkt = BytesMut::with_capacity(hdr.len() + payload.len());
    pkt.put_slice(hdr);
    pkt.put_slice(payload);
    pkt.to_vec()
}

#[test]
fn roundtrip_three_packets() {
    let mut tx = RtpSession::new(0, Some(0xdead)).unwrap();
    let mut rx = RtpSession::new(0, Some(0xbeef)).unwrap();

    let payload = [0x55u8; 160];
    let packets: Vec<Vec<u8>> = (0..3).map(|_| encode_packet(&mut tx, &payload, 160)).collect();

    // Sequence numbers are s, s+1, s+2 and timestamps t, t+160, t+320.
    let headers: Vec<_> = packets
        .iter()
        .map(|p| rx.decode_rtp(p).unwrap().0)
        .collect();
    let s = headers[0].sequence;
    let t = headers[0].timestamp;
    for (i, h) in headers.iter().enumerate() {
        assert_eq!(h.sequence, s.wrapping_add(i as u16));
        assert_eq!(h.timestamp, t.wrapping_add(160 * i as u32));
        assert_eq!(h.ssrc, 0xdead);
        assert_eq!(h.payload_type, 0);
    }

    // Decoded payload matches what was sent.
    for p in &packets {
        let (_, body) = rx.decode_rtp(p).unwrap();
        assert_eq!(&body[..], &payload[..]);
    }

    // The receiver warms up over the first two packets, then accepts.
    let events: Vec<_> = headers.iter().map(|h| rx.update(h).unwrap()).collect();
    assert_eq!(
        events,
        vec![SeqEvent::Probation, SeqEvent::Restarted, SeqEvent::Accepted]
    );
}

#[test]
fn sequence_wrap_advances_cycles() {
    let mut rx = RtpSession::new(0, Some(1)).unwrap();
    fn feed(rx: &mut RtpSession, seq: u16) -> SeqEvent {
        let hdr = sipline_rtp_core::RtpHeader::new(0, seq, 0, 0xcafe);
        rx.update(&hdr).unwrap()
    }

    // Warm up right below the wrap point.
    assert_eq!(feed(&mut rx, 65532), SeqEvent::Probation);
    assert_eq!(feed(&mut rx, 65533), SeqEvent::Restarted);

    assert_eq!(feed(&mut rx, 65534), SeqEvent::Accepted);
    assert_eq!(feed(&mut rx, 65535), SeqEvent::Accepted);
    assert_eq!(rx.seq_state().cycles, 0);
    assert_eq!(feed(&mut rx, 0), SeqEvent::Accepted);
    assert_eq!(rx.seq_state().cycles, 1 << 16);
    assert_eq!(feed(&mut rx, 1), SeqEvent::Accepted);
    assert_eq!(rx.seq_state().max_seq, 1);
}

#[test]
fn decode_rejects_garbage() {
    let rx = RtpSession::new(0, None).unwrap();
    assert!(rx.decode_rtp(&[0u8; 4]).is_err());
    // Version 0 packet (e.g. a STUN message hitting the RTP socket).
    let mut pkt = vec![0u8; 32];
    pkt[0] = 0x00;
    assert!(rx.decode_rtp(&pkt).is_err());
}
