//! Media stream
//!
//! [`MediaStream`] is the aggregate that couples the audio device callbacks
//! to the network: capture frames run through echo cancellation and the
//! encoder into RTP, received packets run through RTP validation into the
//! jitter buffer, and playback frames are pulled from the jitter buffer with
//! loss concealment. The RTP session, jitter buffer and echo canceller are
//! plain owned values; callbacks take `&mut self`, so each datum keeps a
//! single writer.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::buffer::{JbFrameType, JitterBuffer, JitterBufferConfig, JitterStats};
use crate::codec::AudioCodec;
use crate::error::Result;
use crate::processing::{EchoCanceller, EchoCancellerConfig, SilenceDetector};
use sipline_rtp_core::{RtpSession, SeqEvent};

/// Configuration for one media stream.
#[derive(Debug, Clone)]
pub struct MediaStreamConfig {
    /// Outgoing SSRC; `None` draws a random one
    pub ssrc: Option<u32>,
    /// Jitter buffer parameters; `frame_size == 0` derives the slot size
    /// from the codec
    pub jitter: JitterBufferConfig,
    /// Echo canceller parameters
    pub echo: EchoCancellerConfig,
}

impl Default for MediaStreamConfig {
    fn default() -> Self {
        Self {
            ssrc: None,
            jitter: JitterBufferConfig {
                frame_size: 0,
                ..Default::default()
            },
            echo: EchoCancellerConfig::default(),
        }
    }
}

/// Stream counters.
#[derive(Debug, Clone, Default)]
pub struct MediaStreamStats {
    /// RTP packets produced by the capture path
    pub tx_packets: u64,
    /// RTP packets accepted into the jitter buffer
    pub rx_packets: u64,
    /// Packets dropped before the jitter buffer (malformed, probation,
    /// bad sequence)
    pub rx_dropped: u64,
    /// Capture frames flagged as silence
    pub silent_frames: u64,
    /// Playback frames synthesized by loss concealment
    pub plc_frames: u64,
    /// Device underruns reported
    pub underruns: u64,
}

/// The media-path aggregate for one call leg.
pub struct MediaStream {
    rtp: RtpSession,
    jitter: JitterBuffer,
    echo: EchoCanceller,
    codec: Box<dyn AudioCodec>,
    silence: SilenceDetector,

    samples_per_frame: usize,
    /// Encoded-frame scratch for the capture path
    enc_buf: Vec<u8>,
    /// Jitter slot scratch for the playback path
    jb_frame: Vec<u8>,
    /// Marker bit goes out on the first packet of the stream
    first_packet: bool,

    stats: MediaStreamStats,
}

impl MediaStream {
    /// Build a stream around an already-selected codec.
    pub fn new(mut codec: Box<dyn AudioCodec>, config: MediaStreamConfig) -> Result<Self> {
        codec.open()?;
        let info = codec.info();
        let samples_per_frame = info.frame_samples();

        let mut jitter_cfg = config.jitter;
        if jitter_cfg.frame_size == 0 {
            // Large enough for any frame the codec can emit.
            jitter_cfg.frame_size = samples_per_frame * 2;
        }
        let frame_size = jitter_cfg.frame_size;

        let mut echo_cfg = config.echo;
        echo_cfg.clock_rate = info.sample_rate;
        echo_cfg.samples_per_frame = samples_per_frame;

        debug!(
            codec = info.name,
            pt = info.payload_type,
            samples_per_frame,
            "media stream created"
        );

        Ok(Self {
            rtp: RtpSession::new(info.payload_type, config.ssrc)?,
            jitter: JitterBuffer::new(jitter_cfg)?,
            echo: EchoCanceller::new(echo_cfg)?,
            codec,
            silence: SilenceDetector::new(),
            samples_per_frame,
            enc_buf: vec![0u8; frame_size],
            jb_frame: vec![0u8; frame_size],
            first_packet: true,
            stats: MediaStreamStats::default(),
        })
    }

    /// Samples per frame on the audio side.
    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    /// Outgoing SSRC.
    pub fn ssrc(&self) -> u32 {
        self.rtp.ssrc()
    }

    /// Stream counters.
    pub fn stats(&self) -> &MediaStreamStats {
        &self.stats
    }

    /// Jitter buffer counters.
    pub fn jitter_stats(&self) -> &JitterStats {
        self.jitter.stats()
    }

    /// Capture-side callback: cancel echo, encode, packetize.
    ///
    /// Returns the RTP packet to send. The outgoing timestamp advances by
    /// exactly one frame of samples per call, independent of wall time.
    pub fn on_capture(&mut self, mic: &mut [i16]) -> Result<Bytes> {
        self.echo.capture(mic)?;
        if self.silence.detect(mic) {
            // Tag only; frames keep flowing so timestamps stay continuous.
            self.stats.silent_frames += 1;
        }

        let n = self.codec.encode(mic, &mut self.enc_buf)?;
        let marker = self.first_packet;
        self.first_packet = false;

        let hdr = self
            .rtp
            .encode_rtp(None, marker, n, self.samples_per_frame as u32);
        let mut pkt = BytesMut::with_capacity(hdr.len() + n);
        pkt.put_slice(hdr);
        pkt.put_slice(&self.enc_buf[..n]);
        self.stats.tx_packets += 1;
        Ok(pkt.freeze())
    }

    /// Network-side entry: decode, validate, and buffer one received packet.
    ///
    /// Malformed packets and sequence anomalies are dropped and counted,
    /// never surfaced; reorder is resolved by the jitter buffer.
    pub fn on_rx_packet(&mut self, pkt: &[u8]) {
        let (hdr, payload) = match self.rtp.decode_rtp(pkt) {
            Ok(decoded) => decoded,
            Err(e) => {
                trace!(error = %e, "dropping undecodable packet");
                self.stats.rx_dropped += 1;
                return;
            }
        };

        let event = match self.rtp.update(&hdr) {
            Ok(event) => event,
            Err(e) => {
                trace!(error = %e, "dropping packet failing session update");
                self.stats.rx_dropped += 1;
                return;
            }
        };

        match event {
            SeqEvent::Accepted => {}
            SeqEvent::Restarted => {
                debug!("peer restarted, flushing jitter buffer");
                self.jitter.reset();
            }
            SeqEvent::Probation | SeqEvent::BadSeq => {
                self.stats.rx_dropped += 1;
                return;
            }
        }

        match self.jitter.put_frame(&payload, hdr.sequence) {
            Ok(()) => self.stats.rx_packets += 1,
            Err(e) => {
                trace!(error = %e, "jitter buffer rejected frame");
                self.stats.rx_dropped += 1;
            }
        }
    }

    /// Playback-side callback: produce one PCM frame.
    ///
    /// Missing frames are concealed by the codec, prefetch/empty periods
    /// play silence. The produced frame is fed back to the echo canceller
    /// as the far-end reference.
    pub fn on_playback(&mut self, out: &mut [i16]) -> Result<JbFrameType> {
        let (ftype, n) = self.jitter.get_frame(&mut self.jb_frame)?;
        match ftype {
            JbFrameType::Normal => {
                self.codec.decode(&self.jb_frame[..n], out)?;
            }
            JbFrameType::Missing => {
                self.codec.recover(out)?;
                self.stats.plc_frames += 1;
            }
            JbFrameType::ZeroPrefetch | JbFrameType::ZeroEmpty => {
                out.fill(0);
            }
        }
        self.echo.playback(out)?;
        Ok(ftype)
    }

    /// The audio device reported an underrun: the capture/playback coupling
    /// is no longer trustworthy, so echo state restarts. The jitter
    /// buffer's learned prefetch is deliberately kept; device glitches say
    /// nothing about network jitter.
    pub fn on_underrun(&mut self) {
        self.stats.underruns += 1;
        self.echo.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::JbMode;
    use crate::codec::{make_codec, CodecKind};

    fn stream() -> MediaStream {
        let config = MediaStreamConfig {
            ssrc: Some(0x1234),
            jitter: JitterBufferConfig {
                frame_size: 0,
                max_count: 32,
                mode: JbMode::Adaptive,
                init_prefetch: 0,
                min_prefetch: 0,
                max_prefetch: 16,
            },
            ..Default::default()
        };
        MediaStream::new(make_codec(CodecKind::Pcmu), config).unwrap()
    }

    #[test]
    fn capture_produces_sendable_packets() {
        let mut tx = stream();
        let mut mic = [100i16; 160];
        let pkt1 = tx.on_capture(&mut mic).unwrap();
        let pkt2 = tx.on_capture(&mut mic).unwrap();
        assert_eq!(pkt1.len(), 12 + 160);
        // Marker set only on the first packet.
        assert_eq!(pkt1[1] & 0x80, 0x80);
        assert_eq!(pkt2[1] & 0x80, 0);
        let ts1 = u32::from_be_bytes([pkt1[4], pkt1[5], pkt1[6], pkt1[7]]);
        let ts2 = u32::from_be_bytes([pkt2[4], pkt2[5], pkt2[6], pkt2[7]]);
        assert_eq!(ts2, ts1.wrapping_add(160));
    }

    #[test]
    fn loopback_capture_to_playback() {
        let mut tx = stream();
        let mut rx = stream();
        let mut mic = [1000i16; 160];
        let mut out = [0i16; 160];

        // The tracker's first packet is dropped in probation; the second
        // confirms the source, flushes the jitter buffer and is stored.
        for _ in 0..2 {
            let pkt = tx.on_capture(&mut mic).unwrap();
            rx.on_rx_packet(&pkt);
        }
        assert_eq!(rx.stats().rx_packets, 1);
        assert_eq!(rx.stats().rx_dropped, 1);

        for _ in 0..5 {
            mic = [1000i16; 160];
            let pkt = tx.on_capture(&mut mic).unwrap();
            rx.on_rx_packet(&pkt);
            let ftype = rx.on_playback(&mut out).unwrap();
            assert_eq!(ftype, JbFrameType::Normal);
            // G.711 reproduces the level closely.
            assert!((out[0] as i32 - 1000).abs() < 64);
        }
        assert_eq!(rx.stats().rx_packets, 6);
    }

    #[test]
    fn lost_packet_triggers_plc() {
        let mut tx = stream();
        let mut rx = stream();
        let mut mic = [2000i16; 160];
        let mut out = [0i16; 160];

        let mut packets = Vec::new();
        for _ in 0..6 {
            mic = [2000i16; 160];
            packets.push(tx.on_capture(&mut mic).unwrap());
        }
        // Warm-up pair, then drop the fourth packet.
        rx.on_rx_packet(&packets[0]);
        rx.on_rx_packet(&packets[1]);
        rx.on_rx_packet(&packets[2]);
        rx.on_rx_packet(&packets[4]);
        rx.on_rx_packet(&packets[5]);

        assert_eq!(rx.on_playback(&mut out).unwrap(), JbFrameType::Normal);
        assert_eq!(rx.on_playback(&mut out).unwrap(), JbFrameType::Normal);
        assert_eq!(rx.on_playback(&mut out).unwrap(), JbFrameType::Missing);
        // Concealment replays attenuated audio rather than hard silence.
        assert!(out[0] != 0);
        assert_eq!(rx.on_playback(&mut out).unwrap(), JbFrameType::Normal);
        assert_eq!(rx.stats().plc_frames, 1);
        assert_eq!(rx.jitter_stats().lost, 1);
    }

    #[test]
    fn garbage_is_counted_not_fatal() {
        let mut rx = stream();
        rx.on_rx_packet(&[0u8; 3]);
        rx.on_rx_packet(&[0xffu8; 40]);
        assert_eq!(rx.stats().rx_dropped, 2);
    }

    #[test]
    fn underrun_resets_echo_only() {
        let mut rx = stream();
        let mut out = [0i16; 160];
        // Two playback frames fill the one-frame latency queue.
        rx.on_playback(&mut out).unwrap();
        rx.on_playback(&mut out).unwrap();
        assert!(rx.echo.is_ready());

        let before = rx.jitter.prefetch();
        rx.on_underrun();
        assert_eq!(rx.stats().underruns, 1);
        assert_eq!(rx.jitter.prefetch(), before);
        assert!(!rx.echo.is_ready());
    }
}
