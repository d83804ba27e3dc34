//! RTP packet wire format
//!
//! Parsing and serialization of the 12-byte fixed RTP header (RFC 3550 §5.1),
//! CSRC list, the optional extension header and trailing padding. Parsing is
//! guaranteed to locate the payload correctly regardless of which options are
//! present in the packet.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header in bytes
pub const RTP_HEADER_LEN: usize = 12;

/// RTP extension header: 16-bit profile data followed by the extension
/// payload length in 32-bit words (the 4-byte extension header itself is
/// not counted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtension {
    /// Profile-defined data
    pub profile_data: u16,
    /// Extension payload; length must be a multiple of 4 bytes
    pub data: Bytes,
}

impl RtpExtension {
    /// Wire size of this extension including its 4-byte header
    pub fn wire_len(&self) -> usize {
        4 + self.data.len()
    }
}

/// Decoded RTP packet header.
///
/// The CSRC count and extension flag are implied by `csrc` and `extension`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Marker bit
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Sequence number
    pub sequence: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
    /// Contributing sources (0..=15)
    pub csrc: Vec<u32>,
    /// Optional extension header
    pub extension: Option<RtpExtension>,
}

impl RtpHeader {
    /// Create a header with no CSRC entries and no extension.
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
        }
    }

    /// Wire size of this header including CSRC list and extension.
    pub fn wire_len(&self) -> usize {
        RTP_HEADER_LEN
            + self.csrc.len() * 4
            + self.extension.as_ref().map(|e| e.wire_len()).unwrap_or(0)
    }

    /// Parse a header from the start of `pkt`.
    ///
    /// Returns the header and the offset at which the payload begins. The
    /// caller is responsible for trimming padding; [`RtpPacket::parse`] does
    /// both.
    pub fn parse(pkt: &[u8]) -> Result<(Self, usize)> {
        if pkt.len() < RTP_HEADER_LEN {
            return Err(Error::PacketTooShort {
                needed: RTP_HEADER_LEN,
                actual: pkt.len(),
            });
        }

        let version = pkt[0] >> 6;
        if version != RTP_VERSION {
            return Err(Error::InvalidVersion(version));
        }

        let has_extension = pkt[0] & 0x10 != 0;
        let csrc_count = (pkt[0] & 0x0f) as usize;
        let marker = pkt[1] & 0x80 != 0;
        let payload_type = pkt[1] & 0x7f;
        let sequence = u16::from_be_bytes([pkt[2], pkt[3]]);
        let timestamp = u32::from_be_bytes([pkt[4], pkt[5], pkt[6], pkt[7]]);
        let ssrc = u32::from_be_bytes([pkt[8], pkt[9], pkt[10], pkt[11]]);

        // Payload is located right after the header plus CSRC list.
        let mut offset = RTP_HEADER_LEN + csrc_count * 4;
        if pkt.len() < offset {
            return Err(Error::InvalidLength {
                offset,
                packet_len: pkt.len(),
            });
        }

        let mut csrc = Vec::with_capacity(csrc_count);
        for i in 0..csrc_count {
            let at = RTP_HEADER_LEN + i * 4;
            csrc.push(u32::from_be_bytes([
                pkt[at],
                pkt[at + 1],
                pkt[at + 2],
                pkt[at + 3],
            ]));
        }

        // Adjust offset if an RTP extension is present.
        let extension = if has_extension {
            if pkt.len() < offset + 4 {
                return Err(Error::InvalidLength {
                    offset: offset + 4,
                    packet_len: pkt.len(),
                });
            }
            let profile_data = u16::from_be_bytes([pkt[offset], pkt[offset + 1]]);
            let words = u16::from_be_bytes([pkt[offset + 2], pkt[offset + 3]]) as usize;
            let data_start = offset + 4;
            let data_end = data_start + words * 4;
            if pkt.len() < data_end {
                return Err(Error::InvalidLength {
                    offset: data_end,
                    packet_len: pkt.len(),
                });
            }
            offset = data_end;
            Some(RtpExtension {
                profile_data,
                data: Bytes::copy_from_slice(&pkt[data_start..data_end]),
            })
        } else {
            None
        };

        if offset >= pkt.len() {
            return Err(Error::InvalidLength {
                offset,
                packet_len: pkt.len(),
            });
        }

        let header = Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrc,
            extension,
        };
        Ok((header, offset))
    }

    /// Serialize this header into `out`. `padding` sets the P bit; the
    /// padding bytes themselves are appended by the caller after the payload.
    pub fn serialize_into(&self, out: &mut BytesMut, padding: bool) {
        out.reserve(self.wire_len());
        let byte0 = (RTP_VERSION << 6)
            | (if padding { 0x20 } else { 0 })
            | (if self.extension.is_some() { 0x10 } else { 0 })
            | (self.csrc.len() as u8 & 0x0f);
        out.put_u8(byte0);
        out.put_u8((if self.marker { 0x80 } else { 0 }) | (self.payload_type & 0x7f));
        out.put_u16(self.sequence);
        out.put_u32(self.timestamp);
        out.put_u32(self.ssrc);
        for csrc in &self.csrc {
            out.put_u32(*csrc);
        }
        if let Some(ext) = &self.extension {
            out.put_u16(ext.profile_data);
            out.put_u16((ext.data.len() / 4) as u16);
            out.put_slice(&ext.data);
        }
    }
}

/// A decoded RTP packet: header plus payload with padding removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Decoded header
    pub header: RtpHeader,
    /// Codec payload, padding excluded
    pub payload: Bytes,
}

impl RtpPacket {
    /// Parse a full packet, trimming padding when the P bit is set.
    ///
    /// When padding is present the last byte of the packet gives the number
    /// of padding bytes, including itself.
    pub fn parse(pkt: &[u8]) -> Result<Self> {
        let (header, offset) = RtpHeader::parse(pkt)?;
        let mut payload_len = pkt.len() - offset;

        if pkt[0] & 0x20 != 0 {
            let padding = pkt[pkt.len() - 1] as usize;
            if padding == 0 || padding > payload_len {
                return Err(Error::InvalidPadding {
                    padding,
                    payload_len,
                });
            }
            payload_len -= padding;
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&pkt[offset..offset + payload_len]),
        })
    }

    /// Serialize header and payload into a single buffer.
    pub fn serialize(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.header.wire_len() + self.payload.len());
        self.header.serialize_into(&mut out, false);
        out.put_slice(&self.payload);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RtpHeader {
        RtpHeader {
            marker: false,
            payload_type: 0,
            sequence: 0x1234,
            timestamp: 0x5678_9abc,
            ssrc: 0xdead_beef,
            csrc: Vec::new(),
            extension: None,
        }
    }

    #[test]
    fn serialize_fixed_header() {
        let packet = RtpPacket {
            header: sample_header(),
            payload: Bytes::from_static(&[0x80, 0x01, 0x02, 0x03]),
        };
        let wire = packet.serialize();
        assert_eq!(wire.len(), 16);
        assert_eq!(wire[0], 0x80); // version 2, no P/X/CC
        assert_eq!(wire[1], 0x00);
        assert_eq!(&wire[2..4], &[0x12, 0x34]);
        assert_eq!(&wire[8..12], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn parse_roundtrip() {
        let packet = RtpPacket {
            header: sample_header(),
            payload: Bytes::from_static(&[1, 2, 3, 4, 5]),
        };
        let wire = packet.serialize();
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let mut wire = BytesMut::new();
        sample_header().serialize_into(&mut wire, false);
        wire.put_slice(&[0u8; 4]);
        let mut wire = wire.to_vec();
        wire[0] = (1 << 6) | (wire[0] & 0x3f);
        assert!(matches!(
            RtpPacket::parse(&wire),
            Err(Error::InvalidVersion(1))
        ));
    }

    #[test]
    fn parse_rejects_truncated() {
        let wire = [0x80u8, 0, 0, 1, 0, 0, 0, 0];
        assert!(matches!(
            RtpPacket::parse(&wire),
            Err(Error::PacketTooShort { .. })
        ));
    }

    #[test]
    fn parse_skips_csrc_and_extension() {
        let header = RtpHeader {
            csrc: vec![0x0101_0101, 0x0202_0202],
            extension: Some(RtpExtension {
                profile_data: 0xbede,
                data: Bytes::from_static(&[9, 9, 9, 9, 8, 8, 8, 8]),
            }),
            ..sample_header()
        };
        let packet = RtpPacket {
            header,
            payload: Bytes::from_static(&[0xaa, 0xbb]),
        };
        let wire = packet.serialize();
        // 12 fixed + 8 CSRC + 4 ext header + 8 ext data
        assert_eq!(wire.len(), 12 + 8 + 4 + 8 + 2);
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed.payload, Bytes::from_static(&[0xaa, 0xbb]));
        assert_eq!(parsed.header.csrc.len(), 2);
        assert_eq!(parsed.header.extension.as_ref().unwrap().profile_data, 0xbede);
    }

    #[test]
    fn parse_rejects_extension_overrun() {
        let mut wire = BytesMut::new();
        let mut header = sample_header();
        header.extension = Some(RtpExtension {
            profile_data: 0,
            data: Bytes::from_static(&[0; 4]),
        });
        header.serialize_into(&mut wire, false);
        let mut wire = wire.to_vec();
        // Claim 100 words of extension data that are not there.
        wire[14] = 0;
        wire[15] = 100;
        wire.push(0xaa);
        assert!(matches!(
            RtpPacket::parse(&wire),
            Err(Error::InvalidLength { .. })
        ));
    }

    #[test]
    fn parse_trims_padding() {
        let mut wire = BytesMut::new();
        sample_header().serialize_into(&mut wire, true);
        wire.put_slice(&[1, 2, 3, 4]); // payload
        wire.put_slice(&[0, 0, 3]); // 3 padding bytes, last gives the count
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed.payload, Bytes::from_static(&[1, 2, 3, 4]));
    }

    #[test]
    fn parse_rejects_bad_padding() {
        let mut wire = BytesMut::new();
        sample_header().serialize_into(&mut wire, true);
        wire.put_slice(&[1, 2, 250]); // claims 250 padding bytes
        assert!(matches!(
            RtpPacket::parse(&wire),
            Err(Error::InvalidPadding { .. })
        ));
    }
}
