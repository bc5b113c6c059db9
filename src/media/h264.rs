//! H.264/AVC framing for RTMP
//!
//! RTMP carries H.264 as AVCC: NAL units with a 4-byte big-endian length
//! prefix, announced by an AVCDecoderConfigurationRecord sequence header.
//! Hardware encoders usually hand out Annex B (start-code delimited) output,
//! so this module converts between the two.
//!
//! AVCDecoderConfigurationRecord:
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | 0xFC | lengthSizeMinusOne (2 bits)
//! | 0xE0 | numOfSPS (5 bits) | { spsLength (2) | sps }*
//! | numOfPPS (1) | { ppsLength (2) | pps }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::MediaError;

/// AVC packet type (second byte of an AVC video body)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvcPacketType {
    SequenceHeader = 0,
    Nalu = 1,
    EndOfSequence = 2,
}

impl AvcPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AvcPacketType::SequenceHeader),
            1 => Some(AvcPacketType::Nalu),
            2 => Some(AvcPacketType::EndOfSequence),
            _ => None,
        }
    }
}

/// NAL unit types the publisher cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl NaluType {
    pub fn from_header(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            t => NaluType::Other(t),
        }
    }
}

/// AVCDecoderConfigurationRecord
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// 66 Baseline, 77 Main, 100 High
    pub profile: u8,
    pub compatibility: u8,
    /// e.g. 31 for level 3.1
    pub level: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Build from parameter sets. Profile and level are read from the first SPS.
    pub fn from_parameter_sets(sps: Vec<Bytes>, pps: Vec<Bytes>) -> Result<Self, MediaError> {
        let first = sps.first().ok_or(MediaError::InvalidAvc("missing SPS"))?;
        if first.len() < 4 {
            return Err(MediaError::InvalidAvc("SPS too short"));
        }
        if pps.is_empty() {
            return Err(MediaError::InvalidAvc("missing PPS"));
        }
        Ok(Self {
            profile: first[1],
            compatibility: first[2],
            level: first[3],
            sps,
            pps,
        })
    }

    /// Pull SPS and PPS out of an Annex B or AVCC parameter-set blob
    pub fn from_stream(data: &[u8]) -> Result<Self, MediaError> {
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        for nalu in split_nalus(data) {
            match NaluType::from_header(nalu[0]) {
                NaluType::Sps => sps.push(Bytes::copy_from_slice(nalu)),
                NaluType::Pps => pps.push(Bytes::copy_from_slice(nalu)),
                _ => {}
            }
        }
        Self::from_parameter_sets(sps, pps)
    }

    /// Serialize as the record carried in the sequence header
    pub fn to_bytes(&self) -> Bytes {
        let size = 7
            + self.sps.iter().map(|s| s.len() + 2).sum::<usize>()
            + self.pps.iter().map(|p| p.len() + 2).sum::<usize>();
        let mut out = BytesMut::with_capacity(size);
        out.put_u8(1);
        out.put_u8(self.profile);
        out.put_u8(self.compatibility);
        out.put_u8(self.level);
        out.put_u8(0xFC | 3); // 4-byte NALU lengths
        out.put_u8(0xE0 | (self.sps.len() as u8 & 0x1F));
        for sps in &self.sps {
            out.put_u16(sps.len() as u16);
            out.put_slice(sps);
        }
        out.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            out.put_u16(pps.len() as u16);
            out.put_slice(pps);
        }
        out.freeze()
    }

    pub fn parse(mut data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 6 || data[0] != 1 {
            return Err(MediaError::InvalidAvc("bad configuration record header"));
        }
        data.advance(1);
        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        data.advance(1);

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_sets(&mut data, num_sps)?;
        if !data.has_remaining() {
            return Err(MediaError::InvalidAvc("missing PPS count"));
        }
        let num_pps = data.get_u8() as usize;
        let pps = read_sets(&mut data, num_pps)?;

        Ok(Self {
            profile,
            compatibility,
            level,
            sps,
            pps,
        })
    }
}

fn read_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>, MediaError> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.remaining() < 2 {
            return Err(MediaError::InvalidAvc("truncated parameter set"));
        }
        let len = data.get_u16() as usize;
        if data.remaining() < len {
            return Err(MediaError::InvalidAvc("truncated parameter set"));
        }
        sets.push(data.split_to(len));
    }
    Ok(sets)
}

/// Whether `data` starts with an Annex B start code
pub fn is_annex_b(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

/// Split an access unit into NAL units, accepting Annex B or 4-byte AVCC
pub fn split_nalus(data: &[u8]) -> Vec<&[u8]> {
    if is_annex_b(data) {
        split_annex_b(data)
    } else {
        AvccIter { data }.collect()
    }
}

fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut nalus = Vec::new();
    let mut start = None;
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if let Some(s) = start {
                // A 4-byte start code leaves one trailing zero on the previous NALU
                let end = if i > s && data[i - 1] == 0 { i - 1 } else { i };
                if end > s {
                    nalus.push(&data[s..end]);
                }
            }
            i += 3;
            start = Some(i);
        } else {
            i += 1;
        }
    }
    if let Some(s) = start {
        if s < data.len() {
            nalus.push(&data[s..]);
        }
    }
    nalus
}

struct AvccIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for AvccIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.data.len() < 4 {
            return None;
        }
        let len =
            u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]) as usize;
        if len == 0 || self.data.len() < 4 + len {
            return None;
        }
        let nalu = &self.data[4..4 + len];
        self.data = &self.data[4 + len..];
        Some(nalu)
    }
}

/// Convert an access unit to AVCC, dropping parameter sets and delimiters.
///
/// SPS/PPS travel in the sequence header, and AUDs are meaningless in FLV.
pub fn to_avcc(data: &[u8]) -> Bytes {
    let nalus = split_nalus(data);
    let mut out = BytesMut::with_capacity(data.len() + 4 * nalus.len());
    for nalu in nalus {
        if matches!(
            NaluType::from_header(nalu[0]),
            NaluType::Sps | NaluType::Pps | NaluType::Aud
        ) {
            continue;
        }
        out.put_u32(nalu.len() as u32);
        out.put_slice(nalu);
    }
    out.freeze()
}

/// Whether an AVCC or Annex B access unit contains an IDR slice
pub fn contains_idr(data: &[u8]) -> bool {
    split_nalus(data)
        .iter()
        .any(|n| NaluType::from_header(n[0]) == NaluType::Idr)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9];
    const PPS: &[u8] = &[0x68, 0xEB, 0xE3, 0xCB];

    #[test]
    fn test_config_record_layout() {
        let config = AvcConfig::from_parameter_sets(
            vec![Bytes::from_static(SPS)],
            vec![Bytes::from_static(PPS)],
        )
        .unwrap();
        assert_eq!(config.profile, 100);
        assert_eq!(config.level, 31);

        let bytes = config.to_bytes();
        assert_eq!(&bytes[..6], &[1, 0x64, 0x00, 0x1F, 0xFF, 0xE1]);
        assert_eq!(&bytes[6..8], &[0, SPS.len() as u8]);
        assert_eq!(AvcConfig::parse(bytes).unwrap(), config);
    }

    #[test]
    fn test_config_from_annex_b_stream() {
        let mut stream = vec![0, 0, 0, 1];
        stream.extend_from_slice(SPS);
        stream.extend_from_slice(&[0, 0, 1]);
        stream.extend_from_slice(PPS);
        let config = AvcConfig::from_stream(&stream).unwrap();
        assert_eq!(config.sps[0], Bytes::from_static(SPS));
        assert_eq!(config.pps[0], Bytes::from_static(PPS));
    }

    #[test]
    fn test_missing_pps_rejected() {
        assert!(AvcConfig::from_parameter_sets(vec![Bytes::from_static(SPS)], vec![]).is_err());
        assert!(AvcConfig::parse(Bytes::from_static(&[1, 2, 3])).is_err());
    }

    #[test]
    fn test_annex_b_to_avcc_strips_parameter_sets() {
        let mut au = vec![0, 0, 0, 1, 0x09, 0xF0]; // AUD
        au.extend_from_slice(&[0, 0, 0, 1]);
        au.extend_from_slice(SPS);
        au.extend_from_slice(&[0, 0, 1, 0x65, 0x88, 0x84]); // IDR
        au.extend_from_slice(&[0, 0, 1, 0x41, 0x9A]); // slice

        let avcc = to_avcc(&au);
        assert_eq!(
            &avcc[..],
            &[0, 0, 0, 3, 0x65, 0x88, 0x84, 0, 0, 0, 2, 0x41, 0x9A]
        );
        assert!(contains_idr(&au));
        assert!(contains_idr(&avcc));
    }

    #[test]
    fn test_avcc_input_passes_through() {
        let avcc = [0, 0, 0, 2, 0x41, 0x9A];
        assert_eq!(&to_avcc(&avcc)[..], &avcc);
        assert!(!contains_idr(&avcc));
    }

    #[test]
    fn test_truncated_avcc_stops() {
        let data = [0, 0, 0, 9, 0x65, 0x01];
        assert!(split_nalus(&data).is_empty());
    }
}
