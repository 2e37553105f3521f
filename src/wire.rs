//! DNS wire format: query encoding and response decoding.
//!
//! Names read from a response may use compression pointers (RFC 1035 4.1.4).
//! A pointer may lead to further pointers, but never back to an offset the
//! current name already visited, so every decode terminates.

use crate::error::{WireError, WireResult};
use crate::types::{
    DnsHeader, DnsMessage, DnsQuestion, HeaderFlags, QType, RData, ResourceRecord, Section,
    CLASS_IN, TYPE_A, TYPE_AAAA, TYPE_ALIAS_NAME, TYPE_CNAME, TYPE_NS,
};
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Transaction ID placed on every outgoing query. Replies are not correlated by ID.
pub const QUERY_ID: u16 = 0xAAAA;
pub const HEADER_LEN: usize = 12;

const FLAGS_RECURSION_DESIRED: u16 = 0x0100;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const POINTER_MASK: u8 = 0xC0;

/// Builds a single-question query for `name`. No compression is applied.
pub fn encode_query(name: &str, qtype: QType) -> WireResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    buf.extend_from_slice(&QUERY_ID.to_be_bytes());
    buf.extend_from_slice(&FLAGS_RECURSION_DESIRED.to_be_bytes());
    // QDCOUNT = 1, AN/NS/AR = 0
    buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(WireError::EmptyLabel { name: name.to_string() });
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(WireError::LabelTooLong { label: label.to_string(), length: label.len() });
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
    }
    buf.push(0);
    if buf.len() - HEADER_LEN > MAX_NAME_LEN {
        return Err(WireError::NameTooLong);
    }

    buf.extend_from_slice(&qtype.code().to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(buf)
}

/// Reads a possibly compressed name starting at `offset`.
///
/// Returns the dotted name (no trailing dot, empty for the root) and the
/// offset right after the name as it sits in the record: after the first
/// pointer if one was followed, otherwise after the terminating zero byte.
pub fn parse_name(msg: &[u8], offset: usize) -> WireResult<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut wire_len = 1;
    let mut pos = offset;
    let mut resume_at: Option<usize> = None;
    let mut visited = HashSet::new();

    loop {
        let len_byte = *msg.get(pos).ok_or(WireError::Truncated { offset: pos })?;
        visited.insert(pos);

        if len_byte == 0 {
            return Ok((labels.join("."), resume_at.unwrap_or(pos + 1)));
        }

        if len_byte & POINTER_MASK == POINTER_MASK {
            let low = *msg.get(pos + 1).ok_or(WireError::Truncated { offset: pos + 1 })?;
            let target = (usize::from(len_byte & !POINTER_MASK) << 8) | usize::from(low);
            if visited.contains(&target) {
                return Err(WireError::CompressionLoop { offset: pos, target });
            }
            resume_at.get_or_insert(pos + 2);
            pos = target;
            continue;
        }

        if len_byte & POINTER_MASK != 0 {
            return Err(WireError::InvalidLabelType { offset: pos, byte: len_byte });
        }

        let len = usize::from(len_byte);
        let label = msg
            .get(pos + 1..pos + 1 + len)
            .ok_or(WireError::Truncated { offset: pos + 1 + len })?;
        wire_len += 1 + len;
        if wire_len > MAX_NAME_LEN {
            return Err(WireError::NameTooLong);
        }
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += 1 + len;
    }
}

/// Decodes one resource record at `offset` and returns it with the offset of the next record.
pub fn parse_rr(msg: &[u8], offset: usize, section: Section) -> WireResult<(ResourceRecord, usize)> {
    let (name, pos) = parse_name(msg, offset)?;
    let fixed = msg.get(pos..pos + 10).ok_or(WireError::Truncated { offset: pos + 10 })?;
    let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
    let class = u16::from_be_bytes([fixed[2], fixed[3]]);
    let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
    let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]);

    let start = pos + 10;
    let end = start + usize::from(rdlength);
    let raw = msg.get(start..end).ok_or(WireError::Truncated { offset: end })?;

    let rdata = match section {
        Section::Answer => match (rtype, raw.len()) {
            (TYPE_A, 4) => RData::V4(ipv4(raw)),
            (TYPE_A, 16) | (TYPE_AAAA, 16) => RData::V6(ipv6(raw)),
            (TYPE_NS, _) | (TYPE_CNAME, _) | (TYPE_ALIAS_NAME, _) => RData::Name(rdata_name(msg, start, end)?),
            _ => RData::Raw(raw.to_vec()),
        },
        Section::Authority => RData::Name(rdata_name(msg, start, end)?),
        Section::Additional => match raw.len() {
            4 => RData::V4(ipv4(raw)),
            16 => RData::V6(ipv6(raw)),
            _ => RData::Raw(raw.to_vec()),
        },
        Section::Header | Section::Question => return Err(WireError::InvalidSection(section)),
    };

    Ok((ResourceRecord { section, name, rtype, class, ttl, rdlength, rdata }, end))
}

/// Decodes a complete response: header, questions, then answer, authority and additional records.
pub fn decode_message(msg: &[u8]) -> WireResult<DnsMessage> {
    let header_bytes = msg.get(..HEADER_LEN).ok_or(WireError::Truncated { offset: msg.len() })?;
    let word = |i: usize| u16::from_be_bytes([header_bytes[i], header_bytes[i + 1]]);
    let header = DnsHeader {
        id: word(0),
        flags: HeaderFlags::from_word(word(2)),
        question_count: word(4),
        answer_count: word(6),
        authority_count: word(8),
        additional_count: word(10),
    };

    let mut offset = HEADER_LEN;
    let mut questions = Vec::with_capacity(usize::from(header.question_count));
    for _ in 0..header.question_count {
        let (name, pos) = parse_name(msg, offset)?;
        let tail = msg.get(pos..pos + 4).ok_or(WireError::Truncated { offset: pos + 4 })?;
        questions.push(DnsQuestion {
            name,
            qtype: u16::from_be_bytes([tail[0], tail[1]]),
            qclass: u16::from_be_bytes([tail[2], tail[3]]),
        });
        offset = pos + 4;
    }

    let mut read_section = |count: u16, section: Section| -> WireResult<Vec<ResourceRecord>> {
        let mut records = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let (rr, next) = parse_rr(msg, offset, section)?;
            records.push(rr);
            offset = next;
        }
        Ok(records)
    };

    let answers = read_section(header.answer_count, Section::Answer)?;
    let authority = read_section(header.authority_count, Section::Authority)?;
    let additional = read_section(header.additional_count, Section::Additional)?;

    Ok(DnsMessage { header, questions, answers, authority, additional })
}

fn rdata_name(msg: &[u8], start: usize, end: usize) -> WireResult<String> {
    let (name, next) = parse_name(msg, start)?;
    if next > end {
        return Err(WireError::RdataOverrun { offset: start, end });
    }
    Ok(name)
}

fn ipv4(raw: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])
}

fn ipv6(raw: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(raw);
    Ipv6Addr::from(octets)
}
