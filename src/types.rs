//! Basic types for the resolver

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Query types the resolver issues. Anything it does not know is asked as `A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QType { A, NS, AAAA }

impl QType {
    pub fn code(self) -> u16 {
        match self { QType::A => 1, QType::NS => 2, QType::AAAA => 28 }
    }
}

impl From<u16> for QType {
    fn from(code: u16) -> Self {
        match code { 2 => QType::NS, 28 => QType::AAAA, _ => QType::A }
    }
}

impl fmt::Display for QType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { QType::A => f.write_str("A"), QType::NS => f.write_str("NS"), QType::AAAA => f.write_str("AAAA") }
    }
}

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
/// Answers of this type carry a compressed target name, like CNAME.
pub const TYPE_ALIAS_NAME: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const CLASS_IN: u16 = 1;
pub const RCODE_NXDOMAIN: u8 = 3;

/// Message section a resource record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section { Header, Question, Answer, Authority, Additional }

/// A resolved name server or answer endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub name: String,
    pub ip: String,
    pub ttl: u32,
}

impl Site {
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self { name: name.into(), ip: ip.into(), ttl: 0 }
    }

    pub fn with_ttl(name: impl Into<String>, ip: impl Into<String>, ttl: u32) -> Self {
        Self { name: name.into(), ip: ip.into(), ttl }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ip)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags {
    pub qr: bool, pub opcode: u8, pub aa: bool, pub tc: bool,
    pub rd: bool, pub ra: bool, pub z: u8, pub rcode: u8,
}

impl HeaderFlags {
    pub fn from_word(word: u16) -> Self {
        Self {
            qr: word & 0x8000 != 0,
            opcode: ((word >> 11) & 0x0F) as u8,
            aa: word & 0x0400 != 0,
            tc: word & 0x0200 != 0,
            rd: word & 0x0100 != 0,
            ra: word & 0x0080 != 0,
            z: ((word >> 4) & 0x07) as u8,
            rcode: (word & 0x0F) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16, pub flags: HeaderFlags,
    pub question_count: u16, pub answer_count: u16,
    pub authority_count: u16, pub additional_count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion { pub name: String, pub qtype: u16, pub qclass: u16 }

/// Decoded RDATA. Which variant a record carries depends on its section and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Name(String),
    Raw(Vec<u8>),
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RData::V4(addr) => write!(f, "{}", addr),
            RData::V6(addr) => write!(f, "{}", addr),
            RData::Name(name) => f.write_str(name),
            RData::Raw(bytes) => f.write_str(&hex::encode(bytes)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub section: Section,
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdlength: u16,
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn to_site(&self) -> Site {
        Site::with_ttl(self.name.clone(), self.rdata.to_string(), self.ttl)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}
