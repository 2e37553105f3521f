//! Helpers for building DNS responses in tests.

use crate::types::{QType, CLASS_IN, TYPE_A, TYPE_AAAA, TYPE_NS};
use std::net::Ipv6Addr;

struct RawRecord {
    name: String,
    rtype: u16,
    ttl: u32,
    rdata: Vec<u8>,
}

/// Writes responses without compression, except where a test splices pointers in by hand.
pub struct ResponseBuilder {
    qname: String,
    qtype: QType,
    flags: u16,
    answers: Vec<RawRecord>,
    authority: Vec<RawRecord>,
    additional: Vec<RawRecord>,
}

impl ResponseBuilder {
    pub fn new(qname: &str, qtype: QType) -> Self {
        Self {
            qname: qname.to_string(),
            qtype,
            flags: 0x8000,
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn authoritative(mut self) -> Self {
        self.flags |= 0x0400;
        self
    }

    pub fn rcode(mut self, rcode: u8) -> Self {
        self.flags = (self.flags & !0x000F) | u16::from(rcode & 0x0F);
        self
    }

    pub fn answer_a(mut self, name: &str, addr: [u8; 4], ttl: u32) -> Self {
        self.answers.push(RawRecord { name: name.into(), rtype: TYPE_A, ttl, rdata: addr.to_vec() });
        self
    }

    pub fn answer_aaaa(mut self, name: &str, addr: Ipv6Addr, ttl: u32) -> Self {
        self.answers.push(RawRecord { name: name.into(), rtype: TYPE_AAAA, ttl, rdata: addr.octets().to_vec() });
        self
    }

    pub fn answer_name(mut self, name: &str, rtype: u16, target: &str, ttl: u32) -> Self {
        self.answers.push(RawRecord { name: name.into(), rtype, ttl, rdata: encode_name(target) });
        self
    }

    pub fn answer_raw(mut self, name: &str, rtype: u16, rdata: &[u8], ttl: u32) -> Self {
        self.answers.push(RawRecord { name: name.into(), rtype, ttl, rdata: rdata.to_vec() });
        self
    }

    pub fn authority_ns(mut self, zone: &str, ns: &str, ttl: u32) -> Self {
        self.authority.push(RawRecord { name: zone.into(), rtype: TYPE_NS, ttl, rdata: encode_name(ns) });
        self
    }

    pub fn authority_name(mut self, zone: &str, rtype: u16, target: &str, ttl: u32) -> Self {
        self.authority.push(RawRecord { name: zone.into(), rtype, ttl, rdata: encode_name(target) });
        self
    }

    pub fn additional_a(mut self, name: &str, addr: [u8; 4]) -> Self {
        self.additional.push(RawRecord { name: name.into(), rtype: TYPE_A, ttl: 172800, rdata: addr.to_vec() });
        self
    }

    pub fn additional_aaaa(mut self, name: &str, addr: Ipv6Addr) -> Self {
        self.additional.push(RawRecord { name: name.into(), rtype: TYPE_AAAA, ttl: 172800, rdata: addr.octets().to_vec() });
        self
    }

    pub fn additional_raw(mut self, name: &str, rtype: u16, rdata: &[u8]) -> Self {
        self.additional.push(RawRecord { name: name.into(), rtype, ttl: 0, rdata: rdata.to_vec() });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);
        buf.extend_from_slice(&[0xAA, 0xAA]);
        buf.extend_from_slice(&self.flags.to_be_bytes());
        for count in [1, self.answers.len(), self.authority.len(), self.additional.len()] {
            buf.extend_from_slice(&(count as u16).to_be_bytes());
        }
        buf.extend_from_slice(&encode_name(&self.qname));
        buf.extend_from_slice(&self.qtype.code().to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());

        for rr in self.answers.iter().chain(&self.authority).chain(&self.additional) {
            buf.extend_from_slice(&encode_name(&rr.name));
            buf.extend_from_slice(&rr.rtype.to_be_bytes());
            buf.extend_from_slice(&CLASS_IN.to_be_bytes());
            buf.extend_from_slice(&rr.ttl.to_be_bytes());
            buf.extend_from_slice(&(rr.rdata.len() as u16).to_be_bytes());
            buf.extend_from_slice(&rr.rdata);
        }
        buf
    }
}

pub fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}
