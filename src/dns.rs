//! DNS message parsing and construction.
//!
//! Only what the forwarder needs: decoding client requests, encoding replies
//! with A answers, and the query/reply pair used against upstream servers.

use std::net::Ipv4Addr;

use crate::domain::DomainName;
use crate::error::WireError;

pub const HEADER_LEN: usize = 12;

pub const TYPE_A: u16 = 1;
pub const CLASS_IN: u16 = 1;

/// TTL written on every answer. Resolved records carry no expiry of their own.
pub const DEFAULT_TTL: u32 = 3600;

pub const OPCODE_QUERY: u8 = 0;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_REFUSED: u8 = 5;

const FLAG_QR: u16 = 0x8000;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const FLAG_CD: u16 = 0x0010;
const OPCODE_MASK: u16 = 0x7800;
const RCODE_MASK: u16 = 0x000F;

/// Upper bound on compression pointers followed while reading one name.
const MAX_POINTER_JUMPS: usize = 16;

/// A DNS question section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    /// Name as sent by the client, without the trailing dot.
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A parsed client request.
#[derive(Debug, Clone)]
pub struct DnsRequest {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
}

impl DnsRequest {
    /// Parse a DNS request from raw bytes.
    ///
    /// Returns `None` for anything too short or malformed to answer.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }

        let id = read_u16(data, 0).ok()?;
        let flags = read_u16(data, 2).ok()?;
        let qdcount = read_u16(data, 4).ok()?;

        let mut pos = HEADER_LEN;
        let mut questions = Vec::with_capacity((qdcount as usize).min(4));
        for _ in 0..qdcount {
            let (name, next) = read_name(data, pos).ok()?;
            let qtype = read_u16(data, next).ok()?;
            let qclass = read_u16(data, next + 2).ok()?;
            questions.push(DnsQuestion {
                name,
                qtype,
                qclass,
            });
            pos = next + 4;
        }

        Some(Self {
            id,
            flags,
            questions,
        })
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags & OPCODE_MASK) >> 11) as u8
    }

    /// Start a reply: same id, opcode, RD and CD bits, questions echoed, no answers.
    pub fn reply(&self) -> DnsResponse {
        DnsResponse {
            id: self.id,
            flags: FLAG_QR | FLAG_RA | (self.flags & (OPCODE_MASK | FLAG_RD | FLAG_CD)),
            questions: self.questions.clone(),
            answers: Vec::new(),
        }
    }
}

/// A DNS resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DnsRecord {
    /// An IN A record with the default TTL.
    pub fn a(name: &str, addr: Ipv4Addr) -> Self {
        Self {
            name: name.to_string(),
            rtype: TYPE_A,
            class: CLASS_IN,
            ttl: DEFAULT_TTL,
            rdata: addr.octets().to_vec(),
        }
    }
}

/// A DNS response.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

impl DnsResponse {
    pub fn rcode(&self) -> u8 {
        (self.flags & RCODE_MASK) as u8
    }

    /// Encode the response to wire format bytes. Names are never compressed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(512);

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        for q in &self.questions {
            encode_name(&mut data, &q.name);
            data.extend_from_slice(&q.qtype.to_be_bytes());
            data.extend_from_slice(&q.qclass.to_be_bytes());
        }

        for a in &self.answers {
            encode_name(&mut data, &a.name);
            data.extend_from_slice(&a.rtype.to_be_bytes());
            data.extend_from_slice(&a.class.to_be_bytes());
            data.extend_from_slice(&a.ttl.to_be_bytes());
            data.extend_from_slice(&(a.rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&a.rdata);
        }

        data
    }
}

/// Build a recursive type-A query for `name`.
pub fn build_query(id: u16, name: &DomainName) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + name.as_str().len() + 6);

    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&FLAG_RD.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

    encode_name(&mut packet, name.as_str());
    packet.extend_from_slice(&TYPE_A.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());

    packet
}

/// The parts of an upstream reply the resolvers care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub rcode: u8,
    /// A records from the answer section, in reply order.
    pub addrs: Vec<Ipv4Addr>,
}

/// Decode an upstream reply to the query with id `id`.
///
/// Any reply that decodes is accepted, whatever its RCODE or answer count.
pub fn parse_reply(id: u16, data: &[u8]) -> Result<Reply, WireError> {
    if data.len() < HEADER_LEN {
        return Err(WireError::Truncated);
    }

    let got = read_u16(data, 0)?;
    if got != id {
        return Err(WireError::IdMismatch { expected: id, got });
    }
    let flags = read_u16(data, 2)?;
    if flags & FLAG_QR == 0 {
        return Err(WireError::NotAResponse);
    }
    let qdcount = read_u16(data, 4)?;
    let ancount = read_u16(data, 6)?;

    let mut pos = HEADER_LEN;
    for _ in 0..qdcount {
        let (_, next) = read_name(data, pos)?;
        pos = next + 4;
    }

    let mut addrs = Vec::new();
    for _ in 0..ancount {
        let (_, next) = read_name(data, pos)?;
        let rtype = read_u16(data, next)?;
        let class = read_u16(data, next + 2)?;
        let rdlength = read_u16(data, next + 8)? as usize;
        let start = next + 10;
        let rdata = data
            .get(start..start + rdlength)
            .ok_or(WireError::Truncated)?;

        if rtype == TYPE_A && class == CLASS_IN && rdlength == 4 {
            addrs.push(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]));
        }
        pos = start + rdlength;
    }

    Ok(Reply {
        rcode: (flags & RCODE_MASK) as u8,
        addrs,
    })
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16, WireError> {
    match data.get(pos..pos + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(WireError::Truncated),
    }
}

/// Read a possibly compressed name starting at `pos`.
///
/// Returns the dotted name (no trailing dot) and the offset just past the
/// name in the original position.
fn read_name(data: &[u8], mut pos: usize) -> Result<(String, usize), WireError> {
    let mut labels: Vec<&str> = Vec::new();
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len = *data.get(pos).ok_or(WireError::Truncated)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }

        if len & 0xC0 == 0xC0 {
            let low = *data.get(pos + 1).ok_or(WireError::Truncated)? as usize;
            if end.is_none() {
                end = Some(pos + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(WireError::BadName);
            }
            pos = ((len & 0x3F) << 8) | low;
            continue;
        }
        if len & 0xC0 != 0 {
            return Err(WireError::BadName);
        }

        pos += 1;
        let label = data.get(pos..pos + len).ok_or(WireError::Truncated)?;
        // A dot inside a label cannot survive the dotted form
        if label.contains(&b'.') {
            return Err(WireError::BadName);
        }
        labels.push(std::str::from_utf8(label).map_err(|_| WireError::BadName)?);
        pos += len;
    }

    Ok((labels.join("."), end.unwrap_or(pos)))
}

fn encode_name(buf: &mut Vec<u8>, name: &str) {
    for label in name.split('.').filter(|label| !label.is_empty()) {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
}
