//! DNS packet validation and decoding. Wire structures from https://datatracker.ietf.org/doc/html/rfc1035
//!
//! The question-name parser deliberately refuses compression pointers: callers
//! use the consumed byte count to advance cursors and to build cache keys, and
//! a pointer would make that length ambiguous. The answer-section name skipper
//! is pointer tolerant because upstream replies routinely compress.
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use log::debug;

use crate::error::{DnsResult, LintError};

/// Largest datagram accepted from a client.
pub const MAX_DNS_PACKET_SIZE: usize = 512;

/// Fixed size of the packet header.
pub const DNS_HEADER_LEN: usize = 12;

// RFC1035 section 2.3.4 size limits
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

// record types the proxy takes decisions on
pub const QTYPE_A: u16 = 1;
pub const QTYPE_CNAME: u16 = 5;
pub const QTYPE_AAAA: u16 = 28;

/// the Internet class, the only one accepted
pub const QCLASS_IN: u16 = 1;

// fixed part of a resource record following the owner name:
// type (2) + class (2) + ttl (4) + rdlength (2)
const RR_FIXED_LEN: usize = 10;

/// Decoded packet header: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub questions: u16,
    pub answers: u16,
    pub authority: u16,
    pub additional: u16,
}

impl DnsHeader {
    /// Response code, the low 4 bits of the flags field.
    pub fn rcode(&self) -> u8 {
        (self.flags & 0x000f) as u8
    }

    /// QR bit: true for a response, false for a query.
    pub fn is_response(&self) -> bool {
        self.flags & 0x8000 != 0
    }
}

/// Decoded question section entry.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    /// printable dot-separated name, no trailing dot
    pub domain: String,
    pub qtype: u16,
    /// wire bytes consumed by the whole question
    pub len: usize,
    /// printable domain length (domain-only wire length minus framing)
    pub dlen: usize,
}

/// Resource record fixed header; the rdata follows inline on the wire.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsRR {
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdlength: u16,
}

/// Decode the 12-byte header and advance the cursor past it.
///
/// ```
/// use std::io::Cursor;
/// use dohlib::lint::parse_header;
///
/// let pkt = [0x12u8, 0x34, 0x81, 0x80, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00];
/// let mut cursor = Cursor::new(&pkt[..]);
/// let header = parse_header(&mut cursor).unwrap();
/// assert_eq!(header.id, 0x1234);
/// assert_eq!(header.questions, 1);
/// assert_eq!(header.answers, 2);
/// assert_eq!(cursor.position(), 12);
/// ```
pub fn parse_header(cursor: &mut Cursor<&[u8]>) -> DnsResult<DnsHeader> {
    let start = cursor.position() as usize;
    if cursor.get_ref().len() < start + DNS_HEADER_LEN {
        return Err(LintError::InvalidHeader.into());
    }

    let header = DnsHeader {
        id: cursor.read_u16::<BigEndian>()?,
        flags: cursor.read_u16::<BigEndian>()?,
        questions: cursor.read_u16::<BigEndian>()?,
        answers: cursor.read_u16::<BigEndian>()?,
        authority: cursor.read_u16::<BigEndian>()?,
        additional: cursor.read_u16::<BigEndian>()?,
    };
    Ok(header)
}

/// Decode the question starting at the cursor position and advance past it.
///
/// Labels are length-prefixed; a label longer than 63 bytes, a byte outside
/// `[A-Za-z0-9-]`, a name longer than 255 bytes or a compression pointer all
/// fail with `INVALID_DOMAIN`. A class other than IN fails with
/// `INVALID_CLASS`, and running off the end of the buffer with
/// `INVALID_PKT_LEN`.
pub fn parse_question(cursor: &mut Cursor<&[u8]>) -> DnsResult<DnsQuestion> {
    let buf = *cursor.get_ref();
    let start = cursor.position() as usize;

    // smallest possible question: empty domain + type + class
    if buf.len() < start + 1 + 2 + 2 {
        return Err(LintError::InvalidDomain.into());
    }

    let mut domain = String::new();
    let mut i = start;
    loop {
        let chunk = *buf.get(i).ok_or(LintError::InvalidPktLen)? as usize;
        if chunk == 0 {
            i += 1;
            break;
        }
        // the top two bits mark a compression pointer, refused here
        if chunk & 0xc0 != 0 || chunk > MAX_LABEL_LEN {
            return Err(LintError::InvalidDomain.into());
        }
        // name length counted in wire bytes, label lengths included
        if i + chunk + 1 - start > MAX_NAME_LEN {
            return Err(LintError::InvalidDomain.into());
        }
        let label = buf
            .get(i + 1..i + 1 + chunk)
            .ok_or(LintError::InvalidPktLen)?;
        for &c in label {
            if !c.is_ascii_alphanumeric() && c != b'-' {
                return Err(LintError::InvalidDomain.into());
            }
        }
        // all chars checked above, the label is valid ASCII
        domain.push_str(std::str::from_utf8(label)?);
        domain.push('.');
        i += chunk + 1;
    }

    // the final dot stands in for the terminating NUL
    domain.pop();

    if buf.len() < i + 4 {
        return Err(LintError::InvalidPktLen.into());
    }
    cursor.set_position(i as u64);
    let qtype = cursor.read_u16::<BigEndian>()?;
    let class = cursor.read_u16::<BigEndian>()?;
    if class != QCLASS_IN {
        return Err(LintError::InvalidClass.into());
    }

    let len = i + 4 - start;
    let dlen = domain.len();
    Ok(DnsQuestion {
        domain,
        qtype,
        len,
        dlen,
    })
}

// Skip over a possibly compressed owner name. A compression pointer is two
// bytes; its offset must point backwards into the packet.
fn skip_name(cursor: &mut Cursor<&[u8]>) -> DnsResult<()> {
    let buf = *cursor.get_ref();
    let mut i = cursor.position() as usize;

    loop {
        let b = *buf.get(i).ok_or(LintError::InvalidPktLen)?;
        if b == 0 {
            i += 1;
            break;
        }
        if b & 0xc0 != 0 {
            let low = *buf.get(i + 1).ok_or(LintError::InvalidPktLen)?;
            let target = ((b as usize & 0x3f) << 8) | low as usize;
            if target >= i {
                return Err(LintError::InvalidPktLen.into());
            }
            i += 2;
            break;
        }
        i += b as usize + 1;
    }

    if i > buf.len() {
        return Err(LintError::InvalidPktLen.into());
    }
    cursor.set_position(i as u64);
    Ok(())
}

/// Turn a raw (possibly compressed) rdata name into something printable for
/// diagnostics. Length bytes and pointer bytes are both rendered as `.`, so
/// the result always carries a leading dot. Purely cosmetic: the lint verdict
/// never depends on this.
///
/// ```
/// use dohlib::lint::printable_name;
///
/// let rdata = [3u8, b'w', b'w', b'w', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0];
/// assert_eq!(printable_name(&rdata), ".www.example.com");
/// ```
pub fn printable_name(rdata: &[u8]) -> String {
    let mut out = String::new();
    let mut i = 0usize;
    while i < rdata.len() && rdata[i] != 0 {
        let b = rdata[i];
        out.push('.');
        if b & 0xc0 == 0 {
            let end = usize::min(i + 1 + b as usize, rdata.len());
            out.push_str(&String::from_utf8_lossy(&rdata[i + 1..end]));
            i = end;
        } else {
            i += 1;
        }
    }
    out
}

/// Validate a full upstream reply.
///
/// A non-zero response code is reported as `NXDOMAIN`: the packet itself is
/// well formed, but the answer section is not to be trusted, and the caller
/// uses this verdict to trigger negative caching. Exactly one question is
/// required. Answer records are walked with bounds-checked reads; CNAME rdata
/// is decompressed for the debug log.
///
/// The input buffer is never mutated, so two consecutive calls return the
/// same verdict.
pub fn lint_rx(pkt: &[u8]) -> DnsResult<DnsHeader> {
    let mut cursor = Cursor::new(pkt);
    let header = parse_header(&mut cursor)?;

    // check errors such as NXDOMAIN
    if header.rcode() != 0 {
        return Err(LintError::NxDomain.into());
    }

    if header.questions != 1 {
        return Err(LintError::MultipleQuestions.into());
    }

    // skip the question section
    skip_name(&mut cursor)?;
    if pkt.len() < cursor.position() as usize + 4 {
        return Err(LintError::InvalidPktLen.into());
    }
    cursor.set_position(cursor.position() + 4);

    // walk the answer section, extracting CNAMEs on the way
    for _ in 0..header.answers {
        skip_name(&mut cursor)?;

        let pos = cursor.position() as usize;
        if pkt.len() < pos + RR_FIXED_LEN {
            return Err(LintError::InvalidPktLen.into());
        }
        let rr = DnsRR {
            rtype: cursor.read_u16::<BigEndian>()?,
            class: cursor.read_u16::<BigEndian>()?,
            ttl: cursor.read_u32::<BigEndian>()?,
            rdlength: cursor.read_u16::<BigEndian>()?,
        };

        let pos = cursor.position() as usize;
        if pkt.len() < pos + rr.rdlength as usize {
            return Err(LintError::InvalidPktLen.into());
        }
        if rr.rtype == QTYPE_CNAME && rr.rdlength as usize <= 256 {
            let cname = printable_name(&pkt[pos..pos + rr.rdlength as usize]);
            debug!("CNAME: {}", cname);
        }
        cursor.set_position((pos + rr.rdlength as usize) as u64);
    }

    Ok(header)
}
