//! Builders for the few packets the proxy emits itself: outbound queries and
//! locally synthesised replies.
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::error::{DnsResult, LintError};
use crate::lint::{DnsQuestion, DNS_HEADER_LEN, QCLASS_IN};

// response codes used when answering locally
pub const RCODE_FORMERR: u8 = 1;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;

// recursion desired, the only flag set on queries we originate
const FLAGS_QUERY_RD: u16 = 0x0100;

// QR + RA; the response keeps the client's RD bit and gets an rcode
const FLAGS_RESPONSE: u16 = 0x8080;

/// Encode a single-question IN query with the recursion-desired flag set.
/// The domain goes through the same label checks the linter applies.
pub fn build_query(id: u16, domain: &str, qtype: u16) -> DnsResult<Vec<u8>> {
    let mut pkt = Vec::with_capacity(DNS_HEADER_LEN + domain.len() + 6);
    pkt.write_u16::<BigEndian>(id)?;
    pkt.write_u16::<BigEndian>(FLAGS_QUERY_RD)?;
    pkt.write_u16::<BigEndian>(1)?; // questions
    pkt.write_u16::<BigEndian>(0)?; // answers
    pkt.write_u16::<BigEndian>(0)?; // authority
    pkt.write_u16::<BigEndian>(0)?; // additional

    if domain.is_empty() || domain.len() > 253 {
        return Err(LintError::InvalidDomain.into());
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(LintError::InvalidDomain.into());
        }
        for &c in label.as_bytes() {
            if !c.is_ascii_alphanumeric() && c != b'-' {
                return Err(LintError::InvalidDomain.into());
            }
        }
        pkt.write_u8(label.len() as u8)?;
        pkt.extend_from_slice(label.as_bytes());
    }
    pkt.write_u8(0)?;
    pkt.write_u16::<BigEndian>(qtype)?;
    pkt.write_u16::<BigEndian>(QCLASS_IN)?;
    Ok(pkt)
}

/// Synthesise a response to `query` carrying `rcode`: transaction id and
/// question section are echoed back, all other sections are empty. The
/// client's recursion-desired bit is preserved.
pub fn synth_reply(query: &[u8], question: &DnsQuestion, rcode: u8) -> Vec<u8> {
    let end = usize::min(DNS_HEADER_LEN + question.len, query.len());
    let mut reply = query[..end].to_vec();

    let rd = BigEndian::read_u16(&reply[2..4]) & FLAGS_QUERY_RD;
    BigEndian::write_u16(&mut reply[2..4], FLAGS_RESPONSE | rd | rcode as u16);
    BigEndian::write_u16(&mut reply[4..6], 1); // questions
    BigEndian::write_u16(&mut reply[6..8], 0); // answers
    BigEndian::write_u16(&mut reply[8..10], 0); // authority
    BigEndian::write_u16(&mut reply[10..12], 0); // additional
    reply
}

/// Header-only error response, used when the question itself did not parse.
pub fn synth_header_reply(id: u16, rcode: u8) -> Vec<u8> {
    let mut reply = vec![0u8; DNS_HEADER_LEN];
    BigEndian::write_u16(&mut reply[0..2], id);
    BigEndian::write_u16(&mut reply[2..4], FLAGS_RESPONSE | rcode as u16);
    reply
}

/// Overwrite the transaction id in place. A no-op on packets shorter than
/// the id field; the linter catches those separately.
pub fn rewrite_id(pkt: &mut [u8], id: u16) {
    if pkt.len() >= 2 {
        BigEndian::write_u16(&mut pkt[0..2], id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lint::{parse_header, parse_question, QTYPE_A};
    use std::io::Cursor;

    #[test]
    fn query_round_trip() {
        let pkt = build_query(0x4242, "www.example.com", QTYPE_A).unwrap();

        let mut cursor = Cursor::new(pkt.as_slice());
        let header = parse_header(&mut cursor).unwrap();
        assert_eq!(header.id, 0x4242);
        assert_eq!(header.questions, 1);
        assert!(!header.is_response());

        let question = parse_question(&mut cursor).unwrap();
        assert_eq!(question.domain, "www.example.com");
        assert_eq!(question.qtype, QTYPE_A);
        assert_eq!(question.len, 21);
    }

    #[test]
    fn query_bad_domain() {
        assert!(build_query(0, "bad_label.example.com", QTYPE_A).is_err());
        assert!(build_query(0, "", QTYPE_A).is_err());
        assert!(build_query(0, "a..b", QTYPE_A).is_err());
    }

    #[test]
    fn synth_nxdomain_echoes_question() {
        let query = build_query(0xbeef, "ads.example.com", QTYPE_A).unwrap();
        let mut cursor = Cursor::new(query.as_slice());
        parse_header(&mut cursor).unwrap();
        let question = parse_question(&mut cursor).unwrap();

        let reply = synth_reply(&query, &question, RCODE_NXDOMAIN);
        assert_eq!(reply.len(), query.len());

        let mut cursor = Cursor::new(reply.as_slice());
        let header = parse_header(&mut cursor).unwrap();
        assert_eq!(header.id, 0xbeef);
        assert!(header.is_response());
        assert_eq!(header.rcode(), RCODE_NXDOMAIN);
        assert_eq!(header.questions, 1);
        assert_eq!(header.answers, 0);

        // recursion desired survives the rewrite
        assert_eq!(reply[2] & 0x01, 0x01);

        let echoed = parse_question(&mut cursor).unwrap();
        assert_eq!(echoed, question);
    }

    #[test]
    fn synth_header_only_formerr() {
        let reply = synth_header_reply(0x0102, RCODE_FORMERR);
        let mut cursor = Cursor::new(reply.as_slice());
        let header = parse_header(&mut cursor).unwrap();
        assert_eq!(header.id, 0x0102);
        assert!(header.is_response());
        assert_eq!(header.rcode(), RCODE_FORMERR);
        assert_eq!(header.questions, 0);
    }

    #[test]
    fn id_rewrite() {
        let mut pkt = build_query(0, "example.com", QTYPE_A).unwrap();
        rewrite_id(&mut pkt, 0xcafe);
        assert_eq!(&pkt[..2], &[0xca, 0xfe]);

        // too short to carry an id: left untouched
        let mut short = vec![0x01u8];
        rewrite_id(&mut short, 0xcafe);
        assert_eq!(short, &[0x01]);
    }
}
