//! QRIS payload codec.
//!
//! A QRIS payload is an EMV-style TLV string: two-digit ASCII tag, two-digit
//! ASCII length, value. The codec parses an operator's static payload,
//! injects the transaction amount (tag 54), flips the point-of-initiation
//! indicator (tag 01) to dynamic, and recomputes the CRC trailer (tag 63).

use crc::{Algorithm, Crc};
use thiserror::Error;

/// Payload format indicator.
const TAG_FORMAT: &str = "00";
/// Point of initiation method: "11" static, "12" dynamic.
const TAG_INITIATION: &str = "01";
/// Transaction amount.
const TAG_AMOUNT: &str = "54";
/// Country code; tag 54 is inserted immediately before this one.
const TAG_COUNTRY: &str = "58";
/// CRC16 trailer.
const TAG_CRC: &str = "63";

const INITIATION_DYNAMIC: &str = "12";

// CRC-16/X.25: reflected in and out, xorout 0xFFFF.
const CRC16_X25: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: true,
    refout: true,
    xorout: 0xFFFF,
    check: 0x906E,
    residue: 0xF0B8,
};

#[derive(Debug, Error, PartialEq)]
pub enum QrisError {
    #[error("malformed TLV at offset {0}")]
    MalformedTlv(usize),
    #[error("value length overflows the two-digit TLV length field")]
    ValueTooLong,
    #[error("payload has no CRC trailer")]
    MissingCrc,
    #[error("CRC mismatch: expected {expected}, found {found}")]
    CrcMismatch { expected: String, found: String },
}

/// One TLV record. Order is preserved by `parse`/`render` so a payload
/// round-trips byte-identically.
#[derive(Debug, Clone, PartialEq)]
pub struct Tlv {
    pub tag: String,
    pub value: String,
}

impl Tlv {
    pub fn new(tag: &str, value: &str) -> Self {
        Self {
            tag: tag.to_string(),
            value: value.to_string(),
        }
    }
}

/// Parse a payload into ordered TLV records.
///
/// Lengths count characters, not bytes; QRIS payloads are ASCII in practice
/// but merchant names occasionally carry multibyte characters.
pub fn parse(payload: &str) -> Result<Vec<Tlv>, QrisError> {
    let chars: Vec<char> = payload.chars().collect();
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        if pos + 4 > chars.len() {
            return Err(QrisError::MalformedTlv(pos));
        }
        let tag: String = chars[pos..pos + 2].iter().collect();
        let len_digits: String = chars[pos + 2..pos + 4].iter().collect();
        if !tag.chars().all(|c| c.is_ascii_digit()) {
            return Err(QrisError::MalformedTlv(pos));
        }
        let len: usize = len_digits
            .parse()
            .map_err(|_| QrisError::MalformedTlv(pos))?;
        if pos + 4 + len > chars.len() {
            return Err(QrisError::MalformedTlv(pos));
        }
        let value: String = chars[pos + 4..pos + 4 + len].iter().collect();
        records.push(Tlv { tag, value });
        pos += 4 + len;
    }

    Ok(records)
}

/// Render records back into TLV form.
pub fn render(records: &[Tlv]) -> Result<String, QrisError> {
    let mut out = String::new();
    for r in records {
        let len = r.value.chars().count();
        if len > 99 {
            return Err(QrisError::ValueTooLong);
        }
        out.push_str(&r.tag);
        out.push_str(&format!("{:02}", len));
        out.push_str(&r.value);
    }
    Ok(out)
}

/// CRC-16/X.25 over `data`, rendered as four uppercase hex digits.
fn checksum(data: &str) -> String {
    let crc = Crc::<u16>::new(&CRC16_X25).checksum(data.as_bytes());
    format!("{:04X}", crc)
}

/// Strip any existing CRC record, append the `6304` trailer header and the
/// recomputed checksum.
fn seal(records: Vec<Tlv>) -> Result<String, QrisError> {
    let without_crc: Vec<Tlv> = records.into_iter().filter(|r| r.tag != TAG_CRC).collect();
    let body = render(&without_crc)?;
    let crc_payload = format!("{}{}04", body, TAG_CRC);
    let crc = checksum(&crc_payload);
    Ok(format!("{}{}", crc_payload, crc))
}

/// Derive a dynamic payload from an operator's static payload: set the
/// amount at tag 54 (inserted before tag 58 when absent), switch tag 01 to
/// dynamic and recompute the trailer.
pub fn inject_amount(static_payload: &str, amount: i64) -> Result<String, QrisError> {
    let mut records = parse(static_payload)?;
    let amount_value = amount.to_string();

    if let Some(initiation) = records.iter_mut().find(|r| r.tag == TAG_INITIATION) {
        initiation.value = INITIATION_DYNAMIC.to_string();
    } else {
        let at = records
            .iter()
            .position(|r| r.tag == TAG_FORMAT)
            .map(|i| i + 1)
            .unwrap_or(0);
        records.insert(at, Tlv::new(TAG_INITIATION, INITIATION_DYNAMIC));
    }

    if let Some(existing) = records.iter_mut().find(|r| r.tag == TAG_AMOUNT) {
        existing.value = amount_value;
    } else {
        let at = records
            .iter()
            .position(|r| r.tag == TAG_COUNTRY)
            .unwrap_or(records.len());
        records.insert(at, Tlv::new(TAG_AMOUNT, &amount_value));
    }

    seal(records)
}

/// Verify the CRC trailer of a payload. Used on operator-supplied static
/// sources before any amount is injected.
pub fn validate(payload: &str) -> Result<(), QrisError> {
    let records = parse(payload)?;
    let trailer = records.last().filter(|r| r.tag == TAG_CRC);
    let found = match trailer {
        Some(r) if r.value.chars().count() == 4 => r.value.clone(),
        _ => return Err(QrisError::MissingCrc),
    };

    let covered: String = payload
        .chars()
        .take(payload.chars().count() - 4)
        .collect();
    let expected = checksum(&covered);
    if expected.eq_ignore_ascii_case(&found) {
        Ok(())
    } else {
        Err(QrisError::CrcMismatch { expected, found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(tag: &str, value: &str) -> String {
        format!("{}{:02}{}", tag, value.chars().count(), value)
    }

    /// A minimal but structurally faithful static payload with a valid CRC.
    fn static_payload() -> String {
        let body = [
            field("00", "01"),
            field("01", "11"),
            field("26", &format!("{}{}", field("00", "ID.CO.QRIS.WWW"), field("01", "936000140000000001"))),
            field("52", "5499"),
            field("53", "360"),
            field("58", "ID"),
            field("59", "WARUNG MAKMUR"),
            field("60", "JAKARTA"),
        ]
        .concat();
        let crc_payload = format!("{}6304", body);
        format!("{}{}", crc_payload, checksum(&crc_payload))
    }

    #[test]
    fn crc_check_vector() {
        // The X.25 check value for "123456789".
        assert_eq!(checksum("123456789"), "906E");
    }

    #[test]
    fn parse_render_round_trip() {
        let payload = static_payload();
        let records = parse(&payload).unwrap();
        assert_eq!(render(&records).unwrap(), payload);
    }

    #[test]
    fn parse_rejects_truncated_value() {
        let err = parse("0004ab").unwrap_err();
        assert_eq!(err, QrisError::MalformedTlv(0));
    }

    #[test]
    fn parse_rejects_non_numeric_tag() {
        assert!(parse("xx0201").is_err());
    }

    #[test]
    fn validate_accepts_well_formed_payload() {
        assert!(validate(&static_payload()).is_ok());
    }

    #[test]
    fn validate_accepts_lowercase_crc() {
        let payload = static_payload();
        let lowered = format!(
            "{}{}",
            &payload[..payload.len() - 4],
            payload[payload.len() - 4..].to_lowercase()
        );
        assert!(validate(&lowered).is_ok());
    }

    #[test]
    fn validate_rejects_tampered_payload() {
        let payload = static_payload();
        // Change the merchant name without disturbing any length field.
        let tampered = payload.replace("WARUNG", "W4RUNG");
        assert_ne!(payload, tampered);
        assert!(matches!(
            validate(&tampered),
            Err(QrisError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_missing_trailer() {
        let body = [field("00", "01"), field("58", "ID")].concat();
        assert_eq!(validate(&body), Err(QrisError::MissingCrc));
    }

    #[test]
    fn inject_sets_amount_and_dynamic_flag() {
        let dynamic = inject_amount(&static_payload(), 10001).unwrap();
        let records = parse(&dynamic).unwrap();

        let initiation = records.iter().find(|r| r.tag == "01").unwrap();
        assert_eq!(initiation.value, "12");

        let amount = records.iter().find(|r| r.tag == "54").unwrap();
        assert_eq!(amount.value, "10001");

        // Amount sits immediately before the country code.
        let amount_pos = records.iter().position(|r| r.tag == "54").unwrap();
        let country_pos = records.iter().position(|r| r.tag == "58").unwrap();
        assert_eq!(amount_pos + 1, country_pos);

        assert!(validate(&dynamic).is_ok());
    }

    #[test]
    fn inject_replaces_existing_amount() {
        let first = inject_amount(&static_payload(), 5000).unwrap();
        let second = inject_amount(&first, 7500).unwrap();
        let records = parse(&second).unwrap();
        let amounts: Vec<_> = records.iter().filter(|r| r.tag == "54").collect();
        assert_eq!(amounts.len(), 1);
        assert_eq!(amounts[0].value, "7500");
    }

    #[test]
    fn inject_is_deterministic() {
        let a = inject_amount(&static_payload(), 123456).unwrap();
        let b = inject_amount(&static_payload(), 123456).unwrap();
        assert_eq!(a, b);
    }
}
