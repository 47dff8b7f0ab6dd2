//! X.509 证书解码

use crate::error::{Error, Result};
use crate::types::Certificate;
use x509_parser::der_parser::asn1_rs::Tag;
use x509_parser::parse_x509_certificate;
use x509_parser::x509::{AttributeTypeAndValue, X509Name};

const OID_STREET: &str = "2.5.4.9";

/// 已知属性 OID 到 RFC 2253 简称
const ATTRIBUTE_NAMES: &[(&str, &str)] = &[
    ("2.5.4.3", "CN"),
    ("2.5.4.4", "SURNAME"),
    ("2.5.4.5", "SERIALNUMBER"),
    ("2.5.4.6", "C"),
    ("2.5.4.7", "L"),
    ("2.5.4.8", "ST"),
    (OID_STREET, "STREET"),
    ("2.5.4.10", "O"),
    ("2.5.4.11", "OU"),
    ("2.5.4.42", "GIVENNAME"),
];

/// 解码 DER 证书
pub fn decode_certificate(der: &[u8]) -> Result<Certificate> {
    let (_, parsed) = parse_x509_certificate(der)
        .map_err(|e| Error::DeviceCommunication(format!("Invalid certificate: {}", e)))?;
    let validity = parsed.validity();

    Ok(Certificate {
        der: der.to_vec(),
        subject: rfc2253(parsed.subject()),
        serial: parsed.raw_serial().to_vec(),
        not_before: validity.not_before.to_datetime(),
        not_after: validity.not_after.to_datetime(),
    })
}

/// 证书签发者的 RFC 2253 形式
pub fn issuer_of(certificate: &Certificate) -> Option<String> {
    let (_, parsed) = parse_x509_certificate(&certificate.der).ok()?;
    Some(rfc2253(parsed.issuer()))
}

/// 选择标签用到的主题字段
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubjectFields {
    pub name: String,
    pub country: String,
    pub locality: String,
    pub street: String,
}

impl SubjectFields {
    /// 从 DER 证书的主题中取字段，证书无法解析时返回 `None`
    pub fn from_der(der: &[u8]) -> Option<Self> {
        let (_, parsed) = parse_x509_certificate(der).ok()?;
        let subject = parsed.subject();

        Some(Self {
            name: first_text(subject.iter_common_name()),
            country: first_text(subject.iter_country()),
            locality: first_text(subject.iter_locality()),
            street: first_text(
                subject
                    .iter_attributes()
                    .filter(|atv| atv.attr_type().to_id_string() == OID_STREET),
            ),
        })
    }
}

fn first_text<'a, 'b: 'a>(mut values: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>) -> String {
    values.next().and_then(attribute_text).unwrap_or_default()
}

/// 属性值的文本，BMPString 按 UTF-16BE 解码
pub fn attribute_text(atv: &AttributeTypeAndValue<'_>) -> Option<String> {
    if let Ok(text) = atv.as_str() {
        return Some(text.to_string());
    }

    let value = atv.attr_value();
    if value.header.tag() != Tag::BmpString || value.data.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = value
        .data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

/// 按 RFC 2253 输出 DN（逆序、逗号分隔、特殊字符转义）
pub fn rfc2253(name: &X509Name<'_>) -> String {
    let mut rdns: Vec<String> = name
        .iter_rdn()
        .map(|rdn| {
            rdn.iter()
                .map(|atv| {
                    let oid = atv.attr_type().to_id_string();
                    let short = ATTRIBUTE_NAMES
                        .iter()
                        .find(|(known, _)| *known == oid)
                        .map(|(_, short)| short.to_string())
                        .unwrap_or(oid);
                    let value = attribute_text(atv)
                        .map(|text| escape_value(&text))
                        .unwrap_or_default();
                    format!("{}={}", short, value)
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect();
    rdns.reverse();
    rdns.join(",")
}

fn escape_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());
    for (i, ch) in value.chars().enumerate() {
        let leading = i == 0 && (ch == ' ' || ch == '#');
        let trailing = i == last && ch == ' ';
        if leading || trailing || matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
