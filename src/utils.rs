use base64::{prelude::BASE64_STANDARD, Engine};
use libxml::{
    parser::{Parser as XmlParser, ParserOptions},
    tree::{Document, Node},
    xpath::Context,
};
use rand::RngCore;

use crate::SamlError;

pub const NS_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const NS_METADATA: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub const NS_XMLDSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

const REQUEST_ID_ENTROPY: usize = 21;

/// Request ids must be valid xs:ID values, so they can't start with a digit.
pub fn random_request_id() -> String {
    let mut bytes = [0u8; REQUEST_ID_ENTROPY];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("_{}", hex::encode(bytes))
}

pub fn single_node(mut nodes: Vec<Node>, what: &str) -> Result<Node, SamlError> {
    if nodes.len() != 1 {
        return Err(SamlError::Parse(format!(
            "expected exactly one {what}, found {}",
            nodes.len()
        )));
    }
    Ok(nodes.remove(0))
}

pub fn decode_xml_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let stripped = input.replace([' ', '\n', '\r', '\t'], "");
    BASE64_STANDARD.decode(stripped)
}

/// Accepts either a full PEM certificate or just its base64 body.
pub fn certificate_der(certificate: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let body: String = certificate
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    decode_xml_base64(&body)
}

/// Strict parse of an inbound document. DTDs are refused outright.
pub fn parse_xml(input: &[u8]) -> Result<Document, SamlError> {
    if input.windows(9).any(|window| window == b"<!DOCTYPE") {
        return Err(SamlError::Parse("documents with a DTD are not accepted".into()));
    }
    let options = ParserOptions {
        recover: false,
        no_net: true,
        ..ParserOptions::default()
    };
    XmlParser::default()
        .parse_string_with_options(input, options)
        .map_err(|e| SamlError::Parse(format!("invalid XML: {e:?}")))
}

pub fn saml_context(document: &Document) -> Result<Context, SamlError> {
    let mut context = Context::new(document)
        .map_err(|_| SamlError::Parse("failed to create XPath context".into()))?;
    for (prefix, href) in [
        ("samlp", NS_PROTOCOL),
        ("saml", NS_ASSERTION),
        ("md", NS_METADATA),
        ("ds", NS_XMLDSIG),
    ] {
        context
            .register_namespace(prefix, href)
            .map_err(|_| SamlError::Parse(format!("failed to register namespace {prefix}")))?;
    }
    Ok(context)
}

pub fn find_nodes(
    context: &mut Context,
    xpath: &str,
    node: Option<&Node>,
) -> Result<Vec<Node>, SamlError> {
    context
        .findnodes(xpath, node)
        .map_err(|_| SamlError::Parse(format!("failed to evaluate {xpath}")))
}

/// Text of the first node matching `xpath`, `None` if there is no match or it is empty.
pub fn find_text(context: &mut Context, xpath: &str, node: Option<&Node>) -> Option<String> {
    let value = context.findvalue(xpath, node).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_and_start_with_a_non_digit() {
        let first = random_request_id();
        let second = random_request_id();
        assert_ne!(first, second);
        assert!(first.starts_with('_'));
        assert_eq!(first.len(), 1 + REQUEST_ID_ENTROPY * 2);
    }

    #[test]
    fn parse_xml_is_strict() {
        assert!(parse_xml(b"<a><b></a>").is_err());
        assert!(matches!(
            parse_xml(b"<!DOCTYPE a [<!ENTITY x \"y\">]><a>&x;</a>"),
            Err(SamlError::Parse(_))
        ));
        assert!(parse_xml(b"<a><b/></a>").is_ok());
    }

    #[test]
    fn certificate_der_accepts_pem_and_bare_bodies() {
        let pem = include_str!("../static/idp.cert");
        let bare: String = pem.lines().filter(|l| !l.starts_with("-----")).collect();
        let from_pem = certificate_der(pem).unwrap();
        assert_eq!(from_pem, certificate_der(&bare).unwrap());
        // DER certificates are a SEQUENCE
        assert_eq!(from_pem[0], 0x30);
    }
}
