//! Fixtures shared by the unit tests: a configuration pointing at the keys under `static/`
//! and a mock IdP that produces (optionally signed) responses.

use std::{
    cell::Cell,
    sync::atomic::{AtomicUsize, Ordering},
};

use libxml::{parser::Parser as XmlParser, tree::Document};
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use xmlsec::{XmlSecDocumentExt as _, XmlSecKey, XmlSecKeyFormat, XmlSecSignatureContext};

use crate::{
    bindings::encode_post_message,
    utils::{certificate_der, parse_xml, NS_ASSERTION, NS_PROTOCOL},
    Configuration, SamlError, ServiceProvider, SignatureVerifier, DATE_TIME_FORMAT,
    STATUS_SUCCESS,
};

thread_local! {
    static PARSE_ATTEMPTS: Cell<usize> = const { Cell::new(0) };
}

/// Inbound message parser that counts its calls on the current thread.
pub fn counting_parse_xml(xml: &[u8]) -> Result<Document, SamlError> {
    PARSE_ATTEMPTS.with(|attempts| attempts.set(attempts.get() + 1));
    parse_xml(xml)
}

pub fn parse_attempts() -> usize {
    PARSE_ATTEMPTS.with(Cell::get)
}

pub const IDP_KEY: &str = include_str!("../static/idp.key");
pub const IDP_CERT: &str = include_str!("../static/idp.cert");
pub const SP_KEY: &str = include_str!("../static/sp.key");
pub const SP_CERT: &str = include_str!("../static/sp.cert");
pub const OTHER_CERT: &str = include_str!("../static/other.cert");

pub const IDP_ENTITY_ID: &str = "https://idp.example.com/metadata";
pub const SP_ENTITY_ID: &str = "https://sp.example.com/metadata";
pub const ACS_URL: &str = "https://sp.example.com/assert";

pub fn server_info() -> Value {
    json!({
        "id": "default",
        "saml": {
            "spOptions": {
                "entity_id": SP_ENTITY_ID,
                "assert_endpoint": ACS_URL,
                "private_key": SP_KEY,
                "certificate": SP_CERT,
            },
            "idpOptions": {
                "entity_id": IDP_ENTITY_ID,
                "sso_login_url": "https://idp.example.com/sso",
                "certificates": IDP_CERT,
            }
        }
    })
}

pub fn configuration() -> Configuration {
    Configuration::from_server_info(&server_info()).unwrap()
}

pub fn provider() -> ServiceProvider {
    ServiceProvider::new(configuration())
}

pub fn idp_certificate_der() -> Vec<u8> {
    certificate_der(IDP_CERT).unwrap()
}

pub fn other_certificate_der() -> Vec<u8> {
    certificate_der(OTHER_CERT).unwrap()
}

/// Verifier stand-in that accepts everything and counts its calls.
#[derive(Default)]
pub struct CountingVerifier {
    pub calls: AtomicUsize,
}

impl CountingVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SignatureVerifier for CountingVerifier {
    fn verify(&self, _signed_xml: &[u8], _trusted_cert: &[u8]) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signed {
    Response,
    Assertion,
    Nothing,
}

/// A Response as an IdP would send it.
#[derive(Debug, Clone)]
pub struct ResponseFixture {
    pub in_response_to: Option<String>,
    pub status: String,
    pub status_message: Option<String>,
    pub issuer: String,
    pub audience: String,
    pub not_before: OffsetDateTime,
    pub not_on_or_after: OffsetDateTime,
    pub name_id: String,
    pub attributes: Vec<(String, Vec<String>)>,
    pub raw_attributes: Vec<String>,
    pub include_assertion: bool,
    pub signed: Signed,
}

impl ResponseFixture {
    pub fn new(in_response_to: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        ResponseFixture {
            in_response_to: Some(in_response_to.to_string()),
            status: STATUS_SUCCESS.to_string(),
            status_message: None,
            issuer: IDP_ENTITY_ID.to_string(),
            audience: SP_ENTITY_ID.to_string(),
            not_before: now - Duration::minutes(5),
            not_on_or_after: now + Duration::minutes(5),
            name_id: "jane@example.com".to_string(),
            attributes: vec![
                ("Department".to_string(), vec!["Eng".to_string()]),
                ("UserId".to_string(), vec!["u123".to_string()]),
                (
                    "Email".to_string(),
                    vec!["a@x.com".to_string(), "b@x.com".to_string()],
                ),
            ],
            raw_attributes: Vec::new(),
            include_assertion: true,
            signed: Signed::Response,
        }
    }

    pub fn unsigned(self) -> Self {
        ResponseFixture {
            signed: Signed::Nothing,
            ..self
        }
    }

    pub fn to_xml(&self) -> String {
        let instant = |t: OffsetDateTime| t.format(&DATE_TIME_FORMAT).unwrap();
        let now = instant(OffsetDateTime::now_utc());
        let in_response_to = self
            .in_response_to
            .as_ref()
            .map(|id| format!(" InResponseTo=\"{id}\""))
            .unwrap_or_default();
        let status_message = self
            .status_message
            .as_ref()
            .map(|m| format!("<samlp:StatusMessage>{m}</samlp:StatusMessage>"))
            .unwrap_or_default();

        let mut attributes = String::new();
        for (name, values) in &self.attributes {
            attributes.push_str(&format!("<saml:Attribute Name=\"{name}\">"));
            for value in values {
                attributes.push_str(&format!(
                    "<saml:AttributeValue xsi:type=\"xs:string\">{value}</saml:AttributeValue>"
                ));
            }
            attributes.push_str("</saml:Attribute>");
        }
        for raw in &self.raw_attributes {
            attributes.push_str(raw);
        }

        let assertion = if self.include_assertion {
            format!(
                r#"<saml:Assertion ID="_assertion1" Version="2.0" IssueInstant="{now}"><saml:Issuer>{issuer}</saml:Issuer>{signature}<saml:Subject><saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">{name_id}</saml:NameID><saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData{in_response_to} Recipient="{ACS_URL}"/></saml:SubjectConfirmation></saml:Subject><saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}"><saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction></saml:Conditions><saml:AuthnStatement AuthnInstant="{now}" SessionIndex="_session1"><saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement><saml:AttributeStatement>{attributes}</saml:AttributeStatement></saml:Assertion>"#,
                issuer = self.issuer,
                signature = if self.signed == Signed::Assertion {
                    signature_template("_assertion1")
                } else {
                    String::new()
                },
                name_id = self.name_id,
                not_before = instant(self.not_before),
                not_on_or_after = instant(self.not_on_or_after),
                audience = self.audience,
            )
        } else {
            String::new()
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:Response xmlns:samlp="{NS_PROTOCOL}" xmlns:saml="{NS_ASSERTION}" xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="_response1" Version="2.0" IssueInstant="{now}" Destination="{ACS_URL}"{in_response_to}><saml:Issuer>{issuer}</saml:Issuer>{signature}<samlp:Status><samlp:StatusCode Value="{status}"/>{status_message}</samlp:Status>{assertion}</samlp:Response>"#,
            issuer = self.issuer,
            signature = if self.signed == Signed::Response {
                signature_template("_response1")
            } else {
                String::new()
            },
            status = self.status,
        )
    }

    /// The response signed as configured, base64 encoded and wrapped in a form body.
    pub fn form_body(&self) -> String {
        let xml = match self.signed {
            Signed::Nothing => self.to_xml(),
            _ => sign_response(self),
        };
        post_form(&xml)
    }
}

/// Form body carrying `xml` the way the user agent posts it back.
pub fn post_form(xml: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("SAMLResponse", &encode_post_message(xml))
        .append_pair("RelayState", "/")
        .finish()
}

pub fn signature_template(reference: &str) -> String {
    format!(
        r##"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/><ds:Reference URI="#{reference}"><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/><ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/></ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue></ds:DigestValue></ds:Reference></ds:SignedInfo><ds:SignatureValue></ds:SignatureValue></ds:Signature>"##
    )
}

/// Fills in the signature template of `fixture` with the IdP key.
pub fn sign_response(fixture: &ResponseFixture) -> String {
    sign_xml(&fixture.to_xml())
}

pub fn sign_xml(xml: &str) -> String {
    let document = XmlParser::default().parse_string(xml).unwrap();
    document
        .specify_idattr("//samlp:Response", "ID", Some(&[("samlp", NS_PROTOCOL)]))
        .unwrap();
    let _ = document.specify_idattr("//saml:Assertion", "ID", Some(&[("saml", NS_ASSERTION)]));

    let key = XmlSecKey::from_memory(IDP_KEY.as_bytes(), XmlSecKeyFormat::Pem, None).unwrap();
    let mut sigctx = XmlSecSignatureContext::new();
    sigctx.insert_key(key);
    sigctx.sign_document(&document).unwrap();
    document.to_string()
}
