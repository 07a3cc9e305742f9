use libxml::{
    tree::{Document, Node},
    xpath::Context,
};
use time::{format_description::well_known::Iso8601, Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::{
    attributes::AttributeValue,
    config::Configuration,
    signature::SignatureVerifier,
    utils::{find_nodes, find_text, saml_context, single_node},
    SamlError, STATUS_SUCCESS,
};

/// A parsed SAML protocol message and the user it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResponse {
    pub response_header: ResponseHeader,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub id: String,
    pub in_response_to: Option<String>,
    pub destination: Option<String>,
    pub issuer: Option<String>,
    /// Only protocol responses carry a status.
    pub status: Option<Status>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: String,
    pub message: Option<String>,
}

impl Status {
    pub fn success() -> Self {
        Status {
            code: STATUS_SUCCESS.to_string(),
            message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == STATUS_SUCCESS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub name_id: Option<String>,
    pub session_index: Option<String>,
    /// Attributes in parse order. Names are unique; a repeated name replaces the earlier value.
    pub attributes: Vec<(String, AttributeValue)>,
}

impl User {
    fn insert_attribute(&mut self, name: String, value: AttributeValue) {
        match self.attributes.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
    }
}

/// What the caller learns about the authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub authenticated_userid: Option<String>,
}

/// Reads the header and user sections of a protocol message. The root must be a
/// `samlp:*` element carrying an `ID`.
pub(crate) fn read_message(document: &Document) -> Result<AssertionResponse, SamlError> {
    let mut context = saml_context(document)?;

    let root = single_node(find_nodes(&mut context, "/samlp:*", None)?, "SAML protocol message")?;
    let id = root
        .get_attribute("ID")
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| SamlError::Parse("the message header has no ID".into()))?;

    let status = find_text(&mut context, "/samlp:*/samlp:Status/samlp:StatusCode/@Value", None)
        .map(|code| Status {
            code,
            message: find_text(
                &mut context,
                "/samlp:*/samlp:Status/samlp:StatusMessage",
                None,
            ),
        });

    let response_header = ResponseHeader {
        id,
        in_response_to: root.get_attribute("InResponseTo"),
        destination: root.get_attribute("Destination"),
        issuer: find_text(&mut context, "/samlp:*/saml:Issuer", None),
        status,
    };

    let user = read_user(&mut context)?;

    Ok(AssertionResponse {
        response_header,
        user,
    })
}

fn read_user(context: &mut Context) -> Result<User, SamlError> {
    let mut user = User {
        name_id: find_text(context, "/samlp:*/saml:Assertion/saml:Subject/saml:NameID", None),
        session_index: find_text(
            context,
            "/samlp:*/saml:Assertion/saml:AuthnStatement/@SessionIndex",
            None,
        ),
        attributes: Vec::new(),
    };

    let attributes = find_nodes(
        context,
        "/samlp:*/saml:Assertion/saml:AttributeStatement/saml:Attribute",
        None,
    )?;
    for attribute in attributes {
        let Some(name) = attribute.get_attribute("Name") else {
            debug!("skipping attribute without a Name");
            continue;
        };
        let values = find_nodes(context, "saml:AttributeValue", Some(&attribute))?
            .iter()
            .map(attribute_text)
            .collect();
        user.insert_attribute(name, AttributeValue::from_values(values));
    }

    Ok(user)
}

fn attribute_text(value: &Node) -> Option<String> {
    if !value.get_child_elements().is_empty() {
        return None;
    }
    Some(value.get_content())
}

const SIGNED_IN_RESPONSE_TO: &str = concat!(
    "/samlp:Response/saml:Assertion/saml:Subject/saml:SubjectConfirmation",
    "/saml:SubjectConfirmationData/@InResponseTo",
);

/// The element covered by the verified signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignedElement {
    Response,
    Assertion,
}

/// Validates a decoded HTTP-POST response and returns what it asserts.
///
/// `document` is `xml` parsed. The status is checked ahead of the signature, so IdP failures
/// surface as [`SamlError::IdP`] whether or not they are signed. Nothing else is read from
/// them.
pub(crate) fn validate_post_response(
    document: &Document,
    xml: &[u8],
    config: &Configuration,
    verifier: &dyn SignatureVerifier,
    expected_request_id: &str,
    now: OffsetDateTime,
) -> Result<AssertionResponse, SamlError> {
    let mut context = saml_context(document)?;

    if find_nodes(&mut context, "/samlp:Response", None)?.is_empty() {
        return Err(SamlError::Parse("the message is not a samlp:Response".into()));
    }
    let response = read_message(document)?;

    check_status(&response)?;
    check_structure(&mut context)?;
    let signed = check_signature(&mut context, xml, config, verifier)?;
    check_issuer(&mut context, config)?;
    if !config.sp().ignore_timing {
        check_timing(&mut context, config, now)?;
    }
    check_audience(&mut context, config)?;
    check_correlation(&mut context, &response, signed, expected_request_id)?;

    Ok(response)
}

fn check_status(response: &AssertionResponse) -> Result<(), SamlError> {
    match &response.response_header.status {
        Some(status) if status.is_success() => Ok(()),
        Some(status) => Err(SamlError::IdP {
            status: status.code.clone(),
            message: status.message.clone(),
        }),
        None => Err(SamlError::Parse("the response has no status".into())),
    }
}

/// A successful response carries exactly one plain assertion, directly under the Response.
fn check_structure(context: &mut Context) -> Result<(), SamlError> {
    if !find_nodes(context, "//saml:EncryptedAssertion", None)?.is_empty() {
        return Err(SamlError::Parse(
            "encrypted assertions are not supported".into(),
        ));
    }
    let assertions = find_nodes(context, "//saml:Assertion", None)?.len();
    let placed = find_nodes(context, "/samlp:Response/saml:Assertion", None)?.len();
    if assertions != 1 || placed != 1 {
        return Err(SamlError::Parse(format!(
            "expected exactly one assertion in the response, found {assertions}"
        )));
    }
    Ok(())
}

/// The first signature in document order is the one the verifier checks. It must sign either
/// the Response or its Assertion, and reference that element by ID.
///
/// An assertion-only signature leaves the Response element itself unsigned, so callers must
/// take anything security relevant from inside the Assertion in that case.
fn check_signature(
    context: &mut Context,
    xml: &[u8],
    config: &Configuration,
    verifier: &dyn SignatureVerifier,
) -> Result<SignedElement, SamlError> {
    if find_nodes(context, "//ds:Signature", None)?.is_empty() {
        return Err(SamlError::signature("the response is not signed"));
    }

    let placed = find_nodes(
        context,
        "(//ds:Signature)[1][parent::samlp:Response[not(parent::*)] or parent::saml:Assertion[parent::samlp:Response[not(parent::*)]]]",
        None,
    )?;
    let Ok(signature) = single_node(placed, "signature") else {
        return Err(SamlError::signature(
            "the signature does not cover the Response or its Assertion",
        ));
    };

    let references = find_nodes(context, "ds:SignedInfo/ds:Reference", Some(&signature))?;
    let reference = match references.as_slice() {
        [reference] => reference.get_attribute("URI").unwrap_or_default(),
        _ => {
            return Err(SamlError::signature(
                "the signature must contain exactly one reference",
            ))
        }
    };
    let parent = signature.get_parent();
    let signed = match parent.as_ref().map(|parent| parent.get_name()) {
        Some(name) if name == "Assertion" => SignedElement::Assertion,
        _ => SignedElement::Response,
    };
    let signed_id = parent
        .and_then(|parent| parent.get_attribute("ID"))
        .unwrap_or_default();
    if signed_id.is_empty() || reference != format!("#{signed_id}") {
        return Err(SamlError::signature(format!(
            "the signature references {reference:?} instead of its parent {signed_id:?}"
        )));
    }

    let certificates = config.idp().certificates_der()?;
    if certificates
        .iter()
        .any(|certificate| verifier.verify(xml, certificate))
    {
        return Ok(signed);
    }
    Err(SamlError::signature(
        "no trusted certificate validates the signature",
    ))
}

fn check_issuer(context: &mut Context, config: &Configuration) -> Result<(), SamlError> {
    let Some(expected) = &config.idp().entity_id else {
        return Ok(());
    };
    for xpath in [
        "/samlp:Response/saml:Issuer",
        "/samlp:Response/saml:Assertion/saml:Issuer",
    ] {
        if let Some(actual) = find_text(context, xpath, None) {
            if &actual != expected {
                return Err(SamlError::Issuer {
                    expected: expected.clone(),
                    actual,
                });
            }
        }
    }
    Ok(())
}

fn check_timing(
    context: &mut Context,
    config: &Configuration,
    now: OffsetDateTime,
) -> Result<(), SamlError> {
    let conditions = "/samlp:Response/saml:Assertion/saml:Conditions";
    let skew = Duration::seconds(config.sp().notbefore_skew);

    if let Some(not_before) = find_text(context, &format!("{conditions}/@NotBefore"), None) {
        let latest = now
            .checked_add(skew)
            .ok_or_else(|| SamlError::Condition("clock skew is out of range".into()))?;
        if latest < parse_instant(&not_before)? {
            return Err(SamlError::Condition(format!(
                "the assertion is not valid before {not_before}"
            )));
        }
    }

    if let Some(not_on_or_after) =
        find_text(context, &format!("{conditions}/@NotOnOrAfter"), None)
    {
        if now >= parse_instant(&not_on_or_after)? {
            return Err(SamlError::Condition(format!(
                "the assertion expired at {not_on_or_after}"
            )));
        }
    }

    Ok(())
}

fn check_audience(context: &mut Context, config: &Configuration) -> Result<(), SamlError> {
    let audiences = find_nodes(
        context,
        "/samlp:Response/saml:Assertion/saml:Conditions/saml:AudienceRestriction/saml:Audience",
        None,
    )?;
    if audiences.is_empty() {
        return Ok(());
    }
    let audience = config.sp().audience();
    if audiences
        .iter()
        .any(|node| node.get_content().trim() == audience)
    {
        return Ok(());
    }
    Err(SamlError::Condition(format!(
        "the assertion is not intended for {audience}"
    )))
}

fn parse_instant(value: &str) -> Result<OffsetDateTime, SamlError> {
    OffsetDateTime::parse(value, &Iso8601::DEFAULT)
        .map_err(|e| SamlError::Condition(format!("invalid instant {value:?}: {e}")))
}

/// `InResponseTo` must equal the expected request id. When only the Assertion is signed, the
/// subject confirmation's `InResponseTo` must be present and equal it too.
fn check_correlation(
    context: &mut Context,
    response: &AssertionResponse,
    signed: SignedElement,
    expected: &str,
) -> Result<(), SamlError> {
    let mut candidates = vec![response.response_header.in_response_to.clone()];
    if signed == SignedElement::Assertion {
        candidates.push(find_text(context, SIGNED_IN_RESPONSE_TO, None));
    }

    let Some(actual) = candidates
        .into_iter()
        .find(|actual| actual.as_deref() != Some(expected))
    else {
        return Ok(());
    };
    warn!(
        expected,
        actual = ?actual,
        signed = ?signed,
        "SAML response does not correspond to the expected request"
    );
    Err(SamlError::Correlation {
        expected: expected.to_string(),
        actual,
    })
}
