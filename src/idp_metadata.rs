use std::collections::HashMap;

use base64::{prelude::BASE64_STANDARD, Engine};

use crate::{
    authn_request::ProtocolBinding,
    utils::{decode_xml_base64, find_nodes, find_text, parse_xml, saml_context},
    SamlError,
};

#[derive(Debug)]
#[non_exhaustive]
pub struct IdpMetadata {
    pub entity_id: String,
    /// DER encoded.
    pub signing_certificate: Vec<u8>,
    pub sso_bindings: HashMap<ProtocolBinding, String>,
}

impl IdpMetadata {
    pub fn signing_certificate_pem(&self) -> String {
        let encoded = BASE64_STANDARD.encode(&self.signing_certificate);
        let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
        for line in encoded.as_bytes().chunks(64) {
            pem.push_str(&String::from_utf8_lossy(line));
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }
}

pub fn parse_idp_metadata(input: &[u8]) -> Result<IdpMetadata, SamlError> {
    let invalid = |what: &str| SamlError::Configuration(format!("invalid IdP metadata: {what}"));

    let document = parse_xml(input).map_err(|e| invalid(&e.to_string()))?;
    let mut context = saml_context(&document)?;

    let entity_id = find_text(&mut context, "/md:EntityDescriptor/@entityID", None)
        .ok_or_else(|| invalid("missing entityID"))?;

    // Keys without a `use` may be used for signing too.
    let encoded_certificate = find_text(
        &mut context,
        "/md:EntityDescriptor/md:IDPSSODescriptor/md:KeyDescriptor[@use=\"signing\" or not(@use)]/ds:KeyInfo/ds:X509Data/ds:X509Certificate",
        None,
    )
    .ok_or_else(|| invalid("missing signing certificate"))?;
    let signing_certificate = decode_xml_base64(&encoded_certificate)
        .map_err(|e| invalid(&format!("signing certificate: {e}")))?;

    let sso_nodes = find_nodes(
        &mut context,
        "/md:EntityDescriptor/md:IDPSSODescriptor/md:SingleSignOnService",
        None,
    )?;

    let mut sso_bindings = HashMap::new();
    for sso_node in sso_nodes {
        if let Ok(binding) = sso_node
            .get_attribute("Binding")
            .ok_or_else(|| invalid("SingleSignOnService without Binding"))?
            .parse()
        {
            let location = sso_node
                .get_attribute("Location")
                .ok_or_else(|| invalid("SingleSignOnService without Location"))?;
            sso_bindings.insert(binding, location);
        }
    }

    Ok(IdpMetadata {
        entity_id,
        signing_certificate,
        sso_bindings,
    })
}
