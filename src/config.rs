use std::str::FromStr;

use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    authn_request::ProtocolBinding,
    idp_metadata::IdpMetadata,
    utils::certificate_der,
    SamlError, NAME_ID_FORMAT_EMAIL_ADDRESS,
};

/// Service provider side of the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SpOptions {
    pub entity_id: String,
    /// Assertion consumer service URL.
    pub assert_endpoint: String,
    /// PEM encoded RSA key, used to sign redirect binding requests.
    pub private_key: String,
    /// PEM encoded certificate published in the SP metadata.
    pub certificate: String,
    #[serde(default)]
    pub binding: ProtocolBinding,
    #[serde(default = "default_nameid_format")]
    pub nameid_format: String,
    #[serde(default)]
    pub force_authn: bool,
    #[serde(default)]
    pub auth_context: Option<AuthContextOptions>,
    #[serde(default)]
    pub sign_get_request: bool,
    /// Expected audience of assertions, defaults to the entity id.
    #[serde(default)]
    pub audience: Option<String>,
    /// Seconds of clock skew tolerated when checking `NotBefore`.
    #[serde(default = "default_notbefore_skew")]
    pub notbefore_skew: i64,
    #[serde(default)]
    pub ignore_timing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthContextOptions {
    #[serde(default = "default_comparison")]
    pub comparison: String,
    #[serde(default)]
    pub class_refs: Vec<String>,
}

/// Identity provider side of the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdpOptions {
    /// When set, responses must be issued by this entity.
    #[serde(default)]
    pub entity_id: Option<String>,
    pub sso_login_url: String,
    #[serde(deserialize_with = "one_or_many")]
    pub certificates: Vec<String>,
    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    #[default]
    RsaSha256,
    RsaSha512,
}

impl SignatureAlgorithm {
    pub fn uri(self) -> &'static str {
        match self {
            SignatureAlgorithm::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            SignatureAlgorithm::RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "rsa-sha256" | "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => {
                Ok(SignatureAlgorithm::RsaSha256)
            }
            "sha512" | "rsa-sha512" | "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => {
                Ok(SignatureAlgorithm::RsaSha512)
            }
            other => Err(format!("unsupported signature algorithm {other:?}")),
        }
    }
}

impl<'de> Deserialize<'de> for SignatureAlgorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for ProtocolBinding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value
            .parse()
            .map_err(|_| de::Error::custom(format!("unknown binding {value:?}")))
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

fn default_nameid_format() -> String {
    NAME_ID_FORMAT_EMAIL_ADDRESS.to_string()
}

/// One day.
const MAX_NOTBEFORE_SKEW: i64 = 24 * 60 * 60;

fn default_notbefore_skew() -> i64 {
    1
}

fn default_comparison() -> String {
    "exact".to_string()
}

impl SpOptions {
    pub fn audience(&self) -> &str {
        self.audience.as_deref().unwrap_or(&self.entity_id)
    }

    fn validate(&self) -> Result<(), SamlError> {
        require("spOptions.entity_id", &self.entity_id)?;
        require("spOptions.assert_endpoint", &self.assert_endpoint)?;
        require("spOptions.private_key", &self.private_key)?;
        require("spOptions.certificate", &self.certificate)?;
        if !(0..=MAX_NOTBEFORE_SKEW).contains(&self.notbefore_skew) {
            return Err(SamlError::Configuration(format!(
                "spOptions.notbefore_skew must be between 0 and {MAX_NOTBEFORE_SKEW} seconds"
            )));
        }
        Ok(())
    }
}

impl IdpOptions {
    /// Builds the options from a parsed IdP metadata document. The SSO location matching
    /// `binding` is preferred, falling back to whichever the IdP advertises.
    pub fn from_metadata(
        metadata: &IdpMetadata,
        binding: ProtocolBinding,
    ) -> Result<Self, SamlError> {
        let sso_login_url = metadata
            .sso_bindings
            .get(&binding)
            .or_else(|| metadata.sso_bindings.values().next())
            .cloned()
            .ok_or_else(|| {
                SamlError::Configuration(
                    "the IdP metadata does not contain a SingleSignOnService".into(),
                )
            })?;

        Ok(IdpOptions {
            entity_id: Some(metadata.entity_id.clone()),
            sso_login_url,
            certificates: vec![metadata.signing_certificate_pem()],
            signature_algorithm: SignatureAlgorithm::default(),
        })
    }

    /// DER encodings of the trusted signing certificates.
    pub fn certificates_der(&self) -> Result<Vec<Vec<u8>>, SamlError> {
        self.certificates
            .iter()
            .map(|certificate| {
                certificate_der(certificate).map_err(|e| {
                    SamlError::Configuration(format!("idpOptions.certificates: {e}"))
                })
            })
            .collect()
    }

    fn validate(&self) -> Result<(), SamlError> {
        require("idpOptions.sso_login_url", &self.sso_login_url)?;
        if self.certificates.iter().all(|c| c.trim().is_empty()) {
            return Err(missing("idpOptions.certificates"));
        }
        url::Url::parse(&self.sso_login_url).map_err(|e| {
            SamlError::Configuration(format!("idpOptions.sso_login_url is not a URL: {e}"))
        })?;
        self.certificates_der()?;
        Ok(())
    }
}

/// Both halves of the SAML configuration. Once built it is never modified; the
/// [`crate::ServiceProvider`] owns it for the rest of the process.
#[derive(Debug, Clone)]
pub struct Configuration {
    sp: SpOptions,
    idp: IdpOptions,
}

impl Configuration {
    pub fn new(sp: SpOptions, idp: IdpOptions) -> Result<Self, SamlError> {
        sp.validate()?;
        idp.validate()?;
        Ok(Configuration { sp, idp })
    }

    /// Reads the auth server settings document, which must carry a `saml` block with
    /// `spOptions` and `idpOptions`.
    pub fn from_server_info(server_info: &Value) -> Result<Self, SamlError> {
        let saml = server_info.get("saml").ok_or_else(|| {
            SamlError::Configuration(
                "the auth-server configuration does not contain a \"saml\" property".into(),
            )
        })?;
        Self::from_saml_block(saml)
    }

    /// Reads a `saml` block directly.
    pub fn from_saml_block(saml: &Value) -> Result<Self, SamlError> {
        let sp = block::<SpOptions>(saml, "spOptions")?;
        let idp = block::<IdpOptions>(saml, "idpOptions")?;
        Self::new(sp, idp)
    }

    pub fn from_json(json: &str) -> Result<Self, SamlError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| SamlError::Configuration(format!("invalid JSON: {e}")))?;
        Self::from_server_info(&value)
    }

    pub fn sp(&self) -> &SpOptions {
        &self.sp
    }

    pub fn idp(&self) -> &IdpOptions {
        &self.idp
    }
}

fn block<T: serde::de::DeserializeOwned>(saml: &Value, name: &str) -> Result<T, SamlError> {
    let value = saml.get(name).filter(|v| !v.is_null()).ok_or_else(|| {
        SamlError::Configuration(format!(
            "the auth-server saml configuration does not contain an \"{name}\" property"
        ))
    })?;
    T::deserialize(value).map_err(|e| SamlError::Configuration(format!("{name}: {e}")))
}

fn require(field: &str, value: &str) -> Result<(), SamlError> {
    if value.trim().is_empty() {
        return Err(missing(field));
    }
    Ok(())
}

fn missing(field: &str) -> SamlError {
    SamlError::Configuration(format!("missing required field {field}"))
}
