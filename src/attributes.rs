use tracing::{debug, warn};

use crate::response::AssertionResponse;

/// Value of one `saml:Attribute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Single(String),
    Multiple(Vec<String>),
    /// Structured content, or anything else that isn't plain text.
    Other,
}

impl AttributeValue {
    pub(crate) fn from_values(values: Vec<Option<String>>) -> Self {
        let Some(mut values) = values.into_iter().collect::<Option<Vec<_>>>() else {
            return AttributeValue::Other;
        };
        if values.len() == 1 {
            AttributeValue::Single(values.remove(0))
        } else {
            AttributeValue::Multiple(values)
        }
    }

    /// The usable value: a single string or the first of a non-empty list.
    pub fn first(&self) -> Option<&str> {
        match self {
            AttributeValue::Single(value) => Some(value),
            AttributeValue::Multiple(values) => values.first().map(String::as_str),
            AttributeValue::Other => None,
        }
    }
}

/// Lower-cased attribute names in the order they were parsed.
pub fn list_attribute_names(assertion: &AssertionResponse) -> Vec<String> {
    assertion
        .user
        .attributes
        .iter()
        .map(|(name, _)| name.to_lowercase())
        .collect()
}

/// Case-insensitive attribute lookup. Attributes without a usable value are skipped, so a
/// later attribute with the same folded name can still match.
pub fn get_attribute_value(assertion: &AssertionResponse, wanted: &str) -> Option<String> {
    let wanted = wanted.to_lowercase();
    for (name, value) in &assertion.user.attributes {
        if name.to_lowercase() != wanted {
            continue;
        }
        match value.first() {
            Some(value) => return Some(value.to_string()),
            None => debug!(
                attribute = %wanted,
                "found attribute, but it's neither a list of strings nor a string"
            ),
        }
    }
    None
}

pub fn find_email(assertion: &AssertionResponse) -> Option<String> {
    get_attribute_value(assertion, "email")
}

/// Guesses the user identifier: the value of the first attribute whose name ends in "id".
///
/// This picks whichever such attribute comes first, e.g. `groupid` before `userid`. It is a
/// convenience for naming the user, not an authentication decision.
pub fn derive_identifier(assertion: &AssertionResponse) -> Option<String> {
    let Some(name) = list_attribute_names(assertion)
        .into_iter()
        .find(|name| name.ends_with("id"))
    else {
        warn!("could not find a suitable attribute to use as the user id");
        return None;
    };
    debug!(attribute = %name, "using attribute as the user id");
    get_attribute_value(assertion, &name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{ResponseHeader, Status, User};

    fn assertion(attributes: Vec<(&str, AttributeValue)>) -> AssertionResponse {
        AssertionResponse {
            response_header: ResponseHeader {
                id: "_response1".into(),
                in_response_to: Some("_req".into()),
                destination: None,
                issuer: None,
                status: Some(Status::success()),
            },
            user: User {
                name_id: None,
                session_index: None,
                attributes: attributes
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value))
                    .collect(),
            },
        }
    }

    fn single(value: &str) -> AttributeValue {
        AttributeValue::Single(value.into())
    }

    #[test]
    fn names_are_lower_cased_in_order() {
        let assertion = assertion(vec![
            ("Email", single("a@x.com")),
            ("Department", single("Eng")),
            ("userID", single("u1")),
        ]);
        assert_eq!(
            list_attribute_names(&assertion),
            vec!["email", "department", "userid"]
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let assertion = assertion(vec![("Email", single("a@x.com"))]);
        assert_eq!(
            get_attribute_value(&assertion, "EMAIL").as_deref(),
            Some("a@x.com")
        );
        assert_eq!(
            get_attribute_value(&assertion, "email"),
            get_attribute_value(&assertion, "EMAIL")
        );
        assert_eq!(find_email(&assertion).as_deref(), Some("a@x.com"));
        assert_eq!(get_attribute_value(&assertion, "phone"), None);
    }

    #[test]
    fn multiple_values_return_the_first() {
        let assertion = assertion(vec![(
            "Email",
            AttributeValue::Multiple(vec!["a@x.com".into(), "b@x.com".into()]),
        )]);
        assert_eq!(
            get_attribute_value(&assertion, "email").as_deref(),
            Some("a@x.com")
        );
    }

    #[test]
    fn unusable_values_keep_scanning() {
        let assertion = assertion(vec![
            ("EMAIL", AttributeValue::Multiple(Vec::new())),
            ("Email", AttributeValue::Other),
            ("email", single("late@x.com")),
        ]);
        assert_eq!(
            get_attribute_value(&assertion, "Email").as_deref(),
            Some("late@x.com")
        );

        let assertion = self::assertion(vec![("Email", AttributeValue::Other)]);
        assert_eq!(get_attribute_value(&assertion, "email"), None);
    }

    #[test]
    fn derives_the_first_id_like_attribute() {
        let assertion = assertion(vec![
            ("Department", single("Eng")),
            ("UserId", single("u123")),
        ]);
        assert_eq!(derive_identifier(&assertion).as_deref(), Some("u123"));

        let assertion = self::assertion(vec![("Department", single("Eng"))]);
        assert_eq!(derive_identifier(&assertion), None);
    }

    #[test]
    fn identifier_heuristic_takes_parse_order() {
        let assertion = assertion(vec![
            ("groupid", single("admins")),
            ("userid", single("u123")),
        ]);
        assert_eq!(derive_identifier(&assertion).as_deref(), Some("admins"));
    }

    #[test]
    fn builds_values_from_parsed_nodes() {
        assert_eq!(
            AttributeValue::from_values(vec![Some("a".into())]),
            single("a")
        );
        assert_eq!(
            AttributeValue::from_values(vec![Some("a".into()), Some("b".into())]),
            AttributeValue::Multiple(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            AttributeValue::from_values(Vec::new()),
            AttributeValue::Multiple(Vec::new())
        );
        assert_eq!(
            AttributeValue::from_values(vec![Some("a".into()), None]),
            AttributeValue::Other
        );
    }
}
