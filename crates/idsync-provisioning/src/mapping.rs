//! Resource provisions and attribute mapping.
//!
//! A [`Provision`] binds a local kind to an object class on the resource and
//! lists how attributes travel between them. The key mapping is what
//! correlation uses to match external objects with local records.

use idsync_connector::prelude::{AttributeSet, AttributeValue, ObjectClass};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::record::{LocalRecord, NAME_ATTRIBUTE};
use crate::types::AnyKind;

/// Which way values flow through a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    /// Resource to local (pull only).
    Inbound,
    /// Local to resource (push and propagation only).
    Outbound,
    /// Both directions.
    #[default]
    Bidirectional,
}

impl MappingDirection {
    /// Applied when pulling.
    #[must_use]
    pub fn includes_inbound(&self) -> bool {
        matches!(
            self,
            MappingDirection::Inbound | MappingDirection::Bidirectional
        )
    }

    /// Applied when pushing or propagating.
    #[must_use]
    pub fn includes_outbound(&self) -> bool {
        matches!(
            self,
            MappingDirection::Outbound | MappingDirection::Bidirectional
        )
    }
}

/// One attribute carried between a local record and a resource object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMapping {
    /// Attribute name on the resource.
    pub external_attribute: String,
    /// Local attribute name; `name` addresses the record name.
    pub internal_attribute: String,
    #[serde(default)]
    pub direction: MappingDirection,
    /// Value used when the source attribute is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<AttributeValue>,
    /// Whether a missing source value is an error.
    #[serde(default)]
    pub required: bool,
}

impl AttributeMapping {
    /// Mapping applied in both directions.
    pub fn simple(external: impl Into<String>, internal: impl Into<String>) -> Self {
        Self {
            external_attribute: external.into(),
            internal_attribute: internal.into(),
            direction: MappingDirection::Bidirectional,
            default_value: None,
            required: false,
        }
    }

    pub fn inbound(external: impl Into<String>, internal: impl Into<String>) -> Self {
        Self {
            direction: MappingDirection::Inbound,
            ..Self::simple(external, internal)
        }
    }

    pub fn outbound(external: impl Into<String>, internal: impl Into<String>) -> Self {
        Self {
            direction: MappingDirection::Outbound,
            ..Self::simple(external, internal)
        }
    }

    #[must_use]
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<AttributeValue>) -> Self {
        self.default_value = Some(default.into());
        self
    }
}

/// Correlation key: which local attribute holds the resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMapping {
    /// Attribute on the resource, also the connector UID attribute.
    pub external: String,
    /// Local attribute; `name` addresses the record name.
    pub internal: String,
}

impl KeyMapping {
    /// Create a key mapping.
    pub fn new(external: impl Into<String>, internal: impl Into<String>) -> Self {
        Self {
            external: external.into(),
            internal: internal.into(),
        }
    }
}

/// Binding of a local kind to a resource object class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provision {
    /// Local kind.
    pub kind: AnyKind,
    /// Object class on the resource.
    pub object_class: ObjectClass,
    /// Correlation key.
    pub key: KeyMapping,
    /// Attribute mappings.
    #[serde(default)]
    pub mappings: Vec<AttributeMapping>,
    /// Resource attribute holding group members' identifiers (groups only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_attribute: Option<String>,
}

/// Local representation derived from an external object.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundValues {
    /// Record name.
    pub name: String,
    /// Local attributes.
    pub attributes: AttributeSet,
}

impl Provision {
    /// Create a provision with a key mapping and no attribute mappings.
    pub fn new(kind: AnyKind, key: KeyMapping) -> Self {
        Self {
            kind,
            object_class: kind.object_class(),
            key,
            mappings: Vec::new(),
            member_attribute: None,
        }
    }

    /// Add an attribute mapping using builder pattern.
    #[must_use]
    pub fn with_mapping(mut self, mapping: AttributeMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Set the member attribute using builder pattern.
    #[must_use]
    pub fn with_member_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.member_attribute = Some(attribute.into());
        self
    }

    /// Map an external object to local name and attributes.
    ///
    /// The key value seeds the name unless a mapping targets `name`.
    pub fn inbound(
        &self,
        key_value: &str,
        external: &AttributeSet,
    ) -> ProvisioningResult<InboundValues> {
        let mut name = key_value.to_string();
        let mut attributes = AttributeSet::new();

        if self.key.internal != NAME_ATTRIBUTE {
            attributes.set(self.key.internal.clone(), key_value);
        }

        for mapping in self.mappings.iter().filter(|m| m.direction.includes_inbound()) {
            let value = match external.get(&mapping.external_attribute) {
                Some(v) if !v.is_null() => v.clone(),
                _ => match (&mapping.default_value, mapping.required) {
                    (Some(default), _) => default.clone(),
                    (None, true) => {
                        return Err(ProvisioningError::mapping(
                            &mapping.external_attribute,
                            "required attribute missing on resource object",
                        ))
                    }
                    (None, false) => continue,
                },
            };

            if mapping.internal_attribute == NAME_ATTRIBUTE {
                name = value.to_text().ok_or_else(|| {
                    ProvisioningError::mapping(&mapping.external_attribute, "name must be a scalar")
                })?;
            } else {
                attributes.set(mapping.internal_attribute.clone(), value);
            }
        }

        Ok(InboundValues { name, attributes })
    }

    /// Map a local record to resource attributes, including the key attribute.
    pub fn outbound(&self, record: &LocalRecord) -> ProvisioningResult<AttributeSet> {
        let account_id = self.account_id(record).ok_or_else(|| {
            ProvisioningError::mapping(&self.key.internal, "no value for the key attribute")
        })?;
        let mut attributes = AttributeSet::new().with(self.key.external.clone(), account_id);

        for mapping in self.mappings.iter().filter(|m| m.direction.includes_outbound()) {
            let value = if mapping.internal_attribute == NAME_ATTRIBUTE {
                Some(AttributeValue::String(record.name.clone()))
            } else {
                record.attributes.get(&mapping.internal_attribute).cloned()
            };

            match value.or_else(|| mapping.default_value.clone()) {
                Some(v) => attributes.set(mapping.external_attribute.clone(), v),
                None if mapping.required => {
                    return Err(ProvisioningError::mapping(
                        &mapping.internal_attribute,
                        "required attribute missing on local record",
                    ))
                }
                None => {}
            }
        }

        Ok(attributes)
    }

    /// Identifier the record has (or would have) on the resource.
    pub fn account_id(&self, record: &LocalRecord) -> Option<String> {
        record.internal_value(&self.key.internal)
    }

    /// Member identifiers carried by an external group object.
    pub fn member_ids<'a>(&self, external: &'a AttributeSet) -> Vec<&'a str> {
        self.member_attribute
            .as_deref()
            .and_then(|attr| external.get_strings(attr))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_provision() -> Provision {
        Provision::new(AnyKind::User, KeyMapping::new("uid", "name"))
            .with_mapping(AttributeMapping::simple("mail", "email"))
            .with_mapping(AttributeMapping::inbound("cn", "fullName").with_default("unknown"))
            .with_mapping(AttributeMapping::outbound("description", "note"))
    }

    #[test]
    fn test_inbound_maps_name_and_attributes() {
        let provision = user_provision();
        let external = AttributeSet::new()
            .with("uid", "jdoe")
            .with("mail", "j@x")
            .with("description", "ignored inbound");

        let mapped = provision.inbound("jdoe", &external).unwrap();
        assert_eq!(mapped.name, "jdoe");
        assert_eq!(mapped.attributes.get_string("email"), Some("j@x"));
        assert_eq!(mapped.attributes.get_string("fullName"), Some("unknown"));
        assert!(!mapped.attributes.has("note"));
    }

    #[test]
    fn test_inbound_required_missing_fails() {
        let provision = Provision::new(AnyKind::User, KeyMapping::new("uid", "name"))
            .with_mapping(AttributeMapping::simple("mail", "email").with_required(true));
        let err = provision.inbound("jdoe", &AttributeSet::new()).unwrap_err();
        assert!(matches!(err, ProvisioningError::Mapping { .. }));
    }

    #[test]
    fn test_inbound_non_name_key_is_stored_as_attribute() {
        let key = KeyMapping::new("employeeNumber", "employeeId");
        let provision = Provision::new(AnyKind::User, key)
            .with_mapping(AttributeMapping::inbound("uid", "name"));
        let external = AttributeSet::new().with("uid", "jdoe");
        let mapped = provision.inbound("E-17", &external).unwrap();
        assert_eq!(mapped.name, "jdoe");
        assert_eq!(mapped.attributes.get_string("employeeId"), Some("E-17"));
    }

    #[test]
    fn test_outbound_includes_key() {
        let provision = user_provision();
        let record = LocalRecord::new(AnyKind::User, "jdoe").with_attributes(
            AttributeSet::new()
                .with("email", "j@x")
                .with("note", "vip")
                .with("fullName", "John"),
        );

        let attrs = provision.outbound(&record).unwrap();
        assert_eq!(attrs.get_string("uid"), Some("jdoe"));
        assert_eq!(attrs.get_string("mail"), Some("j@x"));
        assert_eq!(attrs.get_string("description"), Some("vip"));
        assert!(!attrs.has("cn"));
    }

    #[test]
    fn test_member_ids() {
        let provision = Provision::new(AnyKind::Group, KeyMapping::new("cn", "name"))
            .with_member_attribute("member");
        let external = AttributeSet::new().with("member", vec!["a", "b"]);
        assert_eq!(provision.member_ids(&external), vec!["a", "b"]);
        assert!(provision.member_ids(&AttributeSet::new()).is_empty());
    }
}
