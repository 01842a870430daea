use crate::document::{AttributeSection, EntitySection, SchemaDocument};
use crate::types::{is_identifier, EntityName, Fingerprint};
use crate::value::{AttributeKind, AttributeValue};
use crate::SchemaError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Immutable, validated description of the entities a store may hold.
///
/// Built once from a [`SchemaDocument`] and never mutated afterwards. The
/// fingerprint is a blake3 digest of the model's canonical JSON form, so two
/// documents that describe the same entities produce the same fingerprint no
/// matter how they were formatted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchemaModel {
    name: String,
    version: u32,
    entities: BTreeMap<EntityName, EntityDescription>,
    #[serde(skip)]
    fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EntityDescription {
    name: EntityName,
    attributes: BTreeMap<String, AttributeDescription>,
    unique: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AttributeDescription {
    kind: AttributeKind,
    optional: bool,
    default: Option<AttributeValue>,
}

impl SchemaDocument {
    /// Validate the document and build the schema model named `name`.
    pub fn into_model(self, name: &str) -> Result<SchemaModel, SchemaError> {
        if self.schema_version == 0 {
            return Err(SchemaError::UnsupportedVersion(self.schema_version));
        }
        if self.entities.is_empty() {
            return Err(SchemaError::NoEntities(name.to_owned()));
        }

        let mut entities = BTreeMap::new();
        for (entity_name, section) in self.entities {
            let entity = build_entity(&entity_name, section)?;
            entities.insert(EntityName::new(entity_name), entity);
        }

        let mut model = SchemaModel {
            name: name.to_owned(),
            version: self.schema_version,
            entities,
            fingerprint: Fingerprint::new(""),
        };
        model.fingerprint = model.compute_fingerprint()?;
        Ok(model)
    }
}

fn build_entity(name: &str, section: EntitySection) -> Result<EntityDescription, SchemaError> {
    if !is_identifier(name) {
        return Err(SchemaError::InvalidName(name.to_owned()));
    }

    let mut attributes = BTreeMap::new();
    for (attr_name, attr) in section.attributes {
        if !is_identifier(&attr_name) {
            return Err(SchemaError::InvalidName(format!("{name}.{attr_name}")));
        }
        let description = build_attribute(name, &attr_name, &attr)?;
        attributes.insert(attr_name, description);
    }

    let mut unique = section.unique;
    unique.sort();
    unique.dedup();
    for attribute in &unique {
        if !attributes.contains_key(attribute) {
            return Err(SchemaError::UnknownUniqueAttribute {
                entity: name.to_owned(),
                attribute: attribute.clone(),
            });
        }
    }

    Ok(EntityDescription {
        name: EntityName::new(name),
        attributes,
        unique,
    })
}

fn build_attribute(
    entity: &str,
    name: &str,
    section: &AttributeSection,
) -> Result<AttributeDescription, SchemaError> {
    let default = match &section.default {
        None => None,
        Some(raw) => Some(AttributeValue::from_toml(section.kind, raw).ok_or_else(|| {
            SchemaError::InvalidDefault {
                entity: entity.to_owned(),
                attribute: name.to_owned(),
                kind: section.kind,
            }
        })?),
    };
    Ok(AttributeDescription {
        kind: section.kind,
        optional: section.optional,
        default,
    })
}

impl SchemaModel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.get(name)
    }

    pub fn contains_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescription> {
        self.entities.values()
    }

    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(EntityName::as_str).collect()
    }

    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn compute_fingerprint(&self) -> Result<Fingerprint, SchemaError> {
        let json = self.canonical_json()?;
        Ok(Fingerprint::new(
            blake3::hash(json.as_bytes()).to_hex().to_string(),
        ))
    }
}

impl EntityDescription {
    pub fn name(&self) -> &EntityName {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeDescription)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Attributes whose combined values must be unique across all objects of
    /// this entity. Each listed attribute is constrained on its own.
    pub fn unique(&self) -> &[String] {
        &self.unique
    }

    /// Initial values for a freshly inserted object.
    pub fn defaults(&self) -> BTreeMap<String, AttributeValue> {
        self.attributes
            .iter()
            .filter_map(|(name, attr)| attr.default.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Check a single value against its declared attribute.
    pub fn check_value(&self, attribute: &str, value: &AttributeValue) -> Result<(), SchemaError> {
        let Some(desc) = self.attributes.get(attribute) else {
            return Err(SchemaError::UnknownAttribute {
                entity: self.name.to_string(),
                attribute: attribute.to_owned(),
            });
        };
        if desc.kind != value.kind() {
            return Err(SchemaError::TypeMismatch {
                entity: self.name.to_string(),
                attribute: attribute.to_owned(),
                expected: desc.kind,
                found: value.kind(),
            });
        }
        // JSON has no NaN or infinity; they would be written as null.
        if matches!(value, AttributeValue::Double(d) if !d.is_finite()) {
            return Err(SchemaError::NonFiniteValue {
                entity: self.name.to_string(),
                attribute: attribute.to_owned(),
            });
        }
        Ok(())
    }

    /// Check a complete value set: every value well-typed and every
    /// non-optional attribute present.
    pub fn validate_values(
        &self,
        values: &BTreeMap<String, AttributeValue>,
    ) -> Result<(), SchemaError> {
        for (attribute, value) in values {
            self.check_value(attribute, value)?;
        }
        for (attribute, desc) in &self.attributes {
            if !desc.optional && !values.contains_key(attribute) {
                return Err(SchemaError::MissingAttribute {
                    entity: self.name.to_string(),
                    attribute: attribute.clone(),
                });
            }
        }
        Ok(())
    }
}

impl AttributeDescription {
    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn default_value(&self) -> Option<&AttributeValue> {
        self.default.as_ref()
    }
}
