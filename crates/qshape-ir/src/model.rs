//! Entity model: the schema collaborator queries are compiled against

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use qshape_expr::{DataType, TypeLookup};

/// Mapped property of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub column: String,
    pub data_type: DataType,
}

/// Entity type mapped to one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub table: String,
    pub properties: Vec<Property>,
}

impl EntityType {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            properties: Vec::new(),
        }
    }

    /// Add a property stored in a column of the same name
    pub fn property(self, name: &str, data_type: DataType) -> Self {
        self.mapped_property(name, name, data_type)
    }

    pub fn mapped_property(mut self, name: &str, column: &str, data_type: DataType) -> Self {
        self.properties.push(Property {
            name: name.to_string(),
            column: column.to_string(),
            data_type,
        });
        self
    }

    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    entities: BTreeMap<String, EntityType>,
    /// Entity set name -> entity type name
    sets: BTreeMap<String, String>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityType) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    pub fn with_set(mut self, set: impl Into<String>, entity: impl Into<String>) -> Self {
        self.sets.insert(set.into(), entity.into());
        self
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values()
    }

    /// Identity of the model, part of every cache key compiled against it
    pub fn identity(&self) -> String {
        let json = serde_json::to_string(self).expect("model should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl TypeLookup for Model {
    fn property_type(&self, entity: &str, property: &str) -> Option<DataType> {
        self.entity(entity)?
            .find_property(property)
            .map(|p| p.data_type.clone())
    }

    fn entity_set(&self, name: &str) -> Option<String> {
        self.sets.get(name).cloned()
    }
}
