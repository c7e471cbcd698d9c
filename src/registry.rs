//! Static operation and resource registries.
//!
//! A registry is built once at startup and only read afterwards. Listing
//! order is declaration order, so two listings are always byte-identical.

use serde::Serialize;
use serde_json::{json, Value};

use crate::policy::Policy;
use crate::schema::InputSchema;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate operation name: {0}")]
    DuplicateOperation(&'static str),
    #[error("duplicate resource uri: {0}")]
    DuplicateResource(&'static str),
}

/// Whether an operation may change backend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    ReadOnly,
    Mutating,
}

/// A named operation. `H` identifies the handler within its deployment.
#[derive(Debug, Clone)]
pub struct OperationDescriptor<H> {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: InputSchema,
    pub side_effect: SideEffect,
    pub policy: Policy,
    pub handler: H,
}

impl<H> OperationDescriptor<H> {
    pub fn new(name: &'static str, description: &'static str, schema: InputSchema, handler: H) -> Self {
        Self {
            name,
            description,
            schema,
            side_effect: SideEffect::ReadOnly,
            policy: Policy::Allow,
            handler,
        }
    }

    pub fn mutating(mut self) -> Self {
        self.side_effect = SideEffect::Mutating;
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Descriptor as advertised by `tools/list`.
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.schema.to_json_schema(),
            "annotations": {
                "readOnlyHint": self.side_effect == SideEffect::ReadOnly
            }
        })
    }
}

/// A named read-only object. `P` identifies the producer within its deployment.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor<P> {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
    pub producer: P,
}

impl<P> ResourceDescriptor<P> {
    pub fn json(uri: &'static str, name: &'static str, description: &'static str, producer: P) -> Self {
        Self {
            uri,
            name,
            description,
            mime_type: "application/json",
            producer,
        }
    }

    /// Descriptor as advertised by `resources/list`.
    pub fn to_json(&self) -> Value {
        json!({
            "uri": self.uri,
            "name": self.name,
            "description": self.description,
            "mimeType": self.mime_type
        })
    }
}

#[derive(Debug, Clone)]
pub struct Registry<H, P> {
    operations: Vec<OperationDescriptor<H>>,
    resources: Vec<ResourceDescriptor<P>>,
}

impl<H, P> Registry<H, P> {
    pub fn new(
        operations: Vec<OperationDescriptor<H>>,
        resources: Vec<ResourceDescriptor<P>>,
    ) -> Result<Self, RegistryError> {
        for (index, op) in operations.iter().enumerate() {
            if operations[..index].iter().any(|earlier| earlier.name == op.name) {
                return Err(RegistryError::DuplicateOperation(op.name));
            }
        }
        for (index, res) in resources.iter().enumerate() {
            if resources[..index].iter().any(|earlier| earlier.uri == res.uri) {
                return Err(RegistryError::DuplicateResource(res.uri));
            }
        }
        Ok(Self {
            operations,
            resources,
        })
    }

    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor<H>> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn resource(&self, uri: &str) -> Option<&ResourceDescriptor<P>> {
        self.resources.iter().find(|res| res.uri == uri)
    }

    pub fn operations(&self) -> &[OperationDescriptor<H>] {
        &self.operations
    }

    pub fn resources(&self) -> &[ResourceDescriptor<P>] {
        &self.resources
    }

    /// `tools/list` result body.
    pub fn list_operations(&self) -> Value {
        let tools: Vec<Value> = self.operations.iter().map(OperationDescriptor::to_json).collect();
        json!({ "tools": tools })
    }

    /// `resources/list` result body.
    pub fn list_resources(&self) -> Value {
        let resources: Vec<Value> = self.resources.iter().map(ResourceDescriptor::to_json).collect();
        json!({ "resources": resources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    fn registry() -> Registry<u8, u8> {
        Registry::new(
            vec![
                OperationDescriptor::new(
                    "read",
                    "Read a thing",
                    InputSchema::new().field(FieldSchema::string("id", "Thing id").required()),
                    0,
                ),
                OperationDescriptor::new("write", "Write a thing", InputSchema::new(), 1).mutating(),
            ],
            vec![ResourceDescriptor::json("thing://all", "All things", "Every thing", 0)],
        )
        .unwrap()
    }

    #[test]
    fn lookup_by_name_and_uri() {
        let registry = registry();
        assert_eq!(registry.operation("write").map(|op| op.handler), Some(1));
        assert_eq!(registry.operation("write").map(|op| op.side_effect), Some(SideEffect::Mutating));
        assert!(registry.operation("missing").is_none());
        assert!(registry.resource("thing://all").is_some());
        assert!(registry.resource("thing://none").is_none());
    }

    #[test]
    fn listing_is_stable_and_ordered() {
        let registry = registry();
        let first = serde_json::to_string(&registry.list_operations()).unwrap();
        let second = serde_json::to_string(&registry.list_operations()).unwrap();
        assert_eq!(first, second);

        let listed = registry.list_operations();
        assert_eq!(listed["tools"][0]["name"], "read");
        assert_eq!(listed["tools"][0]["inputSchema"]["required"], json!(["id"]));
        assert_eq!(listed["tools"][1]["annotations"]["readOnlyHint"], false);
    }

    #[test]
    fn duplicates_are_rejected() {
        let result = Registry::<u8, u8>::new(
            vec![
                OperationDescriptor::new("same", "", InputSchema::new(), 0),
                OperationDescriptor::new("same", "", InputSchema::new(), 1),
            ],
            vec![],
        );
        assert!(matches!(result, Err(RegistryError::DuplicateOperation("same"))));
    }
}
