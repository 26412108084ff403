//! Identifiers for the workflow domain
//!
//! All identifiers are string newtypes. `generate()` mints a random
//! UUID-backed id; `new()` wraps a known value (useful for tests and
//! for ids minted elsewhere).

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random id
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Create an id from a known string
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Short display form (first 8 chars)
            pub fn short(&self) -> &str {
                let end = self
                    .0
                    .char_indices()
                    .nth(8)
                    .map(|(i, _)| i)
                    .unwrap_or(self.0.len());
                &self.0[..end]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Unique identifier for an organization (tenant)
    OrgId
);

string_id!(
    /// Unique identifier for a workflow template version row
    TemplateId
);

string_id!(
    /// Unique identifier for a workflow instance
    InstanceId
);

string_id!(
    /// Identifier for a stage within a template (unique per template)
    StageId
);

string_id!(
    /// Identifier of the governed entity (case, disclosure, ...)
    EntityId
);
