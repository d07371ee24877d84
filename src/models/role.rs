use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use serde_json::Value;
use std::fmt;

/// Portal role, chosen at sign-up and carried in the session metadata.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Faculty,
}

impl Role {
    pub const METADATA_KEY: &'static str = "role";

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Faculty => "faculty",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "faculty" => Some(Role::Faculty),
            _ => None,
        }
    }

    /// Reads the role out of a session metadata bag, `None` when absent or unrecognized.
    pub fn from_metadata(metadata: &Value) -> Option<Self> {
        metadata.get(Self::METADATA_KEY).and_then(Value::as_str).and_then(Self::parse)
    }

    pub fn to_metadata(self) -> Value {
        let mut metadata = serde_json::Map::new();
        metadata.insert(Self::METADATA_KEY.to_string(), Value::from(self.as_str()));
        Value::Object(metadata)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
