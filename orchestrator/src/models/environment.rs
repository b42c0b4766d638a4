//! Environment and variable models

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Opaque reference into the secret store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(String);

impl SecretRef {
    /// Allocate a fresh reference
    pub fn generate() -> Self {
        Self(format!("sec_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A secret value: a store reference at rest, plaintext only between
/// validation and sealing. The unsealed form refuses to serialize.
pub enum SecretSlot {
    Sealed(SecretRef),
    Unsealed(SecretString),
}

impl SecretSlot {
    pub fn unsealed(value: impl Into<String>) -> Self {
        SecretSlot::Unsealed(SecretString::from(value.into()))
    }

    pub fn sealed_ref(&self) -> Option<&SecretRef> {
        match self {
            SecretSlot::Sealed(r) => Some(r),
            SecretSlot::Unsealed(_) => None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, SecretSlot::Sealed(_))
    }
}

impl Clone for SecretSlot {
    fn clone(&self) -> Self {
        match self {
            SecretSlot::Sealed(r) => SecretSlot::Sealed(r.clone()),
            SecretSlot::Unsealed(s) => {
                SecretSlot::Unsealed(SecretString::from(s.expose_secret().to_owned()))
            }
        }
    }
}

impl fmt::Debug for SecretSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSlot::Sealed(r) => f.debug_tuple("Sealed").field(r).finish(),
            SecretSlot::Unsealed(_) => f.write_str("Unsealed([REDACTED])"),
        }
    }
}

impl Serialize for SecretSlot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            SecretSlot::Sealed(r) => r.serialize(serializer),
            SecretSlot::Unsealed(_) => Err(serde::ser::Error::custom(
                "refusing to serialize an unsealed secret",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for SecretSlot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        SecretRef::deserialize(deserializer).map(SecretSlot::Sealed)
    }
}

/// Value of an environment variable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum VariableValue {
    Plain(String),
    Secret(SecretSlot),
}

/// An environment variable, key unique within its owning scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub key: String,
    pub value: VariableValue,
}

impl EnvironmentVariable {
    pub fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: VariableValue::Plain(value.into()),
        }
    }

    pub fn secret(key: impl Into<String>, reference: SecretRef) -> Self {
        Self {
            key: key.into(),
            value: VariableValue::Secret(SecretSlot::Sealed(reference)),
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self.value, VariableValue::Secret(_))
    }
}

/// Deployment stage of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    Dev,
    Prod,
    Staging,
    Test,
}

/// A named set of variables belonging to a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub kind: EnvironmentKind,
    #[serde(default)]
    pub variables: Vec<EnvironmentVariable>,
    /// Back-reference only
    pub project_id: String,
}
