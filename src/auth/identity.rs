//! Service identity
//!
//! The running service is identified by a namespace and a name, rendered as
//! `urn:ads:{namespace}:{name}`. Tokens must name this URN (or an accepted
//! audience) in `aud`, and service roles are read from
//! `resource_access[<urn>]`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const URN_PREFIX: &str = "urn:ads:";

/// Service identity errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid service identity: {0}")]
    Invalid(String),
}

/// Immutable identifier of the running service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    namespace: String,
    name: String,
    urn: String,
}

impl ServiceIdentity {
    /// Create an identity from its namespace and name
    pub fn new(namespace: &str, name: &str) -> Result<Self, IdentityError> {
        let namespace = namespace.trim();
        let name = name.trim();
        for (label, part) in [("namespace", namespace), ("name", name)] {
            if part.is_empty() {
                return Err(IdentityError::Invalid(format!("{} is empty", label)));
            }
            if part.contains(':') {
                return Err(IdentityError::Invalid(format!(
                    "{} '{}' contains ':'",
                    label, part
                )));
            }
        }

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            urn: format!("{}{}:{}", URN_PREFIX, namespace, name),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `urn:ads:{namespace}:{name}` form
    pub fn urn(&self) -> &str {
        &self.urn
    }
}

impl FromStr for ServiceIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .trim()
            .strip_prefix(URN_PREFIX)
            .ok_or_else(|| IdentityError::Invalid(format!("'{}' is not an urn:ads: id", s)))?;
        let (namespace, name) = rest
            .split_once(':')
            .ok_or_else(|| IdentityError::Invalid(format!("'{}' has no service name", s)))?;
        Self::new(namespace, name)
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urn)
    }
}
