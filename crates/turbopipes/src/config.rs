//! Relay configuration and identity.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Unique identifier attached to every log event a relay emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayId(uuid::Uuid);

impl RelayId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for RelayId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RelayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upper bound on work items running at once.
    pub max_concurrent: NonZeroUsize,
    /// Free-form name included in log events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl RelayConfig {
    pub fn new(max_concurrent: usize) -> Result<Self, RelayError> {
        let max_concurrent = NonZeroUsize::new(max_concurrent).ok_or(RelayError::InvalidLimit)?;
        Ok(Self {
            max_concurrent,
            label: None,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_concurrent: NonZeroUsize::MIN,
            label: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_rejected() {
        assert_eq!(RelayConfig::new(0).unwrap_err(), RelayError::InvalidLimit);
        assert_eq!(RelayConfig::new(4).unwrap().max_concurrent.get(), 4);
    }

    #[test]
    fn default_is_fully_serialized() {
        assert_eq!(RelayConfig::default().max_concurrent.get(), 1);
    }

    #[test]
    fn deserializes_from_json() {
        let config: RelayConfig =
            serde_json::from_str(r#"{"max_concurrent": 8, "label": "thumbnails"}"#).unwrap();
        assert_eq!(config.max_concurrent.get(), 8);
        assert_eq!(config.label.as_deref(), Some("thumbnails"));

        let config: RelayConfig = serde_json::from_str(r#"{"max_concurrent": 2}"#).unwrap();
        assert_eq!(config.label, None);
    }

    #[test]
    fn deserialize_rejects_zero_limit() {
        assert!(serde_json::from_str::<RelayConfig>(r#"{"max_concurrent": 0}"#).is_err());
    }

    #[test]
    fn config_serializes() {
        let config = RelayConfig::new(3).unwrap().with_label("crawl");
        insta::assert_json_snapshot!(config, @r#"
        {
          "max_concurrent": 3,
          "label": "crawl"
        }
        "#);
    }

    #[test]
    fn relay_id_is_unique() {
        assert_ne!(RelayId::new(), RelayId::new());
    }
}
