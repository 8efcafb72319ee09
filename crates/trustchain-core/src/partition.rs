//! Partition addressing.
//!
//! A partition is one ordered log under a topic. Its string token is
//! `"{topic}#{index}"` and parses back to the same key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Address of a partition: a topic plus a numeric index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey {
    topic: String,
    index: u32,
}

impl PartitionKey {
    /// Create a key. The topic must be non-empty and free of whitespace.
    pub fn new(topic: impl Into<String>, index: u32) -> Result<Self, CoreError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(CoreError::InvalidPartitionKey("empty topic".into()));
        }
        if topic.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CoreError::InvalidPartitionKey(format!(
                "topic {topic:?} contains whitespace"
            )));
        }
        Ok(Self { topic, index })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// The string form used to name logs and database rows.
    pub fn to_token(&self) -> String {
        format!("{}#{}", self.topic, self.index)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.topic, self.index)
    }
}

impl FromStr for PartitionKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The topic may itself contain '#', so split on the last one.
        let (topic, index) = s
            .rsplit_once('#')
            .ok_or_else(|| CoreError::InvalidPartitionKey(format!("{s:?} has no index")))?;
        let index = index
            .parse::<u32>()
            .map_err(|e| CoreError::InvalidPartitionKey(format!("{s:?}: {e}")))?;
        Self::new(topic, index)
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.to_token()
    }
}
