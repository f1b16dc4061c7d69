//! Workload partitioning and actor identities

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::{BenchError, Result};

/// Role of a simulated client in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Publisher => "pub",
            Role::Subscriber => "sub",
        }
    }
}

/// Split `total` messages across `actors` as evenly as possible.
///
/// The first `total % actors` actors receive one extra message.
pub fn partition(total: u64, actors: usize) -> Result<Vec<u64>> {
    if actors == 0 {
        return Err(BenchError::InvalidWorkload);
    }
    let n = actors as u64;
    let base = total / n;
    let extra = (total % n) as usize;

    Ok((0..actors)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect())
}

/// Run-scoped identity generator
#[derive(Debug, Clone)]
pub struct RunPrefix(String);

impl RunPrefix {
    /// Fresh prefix: unix millis in hex plus a short random suffix
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let suffix = &Uuid::new_v4().simple().to_string()[..4];
        Self(format!("{:x}{}", millis, suffix))
    }

    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity of the `index`-th actor with the given role
    pub fn identity(&self, role: Role, index: usize) -> String {
        format!("{}-{}-{}", self.0, role.label(), index)
    }
}
