use serde::{Deserialize, Serialize};

use super::ids::InDom;
use super::value::Timestamp;

/// Membership of an instance domain at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InDomInstances {
    pub indom: InDom,
    pub timestamp: Timestamp,
    pub instances: Vec<(i32, String)>,
}

impl InDomInstances {
    pub fn new(indom: InDom, timestamp: Timestamp, instances: Vec<(i32, String)>) -> Self {
        Self {
            indom,
            timestamp,
            instances,
        }
    }

    pub fn name_of(&self, inst: i32) -> Option<&str> {
        self.instances
            .iter()
            .find(|(id, _)| *id == inst)
            .map(|(_, name)| name.as_str())
    }

    pub fn lookup(&self, name: &str) -> Option<i32> {
        self.instances
            .iter()
            .find(|(_, n)| n == name)
            .map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
