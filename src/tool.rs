use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const REQUIREMENT_CPU: &str = "cpu";
pub const REQUIREMENT_GPU: &str = "gpu";
pub const REQUIREMENT_NET: &str = "net";

/// Capability descriptor a resource advertises for one of its toolers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    /// Hardware tag the tool occupies while running (`cpu`, `gpu`, `net`).
    pub requirement: String,
    /// Opaque form schema rendered by callers; never interpreted here.
    pub parameters: String,
}

impl Tool {
    /// Same offering regardless of which resource advertises it or the id
    /// that resource picked for it.
    pub fn same_offering(&self, other: &Tool) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.version == other.version
            && self.parameters == other.parameters
            && self.requirement == other.requirement
    }
}

impl PartialEq for Tool {
    fn eq(&self, other: &Self) -> bool {
        self.same_offering(other)
    }
}

impl Eq for Tool {}
