use serde::{Deserialize, Serialize};

/// A Test Object Type as produced by a detector.
///
/// `ancestors` lists the more general types this one specializes, nearest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestObjectType {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub ancestors: Vec<String>,
}

impl TestObjectType {
    /// Whether this type (or one of its ancestors) is in `acceptable`.
    pub fn is_compatible_with<'a, I>(&self, acceptable: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        acceptable
            .into_iter()
            .any(|id| *id == self.id || self.ancestors.contains(id))
    }
}
