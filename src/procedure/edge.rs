use serde::{Deserialize, Serialize};

/// How an edge is routed between its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// Straight along the flow (same parallel slot, or a fan to/from a single step).
    #[default]
    FlowAligned,
    /// Crosses between different parallel slots.
    Bent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStyle {
    #[default]
    Solid,
    /// Link to the standalone addendum step.
    Dashed,
}

/// Directed connection between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub kind: EdgeKind,
    #[serde(default)]
    pub style: EdgeStyle,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("e{}-{}", source, target),
            source,
            target,
            kind,
            style: EdgeStyle::Solid,
        }
    }

    pub fn dashed(mut self) -> Self {
        self.style = EdgeStyle::Dashed;
        self
    }
}
