//! Selection Policy
//!
//! Decides which buckets of a classified batch go through the transform
//! pipeline, and which output path each record ends up with.

use serde::Serialize;
use std::fmt;

use crate::config::GroupMode;
use crate::dedup::DedupIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchShape {
    Empty,
    /// Exactly one record with its own image.
    Single,
    Group(GroupMode),
}

impl fmt::Display for BatchShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchShape::Empty => write!(f, "empty"),
            BatchShape::Single => write!(f, "single"),
            BatchShape::Group(mode) => write!(f, "group ({})", mode.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPlan {
    pub shape: BatchShape,
    /// Buckets to transform, in first-seen order. Already processed ones are left out.
    pub transform: Vec<String>,
    /// When set, every record uses this bucket's output instead of its own.
    pub reassign_to: Option<String>,
}

pub fn decide_shape(index: &DedupIndex, mode: GroupMode) -> BatchShape {
    match index.buckets() {
        [] => BatchShape::Empty,
        [only] if only.frequency == 1 => BatchShape::Single,
        _ => BatchShape::Group(mode),
    }
}

pub fn plan(index: &DedupIndex, mode: GroupMode) -> SelectionPlan {
    let shape = decide_shape(index, mode);

    let (candidates, reassign_to): (Vec<&str>, Option<String>) = match shape {
        BatchShape::Empty => (Vec::new(), None),
        BatchShape::Single | BatchShape::Group(GroupMode::EachUnique) => {
            (index.buckets().iter().map(|b| b.key.as_str()).collect(), None)
        }
        BatchShape::Group(GroupMode::MostCommon) => match index.most_common() {
            Some(winner) => (vec![winner.key.as_str()], Some(winner.key.clone())),
            None => (Vec::new(), None),
        },
    };

    let transform = candidates
        .into_iter()
        .filter(|key| index.bucket(key).is_some_and(|b| !b.processed))
        .map(str::to_string)
        .collect();

    SelectionPlan {
        shape,
        transform,
        reassign_to,
    }
}
