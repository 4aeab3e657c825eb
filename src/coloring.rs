//! Observation signatures of target nodes under a sensor failure.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::graph::{Graph, NodeId};
use crate::model::Placement;

/// The active sensors adjacent to a target, in ascending order.
///
/// Displayed as the sensor ids joined by `+`, or `0` if no sensor observes
/// the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(Vec<NodeId>);

impl Code {
    #[inline]
    pub fn sensors(&self) -> &[NodeId] {
        &self.0
    }

    /// Returns `true` for the code of an unobserved target.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<NodeId>> for Code {
    fn from(mut sensors: Vec<NodeId>) -> Self {
        sensors.sort_unstable();
        Code(sensors)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_first() {
            None => write!(f, "0"),
            Some((first, rest)) => {
                write!(f, "{first}")?;
                for s in rest {
                    write!(f, "+{s}")?;
                }
                Ok(())
            },
        }
    }
}

/// Codes of all target nodes, in ascending target order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coloring {
    targets: Vec<NodeId>,
    codes: Vec<Code>,
}

impl Coloring {
    pub fn get(&self, target: NodeId) -> Option<&Code> {
        let i = self.targets.binary_search(&target).ok()?;
        Some(&self.codes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item=(NodeId, &Code)> + '_ {
        self.targets.iter().copied().zip(&self.codes)
    }

    #[inline]
    pub fn codes(&self) -> &[Code] {
        &self.codes
    }

    /// Targets whose code is non-empty and not shared with any other target.
    pub fn uniquely_identified(&self) -> impl Iterator<Item=NodeId> + '_ {
        let mut count: FxHashMap<&Code, u32> = FxHashMap::default();
        for code in &self.codes {
            *count.entry(code).or_default() += 1;
        }
        self.iter()
            .filter(move |(_, code)| !code.is_empty() && count[code] == 1)
            .map(|(t, _)| t)
    }

    /// Returns `true` if all codes are non-empty and pairwise distinct.
    pub fn is_identifying(&self) -> bool {
        self.uniquely_identified().count() == self.codes.len()
    }
}

/// Compute the code of every target when all sensors of `placement` except
/// `attack` are active.
///
/// `targets` must be sorted ascending.
pub fn color(placement: &Placement, attack: Option<NodeId>, graph: &Graph, targets: &[NodeId]) -> Coloring {
    let mut codes = vec![Vec::new(); targets.len()];
    for sensor in placement.iter().filter(|&s| Some(s) != attack) {
        for t in graph.neighbors(sensor) {
            if let Ok(i) = targets.binary_search(t) {
                codes[i].push(sensor);
            }
        }
    }
    Coloring {
        targets: targets.to_vec(),
        // Sensors were visited in ascending order
        codes: codes.into_iter().map(Code).collect(),
    }
}
