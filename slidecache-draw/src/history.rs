use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

/// Identity of a drawable item. Stable while the item is reachable from the
/// live sequence or from history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(Uuid);

impl PathId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One undoable change. Keys are positions in the live sequence: `created`
/// positions hold after the change, `deleted` positions before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct HistoryStep {
    pub created: BTreeMap<usize, PathId>,
    pub deleted: BTreeMap<usize, PathId>,
}

/// Position of a container's history cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    /// At the newest step.
    Forward,
    /// The given number of steps are undone and can be redone.
    PartiallyUndone(usize),
    /// An eraser gesture is collecting changes into one step.
    MicroStepOpen,
    /// A copy without history tracking. The next change starts tracking.
    Detached,
}
