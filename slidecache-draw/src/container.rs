//! Live drawing list of one slide with bounded undo/redo.
//!
//! Items are owned by an arena keyed by [`PathId`]. The live sequence and
//! every [`HistoryStep`] only hold ids, so undo and redo move ids between the
//! sequence and the step maps. An item is dropped from the arena once no
//! reachable state can show it again: created items of discarded redo steps
//! and deleted items of steps pruned from the front of the log.

use std::collections::{BTreeMap, HashMap};
use std::mem;

use slidecache_core::{PointF, Preferences, RectF};
use tracing::{debug, error, trace};

use crate::history::{HistoryState, HistoryStep, PathId};
use crate::path::{EraseOutcome, Path};
use crate::DrawError;

/// Display surface mirroring the live sequence.
pub trait Scene {
    /// Show `path` so that it stacks at `index` of the live sequence.
    fn add_item(&mut self, id: PathId, path: &Path, index: usize);
    fn remove_item(&mut self, id: PathId);
}

/// Open eraser gesture. Positions refer to the live sequence as it was when
/// the gesture started; nothing is compacted until the step is applied.
#[derive(Debug, Default)]
struct MicroStep {
    step: HistoryStep,
    /// Replacement pieces for partially erased items. Pieces are not
    /// tracked individually until the step is applied.
    splits: BTreeMap<usize, Vec<PathId>>,
}

#[derive(Debug)]
enum Cursor {
    Forward,
    Undone(usize),
    MicroStep(MicroStep),
    Detached,
}

#[derive(Debug)]
pub struct PathContainer {
    arena: HashMap<PathId, Path>,
    paths: Vec<PathId>,
    history: Vec<HistoryStep>,
    cursor: Cursor,
    history_limit: usize,
}

impl PathContainer {
    pub fn new(preferences: &Preferences) -> Self {
        Self::with_history_limit(preferences.history_length_visible_slides)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            arena: HashMap::new(),
            paths: Vec::new(),
            history: Vec::new(),
            cursor: Cursor::Forward,
            history_limit,
        }
    }

    pub fn history_state(&self) -> HistoryState {
        match &self.cursor {
            Cursor::Forward => HistoryState::Forward,
            Cursor::Undone(steps) => HistoryState::PartiallyUndone(*steps),
            Cursor::MicroStep(_) => HistoryState::MicroStepOpen,
            Cursor::Detached => HistoryState::Detached,
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn set_history_limit(&mut self, history_limit: usize) {
        self.history_limit = history_limit;
        self.limit_history();
    }

    /// Visible items in stacking order.
    pub fn items(&self) -> Vec<(PathId, &Path)> {
        self.visible_ids()
            .into_iter()
            .filter_map(|id| self.arena.get(&id).map(|path| (id, path)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.visible_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: PathId) -> Option<&Path> {
        self.arena.get(&id)
    }

    pub fn bounding_box(&self) -> RectF {
        self.items()
            .into_iter()
            .fold(RectF::default(), |rect, (_, path)| rect.united(&path.bounding_rect()))
    }

    /// Appends `path` on top as a new undoable step.
    pub fn append(&mut self, path: Path) -> PathId {
        self.truncate_history();
        let id = PathId::new();
        let mut step = HistoryStep::default();
        step.created.insert(self.paths.len(), id);
        self.history.push(step);
        self.arena.insert(id, path);
        self.paths.push(id);
        self.limit_history();
        id
    }

    /// Removes a live item as a new undoable step. Returns false if `id` is
    /// not in the live sequence.
    pub fn remove_item(&mut self, id: PathId) -> bool {
        if !self.visible_ids().contains(&id) {
            return false;
        }
        // Closing an open gesture moves positions.
        self.truncate_history();
        let Some(index) = self.paths.iter().position(|live| *live == id) else {
            return false;
        };
        self.paths.remove(index);
        let mut step = HistoryStep::default();
        step.deleted.insert(index, id);
        self.history.push(step);
        self.limit_history();
        true
    }

    /// Deletes every live item in one undoable step.
    pub fn clear_paths(&mut self) {
        self.truncate_history();
        if self.paths.is_empty() {
            return;
        }
        let step = HistoryStep {
            created: BTreeMap::new(),
            deleted: mem::take(&mut self.paths).into_iter().enumerate().collect(),
        };
        self.history.push(step);
        self.limit_history();
    }

    pub fn undo(&mut self, mut scene: Option<&mut dyn Scene>) -> bool {
        let undone = match self.cursor {
            Cursor::Forward => 0,
            Cursor::Undone(steps) => steps,
            Cursor::MicroStep(_) | Cursor::Detached => return false,
        };
        if self.history.len() <= undone {
            return false;
        }
        let undone = undone + 1;
        self.cursor = Cursor::Undone(undone);

        let step = &self.history[self.history.len() - undone];
        for (index, id) in step.created.iter().rev() {
            self.paths.remove(*index);
            if let Some(scene) = scene.as_deref_mut() {
                scene.remove_item(*id);
            }
        }
        for (index, id) in &step.deleted {
            self.paths.insert(*index, *id);
            if let (Some(scene), Some(path)) = (scene.as_deref_mut(), self.arena.get(id)) {
                scene.add_item(*id, path, *index);
            }
        }
        trace!(undone, "undo");
        true
    }

    pub fn redo(&mut self, mut scene: Option<&mut dyn Scene>) -> bool {
        let Cursor::Undone(undone) = self.cursor else {
            return false;
        };
        let step = &self.history[self.history.len() - undone];
        self.cursor = match undone - 1 {
            0 => Cursor::Forward,
            steps => Cursor::Undone(steps),
        };

        for (index, id) in step.deleted.iter().rev() {
            self.paths.remove(*index);
            if let Some(scene) = scene.as_deref_mut() {
                scene.remove_item(*id);
            }
        }
        for (index, id) in &step.created {
            self.paths.insert(*index, *id);
            if let (Some(scene), Some(path)) = (scene.as_deref_mut(), self.arena.get(id)) {
                scene.add_item(*id, path, *index);
            }
        }
        trace!(undone = undone - 1, "redo");
        true
    }

    /// Opens a step that collects eraser changes until
    /// [`apply_micro_step`](Self::apply_micro_step).
    pub fn start_micro_step(&mut self) {
        self.truncate_history();
        self.cursor = Cursor::MicroStep(MicroStep::default());
    }

    /// Erases around `pos` in every item whose bounds, grown by `radius`,
    /// contain it.
    pub fn eraser_micro_step(&mut self, pos: PointF, radius: f64) {
        let Cursor::MicroStep(micro) = &mut self.cursor else {
            let err = DrawError::MicroStepMisuse {
                operation: "eraser_micro_step",
                state: self.history_state(),
            };
            error!("{err}");
            return;
        };
        let arena = &mut self.arena;
        let hit = |path: &Path| path.bounding_rect().margins_added(radius).contains(pos);

        for (index, id) in self.paths.iter().enumerate() {
            if let Some(pieces) = micro.splits.get_mut(&index) {
                for piece in mem::take(pieces) {
                    let outcome = match arena.get(&piece) {
                        Some(path) if hit(path) => path.split_erase(pos, radius),
                        Some(_) => EraseOutcome::Untouched,
                        None => continue,
                    };
                    match outcome {
                        EraseOutcome::Untouched => pieces.push(piece),
                        EraseOutcome::Erased => {
                            arena.remove(&piece);
                        }
                        EraseOutcome::Split(parts) => {
                            arena.remove(&piece);
                            pieces.extend(parts.into_iter().map(|part| {
                                let id = PathId::new();
                                arena.insert(id, part);
                                id
                            }));
                        }
                    }
                }
                continue;
            }
            if micro.step.deleted.contains_key(&index) {
                continue;
            }

            let outcome = match arena.get(id) {
                Some(path) if hit(path) => path.split_erase(pos, radius),
                _ => continue,
            };
            match outcome {
                EraseOutcome::Untouched => {}
                EraseOutcome::Erased => {
                    micro.step.deleted.insert(index, *id);
                }
                EraseOutcome::Split(parts) => {
                    micro.step.deleted.insert(index, *id);
                    let pieces = parts
                        .into_iter()
                        .map(|part| {
                            let id = PathId::new();
                            arena.insert(id, part);
                            id
                        })
                        .collect();
                    micro.splits.insert(index, pieces);
                }
            }
        }
    }

    /// Closes the open eraser step. Returns false if nothing was erased, in
    /// which case the step is discarded.
    pub fn apply_micro_step(&mut self) -> bool {
        let micro = match mem::replace(&mut self.cursor, Cursor::Forward) {
            Cursor::MicroStep(micro) => micro,
            other => {
                self.cursor = other;
                let err = DrawError::MicroStepMisuse {
                    operation: "apply_micro_step",
                    state: self.history_state(),
                };
                error!("{err}");
                return false;
            }
        };
        let MicroStep {
            mut step,
            mut splits,
        } = micro;
        if step.deleted.is_empty() {
            return false;
        }

        // Pieces take the place of the item they came from. Each earlier
        // deletion moves later positions down by one and each earlier piece
        // moves them up by one.
        let mut shift: isize = 0;
        for index in step.deleted.keys() {
            for piece in splits.remove(index).unwrap_or_default() {
                step.created.insert(index.saturating_add_signed(shift), piece);
                shift += 1;
            }
            shift -= 1;
        }

        for index in step.deleted.keys().rev() {
            self.paths.remove(*index);
        }
        for (index, id) in &step.created {
            self.paths.insert(*index, *id);
        }
        debug!(
            deleted = step.deleted.len(),
            created = step.created.len(),
            "applied eraser step"
        );
        self.history.push(step);
        self.limit_history();
        true
    }

    /// Detached duplicate holding clones of the visible items. Empty text
    /// boxes are dropped.
    pub fn copy(&self) -> PathContainer {
        let mut container = PathContainer::with_history_limit(self.history_limit);
        container.cursor = Cursor::Detached;
        for (_, path) in self.items() {
            if matches!(path, Path::Text(text) if text.is_empty()) {
                continue;
            }
            container.push_untracked(path.clone());
        }
        container
    }

    /// Drops the oldest steps until at most `n` steps can be undone.
    pub fn clear_history(&mut self, n: usize) {
        match self.cursor {
            Cursor::Detached => return,
            Cursor::MicroStep(_) => {
                self.apply_micro_step();
            }
            _ => {}
        }
        let undone = match self.cursor {
            Cursor::Undone(steps) => steps,
            _ => 0,
        };
        let excess = (self.history.len() - undone).saturating_sub(n);
        for step in self.history.drain(..excess) {
            for id in step.deleted.values() {
                self.arena.remove(id);
            }
        }
        if excess > 0 {
            trace!(dropped = excess, kept = self.history.len(), "pruned history");
        }
    }

    /// Ends any special history state so that a new step can be appended.
    /// Undone steps are discarded.
    pub fn truncate_history(&mut self) {
        match self.cursor {
            Cursor::MicroStep(_) => {
                self.apply_micro_step();
            }
            Cursor::Detached => self.cursor = Cursor::Forward,
            Cursor::Undone(undone) => {
                let keep = self.history.len() - undone;
                for step in self.history.drain(keep..) {
                    for id in step.created.values() {
                        self.arena.remove(id);
                    }
                }
                self.cursor = Cursor::Forward;
            }
            Cursor::Forward => {}
        }
    }

    /// Adds an item without recording history, as when loading from disk.
    pub(crate) fn push_untracked(&mut self, path: Path) -> PathId {
        let id = PathId::new();
        self.arena.insert(id, path);
        self.paths.push(id);
        id
    }

    fn limit_history(&mut self) {
        if self.history.len() > self.history_limit {
            self.clear_history(self.history_limit);
        }
    }

    fn visible_ids(&self) -> Vec<PathId> {
        let Cursor::MicroStep(micro) = &self.cursor else {
            return self.paths.clone();
        };
        let mut ids = Vec::with_capacity(self.paths.len());
        for (index, id) in self.paths.iter().enumerate() {
            if let Some(pieces) = micro.splits.get(&index) {
                ids.extend_from_slice(pieces);
            } else if !micro.step.deleted.contains_key(&index) {
                ids.push(*id);
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use crate::color::Rgba;
    use crate::path::{BasicStroke, DrawTool, TextBox, ToolKind};

    /// Horizontal stroke at height `y` with one point per unit from 0 to 10.
    fn stroke(y: f64) -> Path {
        Path::Basic(BasicStroke {
            tool: DrawTool::new(ToolKind::FixedWidthPen, Rgba::BLACK, 1.0),
            points: (0..=10).map(|x| PointF::new(x as f64, y)).collect(),
        })
    }

    fn text(content: &str) -> Path {
        Path::Text(TextBox {
            position: PointF::new(0.0, 0.0),
            font: "Sans".into(),
            size: 10.0,
            color: Rgba::BLACK,
            text: content.into(),
        })
    }

    fn snapshot(container: &PathContainer) -> Vec<(PathId, Path)> {
        container
            .items()
            .into_iter()
            .map(|(id, path)| (id, path.clone()))
            .collect()
    }

    fn ids(container: &PathContainer) -> Vec<PathId> {
        container.items().into_iter().map(|(id, _)| id).collect()
    }

    #[derive(Default)]
    struct RecordingScene {
        shown: Vec<PathId>,
    }

    impl Scene for RecordingScene {
        fn add_item(&mut self, id: PathId, _path: &Path, index: usize) {
            self.shown.insert(index.min(self.shown.len()), id);
        }

        fn remove_item(&mut self, id: PathId) {
            self.shown.retain(|shown| *shown != id);
        }
    }

    #[test]
    fn new_action_after_undo_discards_redo() {
        let mut container = PathContainer::with_history_limit(10);
        let a = container.append(stroke(0.0));
        let b = container.append(stroke(1.0));
        let c = container.append(stroke(2.0));
        assert_eq!(ids(&container), vec![a, b, c]);

        assert!(container.undo(None));
        assert_eq!(ids(&container), vec![a, b]);
        assert!(container.undo(None));
        assert_eq!(ids(&container), vec![a]);
        assert_eq!(container.history_state(), HistoryState::PartiallyUndone(2));

        let d = container.append(stroke(3.0));
        assert_eq!(ids(&container), vec![a, d]);
        assert_eq!(container.history_state(), HistoryState::Forward);
        assert!(!container.redo(None));
        assert!(container.get(b).is_none());
        assert!(container.get(c).is_none());
    }

    #[test]
    fn undo_at_oldest_step_is_a_no_op() {
        let mut container = PathContainer::with_history_limit(10);
        assert!(!container.undo(None));
        container.append(stroke(0.0));
        assert!(container.undo(None));
        assert!(!container.undo(None));
        assert!(container.is_empty());
    }

    #[test]
    fn clear_then_undo_restores_order() {
        let mut container = PathContainer::with_history_limit(10);
        for y in 0..4 {
            container.append(stroke(y as f64));
        }
        let before = snapshot(&container);
        container.clear_paths();
        assert!(container.is_empty());
        assert!(container.undo(None));
        assert_eq!(snapshot(&container), before);
    }

    #[test]
    fn removed_item_returns_to_its_position() {
        let mut container = PathContainer::with_history_limit(10);
        let a = container.append(stroke(0.0));
        let b = container.append(stroke(1.0));
        let c = container.append(stroke(2.0));
        assert!(container.remove_item(b));
        assert!(!container.remove_item(b));
        assert_eq!(ids(&container), vec![a, c]);
        assert!(container.undo(None));
        assert_eq!(ids(&container), vec![a, b, c]);
    }

    #[test]
    fn removing_a_dead_item_keeps_redo() {
        let mut container = PathContainer::with_history_limit(10);
        let a = container.append(stroke(0.0));
        container.remove_item(a);
        let b = container.append(stroke(1.0));
        assert!(container.undo(None));

        assert!(!container.remove_item(a));
        assert_eq!(container.history_state(), HistoryState::PartiallyUndone(1));
        assert!(container.redo(None));
        assert_eq!(ids(&container), vec![b]);
    }

    #[test]
    fn removing_a_piece_closes_the_gesture() {
        let mut container = PathContainer::with_history_limit(10);
        let a = container.append(stroke(0.0));
        let b = container.append(stroke(5.0));
        container.start_micro_step();
        container.eraser_micro_step(PointF::new(5.0, 0.0), 0.5);
        let live = ids(&container);
        assert_eq!(live.len(), 3);
        assert_eq!(live[2], b);

        assert!(container.remove_item(b));
        assert_eq!(container.history_state(), HistoryState::Forward);
        assert_eq!(container.len(), 2);
        assert!(!ids(&container).contains(&a));
        assert!(!ids(&container).contains(&b));
    }

    #[test]
    fn missed_eraser_gesture_leaves_no_step() {
        let mut container = PathContainer::with_history_limit(10);
        container.append(stroke(0.0));
        container.append(stroke(5.0));
        let before = snapshot(&container);
        let steps = container.history_len();

        container.start_micro_step();
        container.eraser_micro_step(PointF::new(50.0, 50.0), 2.0);
        container.eraser_micro_step(PointF::new(-20.0, 3.0), 0.5);
        assert!(!container.apply_micro_step());

        assert_eq!(snapshot(&container), before);
        assert_eq!(container.history_len(), steps);
        assert_eq!(container.history_state(), HistoryState::Forward);
    }

    #[test]
    fn eraser_split_and_delete_shift_positions() {
        let mut container = PathContainer::with_history_limit(10);
        let a = container.append(stroke(0.0));
        let b = container.append(stroke(10.0));
        let c = container.append(stroke(20.0));
        let short = container.append(Path::Basic(BasicStroke {
            tool: DrawTool::new(ToolKind::FixedWidthPen, Rgba::BLACK, 1.0),
            points: vec![PointF::new(0.0, 30.0), PointF::new(1.0, 30.0)],
        }));
        let before = snapshot(&container);

        container.start_micro_step();
        // Split b in the middle, erase the short stroke entirely.
        container.eraser_micro_step(PointF::new(5.0, 10.0), 0.5);
        container.eraser_micro_step(PointF::new(0.5, 30.0), 1.0);
        assert_eq!(container.len(), 4);
        assert!(container.apply_micro_step());

        let after = ids(&container);
        assert_eq!(after.len(), 4);
        assert_eq!(after[0], a);
        assert_eq!(after[3], c);
        assert!(!after.contains(&b));
        assert!(!after.contains(&short));
        let halves: Vec<usize> = after[1..3]
            .iter()
            .map(|id| match container.get(*id) {
                Some(Path::Basic(stroke)) => stroke.points.len(),
                _ => 0,
            })
            .collect();
        assert_eq!(halves, vec![5, 5]);

        let after = snapshot(&container);
        assert!(container.undo(None));
        assert_eq!(snapshot(&container), before);
        assert!(container.redo(None));
        assert_eq!(snapshot(&container), after);
    }

    #[test]
    fn pieces_are_erased_again_within_one_gesture() {
        let mut container = PathContainer::with_history_limit(10);
        let a = container.append(stroke(0.0));
        container.start_micro_step();
        container.eraser_micro_step(PointF::new(5.0, 0.0), 0.5);
        container.eraser_micro_step(PointF::new(2.0, 0.0), 0.5);
        // 0..=1, 3..=4 and 6..=10 remain.
        assert_eq!(container.len(), 3);
        assert!(container.apply_micro_step());
        assert_eq!(container.history_len(), 2);

        assert!(container.undo(None));
        assert_eq!(ids(&container), vec![a]);
    }

    #[test]
    fn undo_and_redo_update_the_scene() {
        let mut container = PathContainer::with_history_limit(10);
        let mut scene = RecordingScene::default();
        let a = container.append(stroke(0.0));
        let b = container.append(stroke(1.0));
        scene.shown = vec![a, b];

        container.remove_item(a);
        scene.remove_item(a);
        assert!(container.undo(Some(&mut scene)));
        assert_eq!(scene.shown, vec![a, b]);
        assert!(container.undo(Some(&mut scene)));
        assert_eq!(scene.shown, vec![a]);
        assert!(container.redo(Some(&mut scene)));
        assert_eq!(scene.shown, vec![a, b]);
    }

    #[test]
    fn history_depth_is_bounded() {
        let mut container = PathContainer::with_history_limit(3);
        for y in 0..6 {
            container.append(stroke(y as f64));
        }
        assert_eq!(container.history_len(), 3);
        let mut undone = 0;
        while container.undo(None) {
            undone += 1;
        }
        assert_eq!(undone, 3);
        assert_eq!(container.len(), 3);
    }

    #[test]
    fn pruned_deletions_are_freed() {
        let mut container = PathContainer::with_history_limit(5);
        let a = container.append(stroke(0.0));
        container.remove_item(a);
        container.clear_history(0);
        assert_eq!(container.history_len(), 0);
        assert!(container.get(a).is_none());
        assert!(!container.undo(None));
    }

    #[test]
    fn new_action_closes_open_gesture() {
        let mut container = PathContainer::with_history_limit(10);
        container.append(stroke(0.0));
        container.start_micro_step();
        container.eraser_micro_step(PointF::new(5.0, 0.0), 0.5);
        container.append(stroke(1.0));

        assert_eq!(container.history_state(), HistoryState::Forward);
        assert_eq!(container.len(), 3);
        assert_eq!(container.history_len(), 3);
    }

    #[test]
    fn eraser_outside_gesture_is_ignored() {
        let mut container = PathContainer::with_history_limit(10);
        container.append(stroke(0.0));
        let before = snapshot(&container);
        container.eraser_micro_step(PointF::new(5.0, 0.0), 0.5);
        assert!(!container.apply_micro_step());
        assert_eq!(snapshot(&container), before);
        assert_eq!(container.history_state(), HistoryState::Forward);
        assert_eq!(container.history_len(), 1);
    }

    #[test]
    fn copy_is_detached_and_skips_empty_text() {
        let mut container = PathContainer::with_history_limit(10);
        container.append(stroke(0.0));
        container.append(text(""));
        container.append(text("note"));

        let mut copy = container.copy();
        assert_eq!(copy.history_state(), HistoryState::Detached);
        assert_eq!(copy.history_len(), 0);
        assert_eq!(copy.len(), 2);
        assert!(!copy.undo(None));

        copy.append(stroke(1.0));
        assert_eq!(copy.history_state(), HistoryState::Forward);
        assert_eq!(container.len(), 3);
    }

    #[test]
    fn bounding_box_covers_all_items() {
        let mut container = PathContainer::with_history_limit(10);
        assert!(container.bounding_box().is_empty());
        container.append(stroke(0.0));
        container.append(stroke(20.0));
        assert_eq!(container.bounding_box(), RectF::new(-0.5, -0.5, 10.5, 20.5));
    }

    #[test]
    fn undo_then_redo_restores_any_history() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let mut container = PathContainer::with_history_limit(100);
            for _ in 0..rng.gen_range(1..25) {
                match rng.gen_range(0..10) {
                    0..=5 => {
                        container.append(stroke(rng.gen_range(0..8) as f64 * 3.0));
                    }
                    6 => {
                        let live = ids(&container);
                        if !live.is_empty() {
                            container.remove_item(live[rng.gen_range(0..live.len())]);
                        }
                    }
                    7 => container.clear_paths(),
                    _ => {
                        container.start_micro_step();
                        for _ in 0..rng.gen_range(1..4) {
                            let pos = PointF::new(
                                rng.gen_range(0..=10) as f64,
                                rng.gen_range(0..8) as f64 * 3.0,
                            );
                            container.eraser_micro_step(pos, 0.5);
                        }
                        container.apply_micro_step();
                    }
                }
            }

            let before = snapshot(&container);
            let wanted = rng.gen_range(0..=container.history_len() + 2);
            let mut undone = 0;
            while undone < wanted && container.undo(None) {
                undone += 1;
            }
            for _ in 0..undone {
                assert!(container.redo(None));
            }
            assert!(!container.redo(None));
            assert_eq!(snapshot(&container), before);
        }
    }
}
