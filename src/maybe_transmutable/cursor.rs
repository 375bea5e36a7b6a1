//! Positions inside a layout, with repeat bodies unrolled lazily.

use crate::layout::{Count, LayoutId, Layouts, State, Transition};
use crate::Set;

/// One iteration of a repeat body in progress.
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy)]
pub(crate) struct Frame {
    pub(crate) body: LayoutId,
    /// Where to continue once the last iteration is done.
    pub(crate) exit: State,
    /// Iterations still to run after the current one.
    pub(crate) remaining: Count,
}

/// A state together with the repeat iterations enclosing it.
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone)]
pub(crate) struct Cursor {
    pub(crate) state: State,
    pub(crate) frames: Vec<Frame>,
}

/// The single-byte-or-wider steps available from a cursor.
pub(crate) struct Moves<'l> {
    /// The value may end here.
    pub(crate) ends: bool,
    /// Never contains [`Transition::Repeat`].
    pub(crate) edges: Vec<(&'l Transition, Cursor)>,
}

/// A cursor that stands in front of whole iterations of a repeat body.
#[derive(Debug)]
pub(crate) struct RepeatView {
    pub(crate) body: LayoutId,
    pub(crate) count: Count,
    exit: State,
    base: Vec<Frame>,
}

impl Cursor {
    pub(crate) fn root(layouts: &Layouts, id: LayoutId) -> Self {
        Self { state: layouts.start(id), frames: Vec::new() }
    }

    fn at(&self, state: State) -> Self {
        Self { state, frames: self.frames.clone() }
    }

    /// Is this cursor at the end of the current iteration of its innermost repeat?
    fn finished_iteration(&self, layouts: &Layouts) -> Option<Frame> {
        let top = *self.frames.last()?;
        (self.state == layouts.accepting(top.body)).then_some(top)
    }

    /// The cursors this one stands for once finished iterations and repeat edges are resolved.
    fn settle(&self, layouts: &Layouts, out: &mut Vec<Cursor>) {
        if let Some(frame) = self.finished_iteration(layouts) {
            let mut outer = self.frames.clone();
            outer.pop();
            if Count::min(&frame.remaining) == 0 {
                out.push(Cursor { state: frame.exit, frames: outer.clone() });
            }
            if frame.remaining != Count::Exact(0) {
                outer.push(Frame { remaining: frame.remaining.minus(1), ..frame });
                out.push(Cursor { state: layouts.start(frame.body), frames: outer });
            }
            return;
        }
        out.push(self.clone());
    }

    pub(crate) fn moves<'l>(&self, layouts: &'l Layouts) -> Moves<'l> {
        let mut moves = Moves { ends: false, edges: Vec::new() };
        let mut seen: Set<Cursor> = Set::default();
        let mut pending = vec![self.clone()];

        while let Some(cursor) = pending.pop() {
            if !seen.insert(cursor.clone()) {
                continue;
            }
            if cursor.finished_iteration(layouts).is_some() {
                cursor.settle(layouts, &mut pending);
                continue;
            }
            if cursor.frames.is_empty() && layouts.is_accepting(cursor.state) {
                moves.ends = true;
            }
            for (transition, destination) in layouts.edges_from(cursor.state) {
                match transition {
                    &Transition::Repeat(body, count) => {
                        if Count::min(&count) == 0 {
                            pending.push(cursor.at(*destination));
                        }
                        if count != Count::Exact(0) {
                            let mut frames = cursor.frames.clone();
                            frames.push(Frame {
                                body,
                                exit: *destination,
                                remaining: count.minus(1),
                            });
                            pending.push(Cursor { state: layouts.start(body), frames });
                        }
                    }
                    transition => moves.edges.push((transition, cursor.at(*destination))),
                }
            }
        }
        moves
    }

    /// Views this cursor as "`count` more iterations of `body`, then continue", if it is one.
    pub(crate) fn repeat_view(&self, layouts: &Layouts) -> Option<RepeatView> {
        if let [(Transition::Repeat(body, count), exit)] = layouts.edges_from(self.state) {
            return Some(RepeatView {
                body: *body,
                count: *count,
                exit: *exit,
                base: self.frames.clone(),
            });
        }
        let frame = self.finished_iteration(layouts)?;
        if Count::min(&frame.remaining) == 0 {
            return None;
        }
        let mut base = self.frames.clone();
        base.pop();
        Some(RepeatView { body: frame.body, count: frame.remaining, exit: frame.exit, base })
    }
}

impl RepeatView {
    /// Where the cursor stands once `n` of the iterations are done.
    pub(crate) fn after(&self, layouts: &Layouts, n: u64) -> Cursor {
        let remaining = self.count.minus(n);
        let mut frames = self.base.clone();
        if remaining == Count::Exact(0) {
            return Cursor { state: self.exit, frames };
        }
        frames.push(Frame { body: self.body, exit: self.exit, remaining });
        Cursor { state: layouts.accepting(self.body), frames }
    }

    /// Past every iteration, assuming a tail takes none beyond its minimum.
    pub(crate) fn skip(&self) -> Cursor {
        Cursor { state: self.exit, frames: self.base.clone() }
    }
}
