//! An arena of layout automata.
//!
//! Every layout built for one query lives in the same [`Layouts`] arena, so states have a
//! single identity space and reference edges can name their referent (even cyclically) by
//! [`LayoutId`].

use std::fmt;

use super::{Byte, Count, Invariant, Reference, Tree};
use crate::build::BuildError;

/// The states in a layout represent byte offsets.
#[derive(Hash, Eq, PartialEq, PartialOrd, Ord, Copy, Clone)]
pub struct State(u32);

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S_{}", self.0)
    }
}

/// Identifies one layout (a whole type, an array element body, or a referent) in an arena.
#[derive(Hash, Eq, PartialEq, PartialOrd, Ord, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayoutId(u32);

impl fmt::Debug for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L_{}", self.0)
    }
}

/// The transitions between states in a layout.
#[derive(Hash, Eq, PartialEq, Clone)]
pub enum Transition {
    Byte(Byte),
    Ref(Reference),
    /// Entry into a region with library safety invariants. Consumes no bytes.
    Def(Invariant),
    /// The body layout, repeated `Count` times.
    Repeat(LayoutId, Count),
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Self::Byte(b) => b.fmt(f),
            Self::Ref(r) => r.fmt(f),
            Self::Def(d) => d.fmt(f),
            Self::Repeat(body, count) => write!(f, "{:?} x {:?}", body, count),
        }
    }
}

#[derive(Clone)]
struct StateData {
    offset: u64,
    accepting: bool,
    edges: Vec<(Transition, State)>,
}

#[derive(Clone, Copy)]
struct LayoutData {
    start: State,
    accepting: State,
    size: Option<u64>,
    safety: bool,
    padding: bool,
}

/// Immutable once built; safe to share across threads running independent checks.
#[derive(Default, Clone)]
pub struct Layouts {
    states: Vec<StateData>,
    layouts: Vec<LayoutData>,
}

impl Layouts {
    fn new_state(&mut self, offset: u64) -> Result<State, BuildError> {
        let id = u32::try_from(self.states.len()).map_err(|_| BuildError::TooLarge)?;
        self.states.push(StateData { offset, accepting: false, edges: Vec::new() });
        Ok(State(id))
    }

    fn push_edge(&mut self, source: State, transition: Transition, destination: State) {
        self.states[source.0 as usize].edges.push((transition, destination));
    }

    /// Allocate a layout whose contents are supplied later by [`Layouts::define`].
    ///
    /// Until then it is uninhabited.
    pub(crate) fn reserve(&mut self) -> Result<LayoutId, BuildError> {
        let id = u32::try_from(self.layouts.len()).map_err(|_| BuildError::TooLarge)?;
        let start = self.new_state(0)?;
        let accepting = self.new_state(0)?;
        self.states[accepting.0 as usize].accepting = true;
        self.layouts.push(LayoutData { start, accepting, size: Some(0), safety: false, padding: false });
        Ok(LayoutId(id))
    }

    #[tracing::instrument(level = "trace", skip(self, tree))]
    pub(crate) fn define(&mut self, id: LayoutId, tree: &Tree) -> Result<(), BuildError> {
        let start = self.new_state(0)?;
        let accepting = self.lower(tree, start, 0)?;
        self.states[accepting.0 as usize].accepting = true;
        self.layouts[id.0 as usize] = LayoutData {
            start,
            accepting,
            size: tree.size(),
            safety: tree.has_invariants(),
            padding: tree.is_padding(),
        };
        Ok(())
    }

    fn fragment(&mut self, tree: &Tree) -> Result<LayoutId, BuildError> {
        let id = self.reserve()?;
        self.define(id, tree)?;
        Ok(id)
    }

    /// Lower `tree` into states reachable from `start`, and return the state it ends in.
    fn lower(&mut self, tree: &Tree, start: State, offset: u64) -> Result<State, BuildError> {
        Ok(match tree {
            Tree::Byte(byte) => {
                let end = self.new_state(offset.saturating_add(1))?;
                self.push_edge(start, Transition::Byte(*byte), end);
                end
            }
            Tree::Ref(reference) => {
                let end = self.new_state(offset.saturating_add(reference.size))?;
                self.push_edge(start, Transition::Ref(*reference), end);
                end
            }
            Tree::Def(invariant) => {
                let end = self.new_state(offset)?;
                self.push_edge(start, Transition::Def(invariant.clone()), end);
                end
            }
            Tree::Seq(elts) => {
                let (mut state, mut offset) = (start, offset);
                for elt in elts {
                    state = self.lower(elt, state, offset)?;
                    offset = offset.saturating_add(elt.size().unwrap_or(0));
                }
                state
            }
            Tree::Alt(alts) => {
                let size = tree.size().unwrap_or(0);
                if size == 0 {
                    // no bytes to tell the alternatives apart
                    return if tree.is_inhabited() { Ok(start) } else { self.new_state(offset) };
                }
                let end = self.new_state(offset.saturating_add(size))?;
                for alt in alts {
                    let mark = self.states.len();
                    let alt_end = self.lower(alt, start, offset)?;
                    if alt_end == start {
                        return Err(BuildError::MismatchedAlternatives { offset });
                    }
                    self.redirect(start, mark, alt_end, end);
                }
                end
            }
            Tree::Repeat(body, count) => {
                let body_size = body.size().unwrap_or(0);
                let body = self.fragment(body)?;
                let end = self.new_state(offset.saturating_add(body_size.saturating_mul(count.min())))?;
                self.push_edge(start, Transition::Repeat(body, *count), end);
                end
            }
        })
    }

    /// Point every edge into `from` at `to` instead, among `start` and states allocated since `mark`.
    fn redirect(&mut self, start: State, mark: usize, from: State, to: State) {
        let fresh = mark..self.states.len();
        for index in std::iter::once(start.0 as usize).chain(fresh) {
            for (_, destination) in self.states[index].edges.iter_mut() {
                if *destination == from {
                    *destination = to;
                }
            }
        }
    }

    pub fn start(&self, id: LayoutId) -> State {
        self.layouts[id.0 as usize].start
    }

    pub fn accepting(&self, id: LayoutId) -> State {
        self.layouts[id.0 as usize].accepting
    }

    /// The size of every value of the layout, or `None` if it ends in a dynamically-sized tail.
    pub fn size(&self, id: LayoutId) -> Option<u64> {
        self.layouts[id.0 as usize].size
    }

    /// Does any value of the layout contain a region with library safety invariants?
    pub fn has_safety_invariants(&self, id: LayoutId) -> bool {
        self.layouts[id.0 as usize].safety
    }

    /// Is every byte of the layout padding?
    pub fn is_padding(&self, id: LayoutId) -> bool {
        self.layouts[id.0 as usize].padding
    }

    pub fn edges_from(&self, state: State) -> &[(Transition, State)] {
        &self.states[state.0 as usize].edges
    }

    pub fn is_accepting(&self, state: State) -> bool {
        self.states[state.0 as usize].accepting
    }

    /// The byte offset of `state` within its own layout.
    pub fn offset(&self, state: State) -> u64 {
        self.states[state.0 as usize].offset
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = LayoutId> {
        (0..self.layouts.len() as u32).map(LayoutId)
    }
}

impl fmt::Debug for Layouts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.ids() {
            let LayoutData { start, accepting, size, safety, .. } = self.layouts[id.0 as usize];
            write!(f, "{:?}: {:?} -> {:?}", id, start, accepting)?;
            match size {
                Some(size) => write!(f, ", size {}", size)?,
                None => f.write_str(", unsized")?,
            }
            if safety {
                f.write_str(", unsafe")?;
            }
            writeln!(f)?;
        }
        for (index, state) in self.states.iter().enumerate() {
            for (transition, destination) in &state.edges {
                writeln!(
                    f,
                    "  S_{} @{:#x} --{:?}--> {:?}",
                    index, state.offset, transition, destination
                )?;
            }
        }
        Ok(())
    }
}
