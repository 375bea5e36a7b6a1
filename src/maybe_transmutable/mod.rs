use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::diagnostic::{Constraint, Diagnostic, Reason};
use crate::layout::{
    Byte, ByteSet, Count, Invariant, LayoutId, Layouts, Mutability, Reference, Transition,
};
use crate::{Answer, Assume, Assumption, Budget, Map, Set};


mod cursor;
use cursor::{Cursor, Moves, RepeatView};

pub mod query_context;
use query_context::QueryContext;

type Outcome = Result<Assume, Diagnostic>;

/// Counters describing the work one query performed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Distinct (source position, destination positions) pairs evaluated.
    pub pairs: usize,
    /// Pairs reached again, and pointee checks answered from the memo.
    pub cache_hits: usize,
    /// Pointee checks assumed to hold because they were already under evaluation.
    pub coinductive_hits: usize,
    /// Runs of array elements checked once instead of element by element.
    pub run_length_skips: usize,
}

/// A destination position some source path may have reached.
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone)]
struct Candidate {
    cursor: Cursor,
    /// Reached by writing into a region that carries safety invariants.
    guarded: bool,
}

impl Candidate {
    fn plain(cursor: Cursor) -> Self {
        Self { cursor, guarded: false }
    }

    fn then(&self, cursor: Cursor) -> Self {
        Self { cursor, guarded: self.guarded }
    }
}

/// Sorted and deduplicated. A plain candidate subsumes a guarded one at the same cursor.
fn normalize(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort();
    candidates.dedup_by(|later, earlier| later.cursor == earlier.cursor);
    candidates
}

/// `safety`, if every candidate was reached through a guarded region.
fn guarded(candidates: &[Candidate]) -> Assume {
    if !candidates.is_empty() && candidates.iter().all(|candidate| candidate.guarded) {
        Assume::only(Assumption::Safety)
    } else {
        Assume::NOTHING
    }
}

/// A source position and every destination position it may correspond to.
type Pair = (Cursor, Vec<Candidate>);

struct Pending {
    offset: u64,
    seq: usize,
    pair: Pair,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        (self.offset, self.seq) == (other.offset, other.seq)
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.offset, self.seq).cmp(&(other.offset, other.seq))
    }
}

/// Pairs still to check, earliest offset first. Each pair is scheduled once.
#[derive(Default)]
struct Worklist {
    seen: Set<Pair>,
    queue: BinaryHeap<Reverse<Pending>>,
}

impl Worklist {
    /// False if the pair was reached before.
    fn push(&mut self, offset: u64, pair: Pair) -> bool {
        if self.seen.contains(&pair) {
            return false;
        }
        self.seen.insert(pair.clone());
        let seq = self.seen.len();
        self.queue.push(Reverse(Pending { offset, seq, pair }));
        true
    }

    fn pop(&mut self) -> Option<(u64, Pair)> {
        self.queue.pop().map(|Reverse(pending)| (pending.offset, pending.pair))
    }
}

/// The moves available to a set of destination candidates.
struct DstMoves<'l> {
    /// Some candidate may end here.
    ends: bool,
    /// Some candidate has ended outright.
    finished: bool,
    /// Some candidate that ended outright is not guarded.
    finished_plainly: bool,
    /// Byte and reference edges.
    edges: Vec<(&'l Transition, Candidate)>,
    /// Entries into regions that carry safety invariants.
    markers: Vec<(&'l Invariant, Candidate)>,
}

/// What one pair requires of the pairs after it.
#[derive(Default)]
struct Step {
    exercised: Assume,
    /// Successor pairs, with their distance in bytes.
    next: Vec<(u64, Pair)>,
}

/// Is every value of `src` also a value of `dst`?
///
/// Both layouts must live in the same arena. The query is a pure function of the layouts;
/// its memo is private to it.
///
/// The source is walked against the *set* of destination positions it may have reached,
/// so destination alternatives that share a prefix are matched together. Pairs are
/// explored from an explicit worklist; only pointee checks recurse.
pub struct MaybeTransmutableQuery<'l, C: ?Sized> {
    layouts: &'l Layouts,
    src: LayoutId,
    dst: LayoutId,
    assume: Assume,
    context: &'l C,
    budget: Budget,
    /// Decided containments.
    memo: Map<(LayoutId, LayoutId), Outcome>,
    /// Containments under evaluation, by nesting depth.
    active: Map<(LayoutId, LayoutId), usize>,
    /// The shallowest active containment each nested check relied on.
    lowlinks: Vec<usize>,
    stats: Stats,
}

impl<'l, C> MaybeTransmutableQuery<'l, C>
where
    C: QueryContext + ?Sized,
{
    pub fn new(
        layouts: &'l Layouts,
        src: LayoutId,
        dst: LayoutId,
        assume: Assume,
        context: &'l C,
    ) -> Self {
        Self {
            layouts,
            src,
            dst,
            assume,
            context,
            budget: Budget::default(),
            memo: Map::default(),
            active: Map::default(),
            lowlinks: Vec::new(),
            stats: Stats::default(),
        }
    }

    pub fn with_budget(self, budget: Budget) -> Self {
        Self { budget, ..self }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(src = ?self.src, dst = ?self.dst))]
    pub fn answer(&mut self) -> Answer {
        match self.check() {
            Ok(exercised) => Answer::Yes(exercised),
            Err(diagnostic) => Answer::No(diagnostic),
        }
    }

    /// On success, the assumptions the decision actually relied on.
    pub fn check(&mut self) -> Result<Assume, Diagnostic> {
        let outcome = self.contains(self.src, self.dst);
        tracing::debug!(?outcome, stats = ?self.stats, "answered");
        outcome
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// `src ⊆ dst`, memoized, with containments already under evaluation assumed to hold.
    fn contains(&mut self, src: LayoutId, dst: LayoutId) -> Outcome {
        let key = (src, dst);
        if let Some(outcome) = self.memo.get(&key) {
            self.stats.cache_hits += 1;
            return outcome.clone();
        }
        if let Some(&depth) = self.active.get(&key) {
            tracing::trace!(depth, "coinductive hit");
            self.stats.coinductive_hits += 1;
            if let Some(low) = self.lowlinks.last_mut() {
                *low = (*low).min(depth);
            }
            return Ok(Assume::NOTHING);
        }

        let depth = self.lowlinks.len();
        if depth >= self.budget.max_depth {
            tracing::warn!(depth, "pointees nested too deeply");
            return Err(Diagnostic::new(0, Reason::ResourceExceeded { budget: self.budget.max_depth }));
        }

        self.active.insert(key, depth);
        self.lowlinks.push(usize::MAX);
        let outcome = self.explore(src, dst);
        let low = self.lowlinks.pop().unwrap_or(usize::MAX);
        self.active.remove(&key);

        if low >= depth || outcome.is_err() {
            self.memo.insert(key, outcome.clone());
        } else if let Some(parent) = self.lowlinks.last_mut() {
            // provisional until the containment at `low` is decided
            *parent = (*parent).min(low);
        }
        outcome
    }

    /// Checks every pair reachable from the two roots. The first failure popped is the
    /// earliest in the value.
    fn explore(&mut self, src: LayoutId, dst: LayoutId) -> Outcome {
        let mut worklist = Worklist::default();
        let root = Candidate::plain(Cursor::root(self.layouts, dst));
        worklist.push(0, (Cursor::root(self.layouts, src), vec![root]));

        let mut exercised = Assume::NOTHING;
        while let Some((offset, (src, dst))) = worklist.pop() {
            if self.stats.pairs >= self.budget.max_pairs {
                let budget = self.budget.max_pairs;
                tracing::warn!(budget, offset, "budget exhausted");
                return Err(Diagnostic::new(offset, Reason::ResourceExceeded { budget }));
            }
            self.stats.pairs += 1;

            let step = self.step(&src, &dst).map_err(|diagnostic| diagnostic.shifted(offset))?;
            exercised |= step.exercised;
            for (width, pair) in step.next {
                if !worklist.push(offset.saturating_add(width), pair) {
                    self.stats.cache_hits += 1;
                }
            }
        }
        Ok(exercised)
    }

    fn step(&mut self, src: &Cursor, dst: &[Candidate]) -> Result<Step, Diagnostic> {
        if let [only] = dst {
            if let (Some(src_run), Some(dst_run)) =
                (src.repeat_view(self.layouts), only.cursor.repeat_view(self.layouts))
            {
                if let Some(step) = self.run_length(&src_run, &dst_run, only) {
                    return Ok(step);
                }
            }
        }

        let src_moves = src.moves(self.layouts);
        let (entered, dst_moves, unproven) = self.enter_invariants(dst);

        let mut step = Step::default();
        if dst_moves.finished {
            // truncation: `size_of(Src) >= size_of(Dst)`
            tracing::trace!("dst ends here");
            if !dst_moves.finished_plainly {
                step.exercised |= Assume::only(Assumption::Safety);
            }
            return Ok(step);
        }
        // a destination tail that may also continue keeps consuming the source

        if src_moves.ends
            && !dst_moves.ends
            && !entered.iter().any(|candidate| self.is_padding_tail(&candidate.cursor))
        {
            let expected = expectation(&dst_moves);
            return Err(Diagnostic::new(0, Reason::BitValidityMismatch { found: Constraint::End, expected }));
        }

        let refuse = |found: Constraint| match unproven {
            Some(invariant) => {
                let name = invariant.name.to_string();
                Diagnostic::new(0, Reason::SafetyInvariantUnproven { name })
            }
            None => {
                let expected = expectation(&dst_moves);
                Diagnostic::new(0, Reason::BitValidityMismatch { found, expected })
            }
        };

        for (transition, src_next) in src_moves.edges {
            match transition {
                Transition::Byte(Byte::Init(values)) => {
                    let (exercised, classes) = self.cover_bytes(*values, &dst_moves, &refuse)?;
                    step.exercised |= exercised;
                    for candidates in classes {
                        step.next.push((1, (src_next.clone(), candidates)));
                    }
                }
                Transition::Byte(Byte::Uninit) => {
                    let candidates: Vec<Candidate> = dst_moves
                        .edges
                        .iter()
                        .filter(|(t, _)| matches!(t, Transition::Byte(Byte::Uninit)))
                        .map(|(_, candidate)| candidate.clone())
                        .collect();
                    if candidates.is_empty() {
                        return Err(refuse(Constraint::Uninit));
                    }
                    step.exercised |= guarded(&candidates);
                    step.next.push((1, (src_next, normalize(candidates))));
                }
                Transition::Ref(reference) => {
                    let (exercised, candidates) =
                        self.cover_ref(reference, &entered, &dst_moves, &refuse)?;
                    step.exercised |= exercised;
                    step.next.push((reference.size, (src_next, candidates)));
                }
                Transition::Def(invariant) => {
                    // the same opaque type on both sides, or its bytes read plainly
                    let mut candidates = dst.to_vec();
                    candidates.extend(
                        dst_moves
                            .markers
                            .iter()
                            .filter(|(other, _)| *other == invariant)
                            .map(|(_, candidate)| candidate.clone()),
                    );
                    step.next.push((0, (src_next, normalize(candidates))));
                }
                Transition::Repeat(..) => {}
            }
        }
        Ok(step)
    }

    /// Splits `m` whole iterations of two equally-sized repeat bodies into one element
    /// pair and the pair after the run.
    fn run_length(&mut self, src: &RepeatView, dst: &RepeatView, candidate: &Candidate) -> Option<Step> {
        let size = self.layouts.size(src.body)?;
        if size == 0 || self.layouts.size(dst.body) != Some(size) {
            return None;
        }
        let m = Count::min(&src.count).min(Count::min(&dst.count));
        if m == 0 {
            return None;
        }
        tracing::trace!(m, size, "checking run of elements once");
        self.stats.run_length_skips += 1;

        let element = (
            Cursor::root(self.layouts, src.body),
            vec![candidate.then(Cursor::root(self.layouts, dst.body))],
        );
        let rest = (src.after(self.layouts, m), vec![candidate.then(dst.after(self.layouts, m))]);
        Some(Step {
            exercised: Assume::NOTHING,
            next: vec![(0, element), (m.saturating_mul(size), rest)],
        })
    }

    /// The moves of `dst`, split into data edges and guarded-region entries.
    fn dst_moves(&self, dst: &[Candidate]) -> DstMoves<'l> {
        let mut moves = DstMoves {
            ends: false,
            finished: false,
            finished_plainly: false,
            edges: Vec::new(),
            markers: Vec::new(),
        };
        for candidate in dst {
            let Moves { ends, edges } = candidate.cursor.moves(self.layouts);
            moves.ends |= ends;
            if ends && edges.is_empty() {
                moves.finished = true;
                moves.finished_plainly |= !candidate.guarded;
            }
            for (transition, after) in edges {
                match transition {
                    Transition::Def(invariant) => moves.markers.push((invariant, candidate.then(after))),
                    transition => moves.edges.push((transition, candidate.then(after))),
                }
            }
        }
        moves
    }

    /// With safety assumed, `dst` plus the guarded regions a write may enter. Otherwise `dst`,
    /// and the first such region a write would have to enter.
    fn enter_invariants(&self, dst: &[Candidate]) -> (Vec<Candidate>, DstMoves<'l>, Option<&'l Invariant>) {
        let mut entered = dst.to_vec();
        loop {
            let moves = self.dst_moves(&entered);
            let mut unproven = None;
            let mut fresh = Vec::new();
            for (invariant, after) in &moves.markers {
                if entered.iter().all(|candidate| candidate.cursor != after.cursor) {
                    unproven.get_or_insert(*invariant);
                    fresh.push(Candidate { cursor: after.cursor.clone(), guarded: true });
                }
            }
            let Some(invariant) = unproven.filter(|_| self.assume.safety) else {
                return (entered, moves, unproven);
            };
            tracing::debug!(name = %invariant.name, "assuming safety invariants hold");
            entered = normalize(entered.into_iter().chain(fresh).collect());
        }
    }

    /// Partitions `values` by the destination edges that accept them. Each class continues
    /// along every edge that accepts it.
    fn cover_bytes(
        &self,
        values: ByteSet,
        dst: &DstMoves<'l>,
        refuse: &dyn Fn(Constraint) -> Diagnostic,
    ) -> Result<(Assume, Vec<Vec<Candidate>>), Diagnostic> {
        let mut classes: Vec<(ByteSet, Vec<Candidate>)> = vec![(values, Vec::new())];
        for (transition, candidate) in &dst.edges {
            let accepted = match transition {
                Transition::Byte(Byte::Uninit) => ByteSet::FULL,
                Transition::Byte(Byte::Init(accepted)) => *accepted,
                _ => continue,
            };
            let mut refined = Vec::with_capacity(classes.len() + 1);
            for (class, candidates) in classes {
                let (inside, outside) = (class.intersection(accepted), class.difference(accepted));
                if !inside.is_empty() {
                    let mut accepting = candidates.clone();
                    accepting.push(candidate.clone());
                    refined.push((inside, accepting));
                }
                if !outside.is_empty() {
                    refined.push((outside, candidates));
                }
            }
            classes = refined;
        }

        let mut exercised = Assume::NOTHING;
        let mut successors = Vec::with_capacity(classes.len());
        for (class, candidates) in classes {
            if !candidates.is_empty() {
                exercised |= guarded(&candidates);
                successors.push(normalize(candidates));
                continue;
            }
            let permissive: Vec<Candidate> = dst
                .edges
                .iter()
                .filter(|(t, _)| matches!(t, Transition::Byte(Byte::Init(..))))
                .map(|(_, candidate)| candidate.clone())
                .collect();
            if !self.assume.validity || permissive.is_empty() {
                return Err(refuse(Constraint::Bytes(class)));
            }
            tracing::trace!(%class, "assuming the value avoids unaccepted bytes");
            exercised |= Assume::only(Assumption::Validity) | guarded(&permissive);
            successors.push(normalize(permissive));
        }
        Ok((exercised, successors))
    }

    /// The destination positions `reference` may continue from.
    fn cover_ref(
        &mut self,
        reference: &Reference,
        dst: &[Candidate],
        dst_moves: &DstMoves<'l>,
        refuse: &dyn Fn(Constraint) -> Diagnostic,
    ) -> Result<(Assume, Vec<Candidate>), Diagnostic> {
        let mut exercised = Assume::NOTHING;
        let mut candidates = Vec::new();
        let mut failure: Option<Diagnostic> = None;

        for (transition, candidate) in &dst_moves.edges {
            let Transition::Ref(target) = transition else { continue };
            match self.check_references(reference, target) {
                Ok(assume) => {
                    exercised |= assume;
                    candidates.push(candidate.clone());
                }
                Err(diagnostic) => {
                    failure.get_or_insert(diagnostic);
                }
            }
        }

        // a reference may be written into padding; its bytes are forgotten
        for candidate in dst {
            for after in self.uninit_run(&candidate.cursor, reference.size) {
                candidates.push(candidate.then(after));
            }
        }

        if candidates.is_empty() {
            return Err(failure.unwrap_or_else(|| {
                refuse(Constraint::Reference { mutability: reference.mutability, align: reference.align })
            }));
        }
        exercised |= guarded(&candidates);
        Ok((exercised, normalize(candidates)))
    }

    fn check_references(&mut self, src: &Reference, dst: &Reference) -> Outcome {
        if src.mutability == Mutability::Shared && dst.mutability == Mutability::Exclusive {
            return Err(Diagnostic::new(0, Reason::MutabilityMismatch));
        }
        if src.size != dst.size {
            let found = Constraint::Reference { mutability: src.mutability, align: src.align };
            let expected = Constraint::Reference { mutability: dst.mutability, align: dst.align };
            return Err(Diagnostic::new(0, Reason::BitValidityMismatch { found, expected }));
        }

        let mut exercised = Assume::NOTHING;
        if src.align < dst.align {
            if !self.assume.alignment {
                let reason = Reason::AlignmentInsufficient { required: dst.align, available: src.align };
                return Err(Diagnostic::new(0, reason));
            }
            exercised |= Assume::only(Assumption::Alignment);
        }
        if !self.context.outlives(src.lifetime, dst.lifetime) {
            if !self.assume.lifetimes {
                let reason = Reason::LifetimeUnbounded { src: src.lifetime, dst: dst.lifetime };
                return Err(Diagnostic::new(0, reason));
            }
            exercised |= Assume::only(Assumption::Lifetimes);
        }

        let pointee_mismatch = |inner: Diagnostic| Diagnostic::new(0, Reason::PointeeMismatch(Box::new(inner)));
        exercised |= self.contains(src.pointee, dst.pointee).map_err(pointee_mismatch)?;
        if dst.mutability == Mutability::Exclusive {
            // writes through the destination are visible through the source
            exercised |= self.contains(dst.pointee, src.pointee).map_err(pointee_mismatch)?;
        }
        Ok(exercised)
    }

    /// The cursors `n` uninitialized bytes past `dst`.
    fn uninit_run(&self, dst: &Cursor, n: u64) -> Vec<Cursor> {
        let mut frontier = vec![dst.clone()];
        for _ in 0..n {
            let mut next = Vec::new();
            for cursor in &frontier {
                for (transition, after) in cursor.moves(self.layouts).edges {
                    if matches!(transition, Transition::Byte(Byte::Uninit)) && !next.contains(&after) {
                        next.push(after);
                    }
                }
            }
            frontier = next;
        }
        frontier
    }

    /// May the destination end after nothing but padding?
    fn is_padding_tail(&self, dst: &Cursor) -> bool {
        let mut seen = Set::default();
        let mut pending = vec![dst.clone()];
        let mut ends = false;

        while let Some(cursor) = pending.pop() {
            if !seen.insert(cursor.clone()) {
                continue;
            }
            if let Some(run) = cursor.repeat_view(self.layouts) {
                if self.layouts.is_padding(run.body) {
                    pending.push(run.skip());
                    continue;
                }
            }
            let moves = cursor.moves(self.layouts);
            ends |= moves.ends;
            for (transition, after) in moves.edges {
                if !matches!(transition, Transition::Byte(Byte::Uninit)) {
                    return false;
                }
                pending.push(after);
            }
        }
        ends
    }
}

/// What the destination accepts, given its available moves.
fn expectation(moves: &DstMoves<'_>) -> Constraint {
    let mut bytes = ByteSet::EMPTY;
    let mut options = Vec::new();
    for (transition, _) in &moves.edges {
        let option = match transition {
            Transition::Byte(Byte::Init(set)) => {
                bytes = bytes.union(*set);
                continue;
            }
            Transition::Byte(Byte::Uninit) => Constraint::Uninit,
            Transition::Ref(reference) => {
                Constraint::Reference { mutability: reference.mutability, align: reference.align }
            }
            Transition::Def(..) | Transition::Repeat(..) => continue,
        };
        if !options.contains(&option) {
            options.push(option);
        }
    }
    for (invariant, _) in &moves.markers {
        let option = Constraint::Opaque(invariant.name.to_string());
        if !options.contains(&option) {
            options.push(option);
        }
    }
    if !bytes.is_empty() {
        options.insert(0, Constraint::Bytes(bytes));
    }
    if moves.ends {
        options.push(Constraint::End);
    }
    match options.len() {
        1 => options.pop().unwrap_or(Constraint::End),
        _ => Constraint::OneOf(options),
    }
}
