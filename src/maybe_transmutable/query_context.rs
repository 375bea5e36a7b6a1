use crate::layout::Lifetime;
use crate::{Map, Set};

/// Context necessary to answer the question "Are these types transmutable?".
pub trait QueryContext {
    /// Does `longer` outlive `shorter`?
    fn outlives(&self, longer: Lifetime, shorter: Lifetime) -> bool;
}

impl<C: QueryContext + ?Sized> QueryContext for &C {
    fn outlives(&self, longer: Lifetime, shorter: Lifetime) -> bool {
        (**self).outlives(longer, shorter)
    }
}

/// `'static` outlives everything, and every lifetime outlives itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContext;

impl QueryContext for DefaultContext {
    fn outlives(&self, longer: Lifetime, shorter: Lifetime) -> bool {
        longer.is_static() || longer == shorter
    }
}

/// Outlives relations declared by the host, closed under transitivity.
#[derive(Debug, Default, Clone)]
pub struct Outlives {
    edges: Map<Lifetime, Set<Lifetime>>,
}

impl Outlives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `longer: shorter`.
    pub fn declare(&mut self, longer: Lifetime, shorter: Lifetime) -> &mut Self {
        self.edges.entry(longer).or_default().insert(shorter);
        self
    }
}

impl<const N: usize> From<[(Lifetime, Lifetime); N]> for Outlives {
    fn from(pairs: [(Lifetime, Lifetime); N]) -> Self {
        let mut outlives = Self::new();
        for (longer, shorter) in pairs {
            outlives.declare(longer, shorter);
        }
        outlives
    }
}

impl QueryContext for Outlives {
    fn outlives(&self, longer: Lifetime, shorter: Lifetime) -> bool {
        if DefaultContext.outlives(longer, shorter) {
            return true;
        }
        let mut seen = Set::default();
        let mut queue = vec![longer];
        while let Some(lifetime) = queue.pop() {
            if !seen.insert(lifetime) {
                continue;
            }
            for &next in self.edges.get(&lifetime).into_iter().flatten() {
                if next == shorter {
                    return true;
                }
                queue.push(next);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_outlives_everything() {
        let a = Lifetime::region(0);
        assert!(DefaultContext.outlives(Lifetime::STATIC, a));
        assert!(DefaultContext.outlives(a, a));
        assert!(!DefaultContext.outlives(a, Lifetime::STATIC));
        assert!(!DefaultContext.outlives(a, Lifetime::region(1)));
    }

    #[test]
    fn declared_outlives_are_transitive() {
        let (a, b, c) = (Lifetime::region(0), Lifetime::region(1), Lifetime::region(2));
        let outlives = Outlives::from([(a, b), (b, c)]);
        assert!(outlives.outlives(a, c));
        assert!(outlives.outlives(a, b));
        assert!(!outlives.outlives(c, a));
        assert!(!outlives.outlives(b, a));
    }
}
