//! The L5 merge combinator algebra (`spec.md` §4.5 / §8): small, composable three-way merge
//! functions over the same `old: Lazy<T>, a: Option<&T>, b: Option<&T>` shape
//! [`strata_objects::Contents::merge3`] already uses, so an application can build a `Contents`
//! impl's merge policy out of these instead of hand-rolling it.
//!
//! No single teacher file is a general merge-combinator DSL; this crate is grounded on the
//! closest pack analogue — `sapling-revset`'s compositional stream combinators
//! (`IntersectNodeStream`, `UnionNodeStream` compose `NodeStream`s the way this crate composes
//! [`Merge3`] impls) and `sapling-dag`'s pattern of small default combinators layered over one
//! core trait.

use std::ops::Add;
use std::ops::Sub;
use std::sync::Arc;

use async_trait::async_trait;
use strata_objects::Conflict;
use strata_objects::Lazy;

/// The shape every combinator implements: a three-way merge over `Option<T>`, with the ancestor
/// side wrapped in [`Lazy`] so combinators that never need it (`ours`, `theirs`) never force the
/// read behind it.
#[async_trait]
pub trait Merge3<T>: Send + Sync {
    async fn merge3(&self, old: &mut Lazy<T>, a: Option<&T>, b: Option<&T>) -> Result<Option<T>, Conflict>;
}

/// Always takes `a`, ignoring `b` and never consulting `old`.
struct Ours;

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Merge3<T> for Ours {
    async fn merge3(&self, _old: &mut Lazy<T>, a: Option<&T>, _b: Option<&T>) -> Result<Option<T>, Conflict> {
        Ok(a.cloned())
    }
}

pub fn ours<T: Clone + Send + Sync + 'static>() -> Arc<dyn Merge3<T>> {
    Arc::new(Ours)
}

/// Always takes `b`, the mirror image of [`ours`].
struct Theirs;

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Merge3<T> for Theirs {
    async fn merge3(&self, _old: &mut Lazy<T>, _a: Option<&T>, b: Option<&T>) -> Result<Option<T>, Conflict> {
        Ok(b.cloned())
    }
}

pub fn theirs<T: Clone + Send + Sync + 'static>() -> Arc<dyn Merge3<T>> {
    Arc::new(Theirs)
}

/// The generic three-way shortcut rules (`a == b`; one side unchanged from `old`), falling
/// through to a conflict only when both sides genuinely diverge. The same rule every node/tree/
/// contents merge in `strata-objects` applies before its own type-specific logic.
struct ConflictIfBothChanged;

#[async_trait]
impl<T: Clone + PartialEq + Send + Sync + 'static> Merge3<T> for ConflictIfBothChanged {
    async fn merge3(&self, old: &mut Lazy<T>, a: Option<&T>, b: Option<&T>) -> Result<Option<T>, Conflict> {
        if a == b {
            return Ok(a.cloned());
        }
        let old_value = old.get().await?;
        if old_value.as_ref() == a {
            return Ok(b.cloned());
        }
        if old_value.as_ref() == b {
            return Ok(a.cloned());
        }
        Err(Conflict::new("both sides changed"))
    }
}

pub fn conflict_if_both_changed<T: Clone + PartialEq + Send + Sync + 'static>() -> Arc<dyn Merge3<T>> {
    Arc::new(ConflictIfBothChanged)
}

/// Tries each combinator in order, returning the first one that doesn't conflict. Implements the
/// §8 "conflict monotonicity" law: `seq([k1, k2])` is `k1`'s result unless it conflicts, in which
/// case it's `k2`'s. `old` is shared across every attempt — [`Lazy`] memoises the read, so trying
/// several combinators that each consult `old` still reads the backend at most once.
struct Seq<T> {
    combinators: Vec<Arc<dyn Merge3<T>>>,
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Merge3<T> for Seq<T> {
    async fn merge3(&self, old: &mut Lazy<T>, a: Option<&T>, b: Option<&T>) -> Result<Option<T>, Conflict> {
        let mut last_err = Conflict::new("seq() called with no combinators");
        for combinator in &self.combinators {
            match combinator.merge3(old, a, b).await {
                Ok(value) => return Ok(value),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }
}

pub fn seq<T: Clone + Send + Sync + 'static>(combinators: Vec<Arc<dyn Merge3<T>>>) -> Arc<dyn Merge3<T>> {
    Arc::new(Seq { combinators })
}

/// The §8 counter law combinator: `merge(old, old+Δa, old+Δb) = old+Δa+Δb`, computed directly as
/// `a + b - old` (algebraically identical, and handles the "one side unchanged" cases for free:
/// if `a == old` the formula reduces to `b`, and symmetrically for `b == old`). The `a == b`
/// shortcut still has to come first, though — two sides independently changing to the *same*
/// value must return that value, not `2a - old`, to satisfy the identity law.
struct Counter;

#[async_trait]
impl<T> Merge3<T> for Counter
where
    T: Copy + Add<Output = T> + Sub<Output = T> + Eq + Send + Sync + 'static,
{
    async fn merge3(&self, old: &mut Lazy<T>, a: Option<&T>, b: Option<&T>) -> Result<Option<T>, Conflict> {
        match (a, b) {
            (None, None) => Ok(None),
            (Some(a), None) => Ok(Some(*a)),
            (None, Some(b)) => Ok(Some(*b)),
            (Some(a), Some(b)) if a == b => Ok(Some(*a)),
            (Some(a), Some(b)) => {
                let old_value = old
                    .get()
                    .await?
                    .ok_or_else(|| Conflict::new("counter merge requires an ancestor value when both sides changed"))?;
                Ok(Some(*a + *b - old_value))
            }
        }
    }
}

pub fn counter<T>() -> Arc<dyn Merge3<T>>
where
    T: Copy + Add<Output = T> + Sub<Output = T> + Eq + Send + Sync + 'static,
{
    Arc::new(Counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready<T: Clone + Send + Sync + 'static>(value: Option<T>) -> Lazy<T> {
        Lazy::ready(Ok(value))
    }

    #[tokio::test]
    async fn identity_law_holds_for_every_combinator() {
        let combinators: Vec<Arc<dyn Merge3<i32>>> = vec![
            ours(),
            theirs(),
            conflict_if_both_changed(),
            seq(vec![conflict_if_both_changed(), ours()]),
            counter(),
        ];
        for combinator in combinators {
            let mut old = ready(Some(5));
            let result = combinator.merge3(&mut old, Some(&9), Some(&9)).await.unwrap();
            assert_eq!(result, Some(9));
        }
    }

    #[tokio::test]
    async fn ours_never_forces_the_ancestor_thunk() {
        let mut old: Lazy<i32> = Lazy::new(async { panic!("ours() must not read old") });
        let result = ours().merge3(&mut old, Some(&1), Some(&2)).await.unwrap();
        assert_eq!(result, Some(1));
    }

    #[tokio::test]
    async fn conflict_if_both_changed_takes_the_side_that_matches_old() {
        let mut old = ready(Some(5));
        let result = conflict_if_both_changed().merge3(&mut old, Some(&5), Some(&9)).await.unwrap();
        assert_eq!(result, Some(9));
    }

    #[tokio::test]
    async fn conflict_if_both_changed_conflicts_when_both_diverge() {
        let mut old = ready(Some(5));
        let err = conflict_if_both_changed().merge3(&mut old, Some(&7), Some(&9)).await.unwrap_err();
        assert_eq!(err.reason, "both sides changed");
    }

    #[tokio::test]
    async fn seq_falls_through_to_the_next_combinator_on_conflict() {
        let combinator = seq(vec![conflict_if_both_changed(), ours()]);
        let mut old = ready(Some(5));
        let result = combinator.merge3(&mut old, Some(&7), Some(&9)).await.unwrap();
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn counter_law_computes_old_plus_both_deltas() {
        let mut old = ready(Some(5));
        let result = counter().merge3(&mut old, Some(&7), Some(&4)).await.unwrap();
        assert_eq!(result, Some(6));
    }

    #[tokio::test]
    async fn counter_takes_the_changed_side_when_the_other_is_unchanged() {
        let mut old = ready(Some(5));
        let result = counter().merge3(&mut old, Some(&5), Some(&11)).await.unwrap();
        assert_eq!(result, Some(11));
    }

    quickcheck::quickcheck! {
        fn prop_counter_law(old: i32, delta_a: i8, delta_b: i8) -> bool {
            // Keep `old` away from the i32 edges so `old + delta_a + delta_b` cannot overflow.
            let old = old % 1_000_000;
            let delta_a = delta_a as i32;
            let delta_b = delta_b as i32;
            let a = old + delta_a;
            let b = old + delta_b;
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let mut lazy_old = ready(Some(old));
                let merged = counter().merge3(&mut lazy_old, Some(&a), Some(&b)).await.unwrap();
                merged == Some(old + delta_a + delta_b)
            })
        }
    }
}
