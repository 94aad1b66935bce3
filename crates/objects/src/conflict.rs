//! [`Conflict`] and [`Lazy`]: the two primitives the merge algebra needs at every layer. They live
//! here, below `strata-merge` in the dependency graph, so the `Contents`/`Metadata` capability
//! traits can reference them without an upward dependency on the merge combinator DSL.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use strata_hash::Path;
use strata_hash::Step;

/// A merge could not be reconciled. Carries the path at which it arose, filled in one step at a
/// time as the conflict unwinds out of a recursive node/tree merge, so the path in the final
/// message reads root-to-leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub path: Option<Path>,
    pub reason: String,
}

impl Conflict {
    pub fn new(reason: impl Into<String>) -> Self {
        Conflict { path: None, reason: reason.into() }
    }

    /// Prepends `step` to the conflict's path. Called once per recursion level on the way out of
    /// a node or tree merge.
    pub fn at(mut self, step: Step) -> Self {
        let mut steps = vec![step];
        if let Some(rest) = self.path.take() {
            steps.extend(rest.steps().iter().cloned());
        }
        self.path = Some(Path::from_steps(steps));
        self
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "conflict at {path}: {}", self.reason),
            None => write!(f, "conflict: {}", self.reason),
        }
    }
}

impl std::error::Error for Conflict {}

type PendingFuture<T> = Pin<Box<dyn Future<Output = Result<Option<T>, Conflict>> + Send>>;

enum LazyState<T> {
    Pending(PendingFuture<T>),
    Ready(Result<Option<T>, Conflict>),
}

/// The ancestor ("old") side of a three-way merge, as a thunk invoked at most once and memoised.
/// Combinators that never inspect the ancestor (`ours`, `theirs`) can skip the underlying read
/// entirely by never calling [`Lazy::get`].
pub struct Lazy<T> {
    state: LazyState<T>,
}

impl<T: Clone> Lazy<T> {
    pub fn new<F>(thunk: F) -> Self
    where
        F: Future<Output = Result<Option<T>, Conflict>> + Send + 'static,
    {
        Lazy { state: LazyState::Pending(Box::pin(thunk)) }
    }

    /// Wraps an already-known value, for callers that resolved `old` eagerly (e.g. because they
    /// already had it in hand from a prior read).
    pub fn ready(value: Result<Option<T>, Conflict>) -> Self {
        Lazy { state: LazyState::Ready(value) }
    }

    pub async fn get(&mut self) -> Result<Option<T>, Conflict> {
        if let LazyState::Pending(fut) = &mut self.state {
            let result = fut.as_mut().await;
            self.state = LazyState::Ready(result.clone());
        }
        match &self.state {
            LazyState::Ready(result) => result.clone(),
            LazyState::Pending(_) => unreachable!("resolved above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_at_builds_root_to_leaf_path() {
        let c = Conflict::new("mismatch").at(Step::new("b")).at(Step::new("a"));
        assert_eq!(c.path.unwrap().to_string(), "/a/b");
    }

    #[tokio::test]
    async fn lazy_thunk_runs_at_most_once() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::atomic::Ordering;
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let mut lazy: Lazy<i32> = Lazy::new(async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(Some(7))
        });

        assert_eq!(lazy.get().await.unwrap(), Some(7));
        assert_eq!(lazy.get().await.unwrap(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
