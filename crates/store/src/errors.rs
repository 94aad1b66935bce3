use thiserror::Error;

/// Backend kernel errors. `spec.md` §7 requires every kernel operation to "either succeed or
/// raise a backend I/O error; no partial application" — `Io` is that failure mode. The other
/// variants surface the invalid-argument class for operations that can statically detect a
/// malformed request (a link to a target that was never added).
#[derive(Debug, Error)]
pub enum Error {
    #[error("backend I/O error: {0}")]
    Io(String),

    #[error("link target not found: {0}")]
    LinkTargetNotFound(String),
}
