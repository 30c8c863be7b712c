//! Structural self-checks for the patch store and its descriptors.
//!
//! Checks run in debug builds, or in release builds with the
//! `check-invariants` / `strict-invariants` features.

use crate::engine_error::EngineError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Validate invariants and return the first violation encountered.
    fn validate_invariants(&self) -> Result<(), EngineError>;

    /// Panic on the first violation when invariant checking is enabled.
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "debug_assert_invariants");
    }
}

/// Return `err()` unless `cond` holds.
#[inline]
pub fn ensure(cond: bool, err: impl FnOnce() -> EngineError) -> Result<(), EngineError> {
    if cond { Ok(()) } else { Err(err()) }
}

/// Run a fallible check and panic with the caller's location on error when
/// invariant checking is enabled. Compiles to nothing otherwise.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", module_path!(), ": ", $($ctx)*, ": {}"), e);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysBroken;

    impl DebugInvariants for AlwaysBroken {
        fn validate_invariants(&self) -> Result<(), EngineError> {
            ensure(false, || EngineError::Wire("broken on purpose".into()))
        }
    }

    #[test]
    fn ensure_passes_through() {
        assert!(ensure(true, || EngineError::Wire("unused".into())).is_ok());
        assert!(AlwaysBroken.validate_invariants().is_err());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "broken on purpose")]
    fn debug_assert_panics_in_debug_builds() {
        AlwaysBroken.debug_assert_invariants();
    }
}
