//! Run-time configuration flags consumed by the sequence core.
//!
//! The flags are owned by the caller and passed explicitly to every operation
//! that needs them; there is no process-wide singleton. Reversible overrides
//! are expressed through [`Options::scoped`], which restores the saved state
//! when the guard leaves scope.

use std::ops::{Deref, DerefMut};

/// Externally owned configuration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Fail on missing values when writing or loading complete series.
    pub check_series: bool,
    /// Fill short external series with zero instead of the missing marker.
    pub use_default_values: bool,
    /// Downgrade any load failure of a simulation node series to a warning.
    pub warn_missing_sim_file: bool,
    /// Downgrade a missing observation node series file to a warning and
    /// deactivate the affected sequence's memory mode.
    pub warn_missing_obs_file: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            check_series: true,
            use_default_values: false,
            warn_missing_sim_file: false,
            warn_missing_obs_file: false,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a scoped override.
    ///
    /// The returned guard dereferences to [`Options`]; any flag changed
    /// through it is reverted when the guard is dropped.
    pub fn scoped(&mut self) -> ScopedOptions<'_> {
        ScopedOptions {
            saved: *self,
            target: self,
        }
    }
}

/// Guard restoring the previous option values on drop.
pub struct ScopedOptions<'a> {
    target: &'a mut Options,
    saved: Options,
}

impl Deref for ScopedOptions<'_> {
    type Target = Options;

    fn deref(&self) -> &Options {
        self.target
    }
}

impl DerefMut for ScopedOptions<'_> {
    fn deref_mut(&mut self) -> &mut Options {
        self.target
    }
}

impl Drop for ScopedOptions<'_> {
    fn drop(&mut self) {
        *self.target = self.saved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(options.check_series);
        assert!(!options.use_default_values);
    }

    #[test]
    fn scoped_override_reverts() {
        let mut options = Options::default();
        {
            let mut scoped = options.scoped();
            scoped.check_series = false;
            scoped.use_default_values = true;
            assert!(!scoped.check_series);
        }
        assert!(options.check_series);
        assert!(!options.use_default_values);
    }

    #[test]
    fn nested_scopes_revert_in_order() {
        let mut options = Options::default();
        {
            let mut outer = options.scoped();
            outer.check_series = false;
            {
                let mut inner = outer.scoped();
                inner.use_default_values = true;
                assert!(!inner.check_series);
            }
            assert!(!outer.use_default_values);
            assert!(!outer.check_series);
        }
        assert!(options.check_series);
    }
}
