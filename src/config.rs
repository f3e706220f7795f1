use crate::stream::{MAX_ID_WIDTH, MAX_VSIZE_WIDTH};

/// Options controlling how documents and elements are loaded
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct ReadOptions {
    pub(crate) verify_checksums: bool,
    pub(crate) max_depth: usize,
    pub(crate) max_id_length: usize,
    pub(crate) max_size_length: usize,
}

impl Default for ReadOptions {
    /// The defaults are as follows:
    ///
    /// ```rust,ignore
    /// ReadOptions {
    ///     verify_checksums: true,
    ///     max_depth: 16,
    ///     max_id_length: 4,
    ///     max_size_length: 8,
    /// }
    /// ```
    fn default() -> Self {
        Self::new()
    }
}

impl ReadOptions {
    /// Default limit on master element nesting
    pub const DEFAULT_MAX_DEPTH: usize = 16;

    /// Creates a new `ReadOptions`, alias for `Default` implementation
    #[must_use]
    pub const fn new() -> Self {
        Self {
            verify_checksums: true,
            max_depth: Self::DEFAULT_MAX_DEPTH,
            max_id_length: MAX_ID_WIDTH,
            max_size_length: MAX_VSIZE_WIDTH,
        }
    }

    /// Whether a CRC-32 element that does not match its master fails the load
    ///
    /// When disabled, the mismatch is only logged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ebml_codec::ReadOptions;
    ///
    /// // Salvage what we can from a damaged file.
    /// let options = ReadOptions::new().verify_checksums(false);
    /// ```
    pub fn verify_checksums(&mut self, verify_checksums: bool) -> Self {
        self.verify_checksums = verify_checksums;
        *self
    }

    /// The deepest master nesting accepted before failing with `TooDeep`
    pub fn max_depth(&mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        *self
    }

    /// Longest element ID accepted, in bytes (clamped to 1..=4)
    pub fn max_id_length(&mut self, max_id_length: usize) -> Self {
        self.max_id_length = max_id_length.clamp(1, MAX_ID_WIDTH);
        *self
    }

    /// Longest size field accepted, in bytes (clamped to 1..=8)
    pub fn max_size_length(&mut self, max_size_length: usize) -> Self {
        self.max_size_length = max_size_length.clamp(1, MAX_VSIZE_WIDTH);
        *self
    }
}
