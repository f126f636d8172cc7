//! Bag configuration.

/// Environment variable that forces a full index rebuild on open.
pub const FORCE_REBUILD_ENV: &str = "BAGSTORE_FORCE_REBUILD";

/// Configuration for opening a bag.
#[derive(Debug, Clone)]
pub struct BagConfig {
    /// Rebuild every index on open even after a clean shutdown.
    pub force_rebuild: bool,

    /// Number of workers rebuilding indexes in parallel.
    pub rebuild_workers: usize,

    /// Whether to create an on-disk instance if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for BagConfig {
    fn default() -> Self {
        Self {
            force_rebuild: false,
            rebuild_workers: 2,
            create_if_missing: true,
        }
    }
}

impl BagConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration honouring [`FORCE_REBUILD_ENV`].
    ///
    /// Builder calls made afterwards take precedence.
    #[must_use]
    pub fn from_env() -> Self {
        let force = std::env::var(FORCE_REBUILD_ENV)
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        Self::default().force_rebuild(force)
    }

    /// Sets whether to rebuild indexes on every open.
    #[must_use]
    pub const fn force_rebuild(mut self, value: bool) -> Self {
        self.force_rebuild = value;
        self
    }

    /// Sets the number of rebuild workers (at least one).
    #[must_use]
    pub const fn rebuild_workers(mut self, workers: usize) -> Self {
        self.rebuild_workers = if workers == 0 { 1 } else { workers };
        self
    }

    /// Sets whether to create a missing instance directory.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}
