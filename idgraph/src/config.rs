//! Graph construction configuration.
//!
//! Built with bon builders, with environment variable fallbacks.

use bon::bon;

/// Default cap on union steps performed by a single mapping request.
pub const DEFAULT_PROPAGATION_LIMIT: usize = 1_000_000;

/// Configuration for [`IterDomainGraphs::build`](crate::IterDomainGraphs::build).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdGraphConfig {
    /// Tolerate two dimensions of one tensor being mapped together.
    ///
    /// When set, the first such pair is still recorded and queryable.
    pub allow_self_mapping: bool,
    /// Build the LOOP graph. Disabling it leaves only the three analytical modes.
    pub build_loop: bool,
    /// Maximum number of union steps a single mapping request may perform.
    pub propagation_limit: usize,
}

impl Default for IdGraphConfig {
    fn default() -> Self {
        Self { allow_self_mapping: false, build_loop: true, propagation_limit: DEFAULT_PROPAGATION_LIMIT }
    }
}

#[bon]
impl IdGraphConfig {
    #[builder(finish_fn = build)]
    pub fn builder(
        #[builder(default = false)] allow_self_mapping: bool,
        #[builder(default = true)] build_loop: bool,
        #[builder(default = DEFAULT_PROPAGATION_LIMIT)] propagation_limit: usize,
    ) -> Self {
        Self { allow_self_mapping, build_loop, propagation_limit }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_ALLOW_SELF_MAPPING=1` - Tolerate self-mapped tensors
    /// * `KILN_NO_LOOP_MAP=1` - Skip building the LOOP graph
    /// * `KILN_PROPAGATION_LIMIT=N` - Union steps per mapping request (default: 1000000)
    pub fn from_env() -> Self {
        let flag = |name: &str| std::env::var(name).is_ok_and(|v| v == "1");
        let propagation_limit = std::env::var("KILN_PROPAGATION_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_PROPAGATION_LIMIT);

        Self {
            allow_self_mapping: flag("KILN_ALLOW_SELF_MAPPING"),
            build_loop: !flag("KILN_NO_LOOP_MAP"),
            propagation_limit,
        }
    }
}
