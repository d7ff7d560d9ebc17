use serde::Deserialize;

/// Configuration for [`DescriptorDatabase::new_with_config`].
///
/// [`DescriptorDatabase::new_with_config`]: super::DescriptorDatabase::new_with_config
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Ignore the precomputed index of a bundle and scan its body instead.
    ///
    /// Useful to measure the fast path against the builder path, or to work
    /// around a stale index. Default: `false`.
    pub skip_prebuilt_index: bool,
}
