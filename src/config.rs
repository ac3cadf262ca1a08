use std::str::FromStr;

/// Toggles for barrier generation and queue submission.
///
/// Passed by value into the batcher, transition creation and the queue engines, so
/// the same inputs always produce the same barriers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Fold same-queue transitions without a layout change into a single global memory barrier.
    pub fold_memory_barriers: bool,
    /// When folding, a source that only read the resource contributes an execution dependency only.
    pub skip_read_only_access: bool,
    /// Upper bound on barriers per dependency call. `0` means unlimited.
    pub max_barriers_per_batch: usize,
    /// Use events to split same-queue barriers into a signal and a wait half.
    pub allow_split_barriers: bool,
    /// Buffers are created with concurrent sharing; no ownership transfers are patched for them.
    pub concurrent_buffers: bool,
    /// Images are created with concurrent sharing; no ownership transfers are patched for them.
    pub concurrent_images: bool,
    /// Debug feature: block on every submission when the queue completes through fences.
    pub wait_for_idle_on_submit: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fold_memory_barriers: true,
            skip_read_only_access: true,
            max_barriers_per_batch: 0,
            allow_split_barriers: true,
            concurrent_buffers: false,
            concurrent_images: false,
            wait_for_idle_on_submit: false,
        }
    }
}

impl SyncConfig {
    /// Default configuration with each field overridable through a `DUSTASH_SYNC_*` variable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        override_field(&lookup, "DUSTASH_SYNC_FOLD_MEMORY_BARRIERS", &mut config.fold_memory_barriers);
        override_field(&lookup, "DUSTASH_SYNC_SKIP_READ_ONLY_ACCESS", &mut config.skip_read_only_access);
        override_field(&lookup, "DUSTASH_SYNC_MAX_BARRIERS_PER_BATCH", &mut config.max_barriers_per_batch);
        override_field(&lookup, "DUSTASH_SYNC_ALLOW_SPLIT_BARRIERS", &mut config.allow_split_barriers);
        override_field(&lookup, "DUSTASH_SYNC_CONCURRENT_BUFFERS", &mut config.concurrent_buffers);
        override_field(&lookup, "DUSTASH_SYNC_CONCURRENT_IMAGES", &mut config.concurrent_images);
        override_field(&lookup, "DUSTASH_SYNC_WAIT_FOR_IDLE_ON_SUBMIT", &mut config.wait_for_idle_on_submit);
        tracing::debug!(config = ?config, "sync config");
        config
    }

    /// Whether barriers have to be chunked into several dependency calls.
    pub fn limits_batch_size(&self) -> bool {
        self.max_barriers_per_batch > 0
    }
}

fn override_field<T: FromFlag>(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match T::from_flag(raw.trim()) {
        Some(value) => *field = value,
        None => tracing::warn!(key, value = %raw, "ignoring unparsable sync config override"),
    }
}

trait FromFlag: Sized {
    fn from_flag(raw: &str) -> Option<Self>;
}

impl FromFlag for bool {
    fn from_flag(raw: &str) -> Option<Self> {
        match raw {
            "1" | "true" | "on" => Some(true),
            "0" | "false" | "off" => Some(false),
            _ => None,
        }
    }
}

impl FromFlag for usize {
    fn from_flag(raw: &str) -> Option<Self> {
        // Negative values mean "unlimited", same as zero.
        if raw.starts_with('-') {
            return i64::from_str(raw).ok().map(|_| 0);
        }
        usize::from_str(raw).ok()
    }
}
