use crate::resource::Headers;
use serde::Deserialize;

/// How many decode workers each encoding may use.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerPolicy {
    /// Workers are started on demand and kept for reuse.
    #[default]
    Unbounded,
    /// At most `max_workers` per encoding; further requests wait for a free worker.
    #[serde(rename_all = "camelCase")]
    Bounded { max_workers: usize },
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PotreeConfig {
    /// Metadata document name, relative to the point cloud url.
    pub metadata_file: String,
    pub worker_policy: WorkerPolicy,
    /// Reject hierarchy chunks that announce children they never describe.
    pub strict_hierarchy: bool,
    /// Sent with every request.
    pub headers: Headers,
}

impl Default for PotreeConfig {
    fn default() -> Self {
        Self {
            metadata_file: "metadata.json".to_string(),
            worker_policy: WorkerPolicy::default(),
            strict_hierarchy: false,
            headers: Headers::new(),
        }
    }
}
