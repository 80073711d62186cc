//! Cache key and completion digest derivation
//!
//! Keys are blake3 hashes rendered as `blake3:<hex>`. Every field is
//! length-prefixed before hashing so adjacent values cannot run together.

use crate::core::pipeline::{ExecutorKind, Task};
use std::collections::BTreeMap;

const KEY_PREFIX: &str = "blake3:";

struct KeyHasher(blake3::Hasher);

impl KeyHasher {
    fn new(domain: &str) -> Self {
        let mut hasher = Self(blake3::Hasher::new());
        hasher.field(domain);
        hasher
    }

    fn field(&mut self, value: &str) -> &mut Self {
        self.0.update(&(value.len() as u64).to_le_bytes());
        self.0.update(value.as_bytes());
        self
    }

    fn count(&mut self, n: usize) -> &mut Self {
        self.0.update(&(n as u64).to_le_bytes());
        self
    }

    fn finish(&self) -> String {
        format!("{}{}", KEY_PREFIX, self.0.finalize().to_hex())
    }
}

/// Derive the cache key of a task.
///
/// Covers the executor definition as given (the engine passes it rendered,
/// with `run_id` and `output_uri` left as placeholders), the task's extra
/// key inputs, and the completion digests of its direct dependencies.
/// `dependency_digests` is keyed by dependency task name, so iteration is
/// already sorted by name.
pub fn cache_key(
    task: &Task,
    executor: &ExecutorKind,
    dependency_digests: &BTreeMap<String, String>,
) -> String {
    let mut hasher = KeyHasher::new("task-cache-key/v1");
    hasher.field(executor.name());

    match executor {
        ExecutorKind::Container(spec) => {
            hasher.field(&spec.image);
            hasher.count(spec.command.len());
            for part in &spec.command {
                hasher.field(part);
            }
            hasher.count(spec.args.len());
            for arg in &spec.args {
                hasher.field(arg);
            }
            hasher.count(spec.env.len());
            for (key, value) in &spec.env {
                hasher.field(key).field(value);
            }
        }
        ExecutorKind::Importer { artifact_uri } => {
            hasher.field(artifact_uri);
        }
    }

    hasher.count(task.caching.key_inputs.len());
    for input in &task.caching.key_inputs {
        hasher.field(input);
    }

    hasher.count(dependency_digests.len());
    for (name, digest) in dependency_digests {
        hasher.field(name).field(digest);
    }

    hasher.finish()
}

/// Digest handed to dependents once a node completes
pub fn completion_digest(cache_key: &str, output_ref: &str) -> String {
    KeyHasher::new("task-completion/v1")
        .field(cache_key)
        .field(output_ref)
        .finish()
}
