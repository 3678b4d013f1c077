//! Forest serialization and deserialization via bincode.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::error::ForestError;
use crate::forest::Forest;

/// Current binary format version.
const FORMAT_VERSION: u32 = 1;

/// Versioned envelope for the serialized forest.
#[derive(serde::Serialize, serde::Deserialize)]
struct ForestEnvelope {
    /// Format version for compatibility checking.
    format_version: u32,
    /// Number of trees in the forest.
    num_trees: usize,
    /// Column count of the training data.
    num_cols: usize,
    /// Outcome column index.
    outcome_index: usize,
    /// CI group size the forest was trained with.
    ci_group_size: usize,
    /// The serialized forest.
    forest: Forest,
}

impl Forest {
    /// Serialize the forest into a versioned byte stream.
    ///
    /// The stream restores the trees, their out-of-bag row sets, the
    /// training outcomes, and the forest metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::SerializeForest`] when encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ForestError> {
        let envelope = ForestEnvelope {
            format_version: FORMAT_VERSION,
            num_trees: self.trees.len(),
            num_cols: self.num_cols,
            outcome_index: self.outcome_index,
            ci_group_size: self.ci_group_size,
            forest: self.clone(),
        };
        bincode::serialize(&envelope).map_err(|source| ForestError::SerializeForest { source })
    }

    /// Restore a forest from a byte stream produced by [`Forest::to_bytes`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::DeserializeForest`] | bincode decoding failed |
    /// | [`ForestError::IncompatibleFormatVersion`] | format version mismatch |
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ForestError> {
        let envelope: ForestEnvelope = bincode::deserialize(bytes)
            .map_err(|source| ForestError::DeserializeForest { source })?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(ForestError::IncompatibleFormatVersion {
                expected: FORMAT_VERSION,
                found: envelope.format_version,
            });
        }
        debug!(
            num_trees = envelope.num_trees,
            num_cols = envelope.num_cols,
            "forest restored"
        );
        Ok(envelope.forest)
    }

    /// Save the forest to a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::SerializeForest`] | encoding failed |
    /// | [`ForestError::WriteForest`] | file write failed |
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ForestError> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes).map_err(|source| ForestError::WriteForest {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            size_bytes = bytes.len(),
            num_trees = self.trees.len(),
            "forest saved"
        );
        Ok(())
    }

    /// Load a forest from a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::ReadForest`] | file read failed |
    /// | [`ForestError::DeserializeForest`] | bincode decoding failed |
    /// | [`ForestError::IncompatibleFormatVersion`] | format version mismatch |
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ForestError::ReadForest {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }
}
