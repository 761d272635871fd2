//! JSON loader for the offline centroid model artifact.

use crate::domain::error::PxiError;
use crate::domain::regime::CentroidModel;
use std::fs;
use std::path::Path;

/// Read and validate a centroid model. A model that fails validation is
/// never returned.
pub fn load_model(path: &Path) -> Result<CentroidModel, PxiError> {
    let content = fs::read_to_string(path).map_err(|e| PxiError::Data {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    parse_model(&content)
}

pub fn parse_model(json: &str) -> Result<CentroidModel, PxiError> {
    let model: CentroidModel = serde_json::from_str(json).map_err(|e| PxiError::ModelInvalid {
        reason: format!("malformed model JSON: {e}"),
    })?;
    model.validate()?;
    tracing::info!(
        version = %model.version,
        centroids = model.centroids.len(),
        features = model.features.len(),
        "centroid model loaded"
    );
    Ok(model)
}
