//! Maps extracted features onto a trained model's column schema.

use ndarray::Array2;
use std::collections::HashMap;

use crate::types::{FeatureFrame, FeatureName, FeatureVector};

/// Reorder `extracted` to exactly `schema`: missing columns become 0 and
/// columns outside the schema are dropped.
pub fn align(extracted: &FeatureVector, schema: &[FeatureName]) -> FeatureVector {
    let lookup: HashMap<&FeatureName, f64> = extracted.iter().collect();
    FeatureVector::from_pairs(
        schema
            .iter()
            .map(|name| (name.clone(), lookup.get(name).copied().unwrap_or(0.0))),
    )
}

/// Frame version of [`align`], keeping row ids.
pub fn align_frame(frame: &FeatureFrame, schema: &[FeatureName]) -> FeatureFrame {
    if frame.columns() == schema {
        return frame.clone();
    }
    let positions: Vec<Option<usize>> = schema.iter().map(|name| frame.column_index(name)).collect();
    let mut values = Array2::<f64>::zeros((frame.n_rows(), schema.len()));
    for (j, position) in positions.iter().enumerate() {
        if let Some(src) = position {
            values.column_mut(j).assign(&frame.column(*src));
        }
    }
    FeatureFrame::new(frame.ids().to_vec(), schema.to_vec(), values)
        .unwrap_or_else(|| FeatureFrame::empty(frame.ids().to_vec()))
}
