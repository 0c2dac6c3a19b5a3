use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Characters that may not appear in a feature name, and what replaces them.
const SUBSTITUTIONS: &[(char, &str)] = &[
    ('[', "_"),
    (']', "_"),
    ('{', "_"),
    ('}', "_"),
    ('"', ""),
    ('\'', ""),
    ('\\', ""),
    (':', "_"),
    (',', "_"),
    (' ', "_"),
    ('<', "lt"),
    ('>', "gt"),
    ('=', "eq"),
    ('(', "_"),
    (')', "_"),
];

/// Normalize a raw feature name: apply the substitution table, collapse
/// underscore runs, strip leading and trailing underscores.
///
/// Idempotent: `sanitize(&sanitize(s)) == sanitize(s)`.
pub fn sanitize(raw: &str) -> String {
    let mut substituted = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match SUBSTITUTIONS.iter().find(|(c, _)| *c == ch) {
            Some((_, replacement)) => substituted.push_str(replacement),
            None => substituted.push(ch),
        }
    }

    let mut collapsed = String::with_capacity(substituted.len());
    let mut prev_underscore = false;
    for ch in substituted.chars() {
        if ch == '_' {
            if !prev_underscore {
                collapsed.push(ch);
            }
            prev_underscore = true;
        } else {
            collapsed.push(ch);
            prev_underscore = false;
        }
    }

    collapsed.trim_matches('_').to_string()
}

/// A sanitized feature column name. Only constructible through [`sanitize`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FeatureName(String);

impl FeatureName {
    pub fn sanitize(raw: &str) -> Self {
        FeatureName(sanitize(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FeatureName {
    fn from(raw: String) -> Self {
        FeatureName::sanitize(&raw)
    }
}

impl From<&str> for FeatureName {
    fn from(raw: &str) -> Self {
        FeatureName::sanitize(raw)
    }
}

impl From<FeatureName> for String {
    fn from(name: FeatureName) -> Self {
        name.0
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Named feature values for a single window, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    names: Vec<FeatureName>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn from_pairs<I, N>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, f64)>,
        N: Into<FeatureName>,
    {
        let mut names = Vec::new();
        let mut values = Vec::new();
        for (name, value) in pairs {
            names.push(name.into());
            values.push(value);
        }
        Self { names, values }
    }

    pub fn names(&self) -> &[FeatureName] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, name: &FeatureName) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FeatureName, f64)> {
        self.names.iter().zip(self.values.iter().copied())
    }
}

/// Row-per-window feature matrix with an ordered column schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    ids: Vec<String>,
    columns: Vec<FeatureName>,
    values: Array2<f64>,
}

impl FeatureFrame {
    /// Returns `None` when the id/column counts disagree with the matrix shape.
    pub fn new(ids: Vec<String>, columns: Vec<FeatureName>, values: Array2<f64>) -> Option<Self> {
        if values.nrows() != ids.len() || values.ncols() != columns.len() {
            return None;
        }
        Some(Self { ids, columns, values })
    }

    pub fn empty(ids: Vec<String>) -> Self {
        let rows = ids.len();
        Self {
            ids,
            columns: Vec::new(),
            values: Array2::zeros((rows, 0)),
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn columns(&self) -> &[FeatureName] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn column(&self, j: usize) -> ArrayView1<'_, f64> {
        self.values.column(j)
    }

    pub fn column_index(&self, name: &FeatureName) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row(&self, i: usize) -> FeatureVector {
        FeatureVector {
            names: self.columns.clone(),
            values: self.values.row(i).to_vec(),
        }
    }

    pub fn select_columns(&self, indices: &[usize]) -> FeatureFrame {
        FeatureFrame {
            ids: self.ids.clone(),
            columns: indices.iter().map(|&j| self.columns[j].clone()).collect(),
            values: self.values.select(Axis(1), indices),
        }
    }

    pub fn select_rows(&self, indices: &[usize]) -> FeatureFrame {
        FeatureFrame {
            ids: indices.iter().map(|&i| self.ids[i].clone()).collect(),
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), indices),
        }
    }

    /// Append another frame's columns. Both frames must share row ids.
    pub fn hconcat(mut self, other: FeatureFrame) -> Option<FeatureFrame> {
        if self.ids != other.ids {
            return None;
        }
        if self.n_cols() == 0 {
            return Some(other);
        }
        let values = ndarray::concatenate(Axis(1), &[self.values.view(), other.values.view()]).ok()?;
        self.columns.extend(other.columns);
        self.values = values;
        Some(self)
    }

    /// Re-run sanitization over the column names. Columns that collide after
    /// sanitization keep their first occurrence.
    pub fn sanitized(self) -> FeatureFrame {
        let mut seen = HashSet::new();
        let mut keep = Vec::with_capacity(self.columns.len());
        let mut names = Vec::with_capacity(self.columns.len());
        for (j, name) in self.columns.iter().enumerate() {
            let clean = FeatureName::sanitize(name.as_str());
            if seen.insert(clean.clone()) {
                keep.push(j);
                names.push(clean);
            } else {
                tracing::debug!("Dropping duplicate feature column after sanitization: {}", clean);
            }
        }
        FeatureFrame {
            ids: self.ids,
            columns: names,
            values: self.values.select(Axis(1), &keep),
        }
    }
}
