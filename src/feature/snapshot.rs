use std::sync::Arc;

use anyhow::Result;

use crate::error::PipelineError;
use super::{Feature, Layer};

/// An immutable, id-ordered read of one source.
#[derive(Debug, Clone)]
pub struct Snapshot {
    name: Arc<str>,
    features: Vec<Feature>,
}

impl Snapshot {
    /// Sort `features` by id; duplicate ids are an invariant violation.
    pub fn new(name: &str, mut features: Vec<Feature>) -> Result<Self> {
        features.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = features.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(PipelineError::Invariant(
                format!("duplicate id {:?} in source {name}", pair[0].id)
            ).into());
        }
        Ok(Self { name: Arc::from(name), features })
    }

    #[inline] pub fn len(&self) -> usize { self.features.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.features.is_empty() }
}

impl Layer for Snapshot {
    fn name(&self) -> &str { &self.name }
    fn features(&self) -> &[Feature] { &self.features }
}
