//! Clinical significance lookup: local snapshot first, remote as the
//! degraded-mode fallback.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};
use variantflow_shared::{Annotation, Variant};

use crate::local_index::LocalClinVarIndex;
use crate::remote::RemoteClinVar;

/// Which path a lookup took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    Local,
    Remote,
    Unavailable,
}

/// Curated clinical significance for a set of variants.
#[derive(Clone, Default)]
pub struct ClinicalSignificanceLookup {
    local: Option<Arc<LocalClinVarIndex>>,
    remote: Option<RemoteClinVar>,
}

impl ClinicalSignificanceLookup {
    pub fn new(local: Option<Arc<LocalClinVarIndex>>, remote: Option<RemoteClinVar>) -> Self {
        Self { local, remote }
    }

    pub fn mode(&self) -> LookupMode {
        match (&self.local, &self.remote) {
            (Some(_), _) => LookupMode::Local,
            (None, Some(_)) => LookupMode::Remote,
            (None, None) => LookupMode::Unavailable,
        }
    }

    /// Annotations keyed by variant id. Variants without a curated record are
    /// simply absent.
    pub async fn annotate(
        &self,
        variants: &[Variant],
        yield_every: usize,
    ) -> BTreeMap<String, Annotation> {
        let mut out = BTreeMap::new();

        match self.mode() {
            LookupMode::Local => {
                let Some(index) = &self.local else {
                    return out;
                };
                info!(variants = variants.len(), "using local clinical index");
                for (i, variant) in variants.iter().enumerate() {
                    if let Some(ann) = index.annotate(variant) {
                        out.insert(ann.variant_id.clone(), ann);
                    }
                    if yield_every > 0 && (i + 1) % yield_every == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }
            LookupMode::Remote => {
                let Some(remote) = &self.remote else {
                    return out;
                };
                info!(
                    variants = variants.len(),
                    cap = remote.max_variants(),
                    "local clinical index unavailable, using rate-limited remote lookup"
                );
                for ann in remote.annotate_all(variants).await {
                    out.insert(ann.variant_id.clone(), ann);
                }
            }
            LookupMode::Unavailable => {
                warn!("no clinical significance source configured");
            }
        }

        info!(found = out.len(), "clinical significance lookup complete");
        out
    }
}
