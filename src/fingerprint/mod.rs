mod store;

use std::fmt;

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{feature::Layer, io::wkb};

pub use store::{FileFingerprintStore, FingerprintStore, MemFingerprintStore};

/// SHA-256 digest over a layer's sorted `(id, WKB)` pairs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    #[inline] pub fn to_hex(&self) -> String { hex::encode(self.0) }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        let digest: [u8; 32] = bytes.try_into()
            .map_err(|b: Vec<u8>| anyhow!("expected a 32-byte digest, got {} bytes", b.len()))?;
        Ok(Self(digest))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Digest of a layer's `(id, geometry)` multiset, independent of feature order.
///
/// Pairs are sorted by id (then by geometry bytes, for layers whose ids
/// repeat) and each field is length-prefixed so no two distinct pair lists
/// share a byte stream. Attributes other than the id do not participate.
pub fn fingerprint(layer: &dyn Layer) -> Result<Fingerprint> {
    let mut pairs = layer.features().iter()
        .map(|feature| {
            let mut bytes = Vec::new();
            wkb::write_multipolygon(&mut bytes, &feature.geometry)?;
            Ok((feature.id.as_str(), bytes))
        })
        .collect::<Result<Vec<_>>>()?;
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    for (id, geometry) in &pairs {
        hasher.update((id.len() as u64).to_le_bytes());
        hasher.update(id.as_bytes());
        hasher.update((geometry.len() as u64).to_le_bytes());
        hasher.update(geometry);
    }
    Ok(Fingerprint(hasher.finalize().into()))
}

/// Compares fresh fingerprints against the ones recorded at the last publish.
pub struct ChangeDetector<S> {
    store: S,
}

impl<S: FingerprintStore> ChangeDetector<S> {
    pub fn new(store: S) -> Self { Self { store } }

    #[inline] pub fn fingerprint(&self, layer: &dyn Layer) -> Result<Fingerprint> { fingerprint(layer) }

    /// True unless a stored fingerprint for `name` exists and equals `current`.
    /// A missing entry counts as changed.
    pub fn has_changed(&self, name: &str, current: &Fingerprint) -> Result<bool> {
        match self.store.get(name)? {
            Some(previous) if previous == *current => {
                debug!(source = name, fingerprint = %current, "unchanged");
                Ok(false)
            }
            Some(_) => {
                info!("Changes detected in {name}");
                Ok(true)
            }
            None => {
                warn!("Missing stored fingerprint for {name}");
                Ok(true)
            }
        }
    }

    /// Record `fingerprint` as the published state of `name`.
    /// Call only after the output derived from it is durably published.
    pub fn commit(&mut self, name: &str, fingerprint: &Fingerprint) -> Result<()> {
        self.store.put(name, fingerprint)?;
        debug!(source = name, fingerprint = %fingerprint, "committed fingerprint");
        Ok(())
    }

    #[inline] pub fn store(&self) -> &S { &self.store }

    pub fn into_store(self) -> S { self.store }
}
