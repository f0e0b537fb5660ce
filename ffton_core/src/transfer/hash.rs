use blake3::Hasher;

/// BLAKE3 digest fed with file bytes as they cross the wire
///
/// Disabled digests ignore updates, so callers never branch per chunk.
pub struct StreamDigest {
    hasher: Option<Hasher>,
}

impl StreamDigest {
    pub fn new(enabled: bool) -> Self {
        Self {
            hasher: enabled.then(Hasher::new),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(chunk);
        }
    }

    /// Hex digest, `None` when disabled
    pub fn finish(self) -> Option<String> {
        self.hasher.map(|h| h.finalize().to_hex().to_string())
    }
}
