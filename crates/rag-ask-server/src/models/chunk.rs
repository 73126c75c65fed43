use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A bounded-token subsequence of a document, the unit of embedding and
/// retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub token_count: usize,
    pub character_count: usize,
    pub start_index: usize,
    pub end_index: usize,
    #[serde(default)]
    pub section_path: Option<String>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub tenant: String,
    pub doc_id: String,
    /// Position of this chunk within its document, used for section
    /// reunification at packing time.
    pub order_index: usize,
    #[serde(default)]
    pub is_table: bool,
    #[serde(default)]
    pub is_section_header: bool,
}

impl Chunk {
    /// Deterministic chunk id: `sha256(tenant|doc_id|section_path|start_index)`.
    pub fn derive_id(
        tenant: &str,
        doc_id: &str,
        section_path: Option<&str>,
        start_index: usize,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant.as_bytes());
        hasher.update(b"|");
        hasher.update(doc_id.as_bytes());
        hasher.update(b"|");
        hasher.update(section_path.unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(start_index.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Qdrant point ids must be u64 or UUID; fold the deterministic chunk id
    /// into a UUID from the first 16 digest bytes.
    pub fn point_id(&self) -> uuid::Uuid {
        point_id_for(&self.id)
    }
}

pub fn point_id_for(chunk_id: &str) -> uuid::Uuid {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_is_deterministic() {
        let a = Chunk::derive_id("t", "d", Some("Intro"), 0);
        let b = Chunk::derive_id("t", "d", Some("Intro"), 0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn derive_id_varies_by_component() {
        let base = Chunk::derive_id("t", "d", Some("Intro"), 0);
        assert_ne!(base, Chunk::derive_id("t2", "d", Some("Intro"), 0));
        assert_ne!(base, Chunk::derive_id("t", "d2", Some("Intro"), 0));
        assert_ne!(base, Chunk::derive_id("t", "d", Some("Body"), 0));
        assert_ne!(base, Chunk::derive_id("t", "d", Some("Intro"), 100));
    }

    #[test]
    fn absent_section_path_differs_from_empty_start() {
        // No section and offset 0 must not collide with a named section
        let a = Chunk::derive_id("t", "d", None, 0);
        let b = Chunk::derive_id("t", "d", Some("0"), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn point_id_is_stable() {
        let id = Chunk::derive_id("t", "d", None, 0);
        assert_eq!(point_id_for(&id), point_id_for(&id));
    }
}
