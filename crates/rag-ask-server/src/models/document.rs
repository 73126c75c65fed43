use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized document submitted to the ingest pipeline. Producing this
/// form (file parsing, format conversion) happens upstream of this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedDoc {
    pub meta: DocMeta,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocMeta {
    pub tenant: String,
    pub doc_id: String,
    pub source: String,
    pub sha256: String,
    #[serde(default)]
    pub acl: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Tombstone marker: removes every chunk of `(tenant, doc_id)`.
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockType {
    Text,
    Table,
    Code,
    ImageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
}

impl NormalizedDoc {
    /// Boundary validation. Field paths of every violation are collected so
    /// the handler can surface them all at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.meta.tenant.trim().is_empty() {
            problems.push("meta.tenant: must not be empty".to_string());
        }
        if self.meta.doc_id.trim().is_empty() {
            problems.push("meta.docId: must not be empty".to_string());
        }
        if self.meta.source.trim().is_empty() {
            problems.push("meta.source: must not be empty".to_string());
        }
        if self.meta.sha256.len() != 64 || !self.meta.sha256.chars().all(|c| c.is_ascii_hexdigit())
        {
            problems.push("meta.sha256: must be a 64-char hex digest".to_string());
        }
        if !self.meta.deleted && self.meta.acl.is_empty() {
            problems.push("meta.acl: must not be empty for a live document".to_string());
        }
        if !self.meta.deleted && self.blocks.is_empty() {
            problems.push("blocks: must not be empty for a live document".to_string());
        }
        for (i, block) in self.blocks.iter().enumerate() {
            let has_content = block.text.as_deref().is_some_and(|t| !t.trim().is_empty())
                || block.html.as_deref().is_some_and(|h| !h.trim().is_empty());
            if !has_content && block.block_type != BlockType::ImageRef {
                problems.push(format!("blocks[{}]: text or html required", i));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.meta.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(deleted: bool) -> NormalizedDoc {
        NormalizedDoc {
            meta: DocMeta {
                tenant: "acme".into(),
                doc_id: "doc-1".into(),
                source: "wiki/page".into(),
                sha256: "a".repeat(64),
                acl: vec!["group:everyone".into()],
                timestamp: Utc::now(),
                modified_at: None,
                version: None,
                lang: Some("en".into()),
                title: Some("Page".into()),
                path: None,
                url: None,
                authors: None,
                tags: None,
                deleted,
            },
            blocks: vec![Block {
                block_type: BlockType::Text,
                text: Some("Hello world".into()),
                html: None,
            }],
        }
    }

    #[test]
    fn valid_doc_passes() {
        assert!(doc(false).validate().is_ok());
    }

    #[test]
    fn missing_tenant_reports_field_path() {
        let mut d = doc(false);
        d.meta.tenant = "".into();
        let errs = d.validate().unwrap_err();
        assert!(errs.iter().any(|e| e.starts_with("meta.tenant")));
    }

    #[test]
    fn bad_sha_rejected() {
        let mut d = doc(false);
        d.meta.sha256 = "nothex".into();
        assert!(d.validate().is_err());
    }

    #[test]
    fn tombstone_needs_no_blocks_or_acl() {
        let mut d = doc(true);
        d.blocks.clear();
        d.meta.acl.clear();
        assert!(d.validate().is_ok());
        assert!(d.is_tombstone());
    }

    #[test]
    fn block_type_serde_uses_kebab_case() {
        let json = serde_json::to_string(&BlockType::ImageRef).unwrap();
        assert_eq!(json, "\"image-ref\"");
    }
}
