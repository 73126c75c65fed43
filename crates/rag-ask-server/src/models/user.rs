use serde::{Deserialize, Serialize};

/// Authenticated caller identity. Used for ACL matching and language
/// selection; authentication itself happens upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl UserContext {
    /// Every principal this user may match against a document ACL:
    /// `{id} ∪ group_ids`.
    pub fn principals(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(1 + self.group_ids.len());
        out.push(self.id.clone());
        out.extend(self.group_ids.iter().cloned());
        out
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("userContext.id must not be empty".to_string());
        }
        if self.tenant_id.trim().is_empty() {
            return Err("userContext.tenantId must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principals_include_user_and_groups() {
        let ctx = UserContext {
            id: "u1".into(),
            tenant_id: "t1".into(),
            group_ids: vec!["g1".into(), "g2".into()],
            language: None,
        };
        assert_eq!(ctx.principals(), vec!["u1", "g1", "g2"]);
    }

    #[test]
    fn empty_tenant_fails_validation() {
        let ctx = UserContext {
            id: "u1".into(),
            tenant_id: " ".into(),
            group_ids: vec![],
            language: None,
        };
        assert!(ctx.validate().is_err());
    }
}
