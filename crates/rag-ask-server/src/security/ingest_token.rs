use sha2::{Digest, Sha256};

use crate::utils::error::ApiError;

/// Shared-token gate for the ingest surface. Comparison runs over fixed
/// length digests with no early exit, so timing reveals nothing about the
/// expected token.
pub struct IngestTokenGuard {
    expected_digest: Option<[u8; 32]>,
}

impl IngestTokenGuard {
    pub fn new(token: Option<String>) -> Self {
        let expected_digest = token
            .filter(|t| !t.trim().is_empty())
            .map(|t| Sha256::digest(t.as_bytes()).into());
        Self { expected_digest }
    }

    pub fn verify(&self, provided: Option<&str>) -> Result<(), ApiError> {
        let Some(expected) = &self.expected_digest else {
            return Err(ApiError::Unauthorized(
                "ingest token not configured".to_string(),
            ));
        };
        let Some(provided) = provided else {
            return Err(ApiError::Unauthorized(
                "missing x-ingest-token header".to_string(),
            ));
        };

        let provided_digest: [u8; 32] = Sha256::digest(provided.as_bytes()).into();
        if constant_time_eq(expected, &provided_digest) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized("invalid ingest token".to_string()))
        }
    }
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_token() {
        let guard = IngestTokenGuard::new(Some("s3cret".into()));
        assert!(guard.verify(Some("s3cret")).is_ok());
    }

    #[test]
    fn rejects_wrong_token() {
        let guard = IngestTokenGuard::new(Some("s3cret".into()));
        assert!(guard.verify(Some("guess")).is_err());
    }

    #[test]
    fn rejects_missing_header() {
        let guard = IngestTokenGuard::new(Some("s3cret".into()));
        let err = guard.verify(None).unwrap_err();
        assert_eq!(err.kind(), "Unauthorized");
    }

    #[test]
    fn unconfigured_token_rejects_everything() {
        let guard = IngestTokenGuard::new(None);
        assert!(guard.verify(Some("anything")).is_err());
        let guard = IngestTokenGuard::new(Some("   ".into()));
        assert!(guard.verify(Some("   ")).is_err());
    }

    #[test]
    fn digest_compare_is_length_independent() {
        let guard = IngestTokenGuard::new(Some("short".into()));
        assert!(guard
            .verify(Some(&"very long token attempt".repeat(10)))
            .is_err());
    }
}
