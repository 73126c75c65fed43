use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tiktoken_rs::{cl100k_base, get_bpe_from_model, o200k_base, CoreBPE};
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

const CACHE_CAPACITY: usize = 1000;
/// Texts up to this length are cached under the text itself; longer texts
/// under a 32-bit hash.
const INLINE_KEY_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    Transformers,
    Tiktoken,
    Custom,
}

/// Identity of the tokenizer a count is computed against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerSpec {
    pub model: String,
    #[serde(rename = "type")]
    pub kind: TokenizerKind,
    pub max_tokens: usize,
    /// Fraction of `max_tokens` reserved as headroom, in [0, 1).
    pub safety_margin: f64,
    /// Chars-per-token ratio for estimation. Defaults per model family when
    /// absent: 3.2 for BGE, 4.0 for the GPT family and everything else.
    #[serde(default)]
    pub char_to_token_ratio: Option<f32>,
}

impl TokenizerSpec {
    pub fn safe_token_limit(&self) -> usize {
        (self.max_tokens as f64 * (1.0 - self.safety_margin)).floor() as usize
    }

    pub fn ratio(&self) -> f32 {
        if let Some(r) = self.char_to_token_ratio {
            return r;
        }
        let model = self.model.to_lowercase();
        if model.contains("bge") {
            3.2
        } else {
            4.0
        }
    }
}

/// Result of counting one text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCount {
    pub token_count: usize,
    pub character_count: usize,
    pub estimated_tokens: usize,
    pub is_within_limit: bool,
    pub safe_token_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Short(String),
    Hashed(u32),
}

impl CacheKey {
    fn for_text(text: &str) -> Self {
        if text.len() <= INLINE_KEY_MAX {
            CacheKey::Short(text.to_string())
        } else {
            CacheKey::Hashed(fnv1a32(text))
        }
    }
}

fn fnv1a32(text: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in text.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

/// Bounded LRU over token counts. Eviction scans for the least recently
/// used entry; at capacity 1000 the scan is cheaper than the count it saves.
struct CountCache {
    entries: HashMap<CacheKey, (usize, u64)>,
    tick: u64,
}

impl CountCache {
    fn new() -> Self {
        Self {
            entries: HashMap::with_capacity(CACHE_CAPACITY),
            tick: 0,
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<usize> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|(count, used)| {
            *used = tick;
            *count
        })
    }

    fn insert(&mut self, key: CacheKey, count: usize) {
        if self.entries.len() >= CACHE_CAPACITY && !self.entries.contains_key(&key) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.tick += 1;
        self.entries.insert(key, (count, self.tick));
    }
}

/// Counts tokens for a fixed tokenizer identity. Tiktoken models get real
/// BPE counts; transformers and custom tokenizers fall back to the
/// char-ratio estimate.
pub struct TokenCounter {
    spec: TokenizerSpec,
    encoder: Option<Arc<CoreBPE>>,
    cache: Mutex<CountCache>,
}

impl TokenCounter {
    pub fn new(spec: TokenizerSpec) -> Self {
        let encoder = match spec.kind {
            TokenizerKind::Tiktoken => match resolve_encoding(&spec.model) {
                Ok(enc) => Some(Arc::new(enc)),
                Err(e) => {
                    warn!(model = %spec.model, error = %e, "tiktoken encoding unavailable, falling back to estimation");
                    None
                }
            },
            _ => None,
        };
        Self {
            spec,
            encoder,
            cache: Mutex::new(CountCache::new()),
        }
    }

    pub fn spec(&self) -> &TokenizerSpec {
        &self.spec
    }

    pub fn safe_token_limit(&self) -> usize {
        self.spec.safe_token_limit()
    }

    /// Token count alone, cached.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let key = CacheKey::for_text(text);
        if let Some(hit) = self.cache.lock().get(&key) {
            return hit;
        }

        let count = match &self.encoder {
            Some(enc) => enc.encode_ordinary(text).len(),
            None => self.estimate(text),
        };

        self.cache.lock().insert(key, count);
        count
    }

    /// Estimation fallback: `ceil(chars / ratio)`.
    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let chars = text.graphemes(true).count();
        (chars as f32 / self.spec.ratio()).ceil() as usize
    }

    /// Full measurement of one text against this tokenizer identity.
    pub fn measure(&self, text: &str) -> TokenCount {
        let token_count = self.count(text);
        let character_count = text.graphemes(true).count();
        let estimated_tokens = self.estimate(text);
        let safe_token_limit = self.safe_token_limit();

        debug!(
            tokens = token_count,
            chars = character_count,
            limit = safe_token_limit,
            "measured text"
        );

        TokenCount {
            token_count,
            character_count,
            estimated_tokens,
            is_within_limit: token_count <= safe_token_limit,
            safe_token_limit,
        }
    }
}

fn resolve_encoding(model: &str) -> anyhow::Result<CoreBPE> {
    if let Ok(enc) = get_bpe_from_model(model) {
        return Ok(enc);
    }
    match model {
        "cl100k_base" => cl100k_base(),
        "o200k_base" => o200k_base(),
        _ => {
            debug!(model, "no tiktoken mapping, using cl100k_base");
            cl100k_base()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: TokenizerKind, max_tokens: usize, margin: f64) -> TokenizerSpec {
        TokenizerSpec {
            model: "gpt-4".into(),
            kind,
            max_tokens,
            safety_margin: margin,
            char_to_token_ratio: None,
        }
    }

    #[test]
    fn safe_limit_is_floored() {
        let s = spec(TokenizerKind::Tiktoken, 1000, 0.15);
        assert_eq!(s.safe_token_limit(), 850);
        let s = spec(TokenizerKind::Tiktoken, 512, 0.1);
        // 512 * 0.9 = 460.8 -> 460
        assert_eq!(s.safe_token_limit(), 460);
    }

    #[test]
    fn ratio_defaults_by_model_family() {
        let mut s = spec(TokenizerKind::Transformers, 512, 0.1);
        s.model = "bge-m3".into();
        assert!((s.ratio() - 3.2).abs() < 1e-6);
        s.model = "gpt-4o".into();
        assert!((s.ratio() - 4.0).abs() < 1e-6);
        s.char_to_token_ratio = Some(2.5);
        assert!((s.ratio() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn empty_text_counts_zero() {
        let counter = TokenCounter::new(spec(TokenizerKind::Tiktoken, 512, 0.1));
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.measure("").token_count, 0);
    }

    #[test]
    fn tiktoken_counts_are_exact_and_cached() {
        let counter = TokenCounter::new(spec(TokenizerKind::Tiktoken, 512, 0.1));
        let first = counter.count("Hello world, this is a test.");
        let second = counter.count("Hello world, this is a test.");
        assert_eq!(first, second);
        assert!(first > 0);
        assert!(first < 15);
    }

    #[test]
    fn estimation_uses_char_ratio() {
        let counter = TokenCounter::new(spec(TokenizerKind::Transformers, 512, 0.1));
        // 40 chars / 4.0 = 10
        let text = "a".repeat(40);
        assert_eq!(counter.estimate(&text), 10);
        assert_eq!(counter.count(&text), 10);
    }

    #[test]
    fn within_limit_flag() {
        let counter = TokenCounter::new(TokenizerSpec {
            model: "custom".into(),
            kind: TokenizerKind::Custom,
            max_tokens: 10,
            safety_margin: 0.0,
            char_to_token_ratio: Some(1.0),
        });
        assert!(counter.measure("short").is_within_limit);
        assert!(!counter.measure(&"x".repeat(50)).is_within_limit);
    }

    #[test]
    fn cache_evicts_at_capacity() {
        let mut cache = CountCache::new();
        for i in 0..CACHE_CAPACITY {
            cache.insert(CacheKey::Hashed(i as u32), i);
        }
        assert_eq!(cache.entries.len(), CACHE_CAPACITY);
        cache.insert(CacheKey::Hashed(u32::MAX), 1);
        assert_eq!(cache.entries.len(), CACHE_CAPACITY);
    }

    #[test]
    fn long_text_keys_are_hashed() {
        let long = "x".repeat(200);
        match CacheKey::for_text(&long) {
            CacheKey::Hashed(_) => {}
            CacheKey::Short(_) => panic!("long text should hash"),
        }
    }
}
