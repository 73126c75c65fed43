use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").unwrap());
static IBAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b").unwrap());
static CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap());
static NATIONAL_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    Phone,
    Iban,
    CardNumber,
    NationalId,
}

/// One detector's findings in a document, with a masked sample. Preview
/// surfaces these; nothing is redacted automatically.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PiiFinding {
    pub kind: PiiKind,
    pub count: usize,
    pub sample: String,
}

pub fn scan(text: &str) -> Vec<PiiFinding> {
    let detectors: [(&Regex, PiiKind); 5] = [
        (&EMAIL, PiiKind::Email),
        (&IBAN, PiiKind::Iban),
        (&NATIONAL_ID, PiiKind::NationalId),
        (&CARD, PiiKind::CardNumber),
        (&PHONE, PiiKind::Phone),
    ];

    let mut findings = Vec::new();
    let mut claimed: Vec<(usize, usize)> = Vec::new();

    for (regex, kind) in detectors {
        let mut count = 0usize;
        let mut sample = None;
        for m in regex.find_iter(text) {
            // Later, looser detectors must not re-report earlier spans
            // (a card regex would otherwise match inside an IBAN).
            if claimed
                .iter()
                .any(|(start, end)| m.start() < *end && m.end() > *start)
            {
                continue;
            }
            claimed.push((m.start(), m.end()));
            count += 1;
            if sample.is_none() {
                sample = Some(mask(m.as_str()));
            }
        }
        if count > 0 {
            findings.push(PiiFinding {
                kind,
                count,
                sample: sample.unwrap_or_default(),
            });
        }
    }

    findings
}

/// Keep the first and last two characters, mask the middle.
fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let mut out = String::new();
    out.extend(&chars[..2]);
    out.push_str(&"*".repeat(chars.len() - 4));
    out.extend(&chars[chars.len() - 2..]);
    out
}
