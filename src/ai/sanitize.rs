use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Explanation,
    Chat,
    DeepAnalysis,
}

impl ResponseKind {
    /// Shorter cleaned text is treated as a failed generation.
    pub fn min_len(self) -> usize {
        match self {
            ResponseKind::Explanation => 40,
            ResponseKind::Chat => 10,
            ResponseKind::DeepAnalysis => 150,
        }
    }

    pub fn fallback(self) -> &'static str {
        match self {
            ResponseKind::Explanation => {
                "An automatic explanation is not available right now. Review the amount, \
                 merchant, location and time of this transaction against the customer's usual \
                 activity, and contact the customer if anything looks unfamiliar."
            }
            ResponseKind::Chat => {
                "Sorry, I cannot answer that right now. Please try again in a moment."
            }
            ResponseKind::DeepAnalysis => {
                "A detailed analysis is not available right now. Start with the transactions \
                 that have the highest anomaly scores, look for repeated merchants, locations \
                 or late-night activity among them, and try the analysis again later."
            }
        }
    }
}

lazy_static! {
    static ref PREFIX_RE: Regex = Regex::new(
        r"(?i)^\s*(?:(?:sure|certainly|of course|okay|ok|baik|tentu(?:\s+saja)?)\b[,.!:]?|here(?:'s| is)[^\n:]{0,60}:)\s*"
    )
    .unwrap();
    static ref SELF_REF_RE: Regex = Regex::new(
        r"(?i)(?:as an ai(?: language model| model| assistant)?|as a language model|sebagai (?:model bahasa|ai|asisten ai)|i am an ai(?: language model)?)\b[,.]?\s*"
    )
    .unwrap();
    static ref BLANK_RUNS_RE: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Cleaned model text, or `None` when what is left is too short for `kind`.
pub fn sanitize(raw: &str, kind: ResponseKind) -> Option<String> {
    let text = raw.trim();
    let text = PREFIX_RE.replace(text, "");
    let text = SELF_REF_RE.replace_all(&text, "");
    let text = BLANK_RUNS_RE.replace_all(&text, "\n\n");
    let text = text.trim();

    if text.chars().count() < kind.min_len() {
        return None;
    }

    let mut chars = text.chars();
    let out = match chars.next() {
        Some(first) if first.is_lowercase() => first.to_uppercase().chain(chars).collect(),
        _ => text.to_string(),
    };
    Some(out)
}
