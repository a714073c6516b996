//! Local token accounting.
//!
//! Backends prefer the usage figures a provider reports. When a provider
//! reports none, counts come from the locally configured profile so telemetry
//! is never left empty. The profile is chosen once from `token_count_model`.

use serde::{Deserialize, Serialize};

/// Tokenizer family used for local counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerProfile {
    /// GPT-3.5 / GPT-4 BPE.
    #[default]
    Cl100k,
    /// GPT-4o / o1 BPE.
    O200k,
    Claude,
    Gemini,
    Llama,
    /// Anything else.
    Generic,
}

impl TokenizerProfile {
    /// Profile for a model id, matched case-insensitively on name fragments.
    pub fn for_model(model_id: &str) -> Self {
        let model = model_id.to_lowercase();
        if model.contains("gpt-4o") || model.contains("o1-") || model.starts_with("o1") {
            Self::O200k
        } else if model.contains("gpt") || model.contains("deepseek") {
            Self::Cl100k
        } else if model.contains("claude") {
            Self::Claude
        } else if model.contains("gemini") {
            Self::Gemini
        } else if model.contains("llama") || model.contains("mistral") || model.contains("mixtral")
        {
            Self::Llama
        } else {
            Self::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cl100k => "cl100k",
            Self::O200k => "o200k",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Llama => "llama",
            Self::Generic => "generic",
        }
    }

    /// Average ASCII characters per token.
    fn chars_per_token(self) -> f64 {
        match self {
            Self::Cl100k | Self::O200k | Self::Gemini | Self::Generic => 4.0,
            Self::Claude => 3.5,
            Self::Llama => 3.8,
        }
    }

    /// Average CJK characters per token.
    fn cjk_chars_per_token(self) -> f64 {
        match self {
            Self::Cl100k | Self::O200k | Self::Gemini | Self::Generic => 1.5,
            Self::Claude => 1.3,
            Self::Llama => 2.0,
        }
    }

    /// Estimated token count of `text`. Zero only for empty text.
    pub fn count(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }

        let mut ascii = 0u64;
        let mut cjk = 0u64;
        let mut other = 0u64;
        for c in text.chars() {
            if c.is_ascii() {
                ascii += 1;
            } else if is_cjk(c) {
                cjk += 1;
            } else {
                other += 1;
            }
        }

        let tokens = ascii as f64 / self.chars_per_token()
            + cjk as f64 / self.cjk_chars_per_token()
            + other as f64 / 2.0;
        tokens.ceil() as u64
    }
}

impl std::fmt::Display for TokenizerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x1100..=0x11FF     // Hangul Jamo
        | 0x3040..=0x30FF   // Hiragana, Katakana
        | 0x3130..=0x318F   // Hangul compatibility Jamo
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified ideographs
        | 0xAC00..=0xD7AF   // Hangul syllables
        | 0xF900..=0xFAFF   // CJK compatibility ideographs
    )
}
