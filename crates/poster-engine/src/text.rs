//! Deterministic clean-up and validation of generated post text.
//!
//! Post-processing only adds, trims or moves trailing emoji; it never
//! rewrites the body. Text ending in an incomplete phrase or containing a
//! forbidden word is rejected before any patching so an appended mark
//! can't disguise it. A prepared post always ends on a terminal mark.

use std::sync::LazyLock;

use poster_settings::ValidationSettings;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

/// Marks a finished post may end with.
pub const TERMINAL_MARKS: &[char] = &['！', '。', '？', '～', '!', '?', '~'];

/// Sentence boundaries used for emoji placement and truncation.
const SENTENCE_MARKS: &[char] = &['。', '！', '？', '～', '.', '!', '?', '~'];

/// Phrases that already invite a reply, looked for near the end.
pub const INTERACTION_MARKERS: &[&str] = &["嗎？", "呢？", "呀？", "哦？", "呢?", "嗎?", "你覺得呢", "有沒有"];

pub const INTERACTION_ENDINGS: &[&str] = &[
    "你們有類似經歷嗎？",
    "大家都有什麼想法呢？",
    "你們覺得怎麼樣呢？",
    "有沒有人跟我一樣呀？",
    "想聽聽大家的看法～",
];

pub const FALLBACK_EMOJI: &[&str] = &["✨", "💕", "🌟", "💫", "💖", "😊", "🎮", "📚", "🌙", "💭"];

/// Window (in chars) at the end of the text searched for interaction markers.
const INTERACTION_WINDOW: usize = 30;

const INCOMPLETE_PATTERNS: &[&str] = &[
    "對我的$", "這麼$", "好想$", "不行$", "好棒$", "好可愛$", "好厲害$", "好喜歡$", "好期待$", "好興奮$",
];

static INCOMPLETE: LazyLock<Vec<Regex>> =
    LazyLock::new(|| INCOMPLETE_PATTERNS.iter().map(|p| Regex::new(p).unwrap()).collect());

static REPEATED_MARKS: LazyLock<[(Regex, &'static str); 4]> = LazyLock::new(|| {
    [
        (Regex::new(r"[!！]{2,}").unwrap(), "！"),
        (Regex::new(r"[?？]{2,}").unwrap(), "？"),
        (Regex::new(r"[.。]{2,}").unwrap(), "。"),
        (Regex::new(r"[~～]{2,}").unwrap(), "～"),
    ]
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Pictographic emoji. Variation selectors and joiners are not counted.
pub fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0x2B50..=0x2B55 | 0x2300..=0x23FF
    )
}

fn is_emoji_part(c: char) -> bool {
    is_emoji(c) || matches!(c as u32, 0xFE0F | 0x200D | 0x1F3FB..=0x1F3FF)
}

pub fn emoji_count(text: &str) -> usize {
    text.chars()
        .filter(|c| is_emoji(*c) && !matches!(*c as u32, 0x1F3FB..=0x1F3FF))
        .count()
}

/// Character count with emoji excluded.
pub fn visible_length(text: &str) -> usize {
    text.chars().filter(|c| !is_emoji_part(*c)).count()
}

fn strip_emoji(text: &str) -> String {
    text.chars().filter(|c| !is_emoji_part(*c)).collect()
}

/// The text with trailing emoji and whitespace removed.
fn body_end(text: &str) -> &str {
    text.trim_end_matches(|c: char| c.is_whitespace() || is_emoji_part(c))
}

/// Collapse repeated punctuation to one full-width mark and runs of
/// whitespace to a single space.
pub fn normalize(text: &str) -> String {
    let mut out = text.trim().trim_matches('"').trim().to_string();
    for (re, mark) in REPEATED_MARKS.iter() {
        out = re.replace_all(&out, *mark).into_owned();
    }
    WHITESPACE.replace_all(&out, " ").trim().to_string()
}

/// Whether the last visible character is a terminal mark.
pub fn ends_with_terminal(text: &str) -> bool {
    text.trim_end().ends_with(TERMINAL_MARKS)
}

/// End the text on a terminal mark. Trailing emoji are kept and moved in
/// front of the mark: `好棒！✨` becomes `好棒✨！`, `好棒✨` becomes `好棒✨。`.
pub fn ensure_terminal(text: &str) -> String {
    let text = text.trim_end();
    if ends_with_terminal(text) {
        return text.to_string();
    }
    let body = body_end(text);
    let tail = text[body.len()..].trim();
    match body.chars().next_back() {
        Some(mark) if TERMINAL_MARKS.contains(&mark) => {
            format!("{}{tail}{mark}", &body[..body.len() - mark.len_utf8()])
        }
        _ => format!("{body}{tail}。"),
    }
}

/// Looks for an interaction marker near the end, emoji ignored.
pub fn has_interaction(text: &str) -> bool {
    let tail: String = {
        let chars: Vec<char> = strip_emoji(text).chars().collect();
        let start = chars.len().saturating_sub(INTERACTION_WINDOW);
        chars[start..].iter().collect()
    };
    INTERACTION_MARKERS.iter().any(|m| tail.contains(m))
}

pub fn ensure_interaction<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    if has_interaction(text) {
        return text.to_string();
    }
    let ending = INTERACTION_ENDINGS.choose(rng).copied().unwrap_or(INTERACTION_ENDINGS[0]);
    format!("{} {ending}", ensure_terminal(text))
}

/// Insert one emoji after the first sentence. A single sentence gets it
/// just before its closing mark so the text still ends on the mark.
pub fn ensure_emoji<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    if emoji_count(text) > 0 {
        return text.to_string();
    }
    let emoji = FALLBACK_EMOJI.choose(rng).copied().unwrap_or(FALLBACK_EMOJI[0]);
    let text = text.trim_end();
    let boundary = text
        .char_indices()
        .find(|(_, c)| SENTENCE_MARKS.contains(c))
        .map(|(i, c)| i + c.len_utf8())
        .filter(|&end| end < text.len());
    if let Some(at) = boundary {
        return format!("{} {emoji} {}", &text[..at], text[at..].trim_start());
    }
    match text.chars().next_back() {
        Some(mark) if SENTENCE_MARKS.contains(&mark) => {
            format!("{}{emoji}{mark}", &text[..text.len() - mark.len_utf8()])
        }
        _ => format!("{text} {emoji}"),
    }
}

/// Split into sentences, each keeping its closing mark.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if SENTENCE_MARKS.contains(&c) {
            let end = i + c.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

/// Shorten to at most `target` visible chars, cutting between sentences.
/// A first sentence longer than `target` is cut mid-sentence.
pub fn truncate_sentences(text: &str, target: usize) -> String {
    if visible_length(text) <= target {
        return text.to_string();
    }
    let mut out = String::new();
    for s in sentences(text) {
        if visible_length(&out) + visible_length(s) > target {
            break;
        }
        out.push_str(s);
    }
    if out.trim().is_empty() {
        let mut kept = 0;
        for c in text.chars() {
            if !is_emoji_part(c) {
                if kept + 1 >= target {
                    break;
                }
                kept += 1;
            }
            out.push(c);
        }
    }
    out.trim().to_string()
}

/// Why a text was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("too short: {len} < {min}")]
    TooShort { len: usize, min: usize },
    #[error("too long: {len} > {max}")]
    TooLong { len: usize, max: usize },
    #[error("emoji count {count} outside {min}..={max}")]
    EmojiCount { count: usize, min: usize, max: usize },
    #[error("does not end with a terminal mark")]
    MissingTerminal,
    #[error("ends with an incomplete phrase ({pattern})")]
    Incomplete { pattern: &'static str },
    #[error("contains forbidden word {word:?}")]
    Forbidden { word: String },
    #[error("empty text")]
    Empty,
}

/// Returns the first incomplete-phrase pattern `text` ends with.
fn incomplete_match(text: &str) -> Option<&'static str> {
    let stripped = strip_emoji(text);
    let core = stripped.trim().trim_end_matches(['！', '。', '？', '～']).trim_end();
    INCOMPLETE
        .iter()
        .zip(INCOMPLETE_PATTERNS)
        .find(|(re, _)| re.is_match(core))
        .map(|(_, p)| *p)
}

/// Applies the fixed post-processing steps and validation criteria.
#[derive(Clone, Debug)]
pub struct TextRules {
    criteria: ValidationSettings,
}

impl TextRules {
    pub fn new(criteria: ValidationSettings) -> Self {
        Self { criteria }
    }

    pub fn criteria(&self) -> &ValidationSettings {
        &self.criteria
    }

    fn forbidden_match(&self, text: &str) -> Result<(), ValidationFailure> {
        match self.criteria.forbidden_words.iter().find(|w| !w.is_empty() && text.contains(w.as_str())) {
            Some(word) => Err(ValidationFailure::Forbidden { word: word.clone() }),
            None => Ok(()),
        }
    }

    /// Check the fixed criteria.
    pub fn validate(&self, text: &str) -> Result<(), ValidationFailure> {
        let c = &self.criteria;
        if text.trim().is_empty() {
            return Err(ValidationFailure::Empty);
        }
        self.forbidden_match(text)?;
        if let Some(pattern) = incomplete_match(text) {
            return Err(ValidationFailure::Incomplete { pattern });
        }
        let len = visible_length(text);
        if len < c.min_length {
            return Err(ValidationFailure::TooShort { len, min: c.min_length });
        }
        if len > c.max_length {
            return Err(ValidationFailure::TooLong { len, max: c.max_length });
        }
        let count = emoji_count(text);
        if count < c.min_emoji || count > c.max_emoji {
            return Err(ValidationFailure::EmojiCount {
                count,
                min: c.min_emoji,
                max: c.max_emoji,
            });
        }
        if !ends_with_terminal(text) {
            return Err(ValidationFailure::MissingTerminal);
        }
        Ok(())
    }

    /// Post-process raw output, then validate it. Incomplete text and
    /// forbidden words are refused up front.
    pub fn prepare<R: Rng + ?Sized>(&self, raw: &str, rng: &mut R) -> Result<String, ValidationFailure> {
        let text = normalize(raw);
        if text.is_empty() {
            return Err(ValidationFailure::Empty);
        }
        self.forbidden_match(&text)?;
        if let Some(pattern) = incomplete_match(&text) {
            return Err(ValidationFailure::Incomplete { pattern });
        }
        let text = if visible_length(&text) > self.criteria.max_length {
            truncate_sentences(&text, self.criteria.truncate_to)
        } else {
            text
        };
        let text = ensure_terminal(&text);
        let text = ensure_interaction(&text, rng);
        let text = ensure_emoji(&text, rng);
        self.validate(&text)?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rules() -> TextRules {
        TextRules::new(ValidationSettings::default())
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(1)
    }

    const BODY: &str = "今天去了一家新開的咖啡廳，拿鐵的拉花超級漂亮，店裡還有一隻很親人的貓咪陪我看書";

    #[test]
    fn normalize_collapses_marks_and_spaces() {
        assert_eq!(normalize("好開心!!!真的？？  太棒了。。。"), "好開心！真的？ 太棒了。");
        assert_eq!(normalize("  \"嗨~~\"  "), "嗨～");
        assert_eq!(normalize("第一行\n\n第二行"), "第一行 第二行");
    }

    #[test]
    fn emoji_counting_and_length() {
        assert_eq!(emoji_count("好棒✨🎮"), 2);
        assert_eq!(emoji_count("❤️"), 1);
        assert_eq!(visible_length("好棒✨🎮"), 2);
        assert_eq!(visible_length("❤️"), 0);
    }

    #[test]
    fn terminal_is_appended_once() {
        assert_eq!(ensure_terminal("今天很好"), "今天很好。");
        assert_eq!(ensure_terminal("今天很好！"), "今天很好！");
        assert!(!ends_with_terminal("今天很好！✨"));
    }

    #[test]
    fn trailing_emoji_kept_before_the_mark() {
        assert_eq!(ensure_terminal("今天很好✨"), "今天很好✨。");
        assert_eq!(ensure_terminal("今天很好！✨ "), "今天很好✨！");
        assert_eq!(ensure_terminal("今天很好！ ✨💕"), "今天很好✨💕！");
    }

    #[test]
    fn interaction_detected_in_tail() {
        assert!(has_interaction("你們覺得呢？"));
        assert!(has_interaction("大家有沒有去過"));
        let long_tail = format!("你覺得呢{}", "啊".repeat(40));
        assert!(!has_interaction(&long_tail));
    }

    #[test]
    fn interaction_appended_from_fixed_set() {
        let out = ensure_interaction("今天好累", &mut rng());
        assert!(out.starts_with("今天好累。 "));
        assert!(INTERACTION_ENDINGS.iter().any(|e| out.ends_with(e)));
        assert_eq!(ensure_interaction("你呢？", &mut rng()), "你呢？");
    }

    #[test]
    fn emoji_goes_after_first_sentence() {
        let out = ensure_emoji("第一句。第二句！", &mut rng());
        let first = out.find('。').unwrap();
        let after = &out[first + '。'.len_utf8()..];
        assert!(after.trim_start().chars().next().is_some_and(is_emoji));
        assert_eq!(emoji_count(&out), 1);
        assert!(out.ends_with("第二句！"));
    }

    #[test]
    fn emoji_goes_before_mark_of_single_sentence() {
        let out = ensure_emoji("只有一句。", &mut rng());
        assert!(out.starts_with("只有一句"));
        assert!(out.ends_with('。'));
        assert_eq!(emoji_count(&out), 1);
    }

    #[test]
    fn prepared_single_sentence_ends_on_its_mark() {
        let raw = format!("{BODY}，你們覺得呢？");
        let out = rules().prepare(&raw, &mut rng()).unwrap();
        assert_eq!(out.chars().last(), Some('？'));
        assert_eq!(emoji_count(&out), 1);
    }

    #[test]
    fn validate_checks_the_real_last_char() {
        let raw = format!("{BODY}。你們覺得呢？ 🌙");
        assert_eq!(rules().validate(&raw), Err(ValidationFailure::MissingTerminal));
        let fixed = rules().prepare(&raw, &mut rng()).unwrap();
        assert!(fixed.ends_with("🌙？"));
    }

    #[test]
    fn forbidden_words_rejected_before_patching() {
        let raw = format!("{BODY}，還有一些暴力的畫面");
        assert_eq!(
            rules().prepare(&raw, &mut rng()),
            Err(ValidationFailure::Forbidden { word: "暴力".into() })
        );
        let patched = format!("{BODY}，還有一些暴力的畫面✨。你們覺得呢？");
        assert!(matches!(rules().validate(&patched), Err(ValidationFailure::Forbidden { .. })));

        let lenient = TextRules::new(ValidationSettings {
            forbidden_words: Vec::new(),
            ..Default::default()
        });
        assert!(lenient.prepare(&raw, &mut rng()).is_ok());
    }

    #[test]
    fn truncation_keeps_whole_sentences() {
        let sentence = format!("{}。", "字".repeat(59));
        let text = sentence.repeat(6);
        let out = truncate_sentences(&text, 250);
        assert_eq!(visible_length(&out), 240);
        assert!(out.ends_with('。'));
    }

    #[test]
    fn truncation_cuts_overlong_first_sentence() {
        let text = "字".repeat(400);
        let out = truncate_sentences(&text, 250);
        assert!(visible_length(&out) < 250);
    }

    #[test]
    fn missing_terminal_rejected_then_fixed() {
        let raw = format!("{BODY}✨ 你們覺得呢");
        assert_eq!(rules().validate(&raw), Err(ValidationFailure::MissingTerminal));
        let fixed = rules().prepare(&raw, &mut rng()).unwrap();
        assert!(rules().validate(&fixed).is_ok());
    }

    #[test]
    fn missing_emoji_rejected_then_fixed() {
        let raw = format!("{BODY}。你們覺得呢？");
        assert!(matches!(
            rules().validate(&raw),
            Err(ValidationFailure::EmojiCount { count: 0, .. })
        ));
        let fixed = rules().prepare(&raw, &mut rng()).unwrap();
        assert_eq!(emoji_count(&fixed), 1);
    }

    #[test]
    fn incomplete_always_rejected() {
        for raw in [format!("{BODY}，好想"), format!("{BODY}，好想。"), format!("{BODY}，好想！✨")] {
            assert!(matches!(
                rules().prepare(&raw, &mut rng()),
                Err(ValidationFailure::Incomplete { pattern: "好想$" })
            ));
            assert!(matches!(rules().validate(&raw), Err(ValidationFailure::Incomplete { .. })));
        }
    }

    #[test]
    fn too_many_emoji_rejected() {
        let raw = format!("{BODY}✨✨✨✨✨。你呢？");
        assert!(matches!(
            rules().prepare(&raw, &mut rng()),
            Err(ValidationFailure::EmojiCount { count: 5, .. })
        ));
    }

    #[test]
    fn too_short_rejected() {
        assert!(matches!(
            rules().prepare("嗨", &mut rng()),
            Err(ValidationFailure::TooShort { .. })
        ));
        assert_eq!(rules().prepare("   ", &mut rng()), Err(ValidationFailure::Empty));
    }

    #[test]
    fn overlong_text_is_truncated_and_passes() {
        let sentence = format!("{}。", "字".repeat(49));
        let raw = sentence.repeat(8);
        let out = rules().prepare(&raw, &mut rng()).unwrap();
        assert!(visible_length(&out) <= 280);
        assert!(has_interaction(&out) || out.contains("想聽聽大家的看法"));
    }

    #[test]
    fn well_formed_text_passes_unchanged() {
        let raw = format!("{BODY}✨ 你們覺得呢？");
        assert_eq!(rules().prepare(&raw, &mut rng()).unwrap(), raw);
    }
}
