//! Lightweight player-language detection (§4.6).
//!
//! This is a heuristic script/stopword classifier, not a call to an external
//! service: the spec keeps language *detection* ambient (used only to seed
//! `session.metadata.playerLanguage`, a default for later translation), while
//! the actual translation call is the named `TranslationAdapter` collaborator.

/// Best-effort BCP-47-ish language tag for the given text. Falls back to
/// `"en"` when no stronger signal is found.
pub fn detect_language(text: &str) -> String {
    let mut han = 0usize;
    let mut hangul = 0usize;
    let mut hiragana_katakana = 0usize;
    let mut cyrillic = 0usize;
    let mut latin = 0usize;

    for ch in text.chars() {
        let cp = ch as u32;
        match cp {
            0x4E00..=0x9FFF => han += 1,
            0xAC00..=0xD7A3 => hangul += 1,
            0x3040..=0x30FF => hiragana_katakana += 1,
            0x0400..=0x04FF => cyrillic += 1,
            0x0041..=0x007A => latin += 1,
            _ => {}
        }
    }

    if hangul > 0 {
        return "ko".to_string();
    }
    if hiragana_katakana > 0 {
        return "ja".to_string();
    }
    if han > 0 {
        return "zh".to_string();
    }
    if cyrillic > 0 {
        return "ru".to_string();
    }
    if latin > 0 || text.trim().is_empty() {
        return "en".to_string();
    }
    "en".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_korean() {
        assert_eq!(detect_language("안녕하세요 결제가 안돼요"), "ko");
    }

    #[test]
    fn detects_japanese() {
        assert_eq!(detect_language("こんにちは、課金が届きません"), "ja");
    }

    #[test]
    fn detects_chinese_without_kana() {
        assert_eq!(detect_language("我的充值没有到账"), "zh");
    }

    #[test]
    fn falls_back_to_english() {
        assert_eq!(detect_language("my recharge is missing"), "en");
    }
}
