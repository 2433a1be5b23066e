use serde::{Deserialize, Serialize};

/// A language offered for translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub code: String,
    pub name: String,
}

/// ISO 639-1 code and English name of every supported translation language.
const LANGUAGES: &[(&str, &str)] = &[
    ("ar", "Arabic"),
    ("bg", "Bulgarian"),
    ("bn", "Bengali"),
    ("ca", "Catalan"),
    ("cs", "Czech"),
    ("da", "Danish"),
    ("de", "German"),
    ("el", "Greek"),
    ("en", "English"),
    ("es", "Spanish"),
    ("et", "Estonian"),
    ("fa", "Persian"),
    ("fi", "Finnish"),
    ("fil", "Filipino"),
    ("fr", "French"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("hr", "Croatian"),
    ("hu", "Hungarian"),
    ("id", "Indonesian"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("lt", "Lithuanian"),
    ("lv", "Latvian"),
    ("ms", "Malay"),
    ("nl", "Dutch"),
    ("no", "Norwegian"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("sr", "Serbian"),
    ("sv", "Swedish"),
    ("sw", "Swahili"),
    ("ta", "Tamil"),
    ("th", "Thai"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("ur", "Urdu"),
    ("vi", "Vietnamese"),
    ("zh", "Chinese"),
];

/// English name for a language code. Unknown codes fall back to the code.
pub fn name(code: &str) -> &str {
    LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, n)| *n)
        .unwrap_or(code)
}

pub fn is_supported(code: &str) -> bool {
    LANGUAGES.iter().any(|(c, _)| *c == code)
}

/// All languages, sorted by name.
pub fn list() -> Vec<LanguageInfo> {
    let mut languages: Vec<LanguageInfo> = LANGUAGES
        .iter()
        .map(|(code, name)| LanguageInfo {
            code: code.to_string(),
            name: name.to_string(),
        })
        .collect();
    languages.sort_by(|a, b| a.name.cmp(&b.name));
    languages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_sorted_by_name() {
        let languages = list();
        assert_eq!(languages.len(), LANGUAGES.len());
        assert!(languages.windows(2).all(|w| w[0].name <= w[1].name));
        assert_eq!(languages[0].name, "Arabic");
    }

    #[test]
    fn names_fall_back_to_code() {
        assert_eq!(name("ja"), "Japanese");
        assert_eq!(name("tlh"), "tlh");
        assert!(is_supported("zh"));
        assert!(!is_supported("tlh"));
    }
}
