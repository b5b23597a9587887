//! Language detection for choosing the summary prompt.

/// Maps text to an ISO 639-1 language code.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> String;
}

const SAMPLE_CHARS: usize = 2000;

const EN: &[&str] = &[
    "the", "and", "of", "to", "is", "in", "that", "it", "for", "with", "as", "was", "on", "are",
    "this", "be", "by", "have", "from", "or", "which", "not", "an", "they", "were",
];

const FR: &[&str] = &[
    "le", "la", "les", "et", "des", "est", "une", "dans", "que", "pour", "qui", "du", "pas",
    "sur", "avec", "au", "aux", "ce", "cette", "sont", "nous", "vous", "mais", "ou", "il",
];

const PT: &[&str] = &[
    "o", "os", "as", "e", "do", "da", "dos", "das", "em", "um", "uma", "para", "com", "não",
    "que", "por", "mais", "como", "foi", "ao", "seu", "sua", "são", "na", "no",
];

/// Stopword-frequency detector for English, French and Portuguese.
///
/// Looks at the first 2000 characters. Empty or ambiguous text is `en`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StopwordDetector;

impl LanguageDetector for StopwordDetector {
    fn detect(&self, text: &str) -> String {
        let sample: String = text.chars().take(SAMPLE_CHARS).collect();
        let sample = sample.to_lowercase();
        let mut scores = [("en", 0usize), ("fr", 0), ("pt", 0)];
        for word in sample
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            if EN.contains(&word) {
                scores[0].1 += 1;
            }
            if FR.contains(&word) {
                scores[1].1 += 1;
            }
            if PT.contains(&word) {
                scores[2].1 += 1;
            }
        }
        let best = scores.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let leaders: Vec<&str> = scores
            .iter()
            .filter(|(_, n)| *n == best)
            .map(|(lang, _)| *lang)
            .collect();
        if best == 0 || leaders.len() > 1 {
            return "en".to_string();
        }
        leaders[0].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_supported_languages() {
        let d = StopwordDetector;
        assert_eq!(
            d.detect("The report shows that the budget for this year is in line with the plan."),
            "en"
        );
        assert_eq!(
            d.detect("Le rapport montre que le budget de cette année est dans la ligne avec le plan et les objectifs."),
            "fr"
        );
        assert_eq!(
            d.detect("O relatório mostra que o orçamento para este ano está em linha com o plano e não com as metas da empresa."),
            "pt"
        );
    }

    #[test]
    fn empty_text_defaults_to_english() {
        assert_eq!(StopwordDetector.detect(""), "en");
        assert_eq!(StopwordDetector.detect("12345 !!!"), "en");
    }
}
