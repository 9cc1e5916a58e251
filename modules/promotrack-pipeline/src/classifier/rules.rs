use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use promotrack_common::ExtractionRules;

/// Promotional keywords, matched case-insensitively on word boundaries.
static KEYWORDS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("sale", r"(?i)\bsale\b"),
        ("clearance", r"(?i)\bclearance\b"),
        ("discount", r"(?i)\bdiscount(?:s|ed)?\b"),
        ("promo code", r"(?i)\b(?:promo|coupon|discount)\s+codes?\b"),
        ("black friday", r"(?i)\bblack\s+friday\b"),
        ("cyber monday", r"(?i)\bcyber\s+monday\b"),
        ("n% off", r"(?i)\b\d{1,3}\s?%\s*off\b"),
        ("percent off", r"(?i)\bpercent\s+off\b"),
        ("save up to", r"(?i)\bsave\s+up\s+to\b"),
        ("flash sale", r"(?i)\bflash\s+sale\b"),
        ("limited time offer", r"(?i)\blimited[\s-]time\s+offers?\b"),
        ("offer ends", r"(?i)\boffers?\s+ends?\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).unwrap()))
    .collect()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

pub(crate) const MAX_PROMOTION_TEXT: usize = 500;

/// Distinct keyword labels present in `text`.
pub fn keyword_hits(text: &str) -> Vec<&'static str> {
    KEYWORDS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(label, _)| *label)
        .collect()
}

/// Confidence for a rule-based hit, capped below model certainty.
pub fn rule_confidence(distinct_hits: usize) -> f64 {
    (0.6 + 0.1 * distinct_hits as f64).min(0.95)
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Text of every element matched by the rules' selectors, joined in order.
/// Unparseable selectors are skipped. `None` when nothing matched.
pub fn extract_text(html: &str, rules: &ExtractionRules) -> Option<String> {
    let document = Html::parse_document(html);
    let mut pieces = Vec::new();

    for raw in &rules.selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() && !pieces.contains(&text) {
                pieces.push(text);
            }
        }
    }

    if pieces.is_empty() {
        None
    } else {
        Some(pieces.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_common_promotions() {
        assert_eq!(keyword_hits("Flash Sale today"), vec!["sale", "flash sale"]);
        assert_eq!(keyword_hits("Take 25% OFF sitewide"), vec!["n% off"]);
        assert_eq!(keyword_hits("Use coupon code SAVE10"), vec!["promo code"]);
        assert_eq!(keyword_hits("BLACK FRIDAY deals"), vec!["black friday"]);
    }

    #[test]
    fn word_boundaries_prevent_false_hits() {
        assert!(keyword_hits("Wholesale enquiries").is_empty());
        assert!(keyword_hits("New arrivals for spring").is_empty());
        assert!(keyword_hits("Salesforce integration").is_empty());
    }

    #[test]
    fn confidence_grows_and_caps() {
        assert!((rule_confidence(1) - 0.7).abs() < 1e-9);
        assert!((rule_confidence(2) - 0.8).abs() < 1e-9);
        assert!((rule_confidence(10) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn extracts_text_from_selectors() {
        let html = r#"<html><body>
            <div id="promo">  Summer   Sale: 30% off </div>
            <p class="note">Free returns</p>
        </body></html>"#;
        let rules = ExtractionRules {
            selectors: vec!["#promo".into(), "p.note".into(), "[[bad".into()],
        };
        assert_eq!(
            extract_text(html, &rules).as_deref(),
            Some("Summer Sale: 30% off | Free returns")
        );
    }

    #[test]
    fn no_match_is_none() {
        let rules = ExtractionRules {
            selectors: vec!["#missing".into()],
        };
        assert!(extract_text("<p>hello</p>", &rules).is_none());
    }
}
