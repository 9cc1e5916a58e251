//! Learn CSS selectors that locate a confirmed promotion on the page.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use promotrack_common::{CapabilityHint, ExtractionRules};

use super::rules::{collapse_whitespace, extract_text};

static BODY_ELEMENTS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body *").unwrap());
static CSS_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[A-Za-z_][A-Za-z0-9_-]*$").unwrap());

const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg"];
const MAX_SELECTORS: usize = 3;
const MAX_CLASSES: usize = 3;
/// A learned selector matching more elements than this is too generic.
const MAX_MATCHES: usize = 5;
/// How far up from the deepest match to look for an addressable element.
const MAX_ASCENT: usize = 3;
const NEEDLE_CHARS: usize = 80;

fn normalize(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

fn element_text(el: &ElementRef<'_>) -> String {
    normalize(&el.text().collect::<Vec<_>>().join(" "))
}

/// Derive a hint from HTML and the promotion text the model quoted from it.
/// `None` when no stable selector reproduces the text.
pub fn derive_hint(html: &str, promotion_text: &str, now: DateTime<Utc>) -> Option<CapabilityHint> {
    let needle: String = normalize(promotion_text).chars().take(NEEDLE_CHARS).collect();
    let needle = needle.trim().to_string();
    if needle.is_empty() {
        return None;
    }

    let document = Html::parse_document(html);
    let mut selectors: Vec<String> = Vec::new();

    for element in document.select(&BODY_ELEMENTS) {
        if selectors.len() >= MAX_SELECTORS {
            break;
        }
        if SKIP_TAGS.contains(&element.value().name()) || !element_text(&element).contains(&needle) {
            continue;
        }
        let child_has_needle = element
            .children()
            .filter_map(ElementRef::wrap)
            .any(|child| element_text(&child).contains(&needle));
        if child_has_needle {
            continue;
        }

        let addressable = std::iter::once(element)
            .chain(element.ancestors().filter_map(ElementRef::wrap))
            .take(MAX_ASCENT + 1)
            .filter_map(|el| selector_for(&el))
            .find(|candidate| is_stable(&document, html, candidate, &needle));

        if let Some(selector) = addressable {
            if !selectors.contains(&selector) {
                selectors.push(selector);
            }
        }
    }

    if selectors.is_empty() {
        return None;
    }
    Some(CapabilityHint {
        rules: ExtractionRules { selectors },
        learned_at: now,
    })
}

/// `#id` when the element has a usable id, else `tag.class…`.
fn selector_for(el: &ElementRef<'_>) -> Option<String> {
    let value = el.value();
    if matches!(value.name(), "html" | "body") {
        return None;
    }
    if let Some(id) = value.id().filter(|id| CSS_IDENT.is_match(id)) {
        return Some(format!("#{id}"));
    }
    let classes: Vec<&str> = value
        .classes()
        .filter(|c| CSS_IDENT.is_match(c))
        .take(MAX_CLASSES)
        .collect();
    if classes.is_empty() {
        return None;
    }
    Some(format!("{}.{}", value.name(), classes.join(".")))
}

/// The selector parses, is specific, and reproduces the promotion text.
fn is_stable(document: &Html, html: &str, candidate: &str, needle: &str) -> bool {
    let Ok(selector) = Selector::parse(candidate) else {
        return false;
    };
    if document.select(&selector).count() > MAX_MATCHES {
        return false;
    }
    let rules = ExtractionRules {
        selectors: vec![candidate.to_string()],
    };
    extract_text(html, &rules).is_some_and(|text| normalize(&text).contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <header><nav class="top">Shop Men Women</nav></header>
        <div class="hero">
          <div id="promo-banner"><span>Black Friday:</span> <b>40% off</b> everything</div>
        </div>
        <section class="grid"><div class="card">Shoes</div></section>
    </body></html>"#;

    #[test]
    fn prefers_id_of_deepest_container() {
        let hint = derive_hint(PAGE, "Black Friday: 40% off everything", Utc::now()).unwrap();
        assert_eq!(hint.rules.selectors, vec!["#promo-banner"]);
    }

    #[test]
    fn falls_back_to_tag_and_class() {
        let html = r#"<html><body><p class="deal">Flash sale ends tonight</p></body></html>"#;
        let hint = derive_hint(html, "flash sale ends tonight", Utc::now()).unwrap();
        assert_eq!(hint.rules.selectors, vec!["p.deal"]);
    }

    #[test]
    fn text_not_on_page_yields_nothing() {
        assert!(derive_hint(PAGE, "Free shipping on orders over $50", Utc::now()).is_none());
    }

    #[test]
    fn unaddressable_elements_yield_nothing() {
        let html = "<html><body><div><p>Summer sale 20% off</p></div></body></html>";
        assert!(derive_hint(html, "Summer sale 20% off", Utc::now()).is_none());
    }

    #[test]
    fn learned_selectors_round_trip_through_rules() {
        let hint = derive_hint(PAGE, "40% off everything", Utc::now()).unwrap();
        let text = extract_text(PAGE, &hint.rules).unwrap();
        assert!(text.contains("40% off"));
    }
}
