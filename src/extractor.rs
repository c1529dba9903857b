//! Pulls the ranked fields out of a rendered product page.
//!
//! Each field has an ordered list of CSS selectors. The first selector that
//! matches an element with non-empty text decides the field; later selectors
//! are only fallbacks.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionRules {
    pub title: Vec<String>,
    pub price: Vec<String>,
    pub buyer_count: Vec<String>,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        fn owned(selectors: &[&str]) -> Vec<String> {
            selectors.iter().map(|s| s.to_string()).collect()
        }
        Self {
            title: owned(&["#productTitle", "#title", "h2 a span", "h1"]),
            price: owned(&[
                "#corePrice_feature_div .a-offscreen",
                ".a-price .a-offscreen",
                "#priceblock_ourprice",
                "#priceblock_dealprice",
            ]),
            buyer_count: owned(&[
                "#acrCustomerReviewText",
                "[data-hook=\"total-review-count\"]",
                "span.a-size-base.s-underline-text",
            ]),
        }
    }
}

/// Fields found on a page; `None` when no rule produced usable text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub title: Option<String>,
    pub price: Option<String>,
    pub buyer_count: Option<u64>,
}

/// Compiled [`ExtractionRules`].
#[derive(Debug, Clone)]
pub struct Extractor {
    title: Vec<Selector>,
    price: Vec<Selector>,
    buyer_count: Vec<Selector>,
}

impl Extractor {
    pub fn new(rules: &ExtractionRules) -> Result<Self, ConfigError> {
        Ok(Self {
            title: compile("title", &rules.title)?,
            price: compile("price", &rules.price)?,
            buyer_count: compile("buyer_count", &rules.buyer_count)?,
        })
    }

    pub fn extract(&self, html: &str) -> Extracted {
        let document = Html::parse_document(html);
        Extracted {
            title: first_text(&document, &self.title),
            price: first_text(&document, &self.price),
            buyer_count: first_text(&document, &self.buyer_count)
                .as_deref()
                .and_then(parse_buyer_count),
        }
    }
}

fn compile(field: &'static str, selectors: &[String]) -> Result<Vec<Selector>, ConfigError> {
    selectors
        .iter()
        .map(|selector| {
            Selector::parse(selector).map_err(|_| ConfigError::InvalidSelector {
                field,
                selector: selector.clone(),
            })
        })
        .collect()
}

fn first_text(document: &Html, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|selector| {
        document
            .select(selector)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a count out of free text such as `"1,044,554 ratings"`.
///
/// Every non-digit character is dropped; `None` if nothing numeric remains or
/// the number does not fit in a `u64`.
pub fn parse_buyer_count(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_PAGE: &str = r#"
        <html><body>
          <span id="productTitle">
            Echo Dot (5th Gen)   Smart speaker
          </span>
          <div id="corePrice_feature_div">
            <span class="a-price"><span class="a-offscreen">$49.99</span></span>
          </div>
          <span id="acrCustomerReviewText">12,345 ratings</span>
        </body></html>
    "#;

    fn extractor() -> Extractor {
        Extractor::new(&ExtractionRules::default()).unwrap()
    }

    #[test]
    fn extracts_all_fields_from_product_page() {
        let extracted = extractor().extract(PRODUCT_PAGE);
        assert_eq!(
            extracted,
            Extracted {
                title: Some("Echo Dot (5th Gen) Smart speaker".into()),
                price: Some("$49.99".into()),
                buyer_count: Some(12_345),
            }
        );
    }

    #[test]
    fn falls_back_to_later_selectors() {
        let html = r#"
            <h1>Kindle Paperwhite</h1>
            <span id="priceblock_ourprice">$139.99</span>
            <a data-hook="total-review-count">987 global ratings</a>
        "#;
        let extracted = extractor().extract(html);
        assert_eq!(extracted.title.as_deref(), Some("Kindle Paperwhite"));
        assert_eq!(extracted.price.as_deref(), Some("$139.99"));
        assert_eq!(extracted.buyer_count, Some(987));
    }

    #[test]
    fn empty_primary_match_does_not_win() {
        let html = r#"<span id="productTitle">   </span><h1>Fire TV Stick</h1>"#;
        assert_eq!(
            extractor().extract(html).title.as_deref(),
            Some("Fire TV Stick")
        );
    }

    #[test]
    fn missing_fields_are_none() {
        let extracted = extractor().extract("<html><body><p>nothing here</p></body></html>");
        assert_eq!(extracted, Extracted::default());
    }

    #[test]
    fn count_text_without_digits_is_none() {
        let html = r#"<span id="productTitle">Echo</span>
                      <span id="acrCustomerReviewText">No ratings yet</span>"#;
        let extracted = extractor().extract(html);
        assert_eq!(extracted.title.as_deref(), Some("Echo"));
        assert_eq!(extracted.buyer_count, None);
    }

    #[test]
    fn buyer_count_parsing() {
        assert_eq!(parse_buyer_count("12,345 ratings"), Some(12_345));
        assert_eq!(parse_buyer_count("1,044,554 ratings"), Some(1_044_554));
        assert_eq!(parse_buyer_count("4,294,967,296"), Some(4_294_967_296));
        assert_eq!(parse_buyer_count("0 reviews"), Some(0));
        assert_eq!(parse_buyer_count("ratings"), None);
        assert_eq!(parse_buyer_count(""), None);
        assert_eq!(parse_buyer_count("99999999999999999999999"), None);
    }

    #[test]
    fn custom_rules_replace_defaults() {
        let rules = ExtractionRules {
            title: vec![".name".into()],
            price: vec![],
            buyer_count: vec![".sold".into()],
        };
        let extracted = Extractor::new(&rules)
            .unwrap()
            .extract(r#"<div class="name">Widget</div><div class="sold">3 sold</div>"#);
        assert_eq!(extracted.title.as_deref(), Some("Widget"));
        assert_eq!(extracted.price, None);
        assert_eq!(extracted.buyer_count, Some(3));
    }

    #[test]
    fn invalid_selector_is_a_config_error() {
        let rules = ExtractionRules {
            price: vec!["[[nope".into()],
            ..ExtractionRules::default()
        };
        assert!(matches!(
            Extractor::new(&rules),
            Err(ConfigError::InvalidSelector { field: "price", .. })
        ));
    }

    #[test]
    fn partial_rules_json_keeps_other_defaults() {
        let rules: ExtractionRules = serde_json::from_str(r#"{"title": [".t"]}"#).unwrap();
        assert_eq!(rules.title, vec![".t"]);
        assert_eq!(rules.price, ExtractionRules::default().price);
    }
}
