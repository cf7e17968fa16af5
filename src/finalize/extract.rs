//! Critical CSS extraction

use cssparser::{ParseError, Parser, ParserInput, Token};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("critical CSS extraction failed: {0}")]
pub struct ExtractError(pub String);

/// Computes the CSS needed to render a document's initial view
pub trait CriticalCssExtractor: Send + Sync {
    fn extract(&self, css: &str, html: &str) -> Result<String, ExtractError>;
}

/// Keeps the rules whose selectors match at least one element of the document
///
/// Pseudo-classes and pseudo-elements are ignored when matching, and a
/// selector the matcher cannot parse is kept. Font faces and keyframes are
/// always kept; `@media` and `@supports` blocks are filtered recursively.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorCoverageExtractor;

impl CriticalCssExtractor for SelectorCoverageExtractor {
    fn extract(&self, css: &str, html: &str) -> Result<String, ExtractError> {
        let document = Html::parse_document(html);
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);
        let mut out = String::new();
        filter_rules(&mut parser, &document, &mut out);
        Ok(out)
    }
}

fn pseudo_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"::?[a-zA-Z-]+(\([^)]*\))?").expect("valid pseudo selector pattern"))
}

/// Copies the rules of one rule list that apply to `document` into `out`
///
/// Statement at-rules such as `@charset` and `@import` are dropped. A block
/// left open at the end of input ends there.
fn filter_rules<'i, 't>(parser: &mut Parser<'i, 't>, document: &Html, out: &mut String) {
    let mut prelude_start = parser.position();

    loop {
        let token_start = parser.position();
        let (is_block, is_statement_end) = match parser.next_including_whitespace_and_comments() {
            Ok(token) => (
                matches!(token, Token::CurlyBracketBlock),
                matches!(token, Token::Semicolon),
            ),
            Err(_) => break,
        };

        if is_statement_end {
            prelude_start = parser.position();
            continue;
        }
        if !is_block {
            continue;
        }

        let prelude = parser.slice(prelude_start..token_start).trim();
        let at_rule = prelude.to_ascii_lowercase();

        let _ = parser.parse_nested_block(|block| {
            if at_rule.starts_with("@media") || at_rule.starts_with("@supports") {
                let mut inner = String::new();
                filter_rules(block, document, &mut inner);
                if !inner.is_empty() {
                    out.push_str(&format!("{}{{{}}}", prelude, inner));
                }
            } else {
                let body = block_text(block);
                if at_rule.starts_with('@') {
                    out.push_str(&format!("{}{{{}}}", prelude, body));
                } else {
                    let matched: Vec<&str> = split_selectors(prelude)
                        .into_iter()
                        .filter(|selector| selector_matches(selector, document))
                        .collect();
                    if !matched.is_empty() {
                        out.push_str(&format!("{}{{{}}}", matched.join(","), body));
                    }
                }
            }
            Ok::<_, ParseError<'i, ()>>(())
        });

        prelude_start = parser.position();
    }
}

/// Source text of the rest of a block
fn block_text<'i>(block: &mut Parser<'i, '_>) -> &'i str {
    let start = block.position();
    while block.next_including_whitespace_and_comments().is_ok() {}
    block.slice_from(start)
}

fn selector_matches(selector: &str, document: &Html) -> bool {
    let stripped = pseudo_pattern().replace_all(selector, "");
    let stripped = stripped.trim();
    let stripped = if stripped.is_empty() || stripped.ends_with(['>', '+', '~']) {
        format!("{}*", stripped)
    } else {
        stripped.to_string()
    };

    let matched = match Selector::parse(&stripped) {
        Ok(parsed) => document.select(&parsed).next().is_some(),
        Err(_) => true,
    };
    matched
}

/// Splits a selector list on top-level commas
fn split_selectors(prelude: &str) -> Vec<&str> {
    let mut input = ParserInput::new(prelude);
    let mut parser = Parser::new(&mut input);
    let mut selectors = Vec::new();
    let mut start = parser.position();

    loop {
        let end = parser.position();
        match parser.next_including_whitespace_and_comments() {
            Ok(Token::Comma) => {
                selectors.push(parser.slice(start..end).trim());
                start = parser.position();
            }
            Ok(_) => {}
            Err(_) => {
                selectors.push(parser.slice(start..end).trim());
                break;
            }
        }
    }

    selectors.retain(|s| !s.is_empty());
    selectors
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"<html><body><nav class="menu"><a href="/">Home</a></nav><h1 id="title">Hi</h1></body></html>"#;

    fn extract(css: &str) -> String {
        SelectorCoverageExtractor.extract(css, HTML).unwrap()
    }

    #[test]
    fn test_keeps_matching_rules() {
        assert_eq!(
            extract(".menu a{color:red}.footer{color:blue}#title{margin:0}"),
            ".menu a{color:red}#title{margin:0}"
        );
    }

    #[test]
    fn test_filters_selector_lists() {
        assert_eq!(extract(".footer,h1,.aside p{font-weight:bold}"), "h1{font-weight:bold}");
    }

    #[test]
    fn test_pseudo_classes_ignored() {
        assert_eq!(
            extract("a:hover{color:red}.footer::before{content:\"x\"}"),
            "a:hover{color:red}"
        );
    }

    #[test]
    fn test_media_blocks_filtered_recursively() {
        assert_eq!(
            extract("@media (max-width:600px){h1{font-size:1em}.footer{display:none}}@media print{.footer{display:none}}"),
            "@media (max-width:600px){h1{font-size:1em}}"
        );
    }

    #[test]
    fn test_font_face_and_keyframes_kept() {
        let css = "@font-face{font-family:x;src:url(x.woff)}@keyframes spin{from{opacity:0}to{opacity:1}}";
        assert_eq!(extract(css), css);
    }

    #[test]
    fn test_statement_rules_dropped() {
        assert_eq!(extract("@charset \"utf-8\";h1{color:red}"), "h1{color:red}");
    }

    #[test]
    fn test_braces_in_strings() {
        assert_eq!(extract("h1{content:\"}{\"}"), "h1{content:\"}{\"}");
    }

    #[test]
    fn test_unterminated_rule_ends_at_input_end() {
        assert_eq!(extract(".footer{color:blue}h1{color:red"), "h1{color:red}");
    }

    #[test]
    fn test_commas_inside_functional_selectors() {
        assert_eq!(extract(":is(.menu, .footer) a,.aside{color:red}"), ":is(.menu, .footer) a{color:red}");
    }
}
