//! CSS inlining: full inline or critical CSS with deferred stylesheets

use super::extract::CriticalCssExtractor;
use super::render_tag;
use crate::crawler::FetchedStylesheet;
use cssparser::{ParseError, Parser, ParserInput, Token};
use lol_html::errors::RewritingError;
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use url::{Position, Url};

/// Turns `rel=preload as=style` links into stylesheets on browsers without preload support
const PRELOAD_POLYFILL: &str = r#"(function(){var r=document.createElement("link").relList;if(r&&r.supports&&r.supports("preload"))return;var l=document.querySelectorAll('link[rel="preload"][as="style"]');for(var i=0;i<l.length;i++){l[i].rel="stylesheet";}})();"#;

/// How stylesheets end up in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssStrategy {
    /// All CSS embedded in one `<style>`
    Inline,
    /// Critical CSS embedded, stylesheets loaded without blocking render
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssDecision {
    pub strategy: CssStrategy,
    /// CSS that gets embedded
    pub payload: String,
    pub byte_size: usize,
    pub total_size: usize,
}

/// Chooses between embedding everything and embedding only critical CSS
///
/// Critical CSS only pays off when it is less than half of the total.
///
/// # Example
///
/// ```
/// use sumi_snap::finalize::{decide_css_strategy, CssStrategy};
///
/// let decision = decide_css_strategy("a{color:red}b{color:blue}", Some("a{color:red}"));
/// assert_eq!(decision.strategy, CssStrategy::Inline);
///
/// let decision = decide_css_strategy("a{color:red}b{color:blue}i{color:green}", Some("a{color:red}"));
/// assert_eq!(decision.strategy, CssStrategy::Critical);
/// assert_eq!(decision.payload, "a{color:red}");
/// ```
pub fn decide_css_strategy(all_css: &str, critical: Option<&str>) -> CssDecision {
    let total_size = all_css.len();

    match critical.filter(|css| !css.is_empty()) {
        Some(critical) if critical.len() * 2 < total_size => CssDecision {
            strategy: CssStrategy::Critical,
            payload: critical.to_string(),
            byte_size: critical.len(),
            total_size,
        },
        _ => CssDecision {
            strategy: CssStrategy::Inline,
            payload: all_css.to_string(),
            byte_size: total_size,
            total_size,
        },
    }
}

/// Removes comments and insignificant whitespace
///
/// Works on `cssparser` tokens, so strings and URLs are copied untouched.
/// Whitespace inside selectors and values is collapsed to one space rather
/// than removed, and blocks left open at the end of input are closed.
pub fn minify_css(css: &str) -> String {
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut out = String::with_capacity(css.len());
    write_minified(&mut parser, None, &mut out);
    out
}

/// Minifies one fetched stylesheet and rebases its relative `url(...)`
/// references onto the stylesheet's own location
///
/// # Example
///
/// ```
/// use sumi_snap::finalize::css::minify_stylesheet;
///
/// assert_eq!(
///     minify_stylesheet(".logo { background: url(../img/logo.png) }", "http://localhost:45678/static/css/main.css"),
///     r#".logo{background:url("/static/img/logo.png")}"#
/// );
/// ```
pub fn minify_stylesheet(css: &str, stylesheet_url: &str) -> String {
    let base = Url::parse(stylesheet_url).ok();
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    let mut out = String::with_capacity(css.len());
    write_minified(&mut parser, base.as_ref(), &mut out);
    out
}

fn write_minified<'i, 't>(parser: &mut Parser<'i, 't>, base: Option<&Url>, out: &mut String) {
    let mut pending_space = false;

    loop {
        let start = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };

        let closing = match &token {
            Token::WhiteSpace(_) | Token::Comment(_) => {
                pending_space = true;
                continue;
            }
            Token::Function(_) | Token::ParenthesisBlock => Some(')'),
            Token::SquareBracketBlock => Some(']'),
            Token::CurlyBracketBlock => Some('}'),
            _ => None,
        };

        if pending_space && needs_space(out, &token) {
            out.push(' ');
        }
        pending_space = false;

        match (&token, base) {
            (Token::UnquotedUrl(value), Some(base)) => {
                match rebase_url(value, base) {
                    Some(url) => push_url(out, &url),
                    None => out.push_str(parser.slice_from(start)),
                }
                continue;
            }
            (Token::Function(name), Some(base)) if name.eq_ignore_ascii_case("url") => {
                let value = parser
                    .parse_nested_block(|block| {
                        let mut value = None;
                        while let Ok(token) = block.next() {
                            if let Token::QuotedString(s) = token {
                                value = Some(s.as_ref().to_string());
                            }
                        }
                        Ok::<_, ParseError<'i, ()>>(value)
                    })
                    .ok()
                    .flatten();
                match value.and_then(|value| rebase_url(&value, base)) {
                    Some(url) => push_url(out, &url),
                    None => out.push_str(parser.slice_from(start)),
                }
                continue;
            }
            _ => {}
        }

        out.push_str(parser.slice_from(start));

        if let Some(close) = closing {
            let _ = parser.parse_nested_block(|block| {
                write_minified(block, base, out);
                Ok::<_, ParseError<'i, ()>>(())
            });
            if close == '}' && out.ends_with(';') {
                out.pop();
            }
            out.push(close);
        }
    }
}

/// Whether skipped whitespace between the output so far and `next` matters
fn needs_space(out: &str, next: &Token<'_>) -> bool {
    let after_separator = matches!(
        out.chars().last(),
        None | Some('{' | '}' | ';' | ',' | '>' | ':' | '(' | '[')
    );
    let before_separator = matches!(
        next,
        Token::CurlyBracketBlock | Token::Semicolon | Token::Comma | Token::Delim('>')
    );
    !after_separator && !before_separator
}

/// Root-relative form of a stylesheet-relative URL; None when it needs no rebasing
fn rebase_url(value: &str, base: &Url) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('/') || value.starts_with('#') || Url::parse(value).is_ok() {
        return None;
    }
    let resolved = base.join(value).ok()?;
    Some(resolved[Position::BeforePath..].to_string())
}

fn push_url(out: &mut String, url: &str) {
    out.push_str(&format!("url(\"{}\")", url.replace('\\', "\\\\").replace('"', "\\\"")));
}

/// Resolved hrefs of every `link[rel=stylesheet]`, in document order
pub fn stylesheet_urls(html: &str, location: &str) -> Vec<String> {
    let Ok(base) = Url::parse(location) else {
        return Vec::new();
    };

    let mut urls = Vec::new();
    let result = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("link[rel=stylesheet][href]", |el| {
                if let Some(url) = el.get_attribute("href").and_then(|href| base.join(href.trim()).ok()) {
                    urls.push(url.to_string());
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    );

    match result {
        Ok(_) => urls,
        Err(e) => {
            tracing::debug!("Could not scan stylesheets: {}", e);
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InlineOptions {
    /// Minify CSS and compute critical CSS
    pub minify: bool,
    /// Keep stylesheet links when everything is inlined
    pub leave_link_css: bool,
    pub warn_kb: u64,
}

/// Output of the CSS pass
#[derive(Debug, Clone, Default)]
pub struct Inlined {
    pub html: String,
    /// Absolute URLs of stylesheets embedded in full
    pub inlined_files: Vec<String>,
    pub warning: Option<String>,
}

/// Embeds stylesheets into the document
///
/// Each stylesheet is minified on its own, so a rule left open in one sheet
/// cannot swallow the next. When critical CSS cannot be computed the full
/// CSS is inlined. `process_css` may rewrite the chosen payload before its
/// size is checked.
pub fn inline_css<F>(
    html: &str,
    stylesheets: &[FetchedStylesheet],
    extractor: &dyn CriticalCssExtractor,
    options: &InlineOptions,
    process_css: F,
) -> Result<Inlined, RewritingError>
where
    F: FnOnce(String) -> String,
{
    let fetched: Vec<&FetchedStylesheet> = stylesheets.iter().filter(|s| s.body.is_some()).collect();
    let all_css: String = fetched
        .iter()
        .filter_map(|s| s.body.as_deref().map(|body| minify_stylesheet(body, &s.url)))
        .collect();

    if all_css.is_empty() {
        return Ok(Inlined {
            html: html.to_string(),
            ..Inlined::default()
        });
    }

    let critical = if options.minify {
        match extractor.extract(&all_css, html) {
            Ok(css) => Some(minify_css(&css)),
            Err(e) => {
                tracing::warn!("{}, inlining all CSS", e);
                None
            }
        }
    } else {
        None
    };
    let decision = decide_css_strategy(&all_css, critical.as_deref());
    let payload = process_css(decision.payload);

    let warning = (payload.len() as u64 > options.warn_kb * 1024).then(|| {
        format!(
            "inlining CSS more than {}kb ({}kb, {}kb before processing, {:?})",
            options.warn_kb,
            payload.len() / 1024,
            decision.byte_size / 1024,
            decision.strategy
        )
    });

    match decision.strategy {
        CssStrategy::Inline => Ok(Inlined {
            html: embed_all(html, &payload, options.leave_link_css)?,
            inlined_files: fetched.iter().map(|s| s.url.clone()).collect(),
            warning,
        }),
        CssStrategy::Critical => Ok(Inlined {
            html: embed_critical(html, &payload)?,
            inlined_files: Vec::new(),
            warning,
        }),
    }
}

fn style_tag(css: &str) -> String {
    format!("<style>{}</style>", css.replace("</style", "<\\/style"))
}

fn embed_all(html: &str, css: &str, leave_link_css: bool) -> Result<String, RewritingError> {
    let style = style_tag(css);
    let mut handlers = vec![element!("head", |el| {
        el.append(&style, ContentType::Html);
        Ok(())
    })];
    if !leave_link_css {
        handlers.push(element!("link[rel=stylesheet]", |el| {
            el.remove();
            Ok(())
        }));
    }

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )
}

fn embed_critical(html: &str, css: &str) -> Result<String, RewritingError> {
    let mut links: Vec<Vec<(String, String)>> = Vec::new();
    let without_links = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("link[rel=stylesheet]", |el| {
                links.push(
                    el.attributes()
                        .iter()
                        .map(|attr| (attr.name(), attr.value()))
                        .collect(),
                );
                el.remove();
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;

    let noscript: String = links.iter().map(|attrs| render_tag("link", attrs)).collect();
    let preloads: String = links.iter().map(|attrs| render_tag("link", &as_preload(attrs))).collect();
    let head = format!("{}<noscript>{}</noscript>{}", style_tag(css), noscript, preloads);
    let polyfill = format!("<script>{}</script>", PRELOAD_POLYFILL);

    rewrite_str(
        &without_links,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("head", |el| {
                    el.append(&head, ContentType::Html);
                    Ok(())
                }),
                element!("body", |el| {
                    el.append(&polyfill, ContentType::Html);
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
}

/// Stylesheet link attributes rewritten into a non-blocking preload
fn as_preload(attrs: &[(String, String)]) -> Vec<(String, String)> {
    let mut preload: Vec<(String, String)> = attrs
        .iter()
        .filter(|(name, _)| name != "as" && name != "onload")
        .map(|(name, value)| {
            if name == "rel" {
                (name.clone(), "preload".to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect();
    preload.push(("as".to_string(), "style".to_string()));
    preload.push(("onload".to_string(), "this.rel='stylesheet'".to_string()));
    preload
}
