//! Standalone HTML export.
//!
//! Math segments are swapped for private-use placeholders so the converter
//! sees the whole document at once and paragraphs around inline math stay
//! intact. The placeholders are then replaced with the rasterizer's MathML,
//! or with a marked literal when an expression fails to render. The two
//! placeholder characters are removed from the source text beforehand, so
//! only placeholders inserted here are ever substituted.

use crate::{math::MathRasterizer, pipeline::RenderPipeline, segment::segment};

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

#[derive(Debug)]
pub struct HtmlExport {
    pub html: String,
    pub math: usize,
    pub failures: usize,
}

pub fn export_html(text: &str, title: &str, pipeline: &RenderPipeline) -> HtmlExport {
    let segments = segment(text);
    let mut markdown = String::with_capacity(text.len());
    let mut fragments = Vec::new();
    let mut failures = 0;

    for segment in &segments {
        if segment.is_math() {
            markdown.push(PLACEHOLDER_OPEN);
            markdown.push_str(&fragments.len().to_string());
            markdown.push(PLACEHOLDER_CLOSE);
            let (fragment, ok) = math_fragment(
                pipeline.rasterizer(),
                &segment.content,
                segment.display_math,
                &segment.source_text(),
            );
            if !ok {
                failures += 1;
            }
            fragments.push(fragment);
        } else {
            markdown.extend(
                segment
                    .content
                    .chars()
                    .filter(|ch| *ch != PLACEHOLDER_OPEN && *ch != PLACEHOLDER_CLOSE),
            );
        }
    }

    let body = substitute_placeholders(&pipeline.converter().convert(&markdown), &fragments);
    HtmlExport {
        html: page(title, &body),
        math: fragments.len(),
        failures,
    }
}

fn math_fragment(
    rasterizer: &MathRasterizer,
    expr: &str,
    display: bool,
    source: &str,
) -> (String, bool) {
    match rasterizer.render(expr, display) {
        Ok(handle) => (handle.image().markup.clone(), true),
        Err(err) => (
            format!(
                "<code class=\"math-error\" title=\"{}\">{}</code>",
                escape_html(&err.to_string()),
                escape_html(source)
            ),
            false,
        ),
    }
}

fn substitute_placeholders(markup: &str, fragments: &[String]) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;
    while let Some(open) = rest.find(PLACEHOLDER_OPEN) {
        out.push_str(&rest[..open]);
        let after = &rest[open + PLACEHOLDER_OPEN.len_utf8()..];
        let replaced = after.find(PLACEHOLDER_CLOSE).and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            let fragment = fragments.get(index)?;
            Some((fragment, close + PLACEHOLDER_CLOSE.len_utf8()))
        });
        match replaced {
            Some((fragment, consumed)) => {
                out.push_str(fragment);
                rest = &after[consumed..];
            }
            None => {
                out.push(PLACEHOLDER_OPEN);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{}</style>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        STYLESHEET,
        body
    )
}

const STYLESHEET: &str = "body { font-family: sans-serif; max-width: 46em; margin: 2em auto; line-height: 1.5; }
math[display=\"block\"] { display: block; margin: 1em 0; text-align: center; }
pre { background: #f4f4f4; padding: 0.5em; overflow-x: auto; }
blockquote { border-left: 3px solid #ccc; margin-left: 0; padding-left: 1em; color: #555; }
code.math-error { color: #fff; background: #c33; padding: 0 0.2em; }
";

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_math_stays_inside_its_paragraph() {
        let export = export_html("A $x^2$ B\n", "doc", &RenderPipeline::default());
        let start = export.html.find("<p>A ").unwrap();
        let end = export.html[start..].find("</p>").unwrap() + start;
        let paragraph = &export.html[start..end];
        assert!(paragraph.contains("<math"));
        assert!(paragraph.ends_with(" B"));
        assert_eq!((export.math, export.failures), (1, 0));
    }

    #[test]
    fn failed_math_is_marked() {
        let export = export_html(r"bad $$\frac{1$$ here", "doc", &RenderPipeline::default());
        assert_eq!(export.failures, 1);
        assert!(export.html.contains("<code class=\"math-error\""));
        assert!(export.html.contains(r"$$\frac{1$$"));
    }

    #[test]
    fn title_is_escaped() {
        let export = export_html("", "a <b> & c", &RenderPipeline::default());
        assert!(export.html.contains("<title>a &lt;b&gt; &amp; c</title>"));
    }

    #[test]
    fn placeholder_characters_in_source_are_not_substituted() {
        let source = format!("lit {PLACEHOLDER_OPEN}0{PLACEHOLDER_CLOSE} and $y$\n");
        let export = export_html(&source, "doc", &RenderPipeline::default());
        assert_eq!(export.math, 1);
        assert_eq!(export.html.matches("<math").count(), 1);
        assert!(export.html.contains("<p>lit 0 and <math"));
        assert!(!export.html.contains(PLACEHOLDER_OPEN));
    }

    #[test]
    fn stray_placeholders_are_left_alone() {
        let fragments = vec!["<math/>".to_string()];
        let markup = format!("x{PLACEHOLDER_OPEN}0{PLACEHOLDER_CLOSE}y{PLACEHOLDER_OPEN}9");
        assert_eq!(
            substitute_placeholders(&markup, &fragments),
            format!("x<math/>y{PLACEHOLDER_OPEN}9")
        );
    }
}
