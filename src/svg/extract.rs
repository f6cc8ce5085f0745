use std::sync::LazyLock;

use regex::Regex;

/// Top-level svg spans of a reply
pub(super) struct Candidates<'a>
{   pub spans: Vec<&'a str>
  , /// Non-whitespace text outside every span (prose, fences,
    /// XML declarations)
    pub surrounding_text: bool
}

static SVG_TAG: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"<svg(?:\s(?:[^>"']|"[^"]*"|'[^']*')*)?/?>|</svg\s*>"#)
    .expect("svg tag pattern is valid")
});

/// Split at top-level root boundaries; nested `<svg>` stays inside
/// its parent. An unterminated last root runs to the end of input.
pub(super) fn find_candidates(raw: &str) -> Candidates<'_>
{   let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for tag in SVG_TAG.find_iter(raw)
    {   let text = tag.as_str();
        if text.starts_with("</")
        {   if depth == 0
            {   continue;
            }
            depth -= 1;
            if depth == 0
            {   spans.push((start, tag.end()));
            }
        } else if text.ends_with("/>")
        {   if depth == 0
            {   spans.push((tag.start(), tag.end()));
            }
        } else
        {   if depth == 0
            {   start = tag.start();
            }
            depth += 1;
        }
    }
    if depth > 0
    {   spans.push((start, raw.len()));
    }

    let mut outside = String::new();
    let mut cursor = 0;
    for &(s, e) in &spans
    {   outside.push_str(&raw[cursor..s]);
        cursor = e;
    }
    outside.push_str(&raw[cursor..]);

    Candidates
    {   spans: spans.iter().map(|&(s, e)| &raw[s..e]).collect()
      , surrounding_text: !outside.trim().is_empty()
    }
}

#[cfg(test)]
mod tests
{   use super::*;

    #[test]
    fn nested_svg_stays_in_parent()
    {   let raw = "<svg><svg><rect/></svg></svg><svg/>";
        let found = find_candidates(raw);
        assert_eq!(
          found.spans,
          vec!["<svg><svg><rect/></svg></svg>", "<svg/>"]
        );
        assert!(!found.surrounding_text);
    }

    #[test]
    fn unterminated_root_runs_to_end()
    {   let found = find_candidates("ok: <svg width=\"3\"><g>");
        assert_eq!(found.spans, vec!["<svg width=\"3\"><g>"]);
        assert!(found.surrounding_text);
    }

    #[test]
    fn svg_prefixed_names_are_not_roots()
    {   let found = find_candidates("<svgfoo></svgfoo>");
        assert!(found.spans.is_empty());
    }
}
