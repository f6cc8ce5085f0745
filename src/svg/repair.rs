//! Text-level fixes applied once to a candidate that did not parse

use std::sync::LazyLock;

use regex::Regex;

use super::RepairAction;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?is)<script\b[^>]*/>|<script\b[^>]*>.*?(?:</script\s*>|$)")
    .expect("script pattern is valid")
});

static EVENT_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(?i)\s(on[a-z]+)\s*=\s*(?:"[^"]*"|'[^']*')"#)
    .expect("event handler pattern is valid")
});

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^(?:#[0-9]+|#x[0-9a-fA-F]+|amp|lt|gt|quot|apos);")
    .expect("entity pattern is valid")
});

static MARKUP: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    concat!(
      r#"(?s)<!--.*?-->|<!\[CDATA\[.*?\]\]>|<\?.*?\?>"#,
      r#"|<(/?)([A-Za-z_][\w:.\-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#
    )
  ).expect("markup pattern is valid")
});

const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

/// Apply every repair in order and report what changed
pub(super) fn repair(text: &str, repairs: &mut Vec<RepairAction>) -> String
{   let text = declare_xlink(text, repairs);
    let text = strip_scripts(&text, repairs);
    let text = strip_event_handlers(&text, repairs);
    let text = escape_ampersands(&text, repairs);
    let text = drop_truncated_tag(&text, repairs);
    balance_tags(&text, repairs)
}

/// Models use `xlink:href` without declaring the prefix
fn declare_xlink(text: &str, repairs: &mut Vec<RepairAction>) -> String
{   if !text.contains("xlink:") || text.contains("xmlns:xlink")
    {   return text.to_string();
    }
    match text.find("<svg")
    {   Some(i) => {
          repairs.push(RepairAction::DeclaredNamespace("xlink".to_string()));
          let at = i + "<svg".len();
          format!(
            "{} xmlns:xlink=\"{}\"{}",
            &text[..at], XLINK_NAMESPACE, &text[at..]
          )
        }
      , None => text.to_string()
    }
}

fn strip_scripts(text: &str, repairs: &mut Vec<RepairAction>) -> String
{   if !SCRIPT_BLOCK.is_match(text)
    {   return text.to_string();
    }
    repairs.push(RepairAction::RemovedScript);
    SCRIPT_BLOCK.replace_all(text, "").into_owned()
}

fn strip_event_handlers(text: &str, repairs: &mut Vec<RepairAction>)
  -> String
{   for caps in EVENT_HANDLER.captures_iter(text)
    {   repairs.push(
          RepairAction::RemovedUnsafeAttribute(caps[1].to_string())
        );
    }
    EVENT_HANDLER.replace_all(text, "").into_owned()
}

/// `&` that does not start one of the five predefined entities or a
/// character reference becomes `&amp;`
fn escape_ampersands(text: &str, repairs: &mut Vec<RepairAction>)
  -> String
{   let mut out = String::with_capacity(text.len());
    let mut escaped = 0;
    for (i, c) in text.char_indices()
    {   if c == '&' && !ENTITY.is_match(&text[i + 1..])
        {   out.push_str("&amp;");
            escaped += 1;
        } else
        {   out.push(c);
        }
    }
    if escaped > 0
    {   repairs.push(RepairAction::EscapedAmpersands(escaped));
    }
    out
}

/// Output cut off by a token limit often ends inside a tag
fn drop_truncated_tag(text: &str, repairs: &mut Vec<RepairAction>)
  -> String
{   match text.rfind('<')
    {   Some(i) if !text[i..].contains('>') => {
          repairs.push(RepairAction::DroppedTruncatedTag);
          text[..i].to_string()
        }
      , _ => text.to_string()
    }
}

/// Close tags left open and drop closers nothing opened
fn balance_tags(text: &str, repairs: &mut Vec<RepairAction>) -> String
{   let mut out = String::with_capacity(text.len() + 32);
    let mut open: Vec<String> = Vec::new();
    let mut cursor = 0;

    for caps in MARKUP.captures_iter(text)
    {   let whole = caps.get(0).map_or(0..0, |m| m.range());
        out.push_str(&text[cursor..whole.start]);
        cursor = whole.end;

        let Some(name) = caps.get(2).map(|m| m.as_str())
        else
        {   out.push_str(&text[whole]);
            continue;
        };
        let closing = caps.get(1).is_some_and(|m| m.as_str() == "/");
        let self_closing = caps.get(3)
          .is_some_and(|m| m.as_str().trim_end().ends_with('/'));

        if !closing
        {   if !self_closing
            {   open.push(name.to_string());
            }
            out.push_str(&text[whole]);
        } else if open.iter().any(|o| o == name)
        {   while let Some(top) = open.pop()
            {   if top == name
                {   break;
                }
                out.push_str(&format!("</{}>", top));
                repairs.push(RepairAction::ClosedUnterminatedTag(top));
            }
            out.push_str(&text[whole]);
        } else
        {   repairs.push(
              RepairAction::DroppedStrayClosingTag(name.to_string())
            );
        }
    }
    out.push_str(&text[cursor..]);

    while let Some(top) = open.pop()
    {   out.push_str(&format!("</{}>", top));
        repairs.push(RepairAction::ClosedUnterminatedTag(top));
    }
    out
}
