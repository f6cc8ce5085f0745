//! Re-serialization of a parsed root with enforced geometry and policy

use std::collections::BTreeSet;
use std::fmt::Write as _;

use roxmltree::{Document, Node};

use super::{
  format_number, RepairAction, SanitizeOptions, ViewBox, SVG_NAMESPACE,
};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Direct children that stay outside a rescaling wrapper
const UNSCALED_CHILDREN: [&str; 4] = ["title", "desc", "metadata", "defs"];

pub(super) struct Normalized
{   pub markup: String
  , pub width: Option<f64>
  , pub height: Option<f64>
  , pub view_box: Option<ViewBox>
}

/// Parse and require an `svg` root element
pub(super) fn parse_root(text: &str) -> Result<Document<'_>, String>
{   let doc = Document::parse(text).map_err(|e| e.to_string())?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg"
    {   return Err(format!(
          "root element is <{}>, not <svg>", root.tag_name().name()
        ));
    }
    Ok(doc)
}

/// `10`, `10.5px`; other units and percentages are not dimensions
fn parse_length(value: Option<&str>) -> Option<f64>
{   let value = value?.trim();
    let number = value.strip_suffix("px").unwrap_or(value).trim();
    number.parse::<f64>()
      .ok()
      .filter(|n| n.is_finite() && *n > 0.0)
}

struct Geometry
{   width: Option<f64>
  , height: Option<f64>
  , view_box: Option<ViewBox>
  , transform: Option<String>
}

fn resolve_geometry(
  root: Node
, options: &SanitizeOptions
, repairs: &mut Vec<RepairAction>
) -> Geometry
{   let width = parse_length(root.attribute("width"));
    let height = parse_length(root.attribute("height"));
    let declared_box = root.attribute("viewBox").and_then(ViewBox::parse);

    let Some((target_w, target_h)) = options.target
    else
    {   return intrinsic_geometry(width, height, declared_box, repairs);
    };

    let (tw, th) = (target_w as f64, target_h as f64);
    let target_box = ViewBox::sized(tw, th);
    if width != Some(tw) || height != Some(th)
    {   repairs.push(RepairAction::SetDimensions { width: tw, height: th });
    }

    let intrinsic = declared_box.or(match (width, height)
    {   (Some(w), Some(h)) => Some(ViewBox::sized(w, h))
      , _ => None
    });
    let transform = match intrinsic
    {   Some(from) if !from.approx_eq(&target_box) => {
          repairs.push(RepairAction::Rescaled { from, to: target_box });
          Some(fit_transform(&from, tw, th))
        }
      , Some(_) => {
          if declared_box.is_none()
          {   repairs.push(RepairAction::AddedViewBox(target_box));
          }
          None
        }
      , None => {
          repairs.push(RepairAction::AddedViewBox(target_box));
          None
        }
    };

    Geometry
    {   width: Some(tw)
      , height: Some(th)
      , view_box: Some(target_box)
      , transform
    }
}

fn intrinsic_geometry(
  width: Option<f64>
, height: Option<f64>
, declared_box: Option<ViewBox>
, repairs: &mut Vec<RepairAction>
) -> Geometry
{   let (width, height, view_box) = match (width, height, declared_box)
    {   (Some(w), Some(h), None) => {
          let derived = ViewBox::sized(w, h);
          repairs.push(RepairAction::AddedViewBox(derived));
          (Some(w), Some(h), Some(derived))
        }
      , (w, h, Some(vb)) if w.is_none() || h.is_none() => {
          let (w, h) = (w.unwrap_or(vb.width), h.unwrap_or(vb.height));
          repairs.push(RepairAction::SetDimensions { width: w, height: h });
          (Some(w), Some(h), Some(vb))
        }
      , other => other
    };
    Geometry
    {   width
      , height
      , view_box
      , transform: None
    }
}

/// Uniform scale that fits `from` into `0 0 w h`, centred
fn fit_transform(from: &ViewBox, w: f64, h: f64) -> String
{   let scale = (w / from.width).min(h / from.height);
    let tx = (w - from.width * scale) / 2.0 - from.min_x * scale;
    let ty = (h - from.height * scale) / 2.0 - from.min_y * scale;
    let scale_text = format!("scale({})", format_number(scale));
    if format_number(tx) == "0" && format_number(ty) == "0"
    {   scale_text
    } else
    {   format!(
          "translate({} {}) {}",
          format_number(tx),
          format_number(ty),
          scale_text
        )
    }
}

fn stays_unscaled(node: &Node) -> bool
{   node.is_element()
      && UNSCALED_CHILDREN.contains(&node.tag_name().name())
}

fn is_gradient(name: &str) -> bool
{   name == "linearGradient" || name == "radialGradient"
}

fn is_animation(name: &str) -> bool
{   name.starts_with("animate") || name == "set"
}

/// Ids in `url(#id)` references inside an attribute value
fn url_references(value: &str) -> Vec<&str>
{   let mut ids = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find("url(")
    {   rest = &rest[start + 4..];
        let Some(end) = rest.find(')')
        else
        {   break;
        };
        let inner = rest[..end].trim().trim_matches(|c| c == '"' || c == '\'');
        if let Some(id) = inner.strip_prefix('#')
        {   ids.push(id.trim());
        }
        rest = &rest[end + 1..];
    }
    ids
}

/// Replace `url(...#id...)` for each listed id
fn replace_references(value: &str, ids: &[&str], color: &str) -> String
{   let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("url(")
    {   let Some(end) = rest[start..].find(')')
        else
        {   break;
        };
        let call = &rest[start..start + end + 1];
        out.push_str(&rest[..start]);
        if url_references(call).iter().any(|id| ids.contains(id))
        {   out.push_str(color);
        } else
        {   out.push_str(call);
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    out
}

fn escape_text(text: &str) -> String
{   text.replace('&', "&amp;")
      .replace('<', "&lt;")
      .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String
{   value.replace('&', "&amp;")
      .replace('<', "&lt;")
      .replace('"', "&quot;")
}

fn default_namespace<'a>(node: Node<'a, '_>) -> Option<&'a str>
{   node.namespaces()
      .find(|ns| ns.name().is_none())
      .map(|ns| ns.uri())
}

fn prefix_for<'a>(node: Node<'a, '_>, uri: &str) -> Option<&'a str>
{   node.namespaces()
      .find(|ns| ns.uri() == uri && ns.name().is_some())
      .and_then(|ns| ns.name())
}

/// Prefixed declarations in scope, minus the implicit `xml` one
fn prefixed_namespaces<'a>(node: Node<'a, '_>) -> BTreeSet<(&'a str, &'a str)>
{   node.namespaces()
      .filter_map(|ns| ns.name().map(|name| (name, ns.uri())))
      .filter(|(name, _)| *name != "xml" && !name.is_empty())
      .collect()
}

fn element_name(node: Node) -> String
{   let tag = node.tag_name();
    match tag.namespace()
    {   Some(uri) if Some(uri) != default_namespace(node) => {
          match prefix_for(node, uri)
          {   Some(prefix) => format!("{}:{}", prefix, tag.name())
            , None => tag.name().to_string()
          }
        }
      , _ => tag.name().to_string()
    }
}

fn attribute_name(node: Node, attr: &roxmltree::Attribute) -> String
{   match attr.namespace()
    {   None => attr.name().to_string()
      , Some(XML_NAMESPACE) => format!("xml:{}", attr.name())
      , Some(uri) => match prefix_for(node, uri)
        {   Some(prefix) => format!("{}:{}", prefix, attr.name())
          , None => attr.name().to_string()
        }
    }
}

struct Writer<'o>
{   options: &'o SanitizeOptions
  , removed_ids: Vec<String>
  , repairs: &'o mut Vec<RepairAction>
}

impl Writer<'_>
{   /// Elements dropped by policy, with their repair record
    fn dropped(&self, node: Node) -> Option<RepairAction>
    {   let name = node.tag_name().name();
        if name == "script"
        {   return Some(RepairAction::RemovedScript);
        }
        if !self.options.allow_gradients && is_gradient(name)
        {   let what = node.attribute("id")
              .map(|id| format!("#{}", id))
              .unwrap_or_else(|| format!("<{}>", name));
            return Some(RepairAction::RemovedGradient(what));
        }
        if !self.options.allow_animations && is_animation(name)
        {   return Some(RepairAction::RemovedAnimation(name.to_string()));
        }
        None
    }

    /// Attributes after policy filtering, skipping `skip` names
    fn attributes(&mut self, node: Node, skip: &[&str]) -> String
    {   let mut out = String::new();
        for attr in node.attributes()
        {   let name = attribute_name(node, &attr);
            if attr.namespace().is_none() && skip.contains(&attr.name())
            {   continue;
            }
            let lowered = attr.name().to_ascii_lowercase();
            let value = attr.value();
            if lowered.starts_with("on")
              || (lowered == "href"
                  && value.trim().to_ascii_lowercase()
                       .starts_with("javascript:"))
            {   self.repairs.push(RepairAction::RemovedUnsafeAttribute(name));
                continue;
            }

            let mut value = value.to_string();
            let referenced: Vec<String> = url_references(&value)
              .into_iter()
              .filter(|id| self.removed_ids.iter().any(|r| r.as_str() == *id))
              .map(str::to_string)
              .collect();
            if !referenced.is_empty()
            {   for id in &referenced
                {   self.repairs.push(RepairAction::ReplacedPaintReference
                    {   attribute: name.clone()
                      , id: id.clone()
                    });
                }
                match attr.name()
                {   "fill" | "stroke" => {
                      value = self.options.fallback_color.clone();
                    }
                  , "style" => {
                      let ids: Vec<&str>
                        = referenced.iter().map(String::as_str).collect();
                      value = replace_references(
                        &value, &ids, &self.options.fallback_color
                      );
                    }
                  , _ => continue
                }
            }
            let _ = write!(out, " {}=\"{}\"", name, escape_attribute(&value));
        }
        out
    }

    fn namespace_declarations(&self, node: Node) -> String
    {   let mut out = String::new();
        let parent = node.parent_element();
        let inherited = parent.map(prefixed_namespaces).unwrap_or_default();
        if let Some(parent) = parent
        {   let own = default_namespace(node);
            if own.is_some() && own != default_namespace(parent)
            {   let _ = write!(out, " xmlns=\"{}\"", own.unwrap_or_default());
            }
        }
        for (name, uri) in prefixed_namespaces(node)
        {   if !inherited.contains(&(name, uri))
            {   let _ = write!(
                  out, " xmlns:{}=\"{}\"", name, escape_attribute(uri)
                );
            }
        }
        out
    }

    fn write_children<'a, 'input: 'a>(
      &mut self
    , children: impl Iterator<Item = Node<'a, 'input>>
    , out: &mut String
    )
    {   for child in children
        {   self.write_node(child, out);
        }
    }

    fn write_node(&mut self, node: Node, out: &mut String)
    {   if node.is_text()
        {   out.push_str(&escape_text(node.text().unwrap_or_default()));
            return;
        }
        if !node.is_element()
        {   return;
        }
        if let Some(action) = self.dropped(node)
        {   self.repairs.push(action);
            return;
        }

        let name = element_name(node);
        let mut inner = String::new();
        self.write_children(node.children(), &mut inner);

        let _ = write!(
          out,
          "<{}{}{}",
          name,
          self.namespace_declarations(node),
          self.attributes(node, &[])
        );
        if inner.is_empty()
        {   out.push_str("/>");
        } else
        {   let _ = write!(out, ">{}</{}>", inner, name);
        }
    }
}

/// Serialize the root with geometry, title and policy applied
pub(super) fn normalize(
  doc: &Document
, options: &SanitizeOptions
, repairs: &mut Vec<RepairAction>
) -> Normalized
{   let root = doc.root_element();
    let geometry = resolve_geometry(root, options, repairs);

    let removed_ids = if options.allow_gradients
    {   Vec::new()
    } else
    {   root.descendants()
          .filter(|n| n.is_element() && is_gradient(n.tag_name().name()))
          .filter_map(|n| n.attribute("id").map(str::to_string))
          .collect()
    };

    let mut writer = Writer
    {   options
      , removed_ids
      , repairs
    };

    let mut open = format!("<svg xmlns=\"{}\"", SVG_NAMESPACE);
    for (name, uri) in prefixed_namespaces(root)
    {   let _ = write!(open, " xmlns:{}=\"{}\"", name, escape_attribute(uri));
    }
    open.push_str(&writer.attributes(root, &["width", "height", "viewBox"]));
    if let Some(w) = geometry.width
    {   let _ = write!(open, " width=\"{}\"", format_number(w));
    }
    if let Some(h) = geometry.height
    {   let _ = write!(open, " height=\"{}\"", format_number(h));
    }
    if let Some(vb) = geometry.view_box
    {   let _ = write!(open, " viewBox=\"{}\"", vb);
    }
    open.push('>');

    let mut body = String::new();
    let has_label = root.children()
      .any(|c| c.is_element()
        && matches!(c.tag_name().name(), "title" | "desc"));
    let title = options.title.as_deref()
      .map(str::trim)
      .filter(|t| !t.is_empty());
    if let Some(title) = title
    {   if !has_label
        {   let _ = write!(body, "<title>{}</title>", escape_text(title));
            writer.repairs.push(RepairAction::InsertedTitle);
        }
    }

    match &geometry.transform
    {   Some(transform) => {
          writer.write_children(
            root.children().filter(stays_unscaled),
            &mut body
          );
          let mut scaled = String::new();
          writer.write_children(
            root.children().filter(|n| !stays_unscaled(n)),
            &mut scaled
          );
          let _ = write!(
            body, "<g transform=\"{}\">{}</g>", transform, scaled
          );
        }
      , None => {
          writer.write_children(root.children(), &mut body);
        }
    }

    Normalized
    {   markup: format!("{}{}</svg>", open, body)
      , width: geometry.width
      , height: geometry.height
      , view_box: geometry.view_box
    }
}
