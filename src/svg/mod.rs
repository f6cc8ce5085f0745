//! Extraction, repair and normalization of SVG from model output
//!
//! Model replies are free-form: prose, markdown fences, several roots,
//! half-closed tags. [`SvgSanitizer::extract`] finds every top-level
//! `<svg>` root, and [`SvgSanitizer::sanitize`] turns each into a
//! fragment with explicit geometry. Candidates that stay unparseable
//! after one round of repairs are returned marked invalid.

mod extract;
mod normalize;
mod repair;

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

/// Parsed `viewBox` attribute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewBox
{   pub min_x: f64
  , pub min_y: f64
  , pub width: f64
  , pub height: f64
}

impl ViewBox
{   pub fn new(min_x: f64, min_y: f64, width: f64, height: f64) -> Self
    {   ViewBox { min_x, min_y, width, height }
    }

    /// `0 0 w h`
    pub fn sized(width: f64, height: f64) -> Self
    {   ViewBox::new(0.0, 0.0, width, height)
    }

    /// Four numbers separated by whitespace and/or commas,
    /// with a positive extent
    pub fn parse(value: &str) -> Option<Self>
    {   let numbers: Vec<f64> = value
          .split(|c: char| c.is_whitespace() || c == ',')
          .filter(|s| !s.is_empty())
          .map(|s| s.parse::<f64>())
          .collect::<Result<_, _>>()
          .ok()?;
        match numbers.as_slice()
        {   [x, y, w, h]
              if numbers.iter().all(|n| n.is_finite())
                && *w > 0.0 && *h > 0.0
              => Some(ViewBox::new(*x, *y, *w, *h))
          , _ => None
        }
    }

    pub(crate) fn approx_eq(&self, other: &ViewBox) -> bool
    {   const EPS: f64 = 1e-6;
        (self.min_x - other.min_x).abs() < EPS
          && (self.min_y - other.min_y).abs() < EPS
          && (self.width - other.width).abs() < EPS
          && (self.height - other.height).abs() < EPS
    }
}

impl fmt::Display for ViewBox
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   write!(
          f,
          "{} {} {} {}",
          format_number(self.min_x),
          format_number(self.min_y),
          format_number(self.width),
          format_number(self.height)
        )
    }
}

/// Shortest stable rendering: at most four decimals, no trailing zeros
pub fn format_number(value: f64) -> String
{   let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded == 0.0
    {   return "0".to_string();
    }
    format!("{}", rounded)
}

/// Something the sanitizer changed, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RepairAction
{   StrippedSurroundingText
  , DroppedTruncatedTag
  , ClosedUnterminatedTag(String)
  , DroppedStrayClosingTag(String)
  , EscapedAmpersands(usize)
  , DeclaredNamespace(String)
  , RemovedScript
  , RemovedUnsafeAttribute(String)
  , SetDimensions
    {   width: f64
      , height: f64
    }
  , AddedViewBox(ViewBox)
  , Rescaled
    {   from: ViewBox
      , to: ViewBox
    }
  , InsertedTitle
  , RemovedGradient(String)
  , RemovedAnimation(String)
  , ReplacedPaintReference
    {   attribute: String
      , id: String
    }
  , DiscardedCandidates(usize)
}

impl fmt::Display for RepairAction
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   match self
        {   RepairAction::StrippedSurroundingText => {
              write!(f, "stripped prose and fences around the svg")
            }
          , RepairAction::DroppedTruncatedTag => {
              write!(f, "dropped a truncated tag at the end")
            }
          , RepairAction::ClosedUnterminatedTag(tag) => {
              write!(f, "closed unterminated <{}>", tag)
            }
          , RepairAction::DroppedStrayClosingTag(tag) => {
              write!(f, "dropped stray </{}>", tag)
            }
          , RepairAction::EscapedAmpersands(count) => {
              write!(f, "escaped {} stray '&'", count)
            }
          , RepairAction::DeclaredNamespace(prefix) => {
              write!(f, "declared missing {} namespace", prefix)
            }
          , RepairAction::RemovedScript => {
              write!(f, "removed <script>")
            }
          , RepairAction::RemovedUnsafeAttribute(name) => {
              write!(f, "removed unsafe attribute {}", name)
            }
          , RepairAction::SetDimensions { width, height } => {
              write!(
                f,
                "set dimensions to {}x{}",
                format_number(*width),
                format_number(*height)
              )
            }
          , RepairAction::AddedViewBox(view_box) => {
              write!(f, "added viewBox \"{}\"", view_box)
            }
          , RepairAction::Rescaled { from, to } => {
              write!(f, "rescaled content from \"{}\" to \"{}\"", from, to)
            }
          , RepairAction::InsertedTitle => {
              write!(f, "inserted <title>")
            }
          , RepairAction::RemovedGradient(what) => {
              write!(f, "removed gradient {}", what)
            }
          , RepairAction::RemovedAnimation(tag) => {
              write!(f, "removed animation <{}>", tag)
            }
          , RepairAction::ReplacedPaintReference { attribute, id } => {
              write!(f, "replaced {} reference to #{}", attribute, id)
            }
          , RepairAction::DiscardedCandidates(count) => {
              write!(f, "discarded {} extra candidate(s)", count)
            }
        }
    }
}

/// One extracted SVG root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvgFragment
{   pub markup: String
  , pub width: Option<f64>
  , pub height: Option<f64>
  , pub view_box: Option<ViewBox>
  , pub valid: bool
  , pub repairs: Vec<RepairAction>
  , /// Parser message when `valid` is false
    pub error: Option<String>
}

/// What the sanitizer enforces on every fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizeOptions
{   /// Requested canvas; `None` keeps the intrinsic size
    pub target: Option<(u32, u32)>
  , /// Title to synthesize when the root has no title/desc
    pub title: Option<String>
  , pub allow_gradients: bool
  , pub allow_animations: bool
  , pub fallback_color: String
}

impl Default for SanitizeOptions
{   fn default() -> Self
    {   SanitizeOptions
        {   target: None
          , title: None
          , allow_gradients: true
          , allow_animations: true
          , fallback_color: "#000000".to_string()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SvgSanitizer
{   options: SanitizeOptions
}

impl SvgSanitizer
{   pub fn new(options: SanitizeOptions) -> Self
    {   SvgSanitizer { options }
    }

    /// Every top-level `<svg>` root in `raw`, in order
    pub fn extract(&self, raw: &str) -> Result<Vec<SvgFragment>, Error>
    {   let candidates = extract::find_candidates(raw);
        if candidates.spans.is_empty()
        {   warn!("No <svg> root in {} chars of output", raw.len());
            return Err(Error::Extraction(
              "no <svg> element found in model output".to_string()
            ));
        }
        debug!("Found {} svg candidate(s)", candidates.spans.len());

        Ok(candidates.spans
          .iter()
          .map(|span| {
            let mut fragment = self.sanitize(span);
            if candidates.surrounding_text
            {   fragment.repairs
                  .insert(0, RepairAction::StrippedSurroundingText);
            }
            fragment
          })
          .collect())
    }

    /// Parse, repair once if needed, and normalize one candidate
    pub fn sanitize(&self, candidate: &str) -> SvgFragment
    {   let candidate = candidate.trim();
        let mut repairs = Vec::new();

        let first_error = match normalize::parse_root(candidate)
        {   Ok(doc) => {
              return self.finish(&doc, repairs);
            }
          , Err(e) => e
        };
        debug!("Candidate failed to parse ({}); repairing", first_error);

        let repaired = repair::repair(candidate, &mut repairs);
        match normalize::parse_root(&repaired)
        {   Ok(doc) => self.finish(&doc, repairs)
          , Err(e) => {
              warn!("Candidate still invalid after repair: {}", e);
              SvgFragment
              {   markup: repaired
                , width: None
                , height: None
                , view_box: None
                , valid: false
                , repairs
                , error: Some(e)
              }
            }
        }
    }

    fn finish(
      &self
    , doc: &roxmltree::Document
    , mut repairs: Vec<RepairAction>
    ) -> SvgFragment
    {   let normalized
          = normalize::normalize(doc, &self.options, &mut repairs);
        for action in &repairs
        {   debug!("svg repair: {}", action);
        }
        SvgFragment
        {   markup: normalized.markup
          , width: normalized.width
          , height: normalized.height
          , view_box: normalized.view_box
          , valid: true
          , repairs
          , error: None
        }
    }
}
