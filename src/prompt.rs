//! Turns a generation request into a prompt plan

use log::trace;

use crate::config::PromptTemplates;
use crate::request::{GenerationRequest, PromptPlan};

const DEFAULT_MAX_CONTEXT_CHARS: usize = 2000;

/// Pure, deterministic prompt construction from preset tables.
#[derive(Debug, Clone)]
pub struct PromptBuilder
{   templates: PromptTemplates
  , max_context_chars: usize
}

impl Default for PromptBuilder
{   fn default() -> Self
    {   PromptBuilder::new(PromptTemplates::default())
    }
}

impl PromptBuilder
{   pub fn new(templates: PromptTemplates) -> Self
    {   PromptBuilder
        {   templates
          , max_context_chars: DEFAULT_MAX_CONTEXT_CHARS
        }
    }

    pub fn with_max_context_chars(mut self, max: usize) -> Self
    {   self.max_context_chars = max;
        self
    }

    pub fn build(&self, request: &GenerationRequest) -> PromptPlan
    {   let t = &self.templates;
        let (width, height) = (request.width(), request.height());

        let opening = t.intents
          .get(request.intent().as_str())
          .unwrap_or(&t.generic)
          .replace("{subject}", request.subject().trim());

        let mut parts = vec![
          opening
        , format!("Size: {}x{}px", width, height)
        ];

        let labelled = [
          ("Style", t.styles.get(request.style().as_str()))
        , ("Colors", t.colors.get(request.colors().as_str()))
        , ("Complexity", t.complexity.get(request.complexity().as_str()))
        , ("Stroke", t.strokes.get(request.stroke().as_str()))
        ];
        for (label, fragment) in labelled
        {   if let Some(text) = fragment.filter(|s| !s.trim().is_empty())
            {   parts.push(format!("{}: {}", label, text));
            }
        }

        if let Some(context) = request.selection_context()
        {   let snippet: String = context
              .chars()
              .take(self.max_context_chars)
              .collect();
            parts.push(format!(
              "Context: the result will sit alongside this existing \
               artwork, match its look:\n{}",
              snippet
            ));
        }
        if request.accessible()
        {   parts.push(
              "Accessibility: include a <title> element describing \
               the image.".to_string()
            );
        }
        if !request.allow_gradients()
        {   parts.push(
              "Do not use gradients; use solid colors only.".to_string()
            );
        }
        if !request.allow_animations()
        {   parts.push(
              "Do not use animation elements.".to_string()
            );
        }

        let rules = [
          "Return ONLY valid SVG code, nothing else".to_string()
        , "Do not include <?xml?> declaration or <!DOCTYPE>".to_string()
        , "Start with a single <svg> tag and end with </svg>".to_string()
        , format!(
            "Set width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\"",
            w = width, h = height
          )
        , "Use absolute positioning within the viewBox".to_string()
        , "Ensure all elements are properly closed".to_string()
        , "Use valid SVG elements only (path, rect, circle, ellipse, \
           line, polyline, polygon, text, g)".to_string()
        , "Do not use any external resources, images or scripts"
            .to_string()
        , "Keep the SVG clean and well-structured".to_string()
        ];
        let mut user_prompt = parts.join("\n");
        user_prompt.push_str("\n\nIMPORTANT INSTRUCTIONS:");
        for (i, rule) in rules.iter().enumerate()
        {   user_prompt.push_str(&format!("\n{}. {}", i + 1, rule));
        }

        let system_instruction = format!(
          "{} Respond with exactly one self-contained <svg> root \
           element. Do not add explanatory prose.",
          t.system_instruction.trim()
        );

        trace!("Built prompt ({} chars)", user_prompt.len());
        PromptPlan
        {   user_prompt
          , system_instruction
        }
    }
}
