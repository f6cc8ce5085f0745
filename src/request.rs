//! Generation request and prompt plan value types

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MAX_VARIATIONS: u8 = 4;

/// Declares a unit enum with lowercase names and lenient parsing:
/// unknown names fall back to the given variant.
macro_rules! option_enum
{ ( $(#[$meta:meta])* $name:ident, fallback = $fallback:ident,
    { $( $variant:ident => $text:literal ),+ $(,)? }
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum $name
    { $( $variant ),+
    }

    impl $name
    {   /// Key into the prompt template tables
        pub fn as_str(&self) -> &'static str
        {   match self
            { $( $name::$variant => $text ),+
            }
        }
    }

    impl Default for $name
    {   fn default() -> Self
        {   $name::$fallback
        }
    }

    impl FromStr for $name
    {   type Err = std::convert::Infallible;

        fn from_str(s: &str)
          -> std::result::Result<Self, Self::Err>
        {   let key = s.trim().to_ascii_lowercase();
            $( if key == $text { return Ok($name::$variant); } )+
            Ok($name::$fallback)
        }
    }
  };
}

option_enum!(
  /// What kind of artwork the subject describes
  Intent, fallback = Generic,
  { Generic => "generic"
  , Icon => "icon"
  , Logo => "logo"
  , Diagram => "diagram"
  , Pattern => "pattern"
  , Illustration => "illustration"
  }
);

option_enum!(
  StyleHint, fallback = Any,
  { Any => "any"
  , Minimal => "minimal"
  , Detailed => "detailed"
  , Flat => "flat"
  , Outline => "outline"
  , Filled => "filled"
  , Geometric => "geometric"
  , Organic => "organic"
  }
);

option_enum!(
  ColorScheme, fallback = Any,
  { Any => "any"
  , Monochrome => "monochrome"
  , Warm => "warm"
  , Cool => "cool"
  , Pastel => "pastel"
  , Vibrant => "vibrant"
  , Grayscale => "grayscale"
  }
);

option_enum!(
  Complexity, fallback = Medium,
  { Simple => "simple"
  , Medium => "medium"
  , Complex => "complex"
  }
);

option_enum!(
  StrokeStyle, fallback = Any,
  { Any => "any"
  , Thin => "thin"
  , Medium => "medium"
  , Thick => "thick"
  , NoStroke => "none"
  }
);

/// Named canvas sizes offered by the host form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizePreset
{   Small
  , Medium
  , Large
  , Custom
    {   width: u32
      , height: u32
    }
}

impl SizePreset
{   pub fn dimensions(&self) -> (u32, u32)
    {   match *self
        {   SizePreset::Small => (200, 200)
          , SizePreset::Medium => (400, 400)
          , SizePreset::Large => (600, 600)
          , SizePreset::Custom { width, height } => (width, height)
        }
    }
}

/// Immutable description of what to draw.
/// Constructed through `GenerationRequest::new` and the `with_*`
/// builders, which keep width/height positive and the variation
/// count within 1..=4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest
{   subject: String
  , intent: Intent
  , style: StyleHint
  , colors: ColorScheme
  , complexity: Complexity
  , stroke: StrokeStyle
  , width: u32
  , height: u32
  , variation_count: u8
  , selection_context: Option<String>
  , accessible: bool
  , allow_gradients: bool
  , allow_animations: bool
}

impl GenerationRequest
{   pub fn new(
      subject: impl Into<String>
    , width: u32
    , height: u32
    ) -> Result<Self>
    {   let subject = subject.into();
        if subject.trim().len() < 3
        {   return Err(Error::InvalidRequest(
              "subject must describe what to generate".to_string()
            ));
        }
        check_dimensions(width, height)?;
        Ok(GenerationRequest
        {   subject
          , intent: Intent::Generic
          , style: StyleHint::Any
          , colors: ColorScheme::Any
          , complexity: Complexity::Medium
          , stroke: StrokeStyle::Any
          , width
          , height
          , variation_count: 1
          , selection_context: None
          , accessible: false
          , allow_gradients: true
          , allow_animations: true
        })
    }

    pub fn from_preset(
      subject: impl Into<String>
    , size: SizePreset
    ) -> Result<Self>
    {   let (width, height) = size.dimensions();
        GenerationRequest::new(subject, width, height)
    }

    pub fn with_intent(mut self, intent: Intent) -> Self
    {   self.intent = intent;
        self
    }

    pub fn with_style(mut self, style: StyleHint) -> Self
    {   self.style = style;
        self
    }

    pub fn with_colors(mut self, colors: ColorScheme) -> Self
    {   self.colors = colors;
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self
    {   self.complexity = complexity;
        self
    }

    pub fn with_stroke(mut self, stroke: StrokeStyle) -> Self
    {   self.stroke = stroke;
        self
    }

    pub fn with_variations(mut self, count: u8) -> Result<Self>
    {   if count == 0 || count > MAX_VARIATIONS
        {   return Err(Error::InvalidRequest(format!(
              "variation count {} outside 1-{}",
              count, MAX_VARIATIONS
            )));
        }
        self.variation_count = count;
        Ok(self)
    }

    pub fn with_selection_context(
      mut self
    , context: impl Into<String>
    ) -> Self
    {   let context = context.into();
        self.selection_context
          = if context.trim().is_empty() { None } else { Some(context) };
        self
    }

    pub fn with_accessibility(mut self, accessible: bool) -> Self
    {   self.accessible = accessible;
        self
    }

    pub fn with_gradients(mut self, allowed: bool) -> Self
    {   self.allow_gradients = allowed;
        self
    }

    pub fn with_animations(mut self, allowed: bool) -> Self
    {   self.allow_animations = allowed;
        self
    }

    /// Re-check invariants, e.g. after deserializing from the host
    pub fn validate(&self) -> Result<()>
    {   check_dimensions(self.width, self.height)?;
        if self.variation_count == 0
          || self.variation_count > MAX_VARIATIONS
        {   return Err(Error::InvalidRequest(format!(
              "variation count {} outside 1-{}",
              self.variation_count, MAX_VARIATIONS
            )));
        }
        Ok(())
    }

    pub fn subject(&self) -> &str { &self.subject }
    pub fn intent(&self) -> Intent { self.intent }
    pub fn style(&self) -> StyleHint { self.style }
    pub fn colors(&self) -> ColorScheme { self.colors }
    pub fn complexity(&self) -> Complexity { self.complexity }
    pub fn stroke(&self) -> StrokeStyle { self.stroke }
    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn variation_count(&self) -> u8 { self.variation_count }
    pub fn accessible(&self) -> bool { self.accessible }
    pub fn allow_gradients(&self) -> bool { self.allow_gradients }
    pub fn allow_animations(&self) -> bool { self.allow_animations }

    pub fn selection_context(&self) -> Option<&str>
    {   self.selection_context.as_deref()
    }

    /// One-line description for logs and the host's history list
    pub fn summary(&self) -> String
    {   let mut subject: String = self.subject.chars().take(40).collect();
        if self.subject.chars().count() > 40
        {   subject.push_str("...");
        }
        format!(
          "{} {}x{} x{} [{} / {} / {}]",
          subject,
          self.width,
          self.height,
          self.variation_count,
          self.style.as_str(),
          self.colors.as_str(),
          self.complexity.as_str()
        )
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<()>
{   if width == 0 || height == 0
    {   return Err(Error::InvalidRequest(format!(
          "dimensions must be positive, got {}x{}", width, height
        )));
    }
    Ok(())
}

/// The two strings sent to a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptPlan
{   pub user_prompt: String
  , pub system_instruction: String
}

impl PromptPlan
{   /// Plan for the variation at `index` (0-based) out of `total`.
    /// The first variation is the plan itself.
    pub fn for_variation(&self, index: u8, total: u8) -> PromptPlan
    {   if index == 0
        {   return self.clone();
        }
        PromptPlan
        {   user_prompt: format!(
              "{}\n\nVariation {} of {}: make this design clearly \
               different from the other variations.",
              self.user_prompt,
              index + 1,
              total
            )
          , system_instruction: self.system_instruction.clone()
        }
    }
}
