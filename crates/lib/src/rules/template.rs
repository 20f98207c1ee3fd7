//! Placeholder templates used by rule output paths and commands.
//!
//! # Placeholder Formats
//!
//! - `${input}` - the first input path
//! - `${inputs}` - all input paths
//! - `${output}` - the first output path
//! - `${outputs}` - all output paths
//! - `${stem}` - file name of the first input without its extension
//! - `${name}` - file name of the first input
//! - `${dir}` - directory of the first input
//!
//! A single `$` not followed by `{` passes through unchanged, so shell
//! variables like `$HOME` need no escaping. `$$` produces a literal `$`,
//! which is how a literal `${` is written (`$${`).
//!
//! # Example
//!
//! ```
//! use kiln_lib::rules::template::{parse, Placeholder, Segment};
//!
//! let segments = parse("${stem}.o").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder(Placeholder::Stem),
//!     Segment::Literal(".o".to_string()),
//! ]);
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

/// A parsed placeholder reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
  Input,
  Inputs,
  Output,
  Outputs,
  Stem,
  Name,
  Dir,
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),

  #[error("placeholder ${{{0}}} has no value here")]
  Unresolved(String),
}

impl Placeholder {
  fn name(self) -> &'static str {
    match self {
      Placeholder::Input => "input",
      Placeholder::Inputs => "inputs",
      Placeholder::Output => "output",
      Placeholder::Outputs => "outputs",
      Placeholder::Stem => "stem",
      Placeholder::Name => "name",
      Placeholder::Dir => "dir",
    }
  }

  fn from_name(name: &str) -> Result<Self, TemplateError> {
    Ok(match name.trim() {
      "input" => Placeholder::Input,
      "inputs" => Placeholder::Inputs,
      "output" => Placeholder::Output,
      "outputs" => Placeholder::Outputs,
      "stem" => Placeholder::Stem,
      "name" => Placeholder::Name,
      "dir" => Placeholder::Dir,
      other => return Err(TemplateError::Unknown(other.to_string())),
    })
  }
}

fn display(path: &Path) -> String {
  path.display().to_string()
}

/// Parse a template string into segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        literal.push('$');
      }
      Some((_, '{')) => {
        chars.next();
        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut name = String::new();
        let mut found_close = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          name.push(c);
        }
        if !found_close {
          return Err(TemplateError::Unclosed(pos));
        }
        segments.push(Segment::Placeholder(Placeholder::from_name(&name)?));
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Values available to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
  pub inputs: Vec<PathBuf>,
  pub outputs: Vec<PathBuf>,
}

impl TemplateContext {
  pub fn new(inputs: Vec<PathBuf>) -> Self {
    Self {
      inputs,
      outputs: Vec::new(),
    }
  }

  fn values(&self, placeholder: Placeholder) -> Result<Vec<String>, TemplateError> {
    let unresolved = || TemplateError::Unresolved(placeholder.name().to_string());
    let first_input = || self.inputs.first().ok_or_else(unresolved);

    let values = match placeholder {
      Placeholder::Input => vec![display(first_input()?)],
      Placeholder::Inputs => self.inputs.iter().map(|p| display(p)).collect(),
      Placeholder::Output => vec![display(self.outputs.first().ok_or_else(unresolved)?)],
      Placeholder::Outputs => self.outputs.iter().map(|p| display(p)).collect(),
      Placeholder::Stem => {
        let stem = first_input()?.file_stem().ok_or_else(unresolved)?;
        vec![stem.to_string_lossy().into_owned()]
      }
      Placeholder::Name => {
        let name = first_input()?.file_name().ok_or_else(unresolved)?;
        vec![name.to_string_lossy().into_owned()]
      }
      Placeholder::Dir => {
        let dir = first_input()?.parent().ok_or_else(unresolved)?;
        vec![display(dir)]
      }
    };
    Ok(values)
  }

  /// Substitute every placeholder, joining multi-valued ones with spaces.
  pub fn expand(&self, template: &str) -> Result<String, TemplateError> {
    let mut result = String::new();
    for segment in parse(template)? {
      match segment {
        Segment::Literal(s) => result.push_str(&s),
        Segment::Placeholder(p) => result.push_str(&self.values(p)?.join(" ")),
      }
    }
    Ok(result)
  }

  /// Expand a command argument.
  ///
  /// An argument that is exactly `${inputs}` or `${outputs}` becomes one
  /// argument per path instead of a single space-joined string.
  pub fn expand_arg(&self, template: &str) -> Result<Vec<String>, TemplateError> {
    match parse(template)?.as_slice() {
      [Segment::Placeholder(p @ (Placeholder::Inputs | Placeholder::Outputs))] => self.values(*p),
      _ => Ok(vec![self.expand(template)?]),
    }
  }
}
