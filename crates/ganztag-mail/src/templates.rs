//! HTML email templates.
//!
//! Every `.html` file below the templates directory is read once at startup
//! and addressed by its path relative to that directory, with `/` separators
//! (`checkout_notification.html`, `staff/welcome.html`).
//!
//! Placeholders are written `{{ key }}` and filled from the top level of the
//! message's `content_data`. Values are HTML-escaped; unknown keys render as
//! the empty string.

use std::{
  collections::HashMap,
  fs,
  path::Path,
};

use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Templates {
  by_name: HashMap<String, String>,
}

impl Templates {
  /// Read every `.html` file below `dir`.
  ///
  /// A missing directory yields an empty set; sends then fail with a
  /// retryable `TemplateNotFound`.
  pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
    let dir = dir.as_ref();
    let mut templates = Self::default();
    if !dir.is_dir() {
      warn!(dir = %dir.display(), "templates directory not found");
      return Ok(templates);
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
      let entry = entry?;
      let path = entry.path();
      if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "html") {
        continue;
      }
      let Ok(relative) = path.strip_prefix(dir) else { continue };
      let name = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
      templates.by_name.insert(name, fs::read_to_string(path)?);
    }
    debug!(count = templates.by_name.len(), dir = %dir.display(), "templates loaded");
    Ok(templates)
  }

  /// Build a set from in-memory sources.
  pub fn from_sources<I, N, S>(sources: I) -> Self
  where
    I: IntoIterator<Item = (N, S)>,
    N: Into<String>,
    S: Into<String>,
  {
    Self { by_name: sources.into_iter().map(|(n, s)| (n.into(), s.into())).collect() }
  }

  pub fn contains(&self, name: &str) -> bool { self.by_name.contains_key(name) }

  pub fn len(&self) -> usize { self.by_name.len() }

  pub fn is_empty(&self) -> bool { self.by_name.is_empty() }

  pub fn render(&self, name: &str, data: &Value) -> Result<String> {
    let source = self
      .by_name
      .get(name)
      .ok_or_else(|| Error::TemplateNotFound(name.to_owned()))?;
    Ok(substitute(source, data))
  }
}

fn substitute(source: &str, data: &Value) -> String {
  let mut out = String::with_capacity(source.len());
  let mut rest = source;
  while let Some(start) = rest.find("{{") {
    out.push_str(&rest[..start]);
    let after = &rest[start + 2..];
    let Some(end) = after.find("}}") else {
      out.push_str(&rest[start..]);
      return out;
    };
    let key = after[..end].trim();
    out.push_str(&escape(&value_text(data.get(key))));
    rest = &after[end + 2..];
  }
  out.push_str(rest);
  out
}

fn value_text(value: Option<&Value>) -> String {
  match value {
    None | Some(Value::Null) => String::new(),
    Some(Value::String(s)) => s.clone(),
    Some(other) => other.to_string(),
  }
}

fn escape(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  for c in raw.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}
