//! Launcher output: Alfred script filter JSON.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;

/// One result row shown by the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
  pub uid: String,
  pub title: String,
  pub subtitle: String,
  /// Console URL opened when the item is actioned
  pub arg: String,
  /// Text the query is matched against
  #[serde(rename = "match")]
  pub match_text: String,
  pub valid: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<Icon>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Icon {
  pub path: String,
}

impl Item {
  /// A valid item that opens `url`.
  pub fn url(uid: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
    let title = title.into();
    Self {
      uid: uid.into(),
      match_text: title.clone(),
      title,
      subtitle: String::new(),
      arg: url.into(),
      valid: true,
      icon: None,
    }
  }

  /// An informational row that can't be actioned.
  pub fn notice(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
    let title = title.into();
    Self {
      uid: String::new(),
      match_text: title.clone(),
      title,
      subtitle: subtitle.into(),
      arg: String::new(),
      valid: false,
      icon: None,
    }
  }

  pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
    self.subtitle = subtitle.into();
    self
  }

  pub fn matching(mut self, text: impl Into<String>) -> Self {
    self.match_text = text.into();
    self
  }

  pub fn icon(mut self, name: &str) -> Self {
    self.icon = Some(Icon {
      path: format!("icons/{}.png", name),
    });
    self
  }

  /// Flag the row as coming from a stale cached collection.
  pub fn mark_cached(mut self) -> Self {
    if self.subtitle.is_empty() {
      self.subtitle = "(cached)".to_string();
    } else {
      self.subtitle.push_str(" (cached)");
    }
    self
  }
}

/// The document written to stdout.
#[derive(Debug, Default, Serialize)]
pub struct ScriptFilter {
  pub items: Vec<Item>,
}

impl ScriptFilter {
  pub fn new(items: Vec<Item>) -> Self {
    Self { items }
  }

  pub fn to_json(&self) -> Result<String> {
    serde_json::to_string(self).map_err(|e| eyre!("Failed to serialize results: {}", e))
  }
}
