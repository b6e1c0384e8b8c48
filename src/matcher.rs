//! Query matching and ranking of result items.

use crate::output::Item;

/// Keep the items matching `query`, best matches first.
///
/// Ranking is by match quality only; items of equal quality keep their
/// input order. An empty query keeps everything.
pub fn rank(query: &str, items: Vec<Item>) -> Vec<Item> {
  let query_lower = query.trim().to_lowercase();

  if query_lower.is_empty() {
    return items;
  }

  let mut matches: Vec<(Item, u32)> = items
    .into_iter()
    .filter_map(|item| {
      let priority = match_priority(&query_lower, &item.match_text.to_lowercase())?;
      Some((item, priority))
    })
    .collect();

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(item, _)| item).collect()
}

/// Lower is better; `None` when `text` doesn't match at all.
fn match_priority(query: &str, text: &str) -> Option<u32> {
  // Exact match
  if text == query {
    return Some(0);
  }

  // Prefix match
  if text.starts_with(query) {
    return Some(1);
  }

  // Prefix of a word inside the text (my-app-prod matches "prod")
  if text
    .split(|c: char| !c.is_alphanumeric())
    .any(|word| word.starts_with(query))
  {
    return Some(2);
  }

  // Substring
  if text.contains(query) {
    return Some(3);
  }

  // Fuzzy match (characters in order)
  if is_subsequence(query, text) {
    return Some(4);
  }

  None
}

fn is_subsequence(query: &str, text: &str) -> bool {
  let mut chars = text.chars();
  query
    .chars()
    .filter(|c| !c.is_whitespace())
    .all(|q| chars.any(|c| c == q))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn items(titles: &[&str]) -> Vec<Item> {
    titles
      .iter()
      .map(|t| Item::url(*t, *t, "https://example.com"))
      .collect()
  }

  fn titles(items: &[Item]) -> Vec<&str> {
    items.iter().map(|i| i.title.as_str()).collect()
  }

  #[test]
  fn test_empty_query_returns_all() {
    let ranked = rank("  ", items(&["b", "a"]));
    assert_eq!(titles(&ranked), vec!["b", "a"]);
  }

  #[test]
  fn test_exact_match_first() {
    let ranked = rank("api", items(&["api-worker", "my-api", "api"]));
    assert_eq!(titles(&ranked), vec!["api", "api-worker", "my-api"]);
  }

  #[test]
  fn test_case_insensitive() {
    let ranked = rank("API", items(&["Orders-Api"]));
    assert_eq!(titles(&ranked), vec!["Orders-Api"]);
  }

  #[test]
  fn test_substring_before_fuzzy() {
    let ranked = rank("der", items(&["d-e-r", "orders"]));
    assert_eq!(titles(&ranked), vec!["orders", "d-e-r"]);
  }

  #[test]
  fn test_fuzzy_match() {
    let ranked = rank("ordwkr", items(&["orders-worker", "billing"]));
    assert_eq!(titles(&ranked), vec!["orders-worker"]);
  }

  #[test]
  fn test_no_match_dropped() {
    assert!(rank("zzz", items(&["orders", "billing"])).is_empty());
  }

  #[test]
  fn test_match_text_not_title() {
    let item = Item::url("1", "my-fn", "https://example.com").matching("arn:aws:lambda:us-east-1:1:function:my-fn");
    let ranked = rank("arn:aws:lambda", vec![item]);
    assert_eq!(ranked.len(), 1);
  }

  #[test]
  fn test_stable_within_priority() {
    let ranked = rank("app", items(&["app-b", "app-a", "app-c"]));
    assert_eq!(titles(&ranked), vec!["app-b", "app-a", "app-c"]);
  }
}
