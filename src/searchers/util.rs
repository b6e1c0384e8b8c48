/// Separator between subtitle parts.
const SUBTITLE_SEPARATOR: &str = " – ";

/// Truncate a string to a maximum length in characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Join the non-empty parts into a subtitle.
pub fn join_subtitle<I, S>(parts: I) -> String
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  parts
    .into_iter()
    .filter(|p| !p.as_ref().trim().is_empty())
    .map(|p| p.as_ref().to_string())
    .collect::<Vec<_>>()
    .join(SUBTITLE_SEPARATOR)
}

/// Human readable byte size with two decimals, e.g. `1.50 MB`.
pub fn format_bytes(bytes: i64) -> String {
  const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

  if bytes.abs() < 1024 {
    return format!("{} B", bytes);
  }

  let mut value = bytes as f64;
  let mut unit = 0;
  while value.abs() >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.2} {}", value, UNITS[unit])
}

/// "1 record", "3 records"
pub fn pluralize(count: i64, noun: &str) -> String {
  if count == 1 {
    format!("{} {}", count, noun)
  } else {
    format!("{} {}s", count, noun)
  }
}
