//! AWS console deep links.

use color_eyre::{eyre::eyre, Result};
use url::Url;

/// Build a console URL for `path` (which may carry a `#fragment`) in `region`.
///
/// `/lambda/home#/functions/foo` in us-east-1 becomes
/// `https://us-east-1.console.aws.amazon.com/lambda/home?region=us-east-1#/functions/foo`.
pub fn console_url(path: &str, region: &str) -> Result<String> {
  let base = Url::parse(&format!("https://{}.console.aws.amazon.com/", region))
    .map_err(|e| eyre!("Invalid console host for region {}: {}", region, e))?;
  let mut url = base
    .join(path)
    .map_err(|e| eyre!("Invalid console path {}: {}", path, e))?;
  url.set_query(Some(&format!("region={}", region)));

  Ok(url.to_string())
}

/// Percent-encode a value for embedding in a console path or fragment.
///
/// Spaces become `%20`; the console does not decode `+` in a path.
pub fn escape(value: &str) -> String {
  urlencoding::encode(value).into_owned()
}
