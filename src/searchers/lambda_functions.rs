//! Lambda functions.

use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::types::FunctionConfiguration;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use super::util::{format_bytes, join_subtitle, truncate};
use crate::aws::console::{console_url, escape};
use crate::aws::AwsContext;
use crate::output::Item;

/// Largest page ListFunctions will return
const PAGE_SIZE: i32 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LambdaFunction {
  pub name: String,
  pub arn: String,
  pub description: Option<String>,
  pub runtime: Option<String>,
  pub code_size: i64,
}

impl From<&FunctionConfiguration> for LambdaFunction {
  fn from(f: &FunctionConfiguration) -> Self {
    Self {
      name: f.function_name().unwrap_or_default().to_string(),
      arn: f.function_arn().unwrap_or_default().to_string(),
      description: f.description().map(String::from),
      runtime: f.runtime().map(|r| r.as_str().to_string()),
      code_size: f.code_size(),
    }
  }
}

/// List every function in the context's region, following `NextMarker`.
pub async fn fetch(ctx: &AwsContext) -> Result<Vec<LambdaFunction>> {
  let client = aws_sdk_lambda::Client::new(ctx.sdk_config());
  let mut all_functions = Vec::new();
  let mut marker: Option<String> = None;

  loop {
    let response = client
      .list_functions()
      .max_items(PAGE_SIZE)
      .set_marker(marker.take())
      .send()
      .await
      .map_err(|e| eyre!("Failed to list Lambda functions: {}", DisplayErrorContext(&e)))?;

    all_functions.extend(response.functions().iter().map(LambdaFunction::from));

    match response.next_marker() {
      Some(next) => marker = Some(next.to_string()),
      None => break,
    }
  }

  Ok(all_functions)
}

pub fn to_item(function: &LambdaFunction, ctx: &AwsContext, query: &str) -> Result<Item> {
  let subtitle = join_subtitle([
    function
      .description
      .as_deref()
      .map(|d| truncate(d, 120))
      .unwrap_or_default(),
    function.runtime.clone().unwrap_or_default(),
    if function.code_size > 0 {
      format_bytes(function.code_size)
    } else {
      String::new()
    },
  ]);

  let path = format!(
    "/lambda/home#/functions/{}?tab=configuration",
    escape(&function.name)
  );

  // Searching by ARN matches against the ARN instead of the name
  let match_text = if query.trim_start().starts_with("arn:") {
    &function.arn
  } else {
    &function.name
  };

  Ok(
    Item::url(&function.arn, &function.name, console_url(&path, ctx.region())?)
      .subtitle(subtitle)
      .matching(match_text.as_str())
      .icon("lambda"),
  )
}
