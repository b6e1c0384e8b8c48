//! CloudFormation stacks.

use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::Stack;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use super::util::{join_subtitle, truncate};
use crate::aws::console::{console_url, escape};
use crate::aws::AwsContext;
use crate::output::Item;

/// Name prefix of stacks generated by Elastic Beanstalk
const BEANSTALK_PREFIX: &str = "awseb-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudFormationStack {
  pub name: String,
  pub id: String,
  pub description: Option<String>,
  pub status: Option<String>,
  /// Value of the `Name` tag
  pub name_tag: Option<String>,
}

impl From<&Stack> for CloudFormationStack {
  fn from(stack: &Stack) -> Self {
    let name_tag = stack
      .tags()
      .iter()
      .find(|tag| tag.key() == Some("Name"))
      .and_then(|tag| tag.value())
      .filter(|value| !value.is_empty())
      .map(String::from);

    Self {
      name: stack.stack_name().unwrap_or_default().to_string(),
      id: stack.stack_id().unwrap_or_default().to_string(),
      description: stack.description().map(String::from),
      status: stack.stack_status().map(|s| s.as_str().to_string()),
      name_tag,
    }
  }
}

/// Describe every stack in the context's region, following `NextToken`.
pub async fn fetch(ctx: &AwsContext) -> Result<Vec<CloudFormationStack>> {
  let client = aws_sdk_cloudformation::Client::new(ctx.sdk_config());
  let mut all_stacks = Vec::new();
  let mut next_token: Option<String> = None;

  loop {
    let response = client
      .describe_stacks()
      .set_next_token(next_token.take())
      .send()
      .await
      .map_err(|e| eyre!("Failed to describe CloudFormation stacks: {}", DisplayErrorContext(&e)))?;

    all_stacks.extend(response.stacks().iter().map(CloudFormationStack::from));

    match response.next_token() {
      Some(next) => next_token = Some(next.to_string()),
      None => break,
    }
  }

  Ok(all_stacks)
}

pub fn to_item(stack: &CloudFormationStack, ctx: &AwsContext, query: &str) -> Result<Item> {
  let generated_name = stack.name.starts_with(BEANSTALK_PREFIX);

  let mut title = stack.name.clone();
  if let (true, Some(tag)) = (generated_name, &stack.name_tag) {
    title.push_str(&format!(" ({})", tag));
  }

  let subtitle = join_subtitle([
    stack
      .description
      .as_deref()
      .map(|d| truncate(d, 120))
      .unwrap_or_default(),
    stack.status.clone().unwrap_or_default(),
  ]);

  let path = format!(
    "/cloudformation/home#/stacks/stackinfo?stackId={}",
    escape(&stack.id)
  );

  // Generated names are meaningless; match on the Name tag unless the user
  // is explicitly searching for generated names
  let match_text = match &stack.name_tag {
    Some(tag) if generated_name && !query.trim_start().starts_with(BEANSTALK_PREFIX) => tag.clone(),
    _ => stack.name.clone(),
  };

  Ok(
    Item::url(&stack.id, title, console_url(&path, ctx.region())?)
      .subtitle(subtitle)
      .matching(match_text)
      .icon("cloudformation"),
  )
}
