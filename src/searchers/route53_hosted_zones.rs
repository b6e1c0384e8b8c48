//! Route53 hosted zones. Account-wide, not tied to a region.

use aws_sdk_route53::error::DisplayErrorContext;
use aws_sdk_route53::types::HostedZone;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use super::util::{join_subtitle, pluralize};
use crate::aws::console::console_url;
use crate::aws::AwsContext;
use crate::output::Item;

const PAGE_SIZE: i32 = 100;

/// The SDK returns ids as `/hostedzone/Z123`; console links want `Z123`
const ID_PREFIX: &str = "/hostedzone/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZoneRecord {
  pub id: String,
  pub name: String,
  pub private_zone: Option<bool>,
  pub comment: Option<String>,
  pub record_set_count: Option<i64>,
}

impl HostedZoneRecord {
  /// Zone id without the `/hostedzone/` prefix.
  pub fn short_id(&self) -> &str {
    self.id.strip_prefix(ID_PREFIX).unwrap_or(&self.id)
  }
}

impl From<&HostedZone> for HostedZoneRecord {
  fn from(zone: &HostedZone) -> Self {
    Self {
      id: zone.id().to_string(),
      name: zone.name().to_string(),
      private_zone: zone.config().map(|c| c.private_zone()),
      comment: zone.config().and_then(|c| c.comment()).map(String::from),
      record_set_count: zone.resource_record_set_count(),
    }
  }
}

/// List every hosted zone in the account, following `NextMarker`.
pub async fn fetch(ctx: &AwsContext) -> Result<Vec<HostedZoneRecord>> {
  let client = aws_sdk_route53::Client::new(ctx.sdk_config());
  let mut all_zones = Vec::new();
  let mut marker: Option<String> = None;

  loop {
    let response = client
      .list_hosted_zones()
      .max_items(PAGE_SIZE)
      .set_marker(marker.take())
      .send()
      .await
      .map_err(|e| eyre!("Failed to list Route53 hosted zones: {}", DisplayErrorContext(&e)))?;

    all_zones.extend(response.hosted_zones().iter().map(HostedZoneRecord::from));

    match response.next_marker() {
      Some(next) => marker = Some(next.to_string()),
      None => break,
    }
  }

  Ok(all_zones)
}

pub fn to_item(zone: &HostedZoneRecord, ctx: &AwsContext, query: &str) -> Result<Item> {
  let visibility = zone.private_zone.map(|private| if private { "Private" } else { "Public" });

  let subtitle = join_subtitle([
    visibility.unwrap_or_default().to_string(),
    zone.comment.clone().unwrap_or_default(),
    zone
      .record_set_count
      .map(|count| pluralize(count, "record"))
      .unwrap_or_default(),
    zone.id.clone(),
  ]);

  let path = format!("/route53/v2/hostedzones#ListRecordSets/{}", zone.short_id());

  // Zone ids start with Z; a query that looks like one matches the id
  let match_text = if query.trim_start().starts_with('Z') {
    zone.short_id().to_string()
  } else {
    zone.name.clone()
  };

  Ok(
    Item::url(&zone.id, &zone.name, console_url(&path, ctx.region())?)
      .subtitle(subtitle)
      .matching(match_text)
      .icon("route53"),
  )
}
