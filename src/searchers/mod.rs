//! Resource kinds and the per-kind search pipeline.
//!
//! Every kind runs the same pipeline: load its collection through the cache
//! layer, format each record into an [`Item`], and hand the items to the
//! matcher. Kinds differ only in their fetcher and formatter.

pub mod cloudformation_stacks;
pub mod lambda_functions;
pub mod route53_hosted_zones;
mod util;

use clap::ValueEnum;
use color_eyre::Result;
use std::future::Future;
use tracing::{debug, warn};

use crate::aws::{AwsContext, Scope};
use crate::cache::{CacheError, CacheLayer, CacheStorage, Cacheable};
use crate::matcher;
use crate::output::{Item, ScriptFilter};

/// A category of AWS resource that can be searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ResourceKind {
  LambdaFunctions,
  CloudformationStacks,
  Route53HostedZones,
}

impl ResourceKind {
  pub const ALL: [ResourceKind; 3] = [
    ResourceKind::LambdaFunctions,
    ResourceKind::CloudformationStacks,
    ResourceKind::Route53HostedZones,
  ];

  /// Cache name of the kind, also used for per-kind ttl configuration.
  pub fn name(self) -> &'static str {
    match self {
      Self::LambdaFunctions => "lambda_functions",
      Self::CloudformationStacks => "cloudformation_stacks",
      Self::Route53HostedZones => "route53_hosted_zones",
    }
  }

  pub fn scope(self) -> Scope {
    match self {
      Self::LambdaFunctions | Self::CloudformationStacks => Scope::Regional,
      Self::Route53HostedZones => Scope::Global,
    }
  }

  /// Ttl in seconds when the configuration doesn't set one.
  pub fn builtin_ttl_secs(self) -> u64 {
    match self {
      Self::LambdaFunctions => 300,
      Self::CloudformationStacks => 600,
      Self::Route53HostedZones => 3_600,
    }
  }

  /// Load, format and collect this kind's items.
  pub async fn search<S: CacheStorage>(
    self,
    layer: &CacheLayer<S>,
    ctx: &AwsContext,
    query: &str,
  ) -> SearchOutcome {
    match self {
      Self::LambdaFunctions => {
        collect(
          self,
          layer,
          ctx,
          query,
          || lambda_functions::fetch(ctx),
          lambda_functions::to_item,
        )
        .await
      }
      Self::CloudformationStacks => {
        collect(
          self,
          layer,
          ctx,
          query,
          || cloudformation_stacks::fetch(ctx),
          cloudformation_stacks::to_item,
        )
        .await
      }
      Self::Route53HostedZones => {
        collect(
          self,
          layer,
          ctx,
          query,
          || route53_hosted_zones::fetch(ctx),
          route53_hosted_zones::to_item,
        )
        .await
      }
    }
  }
}

/// Items contributed by one resource kind.
#[derive(Debug)]
pub struct SearchOutcome {
  pub kind: ResourceKind,
  pub items: Vec<Item>,
  /// Set when the kind failed outright and contributes nothing
  pub error: Option<CacheError>,
}

impl SearchOutcome {
  pub fn is_failure(&self) -> bool {
    self.error.is_some()
  }
}

async fn collect<S, T, F, Fut>(
  kind: ResourceKind,
  layer: &CacheLayer<S>,
  ctx: &AwsContext,
  query: &str,
  fetcher: F,
  format: fn(&T, &AwsContext, &str) -> Result<Item>,
) -> SearchOutcome
where
  S: CacheStorage,
  T: Cacheable,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<Vec<T>>>,
{
  let dimensions = ctx.cache_dimensions(kind.scope());
  let loaded = layer.load_collection(kind.name(), &dimensions, fetcher).await;
  let offline = loaded.is_offline();

  let items: Vec<Item> = loaded
    .items
    .iter()
    .filter_map(|record| match format(record, ctx, query) {
      Ok(item) => Some(item),
      Err(e) => {
        warn!(kind = kind.name(), error = %e, "skipping unformattable record");
        None
      }
    })
    .map(|item| if offline { item.mark_cached() } else { item })
    .collect();

  debug!(
    kind = kind.name(),
    count = items.len(),
    offline,
    cached_at = ?loaded.cached_at,
    "collected items"
  );

  SearchOutcome {
    kind,
    items,
    // An absorbed refresh warning is already logged by the cache layer
    error: if loaded.is_failure() { loaded.error } else { None },
  }
}

/// Merge every kind's items, rank them against `query`, and build the
/// launcher document.
pub fn assemble(query: &str, outcomes: Vec<SearchOutcome>) -> ScriptFilter {
  let all_failed = !outcomes.is_empty() && outcomes.iter().all(SearchOutcome::is_failure);
  let first_error = outcomes
    .iter()
    .find_map(|o| o.error.as_ref().map(|e| e.to_string()));

  let items: Vec<Item> = outcomes.into_iter().flat_map(|o| o.items).collect();
  let ranked = matcher::rank(query, items);

  if ranked.is_empty() {
    let notice = match (all_failed, first_error) {
      (true, Some(error)) => Item::notice("Could not load AWS resources", error),
      _ => Item::notice("No matching resources", query.trim()),
    };
    return ScriptFilter::new(vec![notice]);
  }

  ScriptFilter::new(ranked)
}

#[cfg(test)]
pub(crate) fn test_context(region: &str) -> AwsContext {
  use aws_config::{BehaviorVersion, Region, SdkConfig};

  let sdk = SdkConfig::builder()
    .region(Region::new(region.to_string()))
    .behavior_version(BehaviorVersion::latest())
    .build();
  AwsContext::new("default", sdk)
}
