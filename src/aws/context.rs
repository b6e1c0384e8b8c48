//! Explicit credentials/region context handed to every fetcher.

use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region, SdkConfig};

/// Region used when neither the caller nor the AWS environment names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Profile name recorded in cache keys when none is selected.
const DEFAULT_PROFILE: &str = "default";

/// Whether a resource kind's results depend on the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
  /// Different result set per region (Lambda, CloudFormation, ...)
  Regional,
  /// One result set per account (Route53, IAM, ...)
  Global,
}

/// Resolved AWS context: which account (profile) and region to query.
#[derive(Debug, Clone)]
pub struct AwsContext {
  profile: String,
  region: String,
  sdk: SdkConfig,
}

impl AwsContext {
  /// Resolve credentials and region through the standard AWS provider chains.
  ///
  /// An explicit `region` wins, then the environment/profile region, then
  /// [`DEFAULT_REGION`].
  pub async fn load(profile: Option<&str>, region: Option<&str>) -> Self {
    let region_chain = RegionProviderChain::first_try(region.map(|r| Region::new(r.to_string())))
      .or_default_provider()
      .or_else(Region::new(DEFAULT_REGION));

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_chain);
    if let Some(profile) = profile {
      loader = loader.profile_name(profile);
    }
    let sdk = loader.load().await;

    let profile = profile
      .map(String::from)
      .or_else(|| std::env::var("AWS_PROFILE").ok())
      .unwrap_or_else(|| DEFAULT_PROFILE.to_string());

    Self::new(profile, sdk)
  }

  /// Build a context from an already loaded SDK config.
  pub fn new(profile: impl Into<String>, sdk: SdkConfig) -> Self {
    let region = sdk
      .region()
      .map(|r| r.to_string())
      .unwrap_or_else(|| DEFAULT_REGION.to_string());

    Self {
      profile: profile.into(),
      region,
      sdk,
    }
  }

  pub fn profile(&self) -> &str {
    &self.profile
  }

  pub fn region(&self) -> &str {
    &self.region
  }

  /// SDK configuration for constructing service clients.
  pub fn sdk_config(&self) -> &SdkConfig {
    &self.sdk
  }

  /// Cache key dimensions for a resource kind with the given scope.
  ///
  /// The profile always takes part since it selects the account. The region
  /// only does for regional kinds, so global kinds are fetched once no matter
  /// which region is active.
  pub fn cache_dimensions(&self, scope: Scope) -> Vec<String> {
    match scope {
      Scope::Regional => vec![self.profile.clone(), self.region.clone()],
      Scope::Global => vec![self.profile.clone()],
    }
  }
}
