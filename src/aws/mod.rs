pub mod console;
pub mod context;

pub use context::{AwsContext, Scope};
