pub mod error;
pub mod matcher;
pub mod rules;
pub mod traits;
pub mod types;

pub use error::*;
pub use rules::{Rule, RuleSet};
pub use traits::*;
pub use types::*;
