//! The mirroring pipeline: normalize, rewrite, fan out.

pub mod coordinator;
pub mod normalize;
pub mod rules;
pub mod types;

pub use coordinator::{MirrorCoordinator, MirrorReport};
pub use normalize::normalize;
pub use rules::{ReplacementRule, RuleSet};
pub use types::{ContentKind, MediaRef, NormalizedPost, PollKind, PollSpec, RichText};
