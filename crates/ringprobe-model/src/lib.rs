pub mod pattern;
pub mod shadow;

pub use pattern::{pattern, stream_pattern};
pub use shadow::{Contradiction, ShadowError, ShadowLog};
