use super::path_key::PathKey;
use crate::utils::ParseError;

/// Produces a syntax tree for one file's content
///
/// Implementations must accept syntactically partial input and return a
/// partial tree; `ParseError` is reserved for input that cannot be handled at
/// all. `previous` is the tree last cached for the same key and may be used to
/// reparse incrementally.
pub trait CstParser: Send + Sync + 'static {
    type Tree: Send + Sync + 'static;

    fn parse(
        &self,
        key: &PathKey,
        content: &str,
        previous: Option<&Self::Tree>,
    ) -> Result<Self::Tree, ParseError>;
}
