//! Process-environment helpers.

use std::collections::BTreeSet;
use std::env;

/// Environment variable holding comma-separated experimental feature tokens.
pub const ENABLE_EXPERIMENTAL_ENV: &str = "KUMO_ENABLE_EXPERIMENTAL";

fn parse_tokens(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Returns the experimental feature tokens enabled for this process.
///
/// The analytics core itself consumes none of them; collaborators (storage
/// formats, loaders) gate unstable behaviour on specific tokens.
#[must_use]
pub fn experimental_features() -> BTreeSet<String> {
    env::var(ENABLE_EXPERIMENTAL_ENV)
        .map(|raw| parse_tokens(&raw))
        .unwrap_or_default()
}

/// Returns whether the named experimental feature token is enabled.
#[must_use]
pub fn experimental_feature_enabled(name: &str) -> bool {
    experimental_features().contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_split_and_trimmed() {
        let tokens = parse_tokens("unstable-rdg , ,v2-layout");
        assert!(tokens.contains("unstable-rdg"));
        assert!(tokens.contains("v2-layout"));
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn empty_value_yields_no_tokens() {
        assert!(parse_tokens("").is_empty());
    }
}
