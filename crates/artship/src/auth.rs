use std::env;

/// Environment variables consulted for the hosting token, in order.
pub const TOKEN_ENV_VARS: [&str; 3] = ["ARTSHIP_TOKEN", "GITHUB_TOKEN", "GH_TOKEN"];

/// Where a resolved token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Explicit,
    Env(&'static str),
}

impl TokenSource {
    pub fn describe(self) -> String {
        match self {
            TokenSource::Explicit => "--token".to_string(),
            TokenSource::Env(name) => format!("${name}"),
        }
    }
}

/// Resolve the hosting token.
///
/// Resolution order:
/// 1) the explicit value (`--token`)
/// 2) `ARTSHIP_TOKEN`, `GITHUB_TOKEN`, `GH_TOKEN`
///
/// Blank values are skipped. Returns `None` if nothing is configured.
pub fn resolve_token(explicit: Option<&str>) -> Option<String> {
    resolve_token_with_source(explicit).map(|(tok, _)| tok)
}

pub fn resolve_token_with_source(explicit: Option<&str>) -> Option<(String, TokenSource)> {
    if let Some(v) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        return Some((v.to_string(), TokenSource::Explicit));
    }

    TOKEN_ENV_VARS.iter().copied().find_map(|name| {
        env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| (v, TokenSource::Env(name)))
    })
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn with_tokens<R>(
        artship: Option<&str>,
        github: Option<&str>,
        gh: Option<&str>,
        f: impl FnOnce() -> R,
    ) -> R {
        temp_env::with_vars(
            [
                ("ARTSHIP_TOKEN", artship),
                ("GITHUB_TOKEN", github),
                ("GH_TOKEN", gh),
            ],
            f,
        )
    }

    #[test]
    #[serial]
    fn explicit_token_wins() {
        with_tokens(Some("env-a"), Some("env-b"), None, || {
            assert_eq!(
                resolve_token_with_source(Some(" cli ")),
                Some(("cli".to_string(), TokenSource::Explicit))
            );
        });
    }

    #[test]
    #[serial]
    fn env_order_is_artship_then_github_then_gh() {
        with_tokens(Some("a"), Some("b"), Some("c"), || {
            assert_eq!(resolve_token(None).as_deref(), Some("a"));
        });
        with_tokens(None, Some("b"), Some("c"), || {
            assert_eq!(
                resolve_token_with_source(None),
                Some(("b".to_string(), TokenSource::Env("GITHUB_TOKEN")))
            );
        });
        with_tokens(Some("  "), None, Some("c"), || {
            assert_eq!(resolve_token(Some("")).as_deref(), Some("c"));
        });
    }

    #[test]
    #[serial]
    fn nothing_configured() {
        with_tokens(None, None, None, || {
            assert_eq!(resolve_token(None), None);
        });
    }

    #[test]
    fn source_descriptions() {
        assert_eq!(TokenSource::Explicit.describe(), "--token");
        assert_eq!(TokenSource::Env("GH_TOKEN").describe(), "$GH_TOKEN");
    }
}
