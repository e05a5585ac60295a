//! Normalized resource keys.
//!
//! A resource key is the identity used to coalesce and guard operations on
//! the same logical target. Two requests with the same key are the same
//! logical operation regardless of which connection sent them or how the
//! path was spelled.

use std::fmt;

/// Normalized identity string for one logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Normalize a raw path-like identifier into a canonical key.
    ///
    /// Rules: trim whitespace, unify backslashes to forward slashes, collapse
    /// duplicate slashes, lowercase, ensure a leading slash, strip any
    /// trailing slash (except for the root itself).
    pub fn normalize(raw: &str) -> Self {
        let mut out = String::with_capacity(raw.len() + 1);
        out.push('/');
        let mut prev_slash = true;
        for ch in raw.trim().chars() {
            let ch = if ch == '\\' { '/' } else { ch };
            if ch == '/' {
                if !prev_slash {
                    out.push('/');
                }
                prev_slash = true;
            } else {
                for lower in ch.to_lowercase() {
                    out.push(lower);
                }
                prev_slash = false;
            }
        }
        if out.len() > 1 && out.ends_with('/') {
            out.pop();
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_slashes() {
        assert_eq!(
            ResourceKey::normalize("/Game/Foo").as_str(),
            "/game/foo"
        );
        assert_eq!(
            ResourceKey::normalize("Game\\Foo\\Bar").as_str(),
            "/game/foo/bar"
        );
        assert_eq!(
            ResourceKey::normalize("  /Game//Foo/ ").as_str(),
            "/game/foo"
        );
    }

    #[test]
    fn equivalent_spellings_share_a_key() {
        let a = ResourceKey::normalize("/Game/Blueprints/BP_Door");
        let b = ResourceKey::normalize("game/blueprints/bp_door/");
        assert_eq!(a, b);
    }

    #[test]
    fn root_is_a_single_slash() {
        assert_eq!(ResourceKey::normalize("").as_str(), "/");
        assert_eq!(ResourceKey::normalize("///").as_str(), "/");
    }
}
