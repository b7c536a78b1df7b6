//! Content-hash versioning of tools and toolsets.
//!
//! The hash is a change-detection token for a tool's public interface:
//! consumers compare it, they never parse it.

use crate::tools::definition::VersionEntry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the SHA-256 digest.
pub const HASH_LEN: usize = 8;

/// Short hex digest identifying a tool's interface revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    fn of(input: &str) -> Self {
        let digest = hex::encode(Sha256::digest(input.as_bytes()));
        Self(digest[..HASH_LEN].to_string())
    }

    /// The hash as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes a leaf tool's version list.
///
/// Sensitive to the order of `entries`. Returns `None` for an empty list.
#[must_use]
pub fn hash_version(entries: &[VersionEntry]) -> Option<ContentHash> {
    if entries.is_empty() {
        return None;
    }
    let joined: String = entries.iter().map(|e| e.value.as_str()).collect();
    Some(ContentHash::of(&joined))
}

/// Hashes a toolset from its children's version lists.
///
/// Insensitive to the order of `children`. Returns `None` when there are
/// no children or a child has no versions.
#[must_use]
pub fn hash_toolset<C>(children: &[C]) -> Option<ContentHash>
where
    C: AsRef<[VersionEntry]>,
{
    if children.is_empty() {
        return None;
    }
    let mut leaf_hashes = children
        .iter()
        .map(|c| hash_version(c.as_ref()))
        .collect::<Option<Vec<_>>>()?;
    leaf_hashes.sort();
    let joined: String = leaf_hashes.iter().map(ContentHash::as_str).collect();
    Some(ContentHash::of(&joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(values: &[&str]) -> Vec<VersionEntry> {
        values.iter().map(|v| VersionEntry::new(*v)).collect()
    }

    #[test]
    fn hash_is_eight_lowercase_hex_chars() {
        let hash = hash_version(&versions(&["1.0.0"])).unwrap();
        assert_eq!(hash.as_str().len(), HASH_LEN);
        assert!(hash
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_matches_sha256_prefix_of_joined_values() {
        let hash = hash_version(&versions(&["a", "b"])).unwrap();
        let expected = hex::encode(Sha256::digest(b"ab"));
        assert_eq!(hash.as_str(), &expected[..HASH_LEN]);
    }

    #[test]
    fn hash_version_is_order_sensitive() {
        let single = hash_version(&versions(&["a"])).unwrap();
        let ba = hash_version(&versions(&["b", "a"])).unwrap();
        let ab = hash_version(&versions(&["a", "b"])).unwrap();
        assert_ne!(single, ba);
        assert_ne!(ba, ab);
    }

    #[test]
    fn hash_version_requires_entries() {
        assert!(hash_version(&[]).is_none());
    }

    #[test]
    fn hash_version_is_deterministic() {
        assert_eq!(
            hash_version(&versions(&["1.0", "1.1"])),
            hash_version(&versions(&["1.0", "1.1"]))
        );
    }

    #[test]
    fn hash_toolset_ignores_child_order() {
        let a = versions(&["1.0"]);
        let b = versions(&["2.0", "2.1"]);
        assert_eq!(
            hash_toolset(&[a.clone(), b.clone()]),
            hash_toolset(&[b, a])
        );
    }

    #[test]
    fn hash_toolset_tracks_child_content() {
        let a = versions(&["1.0"]);
        let b = versions(&["2.0"]);
        let b_changed = versions(&["2.0", "2.1"]);
        assert_ne!(
            hash_toolset(&[a.clone(), b]),
            hash_toolset(&[a, b_changed])
        );
    }

    #[test]
    fn hash_toolset_of_nothing_is_none() {
        let empty: [Vec<VersionEntry>; 0] = [];
        assert!(hash_toolset(&empty).is_none());
        assert!(hash_toolset(&[Vec::<VersionEntry>::new()]).is_none());
    }
}
