//! Song database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Song database model.
///
/// Only the columns the stem lifecycle depends on; songs are otherwise
/// managed by the API layer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SongDbModel {
    pub id: i64,
    pub slug: String,
    pub title: String,
    /// Unix epoch milliseconds (UTC) when created.
    pub created_at: i64,
}

/// Derive a URL slug from a song title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Dark Star (Live)"), "dark-star-live");
        assert_eq!(slugify("  --Hello--World "), "hello-world");
        assert_eq!(slugify("???"), "");
    }
}
