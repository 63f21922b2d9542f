//! Canonical product text for embedding generation.
//!
//! Every product is embedded from the same combined text:
//! 1. Fields in order: name, brand, category, description
//! 2. Trim each field, skip empty ones
//! 3. Join with " - "
//! 4. Truncate to max length with ellipsis
//!
//! Changing any of these steps changes what stored vectors mean. Bump
//! `COMBINED_TEXT_VERSION` when doing so; the version is part of the content
//! hash, so every stored embedding becomes stale and is regenerated.

use sha2::{Digest, Sha256};

use crate::catalog::Product;

/// Version of the combined text format
pub const COMBINED_TEXT_VERSION: u8 = 1;

/// Maximum combined text length (characters, not tokens)
const MAX_CONTENT_LENGTH: usize = 2048;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

const FIELD_SEPARATOR: &str = " - ";

/// Combined text of a product. Empty if every field is empty.
pub fn combine_product_fields(product: &Product) -> String {
    let content = [
        product.name.as_str(),
        product.brand.as_str(),
        product.category.as_str(),
        product.description.as_str(),
    ]
    .iter()
    .map(|field| field.trim())
    .filter(|field| !field.is_empty())
    .collect::<Vec<_>>()
    .join(FIELD_SEPARATOR);

    truncate_content(&content)
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_LENGTH {
        return content.to_string();
    }

    let max_chars = MAX_CONTENT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = content.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}

/// Hash of the combined text and its format version, for change detection.
pub fn content_hash(product: &Product) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update([COMBINED_TEXT_VERSION]);
    hasher.update(combine_product_fields(product).as_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str, brand: &str, category: &str, description: &str) -> Product {
        Product {
            id: 1,
            name: name.to_string(),
            brand: brand.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_field_order() {
        let p = product("Headphones", "Sonic", "Audio", "Over-ear, noise cancelling");
        assert_eq!(
            combine_product_fields(&p),
            "Headphones - Sonic - Audio - Over-ear, noise cancelling"
        );
    }

    #[test]
    fn test_skips_empty_fields() {
        let p = product("  Headphones ", "", "   ", "Wireless");
        assert_eq!(combine_product_fields(&p), "Headphones - Wireless");

        let empty = product("", " ", "", "");
        assert_eq!(combine_product_fields(&empty), "");
    }

    #[test]
    fn test_truncation() {
        let p = product(&"x".repeat(3000), "", "", "");
        let text = combine_product_fields(&p);
        assert_eq!(text.chars().count(), MAX_CONTENT_LENGTH);
        assert!(text.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let p = product(&"é".repeat(3000), "", "", "");
        let text = combine_product_fields(&p);
        assert!(text.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(text.chars().count(), MAX_CONTENT_LENGTH);
    }

    #[test]
    fn test_content_hash_tracks_combined_text() {
        let a = product("Headphones", "Sonic", "Audio", "Wireless");
        let mut b = a.clone();
        b.id = 2;
        assert_eq!(content_hash(&a), content_hash(&b));

        b.description = "Wired".to_string();
        assert_ne!(content_hash(&a), content_hash(&b));

        // whitespace-only differences do not change the canonical text
        let mut c = a.clone();
        c.name = "  Headphones  ".to_string();
        assert_eq!(content_hash(&a), content_hash(&c));
    }
}
