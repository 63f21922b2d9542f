//! Keyword fallback matching.
//!
//! A product matches when the whole query appears, case-insensitively, in
//! its name, description, category or brand. Matches carry no graded score;
//! the engine assigns them a fixed sentinel score. Products whose name
//! matches come first, otherwise catalog order is preserved.

use crate::catalog::Product;

/// Products matching `query`, best first.
pub fn match_keyword<'a>(query: &str, products: &[&'a Product]) -> Vec<&'a Product> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return vec![];
    }

    let mut matches: Vec<(u8, &Product)> = products
        .iter()
        .filter_map(|product| field_rank(&needle, product).map(|rank| (rank, *product)))
        .collect();

    // stable: equal ranks keep catalog order
    matches.sort_by_key(|(rank, _)| *rank);

    matches.into_iter().map(|(_, product)| product).collect()
}

/// Rank of the best matching field, lower is better.
fn field_rank(needle: &str, product: &Product) -> Option<u8> {
    [
        &product.name,
        &product.brand,
        &product.category,
        &product.description,
    ]
    .iter()
    .position(|field| field.to_lowercase().contains(needle))
    .map(|idx| idx as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: u64, name: &str, description: &str) -> Product {
        Product {
            id,
            name: name.to_string(),
            description: description.to_string(),
            category: "Audio".to_string(),
            brand: "Sonic".to_string(),
            ..Default::default()
        }
    }

    fn ids(products: &[&Product]) -> Vec<u64> {
        products.iter().map(|p| p.id).collect()
    }

    #[test]
    fn test_case_insensitive_phrase_match() {
        let products = [
            product(1, "USB Cable", "Charges phones"),
            product(2, "Premium Wireless Headphones", "Noise cancelling"),
            product(3, "Desk Lamp", "Bright"),
        ];
        let refs: Vec<&Product> = products.iter().collect();

        let found = match_keyword("wireless headphones", &refs);
        assert_eq!(ids(&found), vec![2]);

        assert!(match_keyword("headphones wireless", &refs).is_empty());
    }

    #[test]
    fn test_name_matches_rank_first() {
        let products = [
            product(1, "Cable", "works with any speaker"),
            product(2, "Bluetooth Speaker", "Loud"),
            product(3, "Speaker Stand", "Steel"),
        ];
        let refs: Vec<&Product> = products.iter().collect();

        let found = match_keyword("SPEAKER", &refs);
        assert_eq!(ids(&found), vec![2, 3, 1]);
    }

    #[test]
    fn test_matches_category_and_brand() {
        let products = [product(1, "Thing", "")];
        let refs: Vec<&Product> = products.iter().collect();

        assert_eq!(ids(&match_keyword("audio", &refs)), vec![1]);
        assert_eq!(ids(&match_keyword("sonic", &refs)), vec![1]);
        assert!(match_keyword("  ", &refs).is_empty());
    }
}
