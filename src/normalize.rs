//! Title/name normalization (GLOSSARY "Normalized name").

const LEADING_ARTICLES: &[&str] = &["the ", "a ", "an "];

/// Case-fold, strip a single leading article, and collapse whitespace.
/// Used as the equivalence class for album titles and artist names.
pub fn norm(s: &str) -> String {
    let lower = s.to_lowercase();
    let collapsed = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped = LEADING_ARTICLES
        .iter()
        .find_map(|article| collapsed.strip_prefix(article))
        .unwrap_or(&collapsed);
    stripped.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_article() {
        assert_eq!(norm("The Beatles"), "beatles");
        assert_eq!(norm("A Tribe Called Quest"), "tribe called quest");
        assert_eq!(norm("An Album"), "album");
    }

    #[test]
    fn collapses_whitespace_and_case() {
        assert_eq!(norm("  Paul   Simon "), "paul simon");
        assert_eq!(norm("PAUL SIMON"), "paul simon");
    }

    #[test]
    fn leaves_non_articles_alone() {
        assert_eq!(norm("Therapy?"), "therapy?");
    }
}
