//! Fallback resolver: turn a user-typed page list into candidate pages.
//!
//! Accepted forms: `6 7`, `3,3,5`, `2-4`, `/pages 6 7`. The result is
//! deduplicated and sorted; any bad token rejects the whole list and is
//! named in the error so the user can fix it.

use crate::error::ValidationError;
use std::collections::BTreeSet;

/// Validate `input` against `[1, page_count]`, allowing at most `max_pages`.
pub fn resolve_manual_pages(
    input: &str,
    page_count: usize,
    max_pages: usize,
) -> Result<Vec<usize>, ValidationError> {
    let mut tokens = input
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .peekable();

    if tokens
        .peek()
        .is_some_and(|t| t.eq_ignore_ascii_case("/pages"))
    {
        tokens.next();
    }

    let mut pages = BTreeSet::new();
    for token in tokens {
        match token.split_once('-') {
            Some((start, end)) => {
                let start = parse_page(start, token, page_count)?;
                let end = parse_page(end, token, page_count)?;
                if start > end {
                    return Err(ValidationError::BadRange {
                        token: token.to_string(),
                    });
                }
                pages.extend(start..=end);
            }
            None => {
                pages.insert(parse_page(token, token, page_count)?);
            }
        }
    }

    if pages.is_empty() {
        return Err(ValidationError::Empty);
    }
    if pages.len() > max_pages {
        return Err(ValidationError::TooMany {
            count: pages.len(),
            max: max_pages,
        });
    }
    Ok(pages.into_iter().collect())
}

/// Parse one page number; errors name the whole `token` it came from.
fn parse_page(s: &str, token: &str, page_count: usize) -> Result<usize, ValidationError> {
    let page: usize = s.trim().parse().map_err(|_| ValidationError::NotANumber {
        token: token.to_string(),
    })?;
    if page < 1 || page > page_count {
        return Err(ValidationError::OutOfRange {
            token: token.to_string(),
            total: page_count,
        });
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_and_sorts() {
        assert_eq!(resolve_manual_pages("3,3,5", 12, 6).unwrap(), vec![3, 5]);
        assert_eq!(resolve_manual_pages("7 6", 12, 6).unwrap(), vec![6, 7]);
    }

    #[test]
    fn single_page() {
        assert_eq!(resolve_manual_pages("4", 12, 6).unwrap(), vec![4]);
    }

    #[test]
    fn accepts_pages_command_and_mixed_separators() {
        assert_eq!(
            resolve_manual_pages("/pages 6, 7;8", 12, 6).unwrap(),
            vec![6, 7, 8]
        );
    }

    #[test]
    fn accepts_ranges() {
        assert_eq!(resolve_manual_pages("2-4 9", 12, 6).unwrap(), vec![2, 3, 4, 9]);
    }

    #[test]
    fn rejects_page_above_count() {
        assert_eq!(
            resolve_manual_pages("3 13", 12, 6),
            Err(ValidationError::OutOfRange {
                token: "13".into(),
                total: 12
            })
        );
    }

    #[test]
    fn rejects_page_zero() {
        assert!(matches!(
            resolve_manual_pages("0", 12, 6),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_non_numeric_token_by_name() {
        let err = resolve_manual_pages("6 seven", 12, 6).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NotANumber {
                token: "seven".into()
            }
        );
        assert!(err.to_string().contains("'seven'"));
    }

    #[test]
    fn negative_number_is_not_a_page() {
        // "-3" splits as a range with an empty start.
        assert!(matches!(
            resolve_manual_pages("-3", 12, 6),
            Err(ValidationError::NotANumber { .. })
        ));
    }

    #[test]
    fn rejects_reversed_range() {
        assert_eq!(
            resolve_manual_pages("5-2", 12, 6),
            Err(ValidationError::BadRange { token: "5-2".into() })
        );
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(resolve_manual_pages("  ", 12, 6), Err(ValidationError::Empty));
        assert_eq!(resolve_manual_pages("/pages", 12, 6), Err(ValidationError::Empty));
    }

    #[test]
    fn rejects_too_many_pages() {
        assert_eq!(
            resolve_manual_pages("1-8", 12, 6),
            Err(ValidationError::TooMany { count: 8, max: 6 })
        );
    }
}
