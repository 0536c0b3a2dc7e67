//! Resolution of user-entered session selectors.

use crate::error::RelayError;
use crate::state::StateStore;

/// Resolve a selector into a concrete session id.
///
/// A purely numeric selector is a 1-based index into the list the actor was
/// last shown by the sessions listing; anything else is taken as a literal
/// session id. Numeric selectors outside the remembered list are an input
/// error, never a literal id.
pub fn resolve_selector(
    state: &StateStore,
    actor: &str,
    selector: &str,
) -> Result<String, RelayError> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(RelayError::input(
            "Give me a session number from the list or a session id.",
        ));
    }

    if selector.chars().all(|c| c.is_ascii_digit()) {
        let ids = state.get_last_session_ids(actor);
        let index: usize = selector
            .parse()
            .map_err(|_| RelayError::input(format!("Not a usable number: {selector}")))?;
        if index == 0 || index > ids.len() {
            return Err(RelayError::input(format!(
                "Number {index} is out of range. Run /sessions again to see the current list."
            )));
        }
        return Ok(ids[index - 1].clone());
    }

    Ok(selector.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with_list(ids: &[&str]) -> (TempDir, StateStore) {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::open(tmp.path().join("state.json"));
        store
            .set_last_session_ids("actor", ids.iter().map(|s| s.to_string()).collect())
            .unwrap();
        (tmp, store)
    }

    #[test]
    fn numeric_selector_indexes_last_listing() {
        let (_tmp, store) = store_with_list(&["s-a", "s-b", "s-c"]);
        assert_eq!(resolve_selector(&store, "actor", "2").unwrap(), "s-b");
        assert_eq!(resolve_selector(&store, "actor", " 3 ").unwrap(), "s-c");
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        let (_tmp, store) = store_with_list(&["s-a", "s-b", "s-c"]);
        assert!(resolve_selector(&store, "actor", "0").is_err());
        assert!(resolve_selector(&store, "actor", "4").is_err());
    }

    #[test]
    fn non_numeric_selector_is_literal() {
        let (_tmp, store) = store_with_list(&["s-a"]);
        assert_eq!(
            resolve_selector(&store, "actor", "0199a213-abcd").unwrap(),
            "0199a213-abcd"
        );
        // Mixed alphanumerics never index the listing.
        assert_eq!(resolve_selector(&store, "actor", "2b").unwrap(), "2b");
    }

    #[test]
    fn numeric_selector_without_listing_fails() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::open(tmp.path().join("state.json"));
        assert!(resolve_selector(&store, "actor", "1").is_err());
    }

    #[test]
    fn empty_selector_is_an_input_error() {
        let (_tmp, store) = store_with_list(&["s-a"]);
        assert!(resolve_selector(&store, "actor", "   ").is_err());
    }
}
