//! Validation of user-supplied names and text.

use crate::error::{ErrorKind, Result};
use regex::Regex;
use std::sync::LazyLock;

pub const MAX_NAME_LENGTH: usize = 256;

static NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\- ][A-Za-z0-9._\- ]*$").unwrap());

/// Database names: letters, digits, `.`, `-`, `_` and spaces, not starting
/// with a dot.
pub fn name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        exn::bail!(ErrorKind::InvalidName(format!(
            "names must be between 1 and {MAX_NAME_LENGTH} characters"
        )));
    }
    if !NAME.is_match(name) {
        exn::bail!(ErrorKind::InvalidName(format!("{name:?} contains characters that aren't allowed")));
    }
    Ok(())
}

/// Owners are used verbatim in identity keys and logs, so they get the same
/// treatment as names.
pub fn owner(owner: &str) -> Result<()> {
    name(owner)
}

pub fn description(description: &str, max: usize) -> Result<()> {
    let length = description.chars().count();
    if length > max {
        exn::bail!(ErrorKind::InvalidInput(format!(
            "description is {length} characters long, the maximum is {max}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("sales.db")]
    #[case("Sales 2024-Q3_final.sqlite")]
    #[case("a")]
    #[case("_.db")]
    fn test_valid_names(#[case] value: &str) {
        assert!(name(value).is_ok(), "{value}");
    }

    #[rstest]
    #[case::empty("")]
    #[case::leading_dot(".hidden")]
    #[case::slash("a/b.db")]
    #[case::traversal("..")]
    #[case::quote("o'clock.db")]
    #[case::newline("a\nb")]
    #[case::unicode("café.db")]
    fn test_invalid_names(#[case] value: &str) {
        let err = name(value).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidName(_)));
    }

    #[test]
    fn test_name_length() {
        assert!(name(&"x".repeat(MAX_NAME_LENGTH)).is_ok());
        assert!(name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_description_counts_characters() {
        assert!(description(&"é".repeat(80), 80).is_ok());
        let err = description(&"x".repeat(81), 80).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidInput(_)));
    }
}
