//! Domain ID generation
//!
//! All IDs use the format: `{6-char-hex}-{kind}-{slug}`
//! Example: `019431-task-add-oauth-endpoint`

/// Generate a domain ID from kind and title
pub fn generate_id(kind: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    format!("{}-{}-{}", hex_prefix, kind, slugify(title))
}

/// Slugify a title for use in IDs and filenames
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(50)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_format() {
        let id = generate_id("task", "Add OAuth Endpoint");
        assert!(id.contains("-task-"));
        assert!(id.ends_with("add-oauth-endpoint"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add User Auth"), "add-user-auth");
        assert_eq!(slugify("Don't break"), "dont-break");
        assert_eq!(slugify("  spaced   out  "), "spaced-out");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_id("task", "same");
        let b = generate_id("task", "same");
        assert_ne!(a, b);
    }
}
