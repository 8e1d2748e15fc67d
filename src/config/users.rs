//! Administrator accounts configured through the environment.
//!
//! `STOREFRONT_ADMINS` holds a comma-separated list of usernames that are granted the
//! admin role at login, in addition to the `admins` list in config.toml.

/// Reads admin usernames from `STOREFRONT_ADMINS`.
#[must_use]
pub fn get_env_admins() -> Vec<String> {
    std::env::var("STOREFRONT_ADMINS")
        .map(|raw| parse_admin_list(&raw))
        .unwrap_or_default()
}

/// Splits a comma-separated username list, dropping blanks.
#[must_use]
pub fn parse_admin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admin_list() {
        assert_eq!(
            parse_admin_list(" admin, , shopkeeper ,"),
            vec!["admin".to_string(), "shopkeeper".to_string()]
        );
        assert!(parse_admin_list("").is_empty());
    }
}
