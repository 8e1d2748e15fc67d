//! Document paths and the canonical storefront namespace.

use crate::errors::{Error, Result};
use std::{fmt, str::FromStr};

const FORBIDDEN_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

/// A validated, slash-separated location in the document tree.
///
/// Paths never start or end with `/` and never contain empty segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    /// Parses a raw path, trimming leading and trailing slashes.
    ///
    /// # Errors
    /// Returns `Error::InvalidPath` for an empty path, an empty segment (`a//b`),
    /// or a segment containing one of `. # $ [ ]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(invalid(raw, "path is empty"));
        }
        for segment in trimmed.split('/') {
            validate_segment(raw, segment)?;
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the path one level below this one.
    pub fn child(&self, segment: &str) -> Result<Self> {
        validate_segment(segment, segment)?;
        Ok(Self(format!("{}/{segment}", self.0)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment of the path, i.e. the key of the node it names.
    #[must_use]
    pub fn key(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// True when `other` lies strictly below `self`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// True when the two paths name the same node or one contains the other.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self == other || self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Every path from the root segment down to and including `self`,
    /// e.g. `a/b/c` yields `a`, `a/b`, `a/b/c`.
    #[must_use]
    pub fn lineage(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = String::new();
        for segment in self.segments() {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            out.push(current.clone());
        }
        out
    }

    /// Segments of `self` below `ancestor`. Empty when the paths are equal.
    #[must_use]
    pub fn relative_to<'a>(&'a self, ancestor: &str) -> Vec<&'a str> {
        self.0
            .strip_prefix(ancestor)
            .map(|rest| rest.split('/').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn validate_segment(raw: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(invalid(raw, "empty segment"));
    }
    if let Some(c) = segment.chars().find(|c| FORBIDDEN_CHARS.contains(c) || *c == '/') {
        return Err(invalid(raw, &format!("segment '{segment}' contains '{c}'")));
    }
    Ok(())
}

fn invalid(path: &str, reason: &str) -> Error {
    Error::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Canonical locations used by the storefront.
pub mod paths {
    use super::DocPath;
    use crate::errors::Result;

    pub const PRODUCTS: &str = "productlist";
    pub const USERS: &str = "users";
    pub const ORDERS: &str = "orders";
    pub const CART: &str = "cart";

    /// `productlist`
    #[must_use]
    pub fn products() -> DocPath {
        DocPath(PRODUCTS.to_string())
    }

    /// `productlist/{product_id}`
    pub fn product(product_id: &str) -> Result<DocPath> {
        products().child(product_id)
    }

    /// `users`
    #[must_use]
    pub fn users() -> DocPath {
        DocPath(USERS.to_string())
    }

    /// `users/{username}`
    pub fn user(username: &str) -> Result<DocPath> {
        users().child(username)
    }

    /// `users/{username}/cart`
    pub fn cart(username: &str) -> Result<DocPath> {
        user(username)?.child(CART)
    }

    /// `users/{username}/cart/{line_item_id}`
    pub fn cart_item(username: &str, line_item_id: &str) -> Result<DocPath> {
        cart(username)?.child(line_item_id)
    }

    /// `orders`
    #[must_use]
    pub fn orders() -> DocPath {
        DocPath(ORDERS.to_string())
    }

    /// `orders/{order_id}`
    pub fn order(order_id: &str) -> Result<DocPath> {
        orders().child(order_id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_trims_and_validates() {
        let path = DocPath::parse("/users/rosie/cart/").unwrap();
        assert_eq!(path.as_str(), "users/rosie/cart");
        assert_eq!(path.key(), "cart");
        assert_eq!(path.parent().unwrap().as_str(), "users/rosie");

        assert!(matches!(DocPath::parse(""), Err(Error::InvalidPath { .. })));
        assert!(matches!(DocPath::parse("a//b"), Err(Error::InvalidPath { .. })));
        assert!(matches!(DocPath::parse("a/b.c"), Err(Error::InvalidPath { .. })));
        assert!(matches!(DocPath::parse("a/$b"), Err(Error::InvalidPath { .. })));
    }

    #[test]
    fn test_child_rejects_nested_segment() {
        let base = paths::products();
        assert!(base.child("p1").is_ok());
        assert!(base.child("p1/stock").is_err());
        assert!(base.child("").is_err());
    }

    #[test]
    fn test_ancestry() {
        let user = paths::user("rose_lee").unwrap();
        let line = paths::cart_item("rose_lee", "l1").unwrap();
        let other = DocPath::parse("users/rose_lee2").unwrap();

        assert!(user.is_ancestor_of(&line));
        assert!(!line.is_ancestor_of(&user));
        assert!(!user.is_ancestor_of(&other));
        assert!(!user.is_ancestor_of(&user));
        assert!(user.overlaps(&line));
        assert!(line.overlaps(&user));
        assert!(!user.overlaps(&other));
    }

    #[test]
    fn test_lineage_and_relative() {
        let line = paths::cart_item("rosie", "l1").unwrap();
        assert_eq!(
            line.lineage(),
            vec!["users", "users/rosie", "users/rosie/cart", "users/rosie/cart/l1"]
        );
        assert_eq!(line.relative_to("users/rosie"), vec!["cart", "l1"]);
        assert!(line.relative_to(line.as_str()).is_empty());
    }
}
