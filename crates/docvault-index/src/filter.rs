//! Typed filter expressions over a row's scalar fields.

use std::fmt;

/// Scalar filter applied to `doc_id` / `user_id`.
///
/// Renders in the index's expression syntax, e.g. `user_id in ["u1"] and doc_id in ["a"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Matches every row.
    All,
    DocIdIn(Vec<String>),
    UserIdIn(Vec<String>),
    And(Box<Filter>, Box<Filter>),
}

impl Filter {
    pub fn user(user_id: &str) -> Self {
        Self::UserIdIn(vec![user_id.to_string()])
    }

    pub fn doc(doc_id: &str) -> Self {
        Self::DocIdIn(vec![doc_id.to_string()])
    }

    pub fn docs<I, S>(doc_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::DocIdIn(doc_ids.into_iter().map(Into::into).collect())
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::All, f) | (f, Self::All) => f,
            (a, b) => Self::And(Box::new(a), Box::new(b)),
        }
    }

    pub fn matches(&self, doc_id: &str, user_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::DocIdIn(ids) => ids.iter().any(|id| id == doc_id),
            Self::UserIdIn(ids) => ids.iter().any(|id| id == user_id),
            Self::And(a, b) => a.matches(doc_id, user_id) && b.matches(doc_id, user_id),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, field: &str, values: &[String]) -> fmt::Result {
    write!(f, "{} in [", field)?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        // Values are quoted JSON-style so ids containing quotes stay unambiguous.
        write!(f, "{:?}", v)?;
    }
    f.write_str("]")
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("true"),
            Self::DocIdIn(ids) => write_list(f, "doc_id", ids),
            Self::UserIdIn(ids) => write_list(f, "user_id", ids),
            Self::And(a, b) => write!(f, "{} and {}", a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(Filter::docs(["a", "b"]).to_string(), r#"doc_id in ["a","b"]"#);
        assert_eq!(
            Filter::user("u1").and(Filter::doc("d1")).to_string(),
            r#"user_id in ["u1"] and doc_id in ["d1"]"#
        );
        assert_eq!(Filter::All.to_string(), "true");
    }

    #[test]
    fn test_matches() {
        let f = Filter::user("u1").and(Filter::docs(["d1", "d2"]));
        assert!(f.matches("d1", "u1"));
        assert!(!f.matches("d1", "u2"));
        assert!(!f.matches("d3", "u1"));
        assert!(Filter::All.matches("x", "y"));
        assert!(!Filter::DocIdIn(vec![]).matches("d1", "u1"));
    }

    #[test]
    fn test_and_with_all_collapses() {
        assert_eq!(Filter::All.and(Filter::user("u1")), Filter::user("u1"));
        assert_eq!(Filter::user("u1").and(Filter::All), Filter::user("u1"));
    }
}
