//! Equality-based label selector matching.

use crate::Labels;

/// True iff every `(key, value)` of `selector` is present in `labels` with an equal value.
///
/// An empty selector matches everything, absent labels included. Absent labels
/// never match a non-empty selector.
pub fn matches<'a, I>(labels: Option<&Labels>, selector: I) -> bool
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut selector = selector.into_iter().peekable();
    if selector.peek().is_none() { return true; }
    let Some(labels) = labels else { return false };
    selector.all(|(k, v)| labels.get(k).map(|have| have.as_str() == v).unwrap_or(false))
}

/// Adapts a `Labels` map into the pair iterator `matches` expects.
pub fn pairs(selector: &Labels) -> impl Iterator<Item = (&str, &str)> {
    selector.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

/// Render a selector as a server-side label selector (`k1=v1,k2=v2`).
pub fn render_selector(selector: &Labels) -> String {
    selector.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(matches(Some(&l(&[])), pairs(&l(&[]))));
        assert!(matches(None, pairs(&l(&[]))));
        assert!(matches(Some(&l(&[("a", "1")])), pairs(&l(&[]))));
    }

    #[test]
    fn selector_must_be_subset_of_labels() {
        assert!(!matches(Some(&l(&[("a", "1")])), pairs(&l(&[("a", "1"), ("b", "2")]))));
        assert!(matches(Some(&l(&[("a", "1"), ("b", "2")])), pairs(&l(&[("a", "1")]))));
        assert!(!matches(Some(&l(&[("a", "2")])), pairs(&l(&[("a", "1")]))));
    }

    #[test]
    fn absent_labels_never_match_non_empty_selector() {
        assert!(!matches(None, pairs(&l(&[("a", "1")]))));
    }

    #[test]
    fn works_with_ordered_pairs() {
        let sel = [("app", "foo"), ("tier", "web")];
        assert!(matches(Some(&l(&[("tier", "web"), ("app", "foo"), ("x", "y")])), sel));
    }

    #[test]
    fn render_is_sorted_and_comma_joined() {
        assert_eq!(render_selector(&l(&[("b", "2"), ("a", "1")])), "a=1,b=2");
        assert_eq!(render_selector(&l(&[])), "");
    }
}
