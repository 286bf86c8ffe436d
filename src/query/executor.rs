// Query execution - predicate evaluation, index shortcutting, sort, paginate

use crate::document::Document;
use crate::error::{Result, ShelfDbError};
use crate::query::result::ResultSet;
use crate::query::{Combinator, Node, Predicate};
use crate::repository::Repository;
use crate::value;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;

/// A query under construction against one repository: predicate plus
/// optional order-by and limit specs. Created via [`Repository::query`].
#[derive(Debug)]
pub struct Query<'a> {
    repo: &'a Repository,
    predicate: Predicate,
    limit: Option<(usize, usize)>,
    order_by: Vec<String>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(repo: &'a Repository) -> Self {
        Query {
            repo,
            predicate: Predicate::new(),
            limit: None,
            order_by: Vec::new(),
        }
    }

    /// See [`Predicate::where_`].
    pub fn where_(mut self, field: &str, operator: &str, value: impl Into<Value>) -> Result<Self> {
        self.predicate = self.predicate.and_where(field, operator, value)?;
        Ok(self)
    }

    pub fn and_where(
        mut self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.predicate = self.predicate.and_where(field, operator, value)?;
        Ok(self)
    }

    pub fn or_where(
        mut self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.predicate = self.predicate.or_where(field, operator, value)?;
        Ok(self)
    }

    pub fn and_group(mut self, sub: Predicate) -> Self {
        self.predicate = self.predicate.and_group(sub);
        self
    }

    pub fn or_group(mut self, sub: Predicate) -> Self {
        self.predicate = self.predicate.or_group(sub);
        self
    }

    /// Return at most `count` documents starting at `offset`. The result's
    /// `total()` still reports the pre-slice match count.
    pub fn limit(mut self, count: usize, offset: usize) -> Self {
        self.limit = Some((count, offset));
        self
    }

    /// Append a sort key in `"field"` or `"field DESC"` form (ASC default).
    /// `"id"`/`"__id"` sort by document id. Call repeatedly for multi-key
    /// sorts; ties keep their pre-sort relative order.
    pub fn order_by(mut self, spec: &str) -> Self {
        self.order_by.push(spec.to_string());
        self
    }

    /// Run the query.
    pub fn execute(&self) -> Result<ResultSet> {
        run(self.repo, &self.predicate, self.limit, &self.order_by)
    }

    pub(crate) fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub(crate) fn limit_spec(&self) -> Option<(usize, usize)> {
        self.limit
    }

    pub(crate) fn order_specs(&self) -> &[String] {
        &self.order_by
    }

    pub(crate) fn repository(&self) -> &'a Repository {
        self.repo
    }
}

/// Execute (predicate, limit, order-by) against a repository.
///
/// Index-covered predicates resolve candidate ids straight from the indexes
/// and fetch only those documents; everything else falls back to a full scan
/// filtered in memory. Both paths produce the same id sets.
pub(crate) fn run(
    repo: &Repository,
    predicate: &Predicate,
    limit: Option<(usize, usize)>,
    order_by: &[String],
) -> Result<ResultSet> {
    let mut documents = if predicate.is_empty() {
        repo.find_all()?
    } else if index_covered(repo, predicate.nodes()) {
        let ids = resolve_ids(repo, predicate.nodes())?;
        fetch_existing(repo, &ids)?
    } else {
        let all = repo.find_all()?;
        let matched: Vec<&Document> = {
            let candidates: Vec<&Document> = all.iter().collect();
            filter(&candidates, predicate.nodes())
        };
        let matched: Vec<Document> = matched.into_iter().cloned().collect();
        matched
    };

    if !order_by.is_empty() {
        let specs = parse_order_by(order_by);
        sort_documents(&mut documents, &specs);
    }

    let total = documents.len();
    if let Some((count, offset)) = limit {
        documents = documents.into_iter().skip(offset).take(count).collect();
    }

    Ok(ResultSet::new(documents, total))
}

/// True when every leaf, recursing into groups, has a registered index that
/// declares itself compatible with the leaf's operator.
fn index_covered(repo: &Repository, nodes: &[Node]) -> bool {
    nodes.iter().all(|node| match node {
        Node::Leaf { field, operator, .. } => repo
            .index_for(field)
            .map(|index| index.operator_compatible(*operator))
            .unwrap_or(false),
        Node::Group { nodes, .. } => index_covered(repo, nodes),
    })
}

/// AND/OR combination over id sets, mirroring `filter` below: nodes are
/// processed left to right, the first node seeds the running result, AND
/// nodes narrow it and OR nodes union in ids resolved independently of the
/// narrowing so far. Duplicates are dropped, first occurrence wins.
fn resolve_ids(repo: &Repository, nodes: &[Node]) -> Result<Vec<String>> {
    let mut result: Vec<String> = Vec::new();

    for (position, node) in nodes.iter().enumerate() {
        let ids = match node {
            Node::Leaf {
                field,
                operator,
                value,
                ..
            } => repo.index_lookup(field, value, *operator)?,
            Node::Group { nodes: sub, .. } => resolve_ids(repo, sub)?,
        };

        if position == 0 {
            result = ids;
            continue;
        }

        match node.combinator() {
            Combinator::And => {
                let keep: HashSet<&str> = ids.iter().map(String::as_str).collect();
                result.retain(|id| keep.contains(id.as_str()));
            }
            Combinator::Or => {
                let seen: HashSet<String> = result.iter().cloned().collect();
                for id in ids {
                    if !seen.contains(&id) {
                        result.push(id);
                    }
                }
            }
        }
    }

    Ok(result)
}

/// Fetch documents by id in order, silently skipping ids whose files have
/// vanished since the index was written; the index heals on its next
/// rebuild.
fn fetch_existing(repo: &Repository, ids: &[String]) -> Result<Vec<Document>> {
    let mut documents = Vec::with_capacity(ids.len());
    for id in ids {
        match repo.find_by_id(id) {
            Ok(doc) => documents.push(doc),
            Err(ShelfDbError::NotFound { .. }) => {
                log::warn!("index references missing document {}/{id}", repo.name());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(documents)
}

/// In-memory AND/OR combination over documents.
///
/// Processed left to right: the first node always narrows; an AND leaf
/// filters the running set, an AND group recurses with the running set as
/// its candidates. An OR leaf or group evaluates against the *original*
/// candidate set -- not the AND-narrowed one -- and its matches are unioned
/// in with duplicate removal. The OR-re-scans-from-scratch rule surprises
/// SQL-trained eyes but is intentional; callers relying on SQL precedence
/// should use explicit groups.
fn filter<'a>(original: &[&'a Document], nodes: &[Node]) -> Vec<&'a Document> {
    if nodes.is_empty() {
        return Vec::new();
    }

    let mut result: Vec<&Document> = original.to_vec();

    for (position, node) in nodes.iter().enumerate() {
        let widen = position > 0 && node.combinator() == Combinator::Or;

        match node {
            Node::Leaf {
                field,
                operator,
                value,
                ..
            } => {
                if widen {
                    let matches = original
                        .iter()
                        .filter(|doc| matches_leaf(doc, field, node, value))
                        .copied();
                    merge(&mut result, matches);
                } else {
                    result.retain(|doc| matches_leaf(doc, field, node, value));
                }
            }
            Node::Group { nodes: sub, .. } => {
                if widen {
                    merge(&mut result, filter(original, sub).into_iter());
                } else {
                    result = filter(&result, sub);
                }
            }
        }
    }

    result
}

fn matches_leaf(doc: &Document, field: &str, node: &Node, value: &Value) -> bool {
    let Node::Leaf { operator, .. } = node else {
        return false;
    };
    // A field that does not resolve fails the leaf, whatever the operator.
    match doc.field(field) {
        Some(doc_value) => operator.matches(&doc_value, value),
        None => false,
    }
}

/// Union `additions` into `result`, keyed by document id, preserving
/// first-occurrence order.
fn merge<'a>(result: &mut Vec<&'a Document>, additions: impl Iterator<Item = &'a Document>) {
    let seen: HashSet<&str> = result.iter().map(|doc| doc.id()).collect();
    let mut fresh: Vec<&Document> = Vec::new();
    for doc in additions {
        if !seen.contains(doc.id()) && !fresh.iter().any(|d| d.id() == doc.id()) {
            fresh.push(doc);
        }
    }
    result.extend(fresh);
}

#[derive(Debug, Clone, PartialEq)]
struct OrderSpec {
    field: String,
    descending: bool,
}

/// Parse `"field"` / `"field ASC"` / `"field DESC"` specs. Anything other
/// than a trailing `DESC` means ascending. Blank specs are dropped.
fn parse_order_by(specs: &[String]) -> Vec<OrderSpec> {
    specs
        .iter()
        .filter_map(|spec| {
            let mut parts = spec.split_whitespace();
            let field = parts.next()?;
            Some(OrderSpec {
                field: field.to_string(),
                descending: parts.next() == Some("DESC"),
            })
        })
        .collect()
}

/// Stable multi-key sort: keys are evaluated in listed order and the first
/// non-equal comparison wins, so documents tied on every key keep their
/// pre-sort relative order.
fn sort_documents(documents: &mut [Document], specs: &[OrderSpec]) {
    documents.sort_by(|a, b| {
        for spec in specs {
            let ord = if spec.field == "id" || spec.field == "__id" {
                a.id().cmp(b.id())
            } else {
                let va = a.field(&spec.field).unwrap_or(Value::Null);
                let vb = b.field(&spec.field).unwrap_or(Value::Null);
                value::compare(&va, &vb)
            };
            let ord = if spec.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::index::IndexKind;
    use crate::query::Predicate;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn repo_with(docs: &[(&str, serde_json::Value)]) -> (TempDir, Repository) {
        let tmp = TempDir::new().unwrap();
        let config = Config::new(tmp.path());
        let repo = Repository::open("test", &config).unwrap();
        for (id, data) in docs {
            let mut doc = Document::from_value(data.clone()).unwrap();
            doc.set_id(id);
            repo.store(&mut doc).unwrap();
        }
        (tmp, repo)
    }

    fn seed() -> Vec<(&'static str, serde_json::Value)> {
        vec![
            ("gb", json!({"name": "United Kingdom", "region": "Europe", "population": 67, "langs": ["English"]})),
            ("fr", json!({"name": "France", "region": "Europe", "population": 68, "langs": ["French"]})),
            ("sm", json!({"name": "San Marino", "region": "Europe", "population": 0, "langs": ["Italian"]})),
            ("us", json!({"name": "United States", "region": "Americas", "population": 331, "langs": ["English"]})),
            ("br", json!({"name": "Brazil", "region": "Americas", "population": 214, "langs": ["Portuguese"]})),
        ]
    }

    fn ids(result: &ResultSet) -> Vec<&str> {
        result.iter().map(|d| d.id()).collect()
    }

    #[test]
    fn test_empty_predicate_returns_everything() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo.query().execute().unwrap();
        assert_eq!(result.count(), 5);
        assert_eq!(result.total(), 5);
    }

    #[test]
    fn test_single_equality() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .where_("name", "==", "France")
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(ids(&result), vec!["fr"]);
    }

    #[test]
    fn test_missing_field_fails_leaf() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .where_("does_not_exist", "==", "x")
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(result.total(), 0);
    }

    #[test]
    fn test_and_narrows() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .where_("region", "==", "Europe")
            .unwrap()
            .and_where("population", ">", 67)
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(ids(&result), vec!["fr"]);
    }

    #[test]
    fn test_or_re_expands_from_original_set() {
        // The documented property: where(x==1).andWhere(y==1).orWhere(x==2)
        // must return {A, C} because the OR branch re-scans the full set,
        // not the AND-narrowed one.
        let (_tmp, repo) = repo_with(&[
            ("A", json!({"x": 1, "y": 1})),
            ("B", json!({"x": 1, "y": 2})),
            ("C", json!({"x": 2, "y": 1})),
        ]);
        let result = repo
            .query()
            .where_("x", "==", 1)
            .unwrap()
            .and_where("y", "==", 1)
            .unwrap()
            .or_where("x", "==", 2)
            .unwrap()
            .execute()
            .unwrap();

        let mut matched = ids(&result);
        matched.sort_unstable();
        assert_eq!(matched, vec!["A", "C"]);
    }

    #[test]
    fn test_or_union_removes_duplicates() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .where_("region", "==", "Europe")
            .unwrap()
            .or_where("name", "==", "France")
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(result.total(), 3);
    }

    #[test]
    fn test_sub_group_narrows_with_inner_or() {
        let (_tmp, repo) = repo_with(&seed());
        let langs = Predicate::new()
            .where_("langs.0", "==", "Italian")
            .unwrap()
            .or_where("langs.0", "==", "English")
            .unwrap();
        let result = repo
            .query()
            .where_("region", "==", "Europe")
            .unwrap()
            .and_group(langs)
            .execute()
            .unwrap();

        let mut matched = ids(&result);
        matched.sort_unstable();
        assert_eq!(matched, vec!["gb", "sm"]);
    }

    #[test]
    fn test_empty_group_matches_nothing() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .where_("region", "==", "Europe")
            .unwrap()
            .and_group(Predicate::new())
            .execute()
            .unwrap();
        assert_eq!(result.total(), 0);
    }

    #[test]
    fn test_in_operator() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .where_("langs.0", "IN", json!(["Italian", "Portuguese"]))
            .unwrap()
            .execute()
            .unwrap();
        let mut matched = ids(&result);
        matched.sort_unstable();
        assert_eq!(matched, vec!["br", "sm"]);
    }

    #[test]
    fn test_contains_word_boundary_on_strings() {
        let (_tmp, repo) = repo_with(&[
            ("n", json!({"area": "Northern Europe"})),
            ("s", json!({"area": "Southern Europe"})),
        ]);
        let hit = repo
            .query()
            .where_("area", "CONTAINS", "Northern")
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(ids(&hit), vec!["n"]);

        let miss = repo
            .query()
            .where_("area", "CONTAINS", "orth")
            .unwrap()
            .execute()
            .unwrap();
        assert_eq!(miss.total(), 0);
    }

    #[test]
    fn test_contains_on_arrays() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .where_("langs", "CONTAINS", "English")
            .unwrap()
            .execute()
            .unwrap();
        let mut matched = ids(&result);
        matched.sort_unstable();
        assert_eq!(matched, vec!["gb", "us"]);
    }

    #[test]
    fn test_order_by_single_key() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .order_by("population DESC")
            .execute()
            .unwrap();
        assert_eq!(ids(&result), vec!["us", "br", "fr", "gb", "sm"]);
    }

    #[test]
    fn test_order_by_multi_key() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .order_by("region")
            .order_by("name DESC")
            .execute()
            .unwrap();
        assert_eq!(ids(&result), vec!["us", "br", "gb", "sm", "fr"]);
    }

    #[test]
    fn test_order_by_id() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo.query().order_by("__id").execute().unwrap();
        assert_eq!(ids(&result), vec!["br", "fr", "gb", "sm", "us"]);
    }

    #[test]
    fn test_sort_is_stable_for_ties() {
        let (_tmp, repo) = repo_with(&[
            ("a", json!({"group": 1, "seq": 1})),
            ("b", json!({"group": 2, "seq": 2})),
            ("c", json!({"group": 1, "seq": 3})),
            ("d", json!({"group": 1, "seq": 4})),
        ]);
        // Pre-sort order is alphabetical by file name (a, b, c, d); ties on
        // `group` must keep that order.
        let result = repo.query().order_by("group").execute().unwrap();
        assert_eq!(ids(&result), vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn test_missing_sort_key_sorts_first() {
        let (_tmp, repo) = repo_with(&[
            ("a", json!({"rank": 5})),
            ("b", json!({"other": 1})),
            ("c", json!({"rank": 1})),
        ]);
        let result = repo.query().order_by("rank").execute().unwrap();
        assert_eq!(ids(&result), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_pagination_slices_after_sort() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo
            .query()
            .order_by("population DESC")
            .limit(2, 1)
            .execute()
            .unwrap();
        assert_eq!(ids(&result), vec!["br", "fr"]);
        assert_eq!(result.total(), 5);
    }

    #[test]
    fn test_pagination_invariants() {
        let (_tmp, repo) = repo_with(&seed());
        for count in 0..7 {
            for offset in 0..7 {
                let result = repo.query().limit(count, offset).execute().unwrap();
                assert!(result.total() >= result.count());
                assert!(result.count() <= count);
            }
        }
    }

    #[test]
    fn test_pagination_offset_past_end() {
        let (_tmp, repo) = repo_with(&seed());
        let result = repo.query().limit(10, 100).execute().unwrap();
        assert_eq!(result.count(), 0);
        assert_eq!(result.total(), 5);
    }

    #[test]
    fn test_index_covered_query_equals_full_scan() {
        let tmp = TempDir::new().unwrap();
        let plain = Config::new(tmp.path());
        let indexed = Config::new(tmp.path()).with_index("region", IndexKind::Hash);

        let repo = Repository::open("countries", &plain).unwrap();
        for (id, data) in seed() {
            let mut doc = Document::from_value(data).unwrap();
            doc.set_id(id);
            repo.store(&mut doc).unwrap();
        }
        let repo_indexed = Repository::open("countries", &indexed).unwrap();

        for op in ["==", "===", "!=", "!=="] {
            let scan = repo
                .query()
                .where_("region", op, "Europe")
                .unwrap()
                .execute()
                .unwrap();
            let via_index = repo_indexed
                .query()
                .where_("region", op, "Europe")
                .unwrap()
                .execute()
                .unwrap();

            let mut scan_ids = ids(&scan);
            let mut index_ids = ids(&via_index);
            scan_ids.sort_unstable();
            index_ids.sort_unstable();
            assert_eq!(scan_ids, index_ids, "operator {op}");
        }
    }

    #[test]
    fn test_partially_covered_predicate_falls_back_to_scan() {
        let tmp = TempDir::new().unwrap();
        let config = Config::new(tmp.path()).with_index("region", IndexKind::Hash);
        let repo = Repository::open("countries", &config).unwrap();
        for (id, data) in seed() {
            let mut doc = Document::from_value(data).unwrap();
            doc.set_id(id);
            repo.store(&mut doc).unwrap();
        }

        // `population >` is not hash-servable, so the whole predicate must
        // fall back to the scan path and still produce correct results.
        let result = repo
            .query()
            .where_("region", "==", "Europe")
            .unwrap()
            .and_where("population", ">", 10)
            .unwrap()
            .execute()
            .unwrap();
        let mut matched = ids(&result);
        matched.sort_unstable();
        assert_eq!(matched, vec!["fr", "gb"]);
    }

    #[test]
    fn test_index_path_and_or_combination() {
        let tmp = TempDir::new().unwrap();
        let config = Config::new(tmp.path())
            .with_index("x", IndexKind::Hash)
            .with_index("y", IndexKind::Hash);
        let repo = Repository::open("points", &config).unwrap();
        for (id, data) in [
            ("A", json!({"x": 1, "y": 1})),
            ("B", json!({"x": 1, "y": 2})),
            ("C", json!({"x": 2, "y": 1})),
        ] {
            let mut doc = Document::from_value(data).unwrap();
            doc.set_id(id);
            repo.store(&mut doc).unwrap();
        }

        let result = repo
            .query()
            .where_("x", "==", 1)
            .unwrap()
            .and_where("y", "==", 1)
            .unwrap()
            .or_where("x", "==", 2)
            .unwrap()
            .execute()
            .unwrap();

        let mut matched = ids(&result);
        matched.sort_unstable();
        assert_eq!(matched, vec!["A", "C"]);
    }

    #[test]
    fn test_parse_order_by_specs() {
        let specs = parse_order_by(&[
            "name".to_string(),
            "age DESC".to_string(),
            "  ".to_string(),
        ]);
        assert_eq!(specs.len(), 2);
        assert!(!specs[0].descending);
        assert!(specs[1].descending);
        assert_eq!(specs[1].field, "age");
    }
}
