//! Search queries of the form `words tag:Name datemin:2021-05-01 datemax:2021-06-01`.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::app::{Result, TickerError};
use crate::domain::Item;
use crate::store::SqliteStore;

const DATE_FORMAT: &str = "%Y-%m-%d";

static META_PAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+):(.+)$").expect("meta pattern is valid"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub terms: Vec<String>,
    pub tags: Vec<String>,
    pub date_begin: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
}

impl SearchQuery {
    /// Parses a query string. Double quotes group words into one term.
    /// Unknown `key:value` tokens are ignored.
    pub fn parse(s: &str) -> Result<Self> {
        let tokens =
            shlex::split(s).ok_or_else(|| TickerError::Query(format!("Unbalanced quotes in {:?}", s)))?;

        let mut q = SearchQuery::default();
        for token in tokens {
            let Some(caps) = META_PAT.captures(&token) else {
                q.terms.push(token);
                continue;
            };
            let value = &caps[2];
            match caps[1].to_lowercase().as_str() {
                "tag" => q.tags.push(value.to_string()),
                "datemin" => q.date_begin = Some(parse_date(value)?),
                "datemax" => q.date_end = Some(parse_date(value)?),
                _ => warn!("Unknown search keyword in {:?} will be ignored", token),
            }
        }

        q.terms.sort();
        q.tags.sort();
        Ok(q)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.tags.is_empty()
    }

    /// The terms as an FTS5 match expression. Every term is quoted, so
    /// operators in the input have no special meaning.
    fn fts_expression(&self) -> String {
        self.terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn in_range(&self, item: &Item) -> bool {
        self.date_begin.is_none_or(|b| item.timestamp > b)
            && self.date_end.is_none_or(|e| item.timestamp < e)
    }

    /// Runs the query. Results are ordered newest first.
    pub fn execute(&self, db: &SqliteStore) -> Result<Vec<Item>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let mut tag_ids = Vec::with_capacity(self.tags.len());
        for name in &self.tags {
            match db.tag_get_by_name(name)? {
                Some(tag) => tag_ids.push(tag.id),
                None => {
                    debug!("Unknown tag {:?} in search query", name);
                    return Ok(Vec::new());
                }
            }
        }

        let mut items = if self.terms.is_empty() {
            let mut seen = HashSet::new();
            db.item_get_by_tag(tag_ids[0])?
                .into_iter()
                .filter(|item| seen.insert(item.id))
                .filter(|item| tag_ids.iter().all(|t| item.has_tag(*t)))
                .filter(|item| self.in_range(item))
                .collect()
        } else {
            db.item_get_search_extended(
                &self.fts_expression(),
                &tag_ids,
                self.date_begin,
                self.date_end,
            )?
        };

        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(items)
    }
}

/// Midnight of `s` in local time.
fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| TickerError::Query(format!("Cannot parse date {:?}: {}", s, e)))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| TickerError::Query(format!("Invalid date {:?}", s)))?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| TickerError::Query(format!("Date {:?} does not exist in local time", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Feed, Tag};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    #[test]
    fn test_parse_terms_and_tags() {
        let q = SearchQuery::parse("sqlite regex tag:Database tag:Programming").unwrap();
        assert_eq!(q.terms, vec!["regex", "sqlite"]);
        assert_eq!(q.tags, vec!["Database", "Programming"]);
        assert!(q.date_begin.is_none());
        assert!(q.date_end.is_none());
    }

    #[test]
    fn test_parse_sorts_and_keeps_duplicates() {
        let q = SearchQuery::parse("something and something else").unwrap();
        assert_eq!(q.terms, vec!["and", "else", "something", "something"]);
    }

    #[test]
    fn test_parse_phrases_and_dates() {
        let q = SearchQuery::parse(r#""query planner" tag:"Data Bases" datemin:2021-05-01 datemax:2021-06-01 color:red"#)
            .unwrap();
        assert_eq!(q.terms, vec!["query planner"]);
        assert_eq!(q.tags, vec!["Data Bases"]);
        assert_eq!(q.date_begin, Some(parse_date("2021-05-01").unwrap()));
        assert_eq!(
            q.date_end.unwrap() - q.date_begin.unwrap(),
            ChronoDuration::days(31)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(SearchQuery::parse("datemin:yesterday"), Err(TickerError::Query(_))));
        assert!(matches!(SearchQuery::parse(r#""unbalanced"#), Err(TickerError::Query(_))));
    }

    #[test]
    fn test_equality() {
        let a = SearchQuery::parse("b a tag:Y tag:X").unwrap();
        let b = SearchQuery::parse("tag:X a tag:Y b").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, SearchQuery::parse("a b tag:X").unwrap());
    }

    fn populate() -> (SqliteStore, Vec<Item>) {
        let mut db = SqliteStore::in_memory().unwrap();
        let mut feed = Feed::new("F", "https://example.com/feed", Duration::from_secs(900));
        db.feed_add(&mut feed).unwrap();
        let mut database = Tag::new("Database");
        let mut programming = Tag::new("Programming");
        db.tag_create(&mut database).unwrap();
        db.tag_create(&mut programming).unwrap();

        let base = Utc.with_ymd_and_hms(2021, 5, 10, 12, 0, 0).unwrap();
        let docs = [
            ("SQLite regex extension", "Using regex in sqlite queries", 0, vec![database.id, programming.id]),
            ("Postgres tuning", "Vacuum and sqlite comparisons", 1, vec![database.id]),
            ("Regex engines", "Backtracking regex and automata", 2, vec![programming.id]),
            ("Gardening", "Tomatoes need sun", 3, vec![]),
        ];
        let mut items = Vec::new();
        for (n, (title, body, days, tags)) in docs.into_iter().enumerate() {
            let mut it = Item::new(feed.id, format!("https://example.com/{}", n), title);
            it.description = body.to_string();
            it.timestamp = base + ChronoDuration::days(days);
            db.item_add(&mut it).unwrap();
            for t in tags {
                db.tag_link_add(t, it.id).unwrap();
            }
            items.push(it);
        }
        (db, items)
    }

    fn ids(items: &[Item]) -> Vec<i64> {
        items.iter().map(|i| i.id).collect()
    }

    #[test]
    fn test_execute_terms() {
        let (db, items) = populate();
        let res = SearchQuery::parse("regex").unwrap().execute(&db).unwrap();
        assert_eq!(ids(&res), vec![items[2].id, items[0].id]);

        let res = SearchQuery::parse("sqlite regex").unwrap().execute(&db).unwrap();
        assert_eq!(ids(&res), vec![items[0].id]);
    }

    #[test]
    fn test_execute_with_tags() {
        let (db, items) = populate();
        let res = SearchQuery::parse("sqlite tag:Database").unwrap().execute(&db).unwrap();
        assert_eq!(ids(&res), vec![items[1].id, items[0].id]);

        let res = SearchQuery::parse("sqlite regex tag:Database tag:Programming")
            .unwrap()
            .execute(&db)
            .unwrap();
        assert_eq!(ids(&res), vec![items[0].id]);

        let res = SearchQuery::parse("tag:Database tag:Programming").unwrap().execute(&db).unwrap();
        assert_eq!(ids(&res), vec![items[0].id]);

        let res = SearchQuery::parse("tag:Programming").unwrap().execute(&db).unwrap();
        assert_eq!(ids(&res), vec![items[2].id, items[0].id]);

        assert!(SearchQuery::parse("sqlite tag:Nope").unwrap().execute(&db).unwrap().is_empty());
    }

    #[test]
    fn test_execute_date_range_is_strict() {
        let (db, items) = populate();
        let mut q = SearchQuery::parse("regex").unwrap();
        q.date_begin = Some(items[0].timestamp);
        assert_eq!(ids(&q.execute(&db).unwrap()), vec![items[2].id]);

        q.date_begin = None;
        q.date_end = Some(items[2].timestamp);
        assert_eq!(ids(&q.execute(&db).unwrap()), vec![items[0].id]);
    }

    #[test]
    fn test_execute_empty_query() {
        let (db, _) = populate();
        assert!(SearchQuery::default().execute(&db).unwrap().is_empty());
    }
}
