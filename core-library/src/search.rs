//! # Full-Text Search
//!
//! Two independent FTS5 indexes: `path_entries_fts` over catalog entry names
//! and relative paths, and `songs_fts` over song artist, title, album and
//! album artist. Index rows share the rowid of the row they describe, are
//! written in the same transaction as that row, and can be re-derived at any
//! time with [`SearchIndex::rebuild`].
//!
//! ## Query syntax
//!
//! Whitespace separates clauses; clauses are ANDed. A bare word matches as a
//! prefix anywhere in the indexed text. `field:"value"` restricts a clause to
//! one column (`name`, `relative_path` for paths; `artist`, `title`, `album`,
//! `album_artist` for songs). Unknown fields are searched as plain text.
//!
//! ```rust,ignore
//! let page = index
//!     .query(SearchScope::Songs, "love artist:\"the beat\"", 20, 0)
//!     .await?;
//! ```
//!
//! Results are ranked by `bm25` with the row id as tie-break, so a fixed
//! corpus always returns the same order.

use crate::error::Result;
use crate::models::{PathEntry, Song};
use crate::store::WriteGate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use tracing::{debug, instrument};

/// Which index a query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Paths,
    Songs,
}

impl SearchScope {
    fn table(&self) -> &'static str {
        match self {
            SearchScope::Paths => "path_entries_fts",
            SearchScope::Songs => "songs_fts",
        }
    }

    fn columns(&self) -> &'static [&'static str] {
        match self {
            SearchScope::Paths => &["name", "relative_path"],
            SearchScope::Songs => &["artist", "title", "album", "album_artist"],
        }
    }
}

/// Column of an index usable in a `field:"value"` clause
pub trait IndexField: Copy {
    fn column(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathField {
    Name,
    RelativePath,
}

impl IndexField for PathField {
    fn column(&self) -> &'static str {
        match self {
            PathField::Name => "name",
            PathField::RelativePath => "relative_path",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SongField {
    Artist,
    Title,
    Album,
    AlbumArtist,
}

impl IndexField for SongField {
    fn column(&self) -> &'static str {
        match self {
            SongField::Artist => "artist",
            SongField::Title => "title",
            SongField::Album => "album",
            SongField::AlbumArtist => "album_artist",
        }
    }
}

/// Builder composing query text from clauses
///
/// ```
/// use core_library::search::{SearchQuery, SongField};
///
/// let query = SearchQuery::text("love").field(SongField::Artist, "The Beat");
/// assert_eq!(query.to_string(), "love artist:\"The Beat\"");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    clauses: Vec<String>,
}

impl SearchQuery {
    pub fn text(text: impl AsRef<str>) -> Self {
        Self::default().and_text(text)
    }

    pub fn and_text(mut self, text: impl AsRef<str>) -> Self {
        let text = text.as_ref().trim();
        if !text.is_empty() {
            self.clauses.push(text.to_string());
        }
        self
    }

    pub fn field(mut self, field: impl IndexField, value: impl AsRef<str>) -> Self {
        let value = value.as_ref().replace('"', " ");
        let value = value.trim();
        if !value.is_empty() {
            self.clauses.push(format!("{}:\"{}\"", field.column(), value));
        }
        self
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clauses.join(" "))
    }
}

/// Split user text into clauses; whitespace inside double quotes is kept.
fn split_clauses(text: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in text.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                current.push(ch);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    clauses.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        clauses.push(current);
    }
    clauses
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Quoted FTS5 string with a prefix marker, or `None` when nothing
/// searchable remains.
fn prefix_phrase(value: &str) -> Option<String> {
    let value = value.trim();
    if !value.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(format!("\"{}\"*", value.replace('"', "\"\"")))
}

/// Translate user query text into an FTS5 match expression for `scope`.
///
/// Every clause becomes a quoted prefix phrase, so user input can never
/// inject FTS5 operators. Returns an empty string for a query with no
/// searchable terms.
pub fn compose_match_expression(scope: SearchScope, text: &str) -> String {
    split_clauses(text)
        .iter()
        .filter_map(|clause| {
            if let Some((field, value)) = clause.split_once(':') {
                let column = field.to_lowercase();
                if let Some(column) = scope.columns().iter().find(|c| **c == column) {
                    return prefix_phrase(unquote(value))
                        .map(|phrase| format!("{column}:{phrase}"));
                }
            }
            prefix_phrase(unquote(clause))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One ranked result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SearchHit {
    Path { entry: PathEntry, score: f64 },
    Song { song: Song, score: f64 },
}

impl SearchHit {
    pub fn score(&self) -> f64 {
        match self {
            SearchHit::Path { score, .. } | SearchHit::Song { score, .. } => *score,
        }
    }

    pub fn row_id(&self) -> i64 {
        match self {
            SearchHit::Path { entry, .. } => entry.id,
            SearchHit::Song { song, .. } => song.id,
        }
    }
}

/// One page of ranked results and the size of the full match set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub total: u64,
}

#[derive(FromRow)]
struct ScoredPath {
    #[sqlx(flatten)]
    entry: PathEntry,
    score: f64,
}

#[derive(FromRow)]
struct ScoredSong {
    #[sqlx(flatten)]
    song: Song,
    score: f64,
}

/// Ranked search over both indexes
#[derive(Clone)]
pub struct SearchIndex {
    gate: WriteGate,
}

impl SearchIndex {
    pub fn new(gate: WriteGate) -> Self {
        Self { gate }
    }

    /// Ranked results for `text` in `scope`
    ///
    /// Reads never wait on the writer; an in-progress sync batch is simply
    /// not visible until it commits.
    #[instrument(skip(self))]
    pub async fn query(
        &self,
        scope: SearchScope,
        text: &str,
        limit: u32,
        offset: u32,
    ) -> Result<SearchPage> {
        let expression = compose_match_expression(scope, text);
        if expression.is_empty() || limit == 0 {
            return Ok(SearchPage::default());
        }
        debug!(%expression, "Running search");

        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {table} WHERE {table} MATCH ?",
            table = scope.table()
        ))
        .bind(&expression)
        .fetch_one(self.gate.pool())
        .await?;

        let hits = match scope {
            SearchScope::Paths => sqlx::query_as::<_, ScoredPath>(
                r#"
                SELECT p.*, bm25(path_entries_fts, 2.0, 1.0) AS score
                FROM path_entries_fts
                JOIN path_entries p ON p.id = path_entries_fts.rowid
                WHERE path_entries_fts MATCH ?
                ORDER BY score ASC, p.id ASC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(&expression)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.gate.pool())
            .await?
            .into_iter()
            .map(|row| SearchHit::Path {
                entry: row.entry,
                score: row.score,
            })
            .collect(),
            SearchScope::Songs => sqlx::query_as::<_, ScoredSong>(
                r#"
                SELECT s.*, bm25(songs_fts, 2.0, 3.0, 1.5, 1.0) AS score
                FROM songs_fts
                JOIN songs s ON s.id = songs_fts.rowid
                WHERE songs_fts MATCH ?
                ORDER BY score ASC, s.id ASC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(&expression)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.gate.pool())
            .await?
            .into_iter()
            .map(|row| SearchHit::Song {
                song: row.song,
                score: row.score,
            })
            .collect(),
        };

        Ok(SearchPage {
            hits,
            total: total as u64,
        })
    }

    /// Re-derive an index entirely from its source table
    ///
    /// Returns the number of indexed rows.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, scope: SearchScope) -> Result<u64> {
        let mut tx = self.gate.begin().await?;

        sqlx::query(&format!("DELETE FROM {}", scope.table()))
            .execute(tx.conn())
            .await?;

        let insert = match scope {
            SearchScope::Paths => {
                "INSERT INTO path_entries_fts (rowid, name, relative_path)
                 SELECT id, name, relative_path FROM path_entries"
            }
            SearchScope::Songs => {
                "INSERT INTO songs_fts (rowid, artist, title, album, album_artist)
                 SELECT id, artist, title, album, COALESCE(album_artist, '') FROM songs"
            }
        };
        let indexed = sqlx::query(insert).execute(tx.conn()).await?.rows_affected();
        tx.commit().await?;

        debug!(indexed, "Search index rebuilt");
        Ok(indexed)
    }

    /// Merge index segments left behind by incremental batches
    pub async fn merge(&self, scope: SearchScope) -> Result<()> {
        let mut tx = self.gate.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO {table} ({table}, rank) VALUES ('merge', 500)",
            table = scope.table()
        ))
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{LocalCopyState, SongDraft, Source};
    use crate::repositories::{
        CatalogBatch, PathCatalog, SongRepository, SourceRepository, SqlitePathCatalog,
        SqliteSongRepository, SqliteSourceRepository,
    };
    use std::path::Path;

    #[test]
    fn test_compose_free_text() {
        assert_eq!(
            compose_match_expression(SearchScope::Paths, "  song   one "),
            "\"song\"* \"one\"*"
        );
        assert_eq!(compose_match_expression(SearchScope::Paths, "   "), "");
        assert_eq!(compose_match_expression(SearchScope::Songs, "- * ( )"), "");
    }

    #[test]
    fn test_compose_field_clauses() {
        assert_eq!(
            compose_match_expression(SearchScope::Songs, "love Artist:\"The Beat\""),
            "\"love\"* artist:\"The Beat\"*"
        );
        assert_eq!(
            compose_match_expression(SearchScope::Paths, "name:song"),
            "name:\"song\"*"
        );
        // Columns of the other index are plain text.
        assert_eq!(
            compose_match_expression(SearchScope::Paths, "artist:abba"),
            "\"artist:abba\"*"
        );
    }

    #[test]
    fn test_compose_escapes_quotes() {
        assert_eq!(
            compose_match_expression(SearchScope::Songs, "it\"s"),
            "\"it\"\"s\"*"
        );
    }

    #[test]
    fn test_query_builder() {
        let query = SearchQuery::text("remix")
            .field(SongField::Album, "Greatest \"Hits\"")
            .field(SongField::Artist, "   ");
        assert_eq!(query.to_string(), "remix album:\"Greatest  Hits\"");
        assert_eq!(
            SearchQuery::default()
                .field(PathField::Name, "a")
                .to_string(),
            "name:\"a\""
        );
    }

    struct Fixture {
        index: SearchIndex,
        gate: WriteGate,
    }

    async fn setup() -> Fixture {
        let gate = WriteGate::new(create_test_pool().await.unwrap());
        let sources = SqliteSourceRepository::new(gate.clone());
        let source = Source::new(Path::new("/music"), "owner", 1);
        sources.insert(&source).await.unwrap();

        let mut batch = CatalogBatch::new(&source.id, 1);
        for (rel, dir) in [
            ("A", true),
            ("A/song1.mp3", false),
            ("B", true),
            ("B/song2.mp3", false),
            ("B/notes.txt", false),
        ] {
            batch.entries.push(
                PathEntry::observed(
                    &source.id,
                    source.root(),
                    &source.root().join(rel),
                    dir,
                    None,
                    1,
                )
                .unwrap(),
            );
        }
        SqlitePathCatalog::new(gate.clone())
            .apply_batch(&batch)
            .await
            .unwrap();

        let songs = SqliteSongRepository::new(gate.clone());
        for (i, (artist, title, album)) in [
            ("The Beat", "Mirror in the Bathroom", "I Just Can't Stop It"),
            ("Beat Happening", "Indian Summer", "Jamboree"),
            ("Björk", "Jóga", "Homogenic"),
        ]
        .into_iter()
        .enumerate()
        {
            songs
                .upsert(
                    &SongDraft {
                        dedupe_key: format!("key-{i}"),
                        artist: artist.to_string(),
                        title: title.to_string(),
                        album: album.to_string(),
                        album_artist: None,
                        year: None,
                        disc_number: None,
                        track_number: None,
                        cover_art_ref: None,
                        handle_key: format!("h{i}"),
                        source_location: format!("/music/{i}.mp3"),
                        origin_path_hash: format!("o{i}"),
                    },
                    LocalCopyState::ReferenceOnly,
                    1,
                )
                .await
                .unwrap();
        }

        Fixture {
            index: SearchIndex::new(gate.clone()),
            gate,
        }
    }

    fn names(page: &SearchPage) -> Vec<String> {
        page.hits
            .iter()
            .map(|hit| match hit {
                SearchHit::Path { entry, .. } => entry.name.clone(),
                SearchHit::Song { song, .. } => song.title.clone(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_path_prefix_search() {
        let f = setup().await;
        let page = f.index.query(SearchScope::Paths, "son", 10, 0).await.unwrap();
        assert_eq!(page.total, 2);
        let mut found = names(&page);
        found.sort();
        assert_eq!(found, vec!["song1.mp3", "song2.mp3"]);
    }

    #[tokio::test]
    async fn test_song_field_filter() {
        let f = setup().await;

        let page = f
            .index
            .query(SearchScope::Songs, "beat", 10, 0)
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let query = SearchQuery::default().field(SongField::Artist, "the beat");
        let page = f
            .index
            .query(SearchScope::Songs, &query.to_string(), 10, 0)
            .await
            .unwrap();
        assert_eq!(names(&page), vec!["Mirror in the Bathroom"]);

        let page = f
            .index
            .query(SearchScope::Songs, "bjork joga", 10, 0)
            .await
            .unwrap();
        assert_eq!(names(&page), vec!["Jóga"], "diacritics are folded");
    }

    #[tokio::test]
    async fn test_ranking_is_deterministic() {
        let f = setup().await;
        let first = f.index.query(SearchScope::Paths, "b", 10, 0).await.unwrap();
        for _ in 0..5 {
            let again = f.index.query(SearchScope::Paths, "b", 10, 0).await.unwrap();
            assert_eq!(first, again);
        }
        assert!(first
            .hits
            .windows(2)
            .all(|w| w[0].score() < w[1].score()
                || (w[0].score() == w[1].score() && w[0].row_id() < w[1].row_id())));
    }

    #[tokio::test]
    async fn test_pagination_total_matches_full_set() {
        let f = setup().await;
        let all = f.index.query(SearchScope::Paths, "mp3", 10, 0).await.unwrap();
        let first = f.index.query(SearchScope::Paths, "mp3", 1, 0).await.unwrap();
        let second = f.index.query(SearchScope::Paths, "mp3", 1, 1).await.unwrap();

        assert_eq!(first.total, all.total);
        assert_eq!(first.hits.len(), 1);
        assert_eq!(first.hits[0], all.hits[0]);
        assert_eq!(second.hits[0], all.hits[1]);
    }

    #[tokio::test]
    async fn test_operator_input_is_harmless() {
        let f = setup().await;
        for text in ["NEAR(", "\"", "a OR", "* AND -", "title:"] {
            assert!(f.index.query(SearchScope::Songs, text, 10, 0).await.is_ok());
        }
        let empty = f.index.query(SearchScope::Songs, "", 10, 0).await.unwrap();
        assert_eq!(empty, SearchPage::default());
    }

    #[tokio::test]
    async fn test_rebuild_restores_index() {
        let f = setup().await;
        sqlx::query("DELETE FROM songs_fts")
            .execute(f.gate.pool())
            .await
            .unwrap();
        let gone = f.index.query(SearchScope::Songs, "beat", 10, 0).await.unwrap();
        assert_eq!(gone.total, 0);

        assert_eq!(f.index.rebuild(SearchScope::Songs).await.unwrap(), 3);
        let back = f.index.query(SearchScope::Songs, "beat", 10, 0).await.unwrap();
        assert_eq!(back.total, 2);

        assert_eq!(f.index.rebuild(SearchScope::Paths).await.unwrap(), 5);
        f.index.merge(SearchScope::Paths).await.unwrap();
    }
}
