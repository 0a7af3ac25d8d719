//! Audio Tag Extraction
//!
//! Reads common tags (artist, title, album, album artist, year, track, disc)
//! and the embedded cover picture with `lofty`. Supports ID3v2, Vorbis
//! Comments, MP4 and APE tags and RIFF INFO.
//!
//! Extraction never fails because of tag content: a file without tags, in
//! an unknown format or with corrupt tags yields filename-based metadata.
//! Missing titles fall back to the file's base name and missing artists to
//! [`UNKNOWN_ARTIST`].
//!
//! ```ignore
//! let extractor = MetadataExtractor::new();
//! let tags = extractor.extract(bytes, Path::new("/music/A/song1.mp3")).await?;
//! assert_eq!(tags.title, "song1");
//! ```

use bytes::Bytes;
use lofty::config::ParseOptions;
use lofty::error::LoftyError;
use lofty::file::TaggedFileExt;
use lofty::picture::PictureType;
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;

/// Artist recorded when a file carries no artist tag
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Tags read from one audio file, fallbacks applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    /// Empty when the file has no album tag
    pub album: String,
    pub album_artist: Option<String>,
    pub year: Option<i32>,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    /// Front cover, or the first embedded picture
    pub cover: Option<Bytes>,
    /// `false` when every field came from fallbacks
    pub from_tags: bool,
}

impl TrackTags {
    /// Metadata derived from the file name alone
    pub fn from_file_name(location: &Path) -> Self {
        Self {
            title: file_stem(location),
            artist: UNKNOWN_ARTIST.to_string(),
            album: String::new(),
            album_artist: None,
            year: None,
            track_number: None,
            disc_number: None,
            cover: None,
            from_tags: false,
        }
    }
}

fn file_stem(location: &Path) -> String {
    location
        .file_stem()
        .map(|s| normalize_text(&s.to_string_lossy()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Collapse whitespace and drop control characters
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| normalize_text(&t)).filter(|t| !t.is_empty())
}

fn positive(number: Option<u32>) -> Option<i32> {
    number
        .filter(|n| *n > 0)
        .and_then(|n| i32::try_from(n).ok())
}

/// Audio metadata extractor
pub struct MetadataExtractor {
    parse_options: ParseOptions,
}

impl MetadataExtractor {
    pub fn new() -> Self {
        Self {
            parse_options: ParseOptions::new(),
        }
    }

    /// Extract tags from the bytes of the file at `location`
    ///
    /// Parsing runs on the blocking pool.
    ///
    /// # Errors
    /// Only if the blocking task itself fails; unreadable tags fall back to
    /// filename metadata.
    pub async fn extract(&self, data: Bytes, location: &Path) -> Result<TrackTags> {
        let options = self.parse_options;
        let location = location.to_path_buf();

        Ok(tokio::task::spawn_blocking(move || Self::parse(data, options, &location)).await?)
    }

    fn parse(data: Bytes, options: ParseOptions, location: &Path) -> TrackTags {
        let probed = Probe::new(std::io::Cursor::new(data.as_ref()))
            .options(options)
            .guess_file_type()
            .map_err(LoftyError::from)
            .and_then(|probe| probe.read());

        let tagged_file = match probed {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    file = %location.display(),
                    error = %e,
                    "Unreadable audio tags, using file name"
                );
                return TrackTags::from_file_name(location);
            }
        };

        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            debug!(file = %location.display(), "No tags found, using file name");
            return TrackTags::from_file_name(location);
        };

        Self::from_tag(tag, location)
    }

    fn from_tag(tag: &Tag, location: &Path) -> TrackTags {
        let title = non_empty(tag.title().map(|s| s.into_owned()));
        let artist = non_empty(tag.artist().map(|s| s.into_owned()));
        let album = non_empty(tag.album().map(|s| s.into_owned()));
        let album_artist = non_empty(tag.get_string(&ItemKey::AlbumArtist).map(str::to_string));

        let from_tags = title.is_some() || artist.is_some() || album.is_some();

        TrackTags {
            title: title.unwrap_or_else(|| file_stem(location)),
            artist: artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            album: album.unwrap_or_default(),
            album_artist,
            year: positive(tag.year()),
            track_number: positive(tag.track()),
            disc_number: positive(tag.disk()),
            cover: Self::cover(tag),
            from_tags,
        }
    }

    fn cover(tag: &Tag) -> Option<Bytes> {
        let pictures = tag.pictures();
        pictures
            .iter()
            .find(|p| p.pic_type() == PictureType::CoverFront)
            .or_else(|| pictures.first())
            .map(|p| Bytes::copy_from_slice(p.data()))
            .filter(|data| !data.is_empty())
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}
