// Media metadata store and JSON sidecar persistence

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const SIDECAR_SUFFIX: &str = ".meta.json";

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetaKey {
    Title = 0,
    Artist = 1,
    Genre = 2,
    Copyright = 3,
    Album = 4,
    TrackNumber = 5,
    Description = 6,
    Rating = 7,
    Date = 8,
    Setting = 9,
    Url = 10,
    Language = 11,
    NowPlaying = 12,
    Publisher = 13,
    EncodedBy = 14,
    ArtworkUrl = 15,
    TrackId = 16,
    TrackTotal = 17,
    Director = 18,
    Season = 19,
    Episode = 20,
    ShowName = 21,
    Actors = 22,
    AlbumArtist = 23,
    DiscNumber = 24,
    DiscTotal = 25,
}

impl MetaKey {
    pub const ALL: [MetaKey; 26] = [
        MetaKey::Title,
        MetaKey::Artist,
        MetaKey::Genre,
        MetaKey::Copyright,
        MetaKey::Album,
        MetaKey::TrackNumber,
        MetaKey::Description,
        MetaKey::Rating,
        MetaKey::Date,
        MetaKey::Setting,
        MetaKey::Url,
        MetaKey::Language,
        MetaKey::NowPlaying,
        MetaKey::Publisher,
        MetaKey::EncodedBy,
        MetaKey::ArtworkUrl,
        MetaKey::TrackId,
        MetaKey::TrackTotal,
        MetaKey::Director,
        MetaKey::Season,
        MetaKey::Episode,
        MetaKey::ShowName,
        MetaKey::Actors,
        MetaKey::AlbumArtist,
        MetaKey::DiscNumber,
        MetaKey::DiscTotal,
    ];

    pub fn from_raw(raw: i32) -> Option<Self> {
        usize::try_from(raw).ok().and_then(|i| Self::ALL.get(i).copied())
    }
}

/// Key/value metadata of one media item.
///
/// Values set by the user win over tags found while parsing.
#[derive(Debug, Default)]
pub struct MetaStore {
    values: BTreeMap<MetaKey, String>,
    user_set: BTreeSet<MetaKey>,
}

impl MetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: MetaKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Set a value on behalf of the user; returns true if it changed
    pub fn set(&mut self, key: MetaKey, value: String) -> bool {
        self.user_set.insert(key);
        self.values.insert(key, value.clone()) != Some(value)
    }

    /// Merge tags discovered while parsing. Keys set by the user are kept.
    /// Returns the keys whose value changed.
    pub fn merge_parsed<I>(&mut self, tags: I) -> Vec<MetaKey>
    where
        I: IntoIterator<Item = (MetaKey, String)>,
    {
        let mut changed = Vec::new();
        for (key, value) in tags {
            if self.user_set.contains(&key) {
                continue;
            }
            if self.values.get(&key) != Some(&value) {
                self.values.insert(key, value);
                changed.push(key);
            }
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write every value to the sidecar next to `media_path`
    pub fn save(&self, media_path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.values)?;
        fs::write(sidecar_path(media_path), json)?;
        Ok(())
    }
}

pub fn sidecar_path(media_path: &Path) -> PathBuf {
    let mut name = media_path.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Read a previously saved sidecar; `Ok(None)` if there is none
pub fn load_sidecar(media_path: &Path) -> Result<Option<BTreeMap<MetaKey, String>>> {
    let path = sidecar_path(media_path);
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&text)?))
}
