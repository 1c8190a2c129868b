//! Domain model for an editing timeline.
//!
//! A [`Timeline`] is an ordered list of [`Track`]s, each holding an ordered
//! list of [`Clip`]s. These are plain values: the replicated representation
//! lives in [`crate::crdt::TimelineDoc`] and the two are translated by
//! [`crate::crdt::to_replicated`] and [`crate::crdt::from_replicated`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Frame rate used when a time value carries no rate of its own.
pub const DEFAULT_FRAME_RATE: f64 = 24.0;

/// Start offset (seconds) assigned to a clip stored without one.
pub const DEFAULT_CLIP_START_SECS: f64 = 0.0;

/// Duration (seconds) assigned to a clip stored without one.
pub const DEFAULT_CLIP_DURATION_SECS: f64 = 5.0;

/// Name given to a clip stored without one.
pub const DEFAULT_CLIP_NAME: &str = "Clip";

/// Name given to a timeline stored without one.
pub const DEFAULT_TIMELINE_NAME: &str = "Untitled Timeline";

/// Stable identity of a clip.
///
/// Assigned once when the clip first enters a replicated document and carried
/// through every merge, reorder and move afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(Uuid);

impl ClipId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ClipId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ClipId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A point or span in time expressed as `value` frames at `rate` frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RationalTime {
    pub value: f64,
    pub rate: f64,
}

impl RationalTime {
    pub fn new(value: f64, rate: f64) -> Self {
        Self { value, rate }
    }

    /// Convert seconds into frames at the given rate.
    pub fn from_seconds(seconds: f64, rate: f64) -> Self {
        Self {
            value: seconds * rate,
            rate,
        }
    }

    /// Length in seconds. A non-positive rate has no meaningful duration and yields zero.
    pub fn to_seconds(&self) -> f64 {
        if self.rate > 0.0 {
            self.value / self.rate
        } else {
            0.0
        }
    }
}

/// Kind of media a track carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum TrackKind {
    #[default]
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "Video",
            TrackKind::Audio => "Audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Video" | "video" => Ok(TrackKind::Video),
            "Audio" | "audio" => Ok(TrackKind::Audio),
            _ => Err(format!("Unknown track kind: {}", s)),
        }
    }
}

/// A single piece of media placed on a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Clip {
    /// Stable identity; `None` until the clip is first written to a document
    #[ts(type = "string | null")]
    pub stable_id: Option<ClipId>,

    pub name: String,

    pub media_url: String,

    /// Offset into the source media
    pub start: RationalTime,

    pub duration: RationalTime,
}

impl Clip {
    /// Create a clip from second offsets at the default frame rate.
    pub fn new(
        name: impl Into<String>,
        media_url: impl Into<String>,
        start_secs: f64,
        duration_secs: f64,
    ) -> Self {
        Self {
            stable_id: None,
            name: name.into(),
            media_url: media_url.into(),
            start: RationalTime::from_seconds(start_secs, DEFAULT_FRAME_RATE),
            duration: RationalTime::from_seconds(duration_secs, DEFAULT_FRAME_RATE),
        }
    }

    /// Attach an existing stable id.
    pub fn with_id(mut self, id: ClipId) -> Self {
        self.stable_id = Some(id);
        self
    }
}

/// An ordered lane of clips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Track {
    pub name: String,
    pub kind: TrackKind,
    pub clips: Vec<Clip>,
}

impl Track {
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            name: name.into(),
            kind,
            clips: Vec::new(),
        }
    }

    /// The track created when position `index` is needed but missing: `Track {index}`, video.
    pub fn default_for_index(index: usize) -> Self {
        Self::new(format!("Track {}", index), TrackKind::Video)
    }
}

/// The complete editing timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Timeline {
    pub name: String,
    pub tracks: Vec<Track>,
}

impl Timeline {
    /// An empty timeline with no tracks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracks: Vec::new(),
        }
    }

    /// A timeline holding the single default track new projects start with.
    pub fn with_default_track(name: impl Into<String>) -> Self {
        let mut timeline = Self::new(name);
        timeline.tracks.push(Track::default_for_index(0));
        timeline
    }

    /// Get the track at `index`, appending default tracks until it exists.
    pub fn ensure_track(&mut self, index: usize) -> &mut Track {
        while self.tracks.len() <= index {
            let next = self.tracks.len();
            self.tracks.push(Track::default_for_index(next));
        }
        &mut self.tracks[index]
    }

    /// Find a clip by stable id across all tracks.
    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips().find(|clip| clip.stable_id == Some(id))
    }

    /// Iterate over every clip in track order.
    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.tracks.iter().flat_map(|track| track.clips.iter())
    }

    pub fn clip_count(&self) -> usize {
        self.tracks.iter().map(|track| track.clips.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_time_seconds() {
        let time = RationalTime::from_seconds(2.5, 24.0);
        assert_eq!(time.value, 60.0);
        assert_eq!(time.to_seconds(), 2.5);
        assert_eq!(RationalTime::new(10.0, 0.0).to_seconds(), 0.0);
    }

    #[test]
    fn test_track_kind_parse() {
        assert_eq!("Audio".parse::<TrackKind>().unwrap(), TrackKind::Audio);
        assert_eq!("video".parse::<TrackKind>().unwrap(), TrackKind::Video);
        assert!("subtitle".parse::<TrackKind>().is_err());
        assert_eq!(TrackKind::Audio.to_string(), "Audio");
    }

    #[test]
    fn test_ensure_track_creates_missing_tracks() {
        let mut timeline = Timeline::with_default_track("Demo");
        timeline.ensure_track(2).clips.push(Clip::new("A", "u1", 0.0, 1.0));

        assert_eq!(timeline.tracks.len(), 3);
        assert_eq!(timeline.tracks[1].name, "Track 1");
        assert_eq!(timeline.tracks[2].kind, TrackKind::Video);
        assert_eq!(timeline.clip_count(), 1);
    }

    #[test]
    fn test_clip_lookup_by_id() {
        let id = ClipId::generate();
        let mut timeline = Timeline::with_default_track("Demo");
        timeline.tracks[0]
            .clips
            .push(Clip::new("A", "u1", 0.0, 1.0).with_id(id));

        assert_eq!(timeline.clip(id).map(|c| c.name.as_str()), Some("A"));
        assert!(timeline.clip(ClipId::generate()).is_none());
    }

    #[test]
    fn test_clip_id_parse_roundtrip() {
        let id = ClipId::generate();
        let parsed: ClipId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("clip-123".parse::<ClipId>().is_err());
    }
}
