//! Agent actions.
//!
//! Agents edit a timeline by sending tagged JSON objects such as
//! `{"type": "add_clip", "name": "A", "url": "u1", "start": 0, "duration": 5}`.
//! They are decoded once, at the boundary, into [`AgentAction`]; a tag this
//! version does not know is rejected with
//! [`ReelSyncError::UnsupportedAction`] instead of being ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ReelSyncError, Result};
use crate::timeline::{Clip, ClipId, Timeline};

/// Highest track index an action may address. Missing tracks up to the index
/// are created, so this bounds how many one action can add.
pub const MAX_TRACK_INDEX: usize = 255;

/// A high-level edit requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    /// Append a clip to a track, creating the track if needed.
    AddClip(AddClip),
}

/// Payload of [`AgentAction::AddClip`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddClip {
    pub name: String,

    #[serde(alias = "media_url")]
    pub url: String,

    /// Offset into the source media, in seconds
    pub start: f64,

    /// Length in seconds
    pub duration: f64,

    /// Index of the target track
    #[serde(default, alias = "track_index")]
    pub track: usize,

    /// Stable id to give the clip; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ClipId>,
}

/// What an applied action changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub clip_id: ClipId,
    pub track: usize,
}

impl AgentAction {
    /// Tags this version understands.
    pub const SUPPORTED: &'static [&'static str] = &["add_clip"];

    /// Decode an action from a JSON value.
    ///
    /// An unknown `type` yields [`ReelSyncError::UnsupportedAction`]; a known
    /// type with missing or mistyped fields yields
    /// [`ReelSyncError::InvalidAction`].
    pub fn from_json(value: Value) -> Result<Self> {
        let tag = match value.get("type") {
            Some(Value::String(tag)) => tag.clone(),
            Some(_) => return Err(ReelSyncError::InvalidAction("'type' must be a string".into())),
            None => return Err(ReelSyncError::InvalidAction("missing 'type'".into())),
        };

        if !Self::SUPPORTED.contains(&tag.as_str()) {
            return Err(ReelSyncError::UnsupportedAction(tag));
        }

        serde_json::from_value(value).map_err(|e| ReelSyncError::InvalidAction(e.to_string()))
    }

    /// Decode an action from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ReelSyncError::InvalidAction(format!("not JSON: {}", e)))?;
        Self::from_json(value)
    }

    /// The action's tag, as it appears on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            AgentAction::AddClip(_) => "add_clip",
        }
    }

    /// Apply the action to a domain timeline.
    ///
    /// On error the timeline is left untouched.
    pub fn apply(&self, timeline: &mut Timeline) -> Result<ActionOutcome> {
        match self {
            AgentAction::AddClip(add) => add.apply(timeline),
        }
    }
}

impl AddClip {
    fn apply(&self, timeline: &mut Timeline) -> Result<ActionOutcome> {
        check_seconds("start", self.start)?;
        check_seconds("duration", self.duration)?;

        if self.track > MAX_TRACK_INDEX {
            return Err(ReelSyncError::InvalidAction(format!(
                "track {} is out of range (max {})",
                self.track, MAX_TRACK_INDEX
            )));
        }

        if let Some(id) = self.id
            && timeline.clip(id).is_some()
        {
            return Err(ReelSyncError::InvalidAction(format!(
                "clip {} already exists",
                id
            )));
        }

        let clip_id = self.id.unwrap_or_else(ClipId::generate);
        let clip = Clip::new(&self.name, &self.url, self.start, self.duration).with_id(clip_id);
        timeline.ensure_track(self.track).clips.push(clip);

        log::debug!(
            "Added clip '{}' ({}) to track {}",
            self.name,
            clip_id,
            self.track
        );

        Ok(ActionOutcome {
            clip_id,
            track: self.track,
        })
    }
}

fn check_seconds(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ReelSyncError::InvalidAction(format!(
            "'{}' must be a non-negative number of seconds, got {}",
            field, value
        )))
    }
}
