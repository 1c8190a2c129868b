//! Translation between the [`Timeline`] domain model and a [`TimelineDoc`].
//!
//! [`to_replicated`] reconciles the document towards a timeline with the
//! smallest set of replicated operations it can find, so that concurrent
//! writers touching different clips do not clobber one another.
//! [`from_replicated`] reads a snapshot back out without mutating anything.
//!
//! Values missing from the document are filled from the defaults in
//! [`crate::timeline`]: start `0 s`, duration
//! [`DEFAULT_CLIP_DURATION_SECS`], rate [`DEFAULT_FRAME_RATE`], track name
//! `Track {index}`, kind `Video`, clip name [`DEFAULT_CLIP_NAME`] and timeline
//! name [`DEFAULT_TIMELINE_NAME`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use yrs::{Any, Array, ArrayPrelim, ArrayRef, Map, MapPrelim, MapRef, Out, ReadTxn, TransactionMut};

use super::timeline_doc::TimelineDoc;
use crate::timeline::{
    Clip, ClipId, DEFAULT_CLIP_DURATION_SECS, DEFAULT_CLIP_NAME, DEFAULT_CLIP_START_SECS,
    DEFAULT_FRAME_RATE, DEFAULT_TIMELINE_NAME, RationalTime, Timeline, Track, TrackKind,
};

/// Key holding a clip's stable id.
pub const KEY_ID: &str = "id";
/// Key holding the display name of a timeline, track or clip.
pub const KEY_NAME: &str = "name";
pub const KEY_KIND: &str = "kind";
pub const KEY_CLIPS: &str = "clips";
pub const KEY_MEDIA_URL: &str = "media_url";
pub const KEY_START: &str = "start";
pub const KEY_DURATION: &str = "duration";

const TIME_VALUE: &str = "value";
const TIME_RATE: &str = "rate";

/// Write `timeline` into `doc` inside one transaction.
///
/// Clips without a stable id, and clips repeating an id already used earlier
/// in the timeline, are given fresh ids. The ids are written back into
/// `timeline` so the caller can keep referring to the same clips.
///
/// Returns the update carrying the changes, or `None` if the document
/// already matched the timeline.
pub fn to_replicated(timeline: &mut Timeline, doc: &TimelineDoc) -> Option<Vec<u8>> {
    assign_stable_ids(timeline);

    let tracks = doc.tracks().clone();
    let meta = doc.meta().clone();

    let (changed, update) = doc.transact_tracking(|txn| {
        let mut changed = write_string(txn, &meta, KEY_NAME, &timeline.name);
        changed |= reconcile_tracks(txn, &tracks, &timeline.tracks);
        changed
    });

    if changed {
        log::debug!(
            "Wrote timeline '{}' ({} tracks, {} clips), update {} bytes",
            timeline.name,
            timeline.tracks.len(),
            timeline.clip_count(),
            update.len()
        );
        Some(update)
    } else {
        None
    }
}

/// Read a snapshot of the timeline held in `doc`.
///
/// If concurrent moves left two copies of the same clip in the document, only
/// the first one in track order is returned; the next [`to_replicated`]
/// removes the other.
pub fn from_replicated(doc: &TimelineDoc) -> Timeline {
    let tracks = doc.tracks();
    let meta = doc.meta();

    doc.read(|txn| {
        let name = read_string(meta.get(txn, KEY_NAME))
            .unwrap_or_else(|| DEFAULT_TIMELINE_NAME.to_string());

        let mut seen = HashSet::new();
        let tracks = tracks
            .iter(txn)
            .enumerate()
            .map(|(index, value)| match value {
                Out::YMap(map) => read_track(txn, &map, index, &mut seen),
                _ => Track::default_for_index(index),
            })
            .collect();

        Timeline { name, tracks }
    })
}

/// Give every clip a stable id that is unique within the timeline.
fn assign_stable_ids(timeline: &mut Timeline) {
    let mut seen = HashSet::new();
    for clip in timeline.tracks.iter_mut().flat_map(|t| t.clips.iter_mut()) {
        match clip.stable_id {
            Some(id) if seen.insert(id) => {}
            _ => {
                let id = ClipId::generate();
                seen.insert(id);
                clip.stable_id = Some(id);
            }
        }
    }
}

// ==================== Writing ====================

fn reconcile_tracks(txn: &mut TransactionMut<'_>, tracks: &ArrayRef, desired: &[Track]) -> bool {
    let mut changed = false;

    let existing = tracks.len(&*txn);
    let wanted = desired.len() as u32;
    if existing > wanted {
        tracks.remove_range(txn, wanted, existing - wanted);
        changed = true;
    }

    for (index, track) in desired.iter().enumerate() {
        let index = index as u32;
        let track_map = match tracks.get(&*txn, index) {
            Some(Out::YMap(map)) => map,
            Some(_) => {
                tracks.remove(txn, index);
                changed = true;
                tracks.insert(txn, index, MapPrelim::default())
            }
            None => {
                changed = true;
                tracks.push_back(txn, MapPrelim::default())
            }
        };
        changed |= write_track(txn, &track_map, track);
    }

    changed
}

fn write_track(txn: &mut TransactionMut<'_>, map: &MapRef, track: &Track) -> bool {
    let mut changed = write_string(txn, map, KEY_NAME, &track.name);
    changed |= write_string(txn, map, KEY_KIND, track.kind.as_str());

    let clips = match map.get(&*txn, KEY_CLIPS) {
        Some(Out::YArray(array)) => array,
        _ => {
            changed = true;
            map.insert(txn, KEY_CLIPS, ArrayPrelim::default())
        }
    };

    changed | reconcile_clips(txn, &clips, &track.clips)
}

/// Make the clip sequence hold exactly `desired`, in order.
///
/// Entries are matched by stable id. Unknown, id-less and repeated entries are
/// deleted; entries found out of place are moved by deleting and reinserting
/// them under the same id.
fn reconcile_clips(txn: &mut TransactionMut<'_>, clips: &ArrayRef, desired: &[Clip]) -> bool {
    let mut changed = false;

    let wanted: HashSet<ClipId> = desired.iter().filter_map(|c| c.stable_id).collect();

    // Walk back to front so removals do not shift the indexes still to visit.
    let mut kept: Vec<ClipId> = Vec::new();
    let mut seen = HashSet::new();
    let entries: Vec<Option<ClipId>> = clips
        .iter(&*txn)
        .map(|value| match value {
            Out::YMap(map) => read_clip_id(&*txn, &map),
            _ => None,
        })
        .collect();
    let mut keep = vec![false; entries.len()];
    for (index, id) in entries.iter().enumerate() {
        if let Some(id) = id {
            keep[index] = wanted.contains(id) && seen.insert(*id);
        }
    }
    for index in (0..entries.len()).rev() {
        if !keep[index] {
            clips.remove(txn, index as u32);
            changed = true;
        }
    }
    for (index, id) in entries.iter().enumerate() {
        if let (true, Some(id)) = (keep[index], id) {
            kept.push(*id);
        }
    }

    for (position, clip) in desired.iter().enumerate() {
        let Some(id) = clip.stable_id else {
            continue;
        };
        let index = position as u32;

        if kept.get(position) == Some(&id) {
            if let Some(Out::YMap(map)) = clips.get(&*txn, index) {
                changed |= write_clip(txn, &map, id, clip);
                continue;
            }
        }

        if let Some(found) = kept.iter().position(|existing| *existing == id) {
            clips.remove(txn, found as u32);
            kept.remove(found);
        }

        let map = clips.insert(txn, index, MapPrelim::default());
        write_clip(txn, &map, id, clip);
        kept.insert(position, id);
        changed = true;
    }

    changed
}

fn write_clip(txn: &mut TransactionMut<'_>, map: &MapRef, id: ClipId, clip: &Clip) -> bool {
    let mut changed = write_string(txn, map, KEY_ID, &id.to_string());
    changed |= write_string(txn, map, KEY_NAME, &clip.name);
    changed |= write_string(txn, map, KEY_MEDIA_URL, &clip.media_url);
    changed |= write_time(txn, map, KEY_START, clip.start);
    changed |= write_time(txn, map, KEY_DURATION, clip.duration);
    changed
}

fn write_string(txn: &mut TransactionMut<'_>, map: &MapRef, key: &str, value: &str) -> bool {
    if read_string(map.get(&*txn, key)).as_deref() == Some(value) {
        return false;
    }
    map.insert(txn, key, value.to_string());
    true
}

fn write_time(txn: &mut TransactionMut<'_>, map: &MapRef, key: &str, time: RationalTime) -> bool {
    if read_time(map.get(&*txn, key)) == Some(time) {
        return false;
    }
    let mut value = HashMap::new();
    value.insert(TIME_VALUE.to_string(), Any::Number(time.value));
    value.insert(TIME_RATE.to_string(), Any::Number(time.rate));
    map.insert(txn, key, Any::Map(Arc::new(value)));
    true
}

// ==================== Reading ====================

fn read_track<T: ReadTxn>(
    txn: &T,
    map: &MapRef,
    index: usize,
    seen: &mut HashSet<ClipId>,
) -> Track {
    let name = read_string(map.get(txn, KEY_NAME)).unwrap_or_else(|| format!("Track {}", index));
    let kind = read_string(map.get(txn, KEY_KIND))
        .and_then(|kind| kind.parse::<TrackKind>().ok())
        .unwrap_or_default();

    let clips = match map.get(txn, KEY_CLIPS) {
        Some(Out::YArray(array)) => array
            .iter(txn)
            .filter_map(|value| match value {
                Out::YMap(clip) => Some(read_clip(txn, &clip)),
                _ => None,
            })
            .filter(|clip| match clip.stable_id {
                Some(id) => seen.insert(id),
                None => true,
            })
            .collect(),
        _ => Vec::new(),
    };

    Track { name, kind, clips }
}

fn read_clip<T: ReadTxn>(txn: &T, map: &MapRef) -> Clip {
    Clip {
        stable_id: read_clip_id(txn, map),
        name: read_string(map.get(txn, KEY_NAME)).unwrap_or_else(|| DEFAULT_CLIP_NAME.to_string()),
        media_url: read_string(map.get(txn, KEY_MEDIA_URL)).unwrap_or_default(),
        start: read_time(map.get(txn, KEY_START)).unwrap_or_else(|| {
            RationalTime::from_seconds(DEFAULT_CLIP_START_SECS, DEFAULT_FRAME_RATE)
        }),
        duration: read_time(map.get(txn, KEY_DURATION)).unwrap_or_else(|| {
            RationalTime::from_seconds(DEFAULT_CLIP_DURATION_SECS, DEFAULT_FRAME_RATE)
        }),
    }
}

fn read_clip_id<T: ReadTxn>(txn: &T, map: &MapRef) -> Option<ClipId> {
    read_string(map.get(txn, KEY_ID)).and_then(|id| id.parse().ok())
}

fn read_string(value: Option<Out>) -> Option<String> {
    match value {
        Some(Out::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    }
}

/// Read a time value: a `{value, rate}` map, or a bare number of seconds.
fn read_time(value: Option<Out>) -> Option<RationalTime> {
    match value? {
        Out::Any(Any::Map(fields)) => {
            let value = fields.get(TIME_VALUE).and_then(number)?;
            let rate = fields
                .get(TIME_RATE)
                .and_then(number)
                .unwrap_or(DEFAULT_FRAME_RATE);
            Some(RationalTime::new(value, rate))
        }
        Out::Any(any) => {
            number(&any).map(|seconds| RationalTime::from_seconds(seconds, DEFAULT_FRAME_RATE))
        }
        _ => None,
    }
}

fn number(value: &Any) -> Option<f64> {
    match value {
        Any::Number(n) => Some(*n),
        Any::BigInt(n) => Some(*n as f64),
        _ => None,
    }
}
