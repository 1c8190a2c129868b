//! Multi-replica tests: several writers edit their own copy of a timeline and
//! exchange updates through a network that reorders and duplicates them.

use reelsync_core::crdt::{TimelineDoc, from_replicated, to_replicated};
use reelsync_core::{AgentAction, Clip, Timeline};
use serde_json::json;

/// Updates produced by one writer, in the order they were made
struct Replica {
    doc: TimelineDoc,
    outbox: Vec<Vec<u8>>,
}

impl Replica {
    fn from_base(client_id: u64, base: &[u8]) -> Self {
        let doc = TimelineDoc::with_client_id(client_id);
        doc.apply_update(base).unwrap();
        Self {
            doc,
            outbox: Vec::new(),
        }
    }

    fn edit(&mut self, f: impl FnOnce(&mut Timeline)) {
        let mut timeline = from_replicated(&self.doc);
        f(&mut timeline);
        if let Some(update) = to_replicated(&mut timeline, &self.doc) {
            self.outbox.push(update);
        }
    }

    fn act(&mut self, action: serde_json::Value) {
        let action = AgentAction::from_json(action).unwrap();
        self.edit(|timeline| {
            action.apply(timeline).unwrap();
        });
    }
}

fn base_state() -> Vec<u8> {
    let doc = TimelineDoc::with_client_id(1);
    let mut timeline = Timeline::with_default_track("Launch video");
    timeline.tracks[0]
        .clips
        .push(Clip::new("Opening", "https://cdn/opening.mp4", 0.0, 3.0));
    to_replicated(&mut timeline, &doc).unwrap();
    doc.encode_update()
}

/// Deliver every update to a fresh replica in the given order.
fn deliver(base: &[u8], updates: &[&Vec<u8>]) -> TimelineDoc {
    let doc = TimelineDoc::with_client_id(99);
    doc.apply_update(base).unwrap();
    for update in updates {
        doc.apply_update(update).unwrap();
    }
    doc
}

#[test]
fn test_editors_and_agent_converge_under_reordering() {
    let base = base_state();

    let mut editor = Replica::from_base(10, &base);
    let mut agent = Replica::from_base(20, &base);
    let mut producer = Replica::from_base(30, &base);

    editor.edit(|timeline| {
        timeline.tracks[0].clips[0].name = "Opening (trimmed)".to_string();
    });
    editor.edit(|timeline| {
        timeline.tracks[0]
            .clips
            .push(Clip::new("Product shot", "https://cdn/product.mp4", 1.0, 4.0));
    });
    agent.act(json!({"type": "add_clip", "name": "Voiceover", "url": "https://cdn/vo.wav", "start": 0, "duration": 7, "track": 1}));
    agent.act(json!({"type": "add_clip", "name": "Logo", "url": "https://cdn/logo.png", "start": 0, "duration": 2}));
    producer.edit(|timeline| {
        timeline.name = "Launch video v2".to_string();
    });

    let all: Vec<&Vec<u8>> = editor
        .outbox
        .iter()
        .chain(agent.outbox.iter())
        .chain(producer.outbox.iter())
        .collect();

    let forward = deliver(&base, &all);

    let mut backward_order = all.clone();
    backward_order.reverse();
    let backward = deliver(&base, &backward_order);

    // Interleaved and with every update sent twice
    let mut noisy_order = Vec::new();
    for (i, update) in all.iter().enumerate() {
        noisy_order.push(*update);
        noisy_order.push(all[all.len() - 1 - i]);
    }
    let noisy = deliver(&base, &noisy_order);

    assert_eq!(forward.state_vector(), backward.state_vector());
    assert_eq!(forward.state_vector(), noisy.state_vector());
    assert_eq!(forward.materialize(), backward.materialize());
    assert_eq!(forward.materialize(), noisy.materialize());
    assert_eq!(forward.encode_update(), backward.encode_update());
    assert_eq!(forward.encode_update(), noisy.encode_update());

    let timeline = from_replicated(&forward);
    assert_eq!(timeline.name, "Launch video v2");
    assert_eq!(timeline.tracks.len(), 2);
    assert_eq!(timeline.clip_count(), 4);
    assert_eq!(timeline.tracks[1].clips[0].name, "Voiceover");
    assert!(
        timeline.tracks[0]
            .clips
            .iter()
            .any(|clip| clip.name == "Opening (trimmed)")
    );
}

#[test]
fn test_stable_ids_survive_every_replica() {
    let base = base_state();
    let opening_id = from_replicated(&TimelineDoc::from_update(&base).unwrap()).tracks[0].clips[0]
        .stable_id
        .unwrap();

    let mut left = Replica::from_base(10, &base);
    let mut right = Replica::from_base(20, &base);

    left.edit(|timeline| {
        timeline.tracks[0]
            .clips
            .insert(0, Clip::new("Cold open", "https://cdn/cold.mp4", 0.0, 1.5));
    });
    right.edit(|timeline| {
        timeline.tracks[0].clips[0].duration.value = 48.0;
    });

    let updates: Vec<&Vec<u8>> = left.outbox.iter().chain(right.outbox.iter()).collect();
    let merged_doc = deliver(&base, &updates);
    let reversed: Vec<&Vec<u8>> = updates.iter().rev().copied().collect();
    assert_eq!(merged_doc.encode_update(), deliver(&base, &reversed).encode_update());
    let merged = from_replicated(&merged_doc);

    let opening = merged.clip(opening_id).unwrap();
    assert_eq!(opening.duration.value, 48.0);
    assert_eq!(merged.tracks[0].clips[1].stable_id, Some(opening_id));
    assert_eq!(merged.tracks[0].clips[0].name, "Cold open");
}

#[test]
fn test_late_replica_catches_up_with_a_diff() {
    let base = base_state();
    let mut writer = Replica::from_base(10, &base);
    let late = Replica::from_base(20, &base);

    writer.act(json!({"type": "add_clip", "name": "Outro", "url": "https://cdn/outro.mp4", "start": 0, "duration": 4}));

    let diff = writer
        .doc
        .encode_diff(&late.doc.encode_state_vector())
        .unwrap();
    late.doc.apply_update(&diff).unwrap();

    assert_eq!(from_replicated(&late.doc), from_replicated(&writer.doc));
}
