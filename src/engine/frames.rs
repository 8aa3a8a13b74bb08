//! Frame registry: hierarchy, lifetime and origin resolution for one page.

use std::collections::HashMap;

use serde::Serialize;
use strum_macros::AsRefStr;
use url::Url;

use crate::engine::events::FrameSnapshot;

/// Report key for cookies whose frame never resolved to an origin.
pub const UNKNOWN_FRAME_KEY: &str = "Unknown Frame(s)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FrameKind {
    Main,
    Iframe,
    Nested,
    Hidden,
    Fenced,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Referenced by an event before the frame tree mentioned it.
    Discovered,
    Attached,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: String,
    pub parent: Option<String>,
    pub url: Option<String>,
    pub state: FrameState,
    declared_kind: Option<FrameKind>,
}

/// Where a frame's cookies are grouped in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameResolution {
    pub key: String,
    pub note: Option<String>,
}

/// Origin of a URL if it has a tuple origin (http, https, ...).
pub(crate) fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

#[derive(Debug)]
pub struct FrameRegistry {
    frames: HashMap<String, Frame>,
    max_depth: usize,
    sealed: bool,
    late: usize,
}

impl FrameRegistry {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: HashMap::new(),
            max_depth,
            sealed: false,
            late: 0,
        }
    }

    /// Attach a frame from the driver's tree. Returns `false` if the registry
    /// is sealed and the frame was dropped.
    pub fn declare(&mut self, snapshot: &FrameSnapshot) -> bool {
        if self.sealed && !self.frames.contains_key(&snapshot.frame_id) {
            self.note_late(&snapshot.frame_id);
            return false;
        }
        let declared_kind = snapshot
            .frame_type
            .as_deref()
            .and_then(|t| match t.to_ascii_lowercase().as_str() {
                "hidden" => Some(FrameKind::Hidden),
                "fenced" | "fencedframe" => Some(FrameKind::Fenced),
                _ => None,
            });
        let frame = self
            .frames
            .entry(snapshot.frame_id.clone())
            .or_insert_with(|| Frame {
                id: snapshot.frame_id.clone(),
                parent: None,
                url: None,
                state: FrameState::Attached,
                declared_kind: None,
            });
        if frame.state == FrameState::Discovered {
            frame.state = FrameState::Attached;
        }
        if snapshot.parent_frame_id.is_some() {
            frame.parent = snapshot.parent_frame_id.clone();
        }
        if let Some(url) = snapshot.url.as_ref().filter(|u| !u.is_empty()) {
            frame.url = Some(url.clone());
        }
        if declared_kind.is_some() {
            frame.declared_kind = declared_kind;
        }
        true
    }

    /// Frame for `frame_id`, creating a `Discovered` placeholder for unknown
    /// ids. `None` once sealed for ids never seen before.
    pub fn resolve_frame(&mut self, frame_id: &str) -> Option<&Frame> {
        if !self.frames.contains_key(frame_id) {
            if self.sealed {
                self.note_late(frame_id);
                return None;
            }
            self.frames.insert(
                frame_id.to_string(),
                Frame {
                    id: frame_id.to_string(),
                    parent: None,
                    url: None,
                    state: FrameState::Discovered,
                    declared_kind: None,
                },
            );
        }
        self.frames.get(frame_id)
    }

    pub fn navigate(&mut self, frame_id: &str, url: &str) {
        if self.resolve_frame(frame_id).is_none() {
            return;
        }
        if let Some(frame) = self.frames.get_mut(frame_id) {
            if !url.is_empty() {
                frame.url = Some(url.to_string());
            }
        }
    }

    pub fn mark_removed(&mut self, frame_id: &str) {
        if self.resolve_frame(frame_id).is_none() {
            return;
        }
        if let Some(frame) = self.frames.get_mut(frame_id) {
            frame.state = FrameState::Removed;
        }
    }

    pub fn get(&self, frame_id: &str) -> Option<&Frame> {
        self.frames.get(frame_id)
    }

    pub fn is_removed(&self, frame_id: &str) -> bool {
        self.frames
            .get(frame_id)
            .is_some_and(|f| f.state == FrameState::Removed)
    }

    pub fn kind_of(&self, frame_id: &str) -> FrameKind {
        let Some(frame) = self.frames.get(frame_id) else {
            return FrameKind::Unknown;
        };
        if let Some(kind) = frame.declared_kind {
            return kind;
        }
        match self.depth(frame_id) {
            Some(0) => FrameKind::Main,
            Some(1) => FrameKind::Iframe,
            Some(_) => FrameKind::Nested,
            None => FrameKind::Unknown,
        }
    }

    /// Number of ancestors, or `None` for cycles and unknown ids.
    fn depth(&self, frame_id: &str) -> Option<usize> {
        let mut current = self.frames.get(frame_id)?;
        let mut depth = 0;
        while let Some(parent) = current.parent.as_deref() {
            depth += 1;
            if depth > self.frames.len() {
                return None;
            }
            match self.frames.get(parent) {
                Some(p) => current = p,
                None => break,
            }
        }
        Some(depth)
    }

    /// Origin key for a frame. URL-less frames inherit the nearest ancestor's
    /// origin, up to the configured depth.
    pub fn resolve_origin(&self, frame_id: &str) -> FrameResolution {
        let mut current = frame_id;
        for _ in 0..=self.max_depth {
            let Some(frame) = self.frames.get(current) else {
                break;
            };
            if let Some(origin) = frame.url.as_deref().and_then(origin_of) {
                return FrameResolution {
                    key: origin,
                    note: None,
                };
            }
            match frame.parent.as_deref() {
                Some(parent) => current = parent,
                None => {
                    return FrameResolution {
                        key: UNKNOWN_FRAME_KEY.to_string(),
                        note: Some(format!(
                            "{} frame {} has no resolvable url",
                            self.kind_of(frame_id).as_ref(),
                            frame_id
                        )),
                    }
                }
            }
        }

        let note = if self.frames.contains_key(current) {
            format!(
                "{} frame {} nested more than {} levels without a resolvable url",
                self.kind_of(frame_id).as_ref(),
                frame_id,
                self.max_depth
            )
        } else {
            format!(
                "{} frame {} has no resolvable url",
                self.kind_of(frame_id).as_ref(),
                frame_id
            )
        };
        FrameResolution {
            key: UNKNOWN_FRAME_KEY.to_string(),
            note: Some(note),
        }
    }

    /// Close the registry; later discoveries are dropped and counted.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Frames that showed up after sealing.
    pub fn late_frames(&self) -> usize {
        self.late
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn note_late(&mut self, frame_id: &str) {
        self.late += 1;
        tracing::warn!("Dropping frame {} discovered after finalization", frame_id);
    }
}
