//! Host collaborator
//!
//! The host owns the scene and the timeline. These are the only points at
//! which the receiver touches it.

use rigstream_core::{RigError, RigResult};
use rigstream_skeleton::{Hierarchy, MemoryRig, Rig};

/// Handle to a rig object in the host scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RigId(pub usize);

/// Description of a bundled rig the host can load into its scene
#[derive(Debug, Clone, Copy)]
pub struct BundledRig<'a> {
    /// Resource (asset file) holding the rig
    pub resource: &'a str,
    /// Name of the object to bring into the scene
    pub object: &'a str,
    pub hierarchy: &'a Hierarchy,
    /// Bone name prefix used by the resource
    pub prefix: &'a str,
}

/// Scene and timeline operations the receiver needs
pub trait Host {
    type Rig: Rig;

    /// Current frame of the time cursor
    fn time_cursor(&self) -> i64;

    fn set_time_cursor(&mut self, frame: i64);

    /// Grow the recording range so it ends at least at `frame`
    fn extend_recording_range(&mut self, frame: i64);

    /// Look up a rig object by name
    fn find_object(&self, name: &str) -> Option<RigId>;

    /// Load a bundled rig into the scene
    fn load_bundled_rig(&mut self, bundle: &BundledRig<'_>) -> RigResult<RigId>;

    fn rig(&self, id: RigId) -> Option<&Self::Rig>;

    fn rig_mut(&mut self, id: RigId) -> Option<&mut Self::Rig>;

    fn request_ui_refresh(&mut self);

    /// Whether the timeline is playing back existing animation
    fn is_external_animation_playing(&self) -> bool;
}

/// Host held entirely in memory, for the headless receiver and tests
#[derive(Debug, Clone)]
pub struct MemoryHost {
    rigs: Vec<MemoryRig>,
    time_cursor: i64,
    recording_end: i64,
    ui_refreshes: u64,
    playing: bool,
    bundles_available: bool,
}

impl MemoryHost {
    pub fn new() -> Self {
        MemoryHost {
            rigs: Vec::new(),
            time_cursor: 0,
            recording_end: 0,
            ui_refreshes: 0,
            playing: false,
            bundles_available: true,
        }
    }

    /// A host whose bundled resources cannot be loaded
    pub fn without_bundles() -> Self {
        MemoryHost {
            bundles_available: false,
            ..Self::new()
        }
    }

    /// Put a rig into the scene
    pub fn add_rig(&mut self, rig: MemoryRig) -> RigId {
        self.rigs.push(rig);
        RigId(self.rigs.len() - 1)
    }

    pub fn rig_by_name(&self, name: &str) -> Option<&MemoryRig> {
        self.rigs.iter().find(|r| r.name() == name)
    }

    pub fn rig_count(&self) -> usize {
        self.rigs.len()
    }

    pub fn recording_end(&self) -> i64 {
        self.recording_end
    }

    pub fn ui_refreshes(&self) -> u64 {
        self.ui_refreshes
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for MemoryHost {
    type Rig = MemoryRig;

    fn time_cursor(&self) -> i64 {
        self.time_cursor
    }

    fn set_time_cursor(&mut self, frame: i64) {
        self.time_cursor = frame;
    }

    fn extend_recording_range(&mut self, frame: i64) {
        self.recording_end = self.recording_end.max(frame);
    }

    fn find_object(&self, name: &str) -> Option<RigId> {
        self.rigs.iter().position(|r| r.name() == name).map(RigId)
    }

    fn load_bundled_rig(&mut self, bundle: &BundledRig<'_>) -> RigResult<RigId> {
        if !self.bundles_available {
            return Err(RigError::Initialization(format!(
                "bundled resource {} is not available",
                bundle.resource
            )));
        }
        if let Some(id) = self.find_object(bundle.object) {
            return Ok(id);
        }
        tracing::info!("Loading {} from bundled resource {}", bundle.object, bundle.resource);
        let rig = MemoryRig::from_layout(bundle.object, bundle.hierarchy, bundle.prefix);
        Ok(self.add_rig(rig))
    }

    fn rig(&self, id: RigId) -> Option<&MemoryRig> {
        self.rigs.get(id.0)
    }

    fn rig_mut(&mut self, id: RigId) -> Option<&mut MemoryRig> {
        self.rigs.get_mut(id.0)
    }

    fn request_ui_refresh(&mut self) {
        self.ui_refreshes += 1;
    }

    fn is_external_animation_playing(&self) -> bool {
        self.playing
    }
}
