//! Receiver session
//!
//! Owns the transport, the active skeletons and the debounced fault state.
//! The host is passed into every call that needs it rather than stored.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::Serialize;

use rigstream_core::{ReceiverConfig, RigError, RigResult, TimestampTracker, FrameTimestamp};
use rigstream_retarget::RetargetEngine;
use rigstream_skeleton::{layout, Hierarchy, Skeleton};
use rigstream_transport::{ConnectionId, StreamTransport, TransportEvent};
use rigstream_wire::{decode_message, Actor, Command, DecodeOptions, InboundMessage, MotionFrame};

use crate::{BundledRig, ErrorDebouncer, FaultChange, Host, RigId, TickErrors};

/// Actors bound at start, in binding order
pub const ACTORS: [Actor; 3] = [Actor::LeftHand, Actor::RightHand, Actor::Body];

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub messages_processed: u64,
    pub frames_applied: u64,
    /// Frames skipped because they failed to decode or validate
    pub frames_skipped: u64,
    /// Frames discarded because the remote capture was not running
    pub frames_discarded: u64,
    pub joints_skipped: u64,
    pub connections_rejected: u64,
    pub queue_drops: u64,
    pub last_tick_duration: Duration,
}

/// Snapshot for the UI layer
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Port actually bound, which may differ from the configured one
    pub port: Option<u16>,
    pub connected: bool,
    pub running: bool,
    pub recording: bool,
    pub in_transition: bool,
    pub fault: Option<String>,
    pub can_toggle_capture: bool,
    pub can_record: bool,
}

/// Outcome of one tick
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    pub messages: usize,
    pub errors: usize,
    pub fault: FaultChange,
    /// The session stopped during this tick
    pub stopped: bool,
}

impl Default for TickReport {
    fn default() -> Self {
        TickReport {
            messages: 0,
            errors: 0,
            fault: FaultChange::Unchanged,
            stopped: false,
        }
    }
}

/// Skeleton bound to a rig in the host scene
#[derive(Debug, Clone)]
struct ActiveActor {
    actor: Actor,
    skeleton: Skeleton,
    rig: RigId,
}

/// Rest-pose restoration postponed after stopping mid-recording
#[derive(Debug)]
struct DeferredRestore {
    due: Instant,
    actors: Vec<ActiveActor>,
}

/// Receiver session
pub struct Session {
    config: ReceiverConfig,
    state: SessionState,
    transport: StreamTransport,
    port: Option<u16>,
    peer: Option<ConnectionId>,
    actors: Vec<ActiveActor>,
    timestamps: TimestampTracker,
    decode_options: DecodeOptions,
    /// Remote capture is running
    is_running: bool,
    is_recording: bool,
    /// A start/stop command was sent and not yet acknowledged
    is_in_transition: bool,
    debouncer: ErrorDebouncer,
    deferred: Option<DeferredRestore>,
    stats: RuntimeStats,
}

impl Session {
    pub fn new(config: ReceiverConfig) -> Self {
        Session {
            transport: StreamTransport::new(config.queue_capacity),
            timestamps: TimestampTracker::new(config.timestamp_scale, config.delta_policy),
            decode_options: DecodeOptions {
                root_position_index: config.root_position_index,
            },
            debouncer: ErrorDebouncer::new(config.debounce_threshold()),
            config,
            state: SessionState::Idle,
            port: None,
            peer: None,
            actors: Vec::new(),
            is_running: false,
            is_recording: false,
            is_in_transition: false,
            deferred: None,
            stats: RuntimeStats::default(),
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn transport(&self) -> &StreamTransport {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn is_in_transition(&self) -> bool {
        self.is_in_transition
    }

    pub fn previous_timestamp(&self) -> Option<FrameTimestamp> {
        self.timestamps.previous()
    }

    /// Currently visible fault, if any
    pub fn fault(&self) -> Option<&RigError> {
        self.debouncer.visible()
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn skeleton(&self, actor: Actor) -> Option<&Skeleton> {
        self.active(actor).map(|a| &a.skeleton)
    }

    pub fn rig_id(&self, actor: Actor) -> Option<RigId> {
        self.active(actor).map(|a| a.rig)
    }

    pub fn has_deferred_restore(&self) -> bool {
        self.deferred.is_some()
    }

    /// When the pending rest-pose restore falls due
    pub fn deferred_due(&self) -> Option<Instant> {
        self.deferred.as_ref().map(|d| d.due)
    }

    pub fn status(&self) -> SessionStatus {
        let connected = self.is_connected();
        SessionStatus {
            state: self.state,
            port: self.port,
            connected,
            running: self.is_running,
            recording: self.is_recording,
            in_transition: self.is_in_transition,
            fault: self.fault().map(ToString::to_string),
            can_toggle_capture: connected && !self.is_in_transition,
            can_record: self.is_running,
        }
    }

    fn active(&self, actor: Actor) -> Option<&ActiveActor> {
        self.actors.iter().find(|a| a.actor == actor)
    }

    /// Bind the skeletons, start the transport and enter `Running`.
    ///
    /// Returns the port actually bound. On failure the session stays idle
    /// and the error is made visible immediately.
    pub async fn start<H: Host>(&mut self, host: &mut H) -> RigResult<u16> {
        if self.state != SessionState::Idle {
            return Err(RigError::AlreadyRunning);
        }
        self.config.validate()?;
        self.flush_deferred(host);

        self.state = SessionState::Starting;
        self.debouncer.clear();
        self.timestamps.reset();
        self.reset_remote_flags();

        let mut actors = Vec::with_capacity(ACTORS.len());
        for actor in ACTORS {
            match self.bind_actor(host, actor) {
                Ok(active) => actors.push(active),
                Err(e) => return Err(self.abort_start(host, e)),
            }
        }
        self.actors = actors;

        let port = match self.transport.start(self.config.bind_addr()).await {
            Ok(port) => port,
            Err(e) => return Err(self.abort_start(host, e)),
        };
        if port != self.config.bind_port {
            tracing::warn!(
                "Configured port {} unavailable, peers must connect to {}",
                self.config.bind_port,
                port
            );
        }

        self.port = Some(port);
        self.state = SessionState::Running;
        tracing::info!("Receiver running on port {}", port);
        host.request_ui_refresh();
        Ok(port)
    }

    fn abort_start<H: Host>(&mut self, host: &mut H, error: RigError) -> RigError {
        tracing::error!("Receiver failed to start: {}", error);
        self.actors.clear();
        self.port = None;
        self.state = SessionState::Idle;
        self.debouncer.force(error.clone());
        host.request_ui_refresh();
        error
    }

    fn bundle_for(&self, actor: Actor) -> (String, &str, &str) {
        match actor {
            Actor::LeftHand => (
                format!("{}hand", self.config.left_hand_prefix),
                &self.config.hand_rig_resource,
                &self.config.left_hand_prefix,
            ),
            Actor::RightHand => (
                format!("{}hand", self.config.right_hand_prefix),
                &self.config.hand_rig_resource,
                &self.config.right_hand_prefix,
            ),
            Actor::Body => (self.config.body_root.clone(), &self.config.body_rig_resource, ""),
        }
    }

    fn bind_actor<H: Host>(&self, host: &mut H, actor: Actor) -> RigResult<ActiveActor> {
        let hierarchy: Hierarchy = if actor.is_hand() {
            layout::hand()?
        } else {
            layout::body()?
        };
        let (object, resource, prefix) = self.bundle_for(actor);
        let mut skeleton = Skeleton::new(object.clone(), hierarchy, prefix)
            .with_scale(self.config.enable_scale);

        if let Some(id) = host.find_object(&object) {
            if let Some(rig) = host.rig(id) {
                match skeleton.save_pose(rig) {
                    Ok(()) => {
                        tracing::info!("Bound {} to scene object {}", actor, object);
                        return Ok(ActiveActor {
                            actor,
                            skeleton,
                            rig: id,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Scene object {} is not usable for {}: {}", object, actor, e)
                    }
                }
            }
        }

        let id = host.load_bundled_rig(&BundledRig {
            resource,
            object: &object,
            hierarchy: skeleton.hierarchy(),
            prefix,
        })?;
        let rig = host.rig(id).ok_or_else(|| {
            RigError::Initialization(format!("bundled rig {} missing after load", object))
        })?;
        skeleton.save_pose(rig)?;
        tracing::info!("Bound {} to bundled rig {}", actor, object);
        Ok(ActiveActor {
            actor,
            skeleton,
            rig: id,
        })
    }

    fn reset_remote_flags(&mut self) {
        self.is_running = false;
        self.is_recording = false;
        self.is_in_transition = false;
    }

    /// Stop the transport, release the skeletons and return to `Idle`.
    ///
    /// A no-op when already idle. When stopped mid-recording the rest-pose
    /// restoration is deferred by `restore_delay_ms`.
    pub async fn stop<H: Host>(&mut self, host: &mut H) {
        if self.state == SessionState::Idle {
            return;
        }
        self.state = SessionState::Stopping;
        let was_recording = self.is_recording;

        self.transport.stop().await;
        self.peer = None;
        self.port = None;
        self.reset_remote_flags();
        self.timestamps.reset();

        let actors = std::mem::take(&mut self.actors);
        if self.config.reset_on_stop {
            let delay = self.config.restore_delay();
            if was_recording && !delay.is_zero() {
                tracing::debug!("Deferring rest-pose restore by {:?}", delay);
                self.deferred = Some(DeferredRestore {
                    due: Instant::now() + delay,
                    actors,
                });
            } else {
                reset_actors(host, &actors);
            }
        }

        self.state = SessionState::Idle;
        tracing::info!("Receiver stopped");
        host.request_ui_refresh();
    }

    /// Run deferred work that is due by `now`. Returns true if it ran.
    pub fn poll_deferred<H: Host>(&mut self, host: &mut H, now: Instant) -> bool {
        match &self.deferred {
            Some(deferred) if now >= deferred.due => {
                self.flush_deferred(host);
                true
            }
            _ => false,
        }
    }

    /// Run deferred work immediately
    pub fn flush_deferred<H: Host>(&mut self, host: &mut H) {
        if let Some(deferred) = self.deferred.take() {
            reset_actors(host, &deferred.actors);
            host.request_ui_refresh();
        }
    }

    /// Reset every active skeleton to its rest pose
    pub fn reset_pose<H: Host>(&mut self, host: &mut H) -> RigResult<()> {
        if self.state != SessionState::Running {
            return Err(RigError::NotRunning);
        }
        reset_actors(host, &self.actors);
        Ok(())
    }

    /// Listen on another port. Restarts the transport when running.
    pub async fn change_port<H: Host>(&mut self, host: &mut H, port: u16) -> RigResult<Option<u16>> {
        let mut config = self.config.clone();
        config.bind_port = port;
        config.validate()?;
        self.config = config;

        if self.state != SessionState::Running {
            return Ok(None);
        }
        self.transport.stop().await;
        self.peer = None;
        self.reset_remote_flags();
        match self.transport.start(self.config.bind_addr()).await {
            Ok(bound) => {
                tracing::info!("Receiver moved to port {}", bound);
                self.port = Some(bound);
                host.request_ui_refresh();
                Ok(Some(bound))
            }
            Err(e) => {
                tracing::error!("Could not rebind to port {}: {}", port, e);
                self.stop(host).await;
                self.debouncer.force(e.clone());
                Err(e)
            }
        }
    }

    /// Ask the peer to start its capture
    pub fn request_remote_start(&mut self) -> RigResult<()> {
        self.send_command(Command::Start)
    }

    /// Ask the peer to stop its capture
    pub fn request_remote_stop(&mut self) -> RigResult<()> {
        self.send_command(Command::Stop)
    }

    fn send_command(&mut self, command: Command) -> RigResult<()> {
        if self.state != SessionState::Running {
            return Err(RigError::NotRunning);
        }
        if self.is_in_transition {
            return Err(RigError::TransitionInProgress);
        }
        let peer = self.peer.ok_or(RigError::NotConnected)?;
        self.transport.send(peer, command.encode()?)?;
        self.is_in_transition = true;
        tracing::info!("Requested remote {}", command.as_str());
        Ok(())
    }

    pub fn start_recording(&mut self) -> RigResult<()> {
        if self.state != SessionState::Running || !self.is_running {
            return Err(RigError::NotRunning);
        }
        if self.is_recording {
            return Err(RigError::AlreadyRecording);
        }
        self.is_recording = true;
        tracing::info!("Recording started");
        Ok(())
    }

    pub fn stop_recording(&mut self) -> RigResult<()> {
        if !self.is_recording {
            return Err(RigError::NotRecording);
        }
        self.is_recording = false;
        tracing::info!("Recording stopped");
        Ok(())
    }

    /// Process everything received since the previous tick.
    ///
    /// Per-message errors are isolated to their message. A fatal error
    /// stops the session before this returns.
    pub async fn tick<H: Host>(&mut self, host: &mut H) -> TickReport {
        let mut report = TickReport::default();
        if self.state != SessionState::Running {
            return report;
        }
        let started = Instant::now();
        self.stats.ticks += 1;

        if host.is_external_animation_playing() {
            tracing::info!("Timeline playback detected, stopping receiver");
            self.stop(host).await;
            report.stopped = true;
            return report;
        }

        let mut errors = TickErrors::default();
        let dropped = self.transport.take_dropped();
        if dropped > 0 {
            self.stats.queue_drops += dropped as u64;
            errors.record(RigError::QueueOverflow(dropped));
        }

        for event in self.transport.drain() {
            match event {
                TransportEvent::Connected { id, peer } => self.on_connected(id, peer),
                TransportEvent::Disconnected { id } => self.on_disconnected(id),
                TransportEvent::Malformed { id, reason } => {
                    if self.peer != Some(id) {
                        continue;
                    }
                    report.messages += 1;
                    self.stats.messages_processed += 1;
                    self.stats.frames_skipped += 1;
                    errors.record(RigError::Decode(reason));
                }
                TransportEvent::Message { id, text } => {
                    if self.peer != Some(id) {
                        tracing::debug!("Ignoring message from rejected {}", id);
                        continue;
                    }
                    report.messages += 1;
                    self.stats.messages_processed += 1;
                    if let Err(e) = self.handle_message(host, &text, &mut errors) {
                        let fatal = e.is_fatal();
                        if fatal {
                            tracing::error!("{}", e);
                        } else {
                            tracing::warn!("Skipping message: {}", e);
                            self.stats.frames_skipped += 1;
                        }
                        errors.record(e);
                        if fatal {
                            break;
                        }
                    }
                }
            }
        }

        report.errors = errors.count();
        let outcome = errors.into_outcome();
        let fatal = outcome.as_ref().is_some_and(RigError::is_fatal);
        report.fault = self.debouncer.observe(outcome.as_ref());
        match report.fault {
            FaultChange::Raised => {
                if let Some(fault) = self.debouncer.visible() {
                    tracing::error!("Fault: {}", fault);
                }
                host.request_ui_refresh();
            }
            FaultChange::Cleared => {
                tracing::info!("Fault cleared");
                host.request_ui_refresh();
            }
            FaultChange::Unchanged => {}
        }

        if fatal {
            self.stop(host).await;
            report.stopped = true;
        }
        self.stats.last_tick_duration = started.elapsed();
        report
    }

    fn on_connected(&mut self, id: ConnectionId, peer: SocketAddr) {
        if self.peer.is_some() {
            tracing::warn!("Already connected, refusing {} from {}", id, peer);
            self.transport.close(id);
            self.stats.connections_rejected += 1;
            return;
        }
        tracing::info!("Peer connected from {}", peer);
        self.peer = Some(id);
    }

    fn on_disconnected(&mut self, id: ConnectionId) {
        if self.peer != Some(id) {
            return;
        }
        tracing::info!("Peer disconnected");
        self.peer = None;
        self.reset_remote_flags();
        self.timestamps.reset();
    }

    fn handle_message<H: Host>(
        &mut self,
        host: &mut H,
        text: &str,
        errors: &mut TickErrors,
    ) -> RigResult<()> {
        match decode_message(text, &self.decode_options)? {
            InboundMessage::State { is_running } => {
                self.on_remote_state(host, is_running);
                Ok(())
            }
            InboundMessage::Error { message } => Err(RigError::RemoteFault(message)),
            InboundMessage::Frame(frame) => self.apply_frame(host, &frame, errors),
        }
    }

    fn on_remote_state<H: Host>(&mut self, host: &mut H, is_running: bool) {
        let was_running = self.is_running;
        self.is_running = is_running;
        self.is_in_transition = false;

        if is_running && !was_running {
            tracing::info!("Remote capture started");
            self.timestamps.reset();
            for active in &mut self.actors {
                let Some(rig) = host.rig(active.rig) else {
                    continue;
                };
                if let Err(e) = active.skeleton.save_pose(rig) {
                    tracing::warn!("Could not re-capture rest pose of {}: {}", active.actor, e);
                }
            }
        } else if !is_running && was_running {
            tracing::info!("Remote capture stopped");
            if self.is_recording {
                self.is_recording = false;
                tracing::info!("Recording stopped with the remote capture");
            }
        }
        host.request_ui_refresh();
    }

    fn apply_frame<H: Host>(
        &mut self,
        host: &mut H,
        frame: &MotionFrame,
        errors: &mut TickErrors,
    ) -> RigResult<()> {
        if !self.is_running {
            tracing::warn!("Discarding frame, remote capture is not running");
            self.stats.frames_discarded += 1;
            return Ok(());
        }

        let delta = self.timestamps.delta_for(frame.timestamp)?;
        let actors = &self.actors;
        let poses = RetargetEngine::retarget_frame(frame, |actor| {
            actors.iter().find(|a| a.actor == actor).map(|a| &a.skeleton)
        })?;

        let keyframe = if self.is_recording {
            let cursor = host.time_cursor().saturating_add(delta);
            host.set_time_cursor(cursor);
            host.extend_recording_range(cursor);
            Some(cursor)
        } else {
            None
        };

        for pose in poses {
            if let Some(active) = self.active(pose.actor) {
                match host.rig_mut(active.rig) {
                    Some(rig) => pose.apply(rig, keyframe),
                    None => tracing::warn!("Rig for {} left the scene", pose.actor),
                }
            }
            self.stats.joints_skipped += pose.skipped.len() as u64;
            for skipped in pose.skipped {
                errors.record(skipped);
            }
        }

        self.timestamps.commit(frame.timestamp);
        self.stats.frames_applied += 1;
        Ok(())
    }
}

fn reset_actors<H: Host>(host: &mut H, actors: &[ActiveActor]) {
    for active in actors {
        if let Some(rig) = host.rig_mut(active.rig) {
            active.skeleton.reset_pose(rig);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryHost;
    use nalgebra::Vector3;
    use rigstream_core::{rotations_close, Rotation};
    use rigstream_skeleton::{MemoryRig, RestBone};
    use std::f64::consts::FRAC_PI_2;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    const PEER: ConnectionId = ConnectionId(1);

    /// Session on loopback, starting on a port that is held by `blocker`
    /// so the transport falls back to an ephemeral one
    async fn config_with_blocker() -> (ReceiverConfig, TcpListener) {
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ReceiverConfig {
            bind_port: blocker.local_addr().unwrap().port(),
            ..ReceiverConfig::loopback()
        };
        (config, blocker)
    }

    async fn running_session() -> (Session, MemoryHost, TcpListener) {
        let (config, blocker) = config_with_blocker().await;
        let mut session = Session::new(config);
        let mut host = MemoryHost::new();
        session.start(&mut host).await.unwrap();
        (session, host, blocker)
    }

    fn push(session: &Session, text: &str) {
        session.transport().enqueue_incoming(TransportEvent::Message {
            id: PEER,
            text: text.to_string(),
        });
    }

    fn connect(session: &Session) {
        session.transport().enqueue_incoming(TransportEvent::Connected {
            id: PEER,
            peer: "127.0.0.1:50000".parse().unwrap(),
        });
    }

    fn hand_frame(ts: &str, joints: usize) -> String {
        let theta = vec!["[1,0,0,0]"; joints].join(",");
        format!(r#"{{"type":"frame","ts":"{ts}","hands":{{"Left":{{"theta":[{theta}]}}}}}}"#)
    }

    async fn streaming_session() -> (Session, MemoryHost, TcpListener) {
        let (mut session, mut host, blocker) = running_session().await;
        connect(&session);
        push(&session, r#"{"type":"state","isRunning":true}"#);
        session.tick(&mut host).await;
        assert!(session.is_running());
        (session, host, blocker)
    }

    #[tokio::test]
    async fn test_start_binds_bundled_rigs() {
        let (mut session, mut host, blocker) = running_session().await;
        assert_eq!(session.state(), SessionState::Running);
        assert_ne!(session.port(), Some(blocker.local_addr().unwrap().port()));
        assert_eq!(host.rig_count(), 3);
        for actor in ACTORS {
            assert!(session.skeleton(actor).unwrap().is_captured());
        }
        assert!(host.rig_by_name("left_hand").is_some());
        assert!(host.rig_by_name("root").is_some());

        session.stop(&mut host).await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.skeleton(Actor::Body).is_none());
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_start_prefers_scene_rig() {
        let (config, _blocker) = config_with_blocker().await;
        let mut host = MemoryHost::new();
        let hierarchy = layout::hand().unwrap();
        let scene_rig = host.add_rig(MemoryRig::from_layout("right_hand", &hierarchy, "right_"));

        let mut session = Session::new(config);
        session.start(&mut host).await.unwrap();
        assert_eq!(session.rig_id(Actor::RightHand), Some(scene_rig));
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_start_fails_without_usable_skeleton() {
        let (config, _blocker) = config_with_blocker().await;
        let mut host = MemoryHost::without_bundles();
        host.add_rig(MemoryRig::new("root").with_bone("pelvis", None, RestBone::default()));

        let mut session = Session::new(config);
        let err = session.start(&mut host).await.unwrap_err();
        assert!(matches!(err, RigError::Initialization(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.fault().is_some());
        assert!(session.port().is_none());
        // Stopping after a failed start is harmless
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_double_start_is_usage_error() {
        let (mut session, mut host, _blocker) = running_session().await;
        assert_eq!(session.start(&mut host).await, Err(RigError::AlreadyRunning));
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_frames_discarded_until_remote_running() {
        let (mut session, mut host, _blocker) = running_session().await;
        connect(&session);
        push(&session, &hand_frame("2024-01-01T00:00:00", 21));
        let report = session.tick(&mut host).await;
        assert_eq!(report.errors, 0);
        assert_eq!(session.stats().frames_discarded, 1);
        assert!(session.previous_timestamp().is_none());
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_frame_applies_rotation() {
        let (mut session, mut host, _blocker) = streaming_session().await;
        let quarter_z = Rotation::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let mut theta = vec!["[1,0,0,0]".to_string(); 21];
        let q = quarter_z.quaternion();
        theta[2] = format!("[{},{},{},{}]", q.w, q.i, q.j, q.k);
        push(
            &session,
            &format!(
                r#"{{"type":"frame","ts":1700000000.0,"hands":{{"Right":{{"theta":[{}],"xyz":[[0.1,0.2,0.3]]}}}}}}"#,
                theta.join(",")
            ),
        );
        let report = session.tick(&mut host).await;
        assert_eq!(report.errors, 0);

        let rig = host.rig_by_name("right_hand").unwrap();
        assert!(rotations_close(&rig.pose_rotation("right_thumb2").unwrap(), &quarter_z, 1e-9));
        assert!(rotations_close(&rig.pose_rotation("right_thumb1").unwrap(), &Rotation::identity(), 1e-9));
        assert!((rig.root_position() - Vector3::new(0.1, 0.2, 0.3)).norm() < 1e-12);
        assert!(rig.keyframes().is_empty());
        assert_eq!(session.stats().frames_applied, 1);
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_joint_count_mismatch_keeps_previous_timestamp() {
        let (mut session, mut host, _blocker) = streaming_session().await;
        push(&session, &hand_frame("2024-01-01T00:00:00", 21));
        session.tick(&mut host).await;
        let previous = session.previous_timestamp();
        assert!(previous.is_some());

        push(&session, &hand_frame("2024-01-01T00:00:05", 20));
        let report = session.tick(&mut host).await;
        assert_eq!(report.errors, 1);
        assert_eq!(session.previous_timestamp(), previous);
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.stats().frames_skipped, 1);
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_recording_advances_cursor_by_100() {
        let (mut session, mut host, _blocker) = streaming_session().await;
        session.start_recording().unwrap();
        assert_eq!(session.start_recording(), Err(RigError::AlreadyRecording));

        push(&session, &hand_frame("2024-01-01T00:00:00", 21));
        session.tick(&mut host).await;
        let first = host.time_cursor();
        push(&session, &hand_frame("2024-01-01T00:00:01", 21));
        session.tick(&mut host).await;

        assert_eq!(host.time_cursor() - first, 100);
        assert!(host.recording_end() >= host.time_cursor());
        let rig = host.rig_by_name("left_hand").unwrap();
        let frames: Vec<i64> = rig.keyframes_for("left_root").iter().map(|k| k.frame).collect();
        assert_eq!(frames, vec![first, first + 100]);

        session.stop_recording().unwrap();
        assert_eq!(session.stop_recording(), Err(RigError::NotRecording));
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_remote_error_stops_within_one_tick() {
        let (mut session, mut host, _blocker) = streaming_session().await;
        // A decode streak in progress must not delay the fatal error
        push(&session, "not json");
        session.tick(&mut host).await;
        push(&session, r#"{"type":"error","message":"camera lost"}"#);
        push(&session, &hand_frame("2024-01-01T00:00:00", 21));
        let report = session.tick(&mut host).await;

        assert!(report.stopped);
        assert_eq!(report.fault, FaultChange::Raised);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.fault(), Some(&RigError::RemoteFault("camera lost".into())));
        assert_eq!(session.stats().frames_applied, 0);
    }

    #[tokio::test]
    async fn test_persistent_decode_errors_become_visible() {
        let (config, _blocker) = config_with_blocker().await;
        let config = ReceiverConfig {
            tick_rate_hz: 5,
            ..config
        };
        let mut session = Session::new(config);
        let mut host = MemoryHost::new();
        session.start(&mut host).await.unwrap();
        connect(&session);

        for _ in 0..4 {
            push(&session, "{");
            assert_eq!(session.tick(&mut host).await.fault, FaultChange::Unchanged);
        }
        push(&session, "{");
        assert_eq!(session.tick(&mut host).await.fault, FaultChange::Raised);
        assert!(session.status().fault.is_some());
        assert_eq!(session.state(), SessionState::Running);

        assert_eq!(session.tick(&mut host).await.fault, FaultChange::Cleared);
        assert!(session.status().fault.is_none());
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_disconnect_resets_remote_flags() {
        let (mut session, mut host, _blocker) = streaming_session().await;
        session.start_recording().unwrap();
        session
            .transport()
            .enqueue_incoming(TransportEvent::Disconnected { id: PEER });
        session.tick(&mut host).await;

        assert_eq!(session.state(), SessionState::Running);
        assert!(!session.is_connected());
        assert!(!session.is_running());
        assert!(!session.is_recording());
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_remote_commands() {
        let (mut session, mut host, _blocker) = running_session().await;
        assert_eq!(session.request_remote_start(), Err(RigError::NotConnected));

        let addr = SocketAddr::new([127, 0, 0, 1].into(), session.port().unwrap());
        let client = TcpStream::connect(addr).await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !session.is_connected() && Instant::now() < deadline {
            session.tick(&mut host).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        session.request_remote_start().unwrap();
        assert!(!session.status().can_toggle_capture);
        assert_eq!(session.request_remote_stop(), Err(RigError::TransitionInProgress));

        let (read_half, mut write_half) = client.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line, r#"{"type":"command","command":"start"}"#);

        write_half
            .write_all(b"{\"type\":\"state\",\"isRunning\":true}\n")
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !session.is_running() && Instant::now() < deadline {
            session.tick(&mut host).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(session.is_running());
        assert!(!session.is_in_transition());
        assert!(session.status().can_record);
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_second_connection_rejected() {
        let (mut session, mut host, _blocker) = running_session().await;
        let addr = SocketAddr::new([127, 0, 0, 1].into(), session.port().unwrap());

        let mut first = TcpStream::connect(addr).await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !session.is_connected() && Instant::now() < deadline {
            session.tick(&mut host).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = TcpStream::connect(addr).await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.stats().connections_rejected == 0 && Instant::now() < deadline {
            session.tick(&mut host).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(session.stats().connections_rejected, 1);

        // The rejected peer sees its connection closed
        let mut second_lines = BufReader::new(second).lines();
        let eof = tokio::time::timeout(Duration::from_secs(2), second_lines.next_line()).await;
        assert!(matches!(eof, Ok(Ok(None)) | Ok(Err(_))));

        first
            .write_all(b"{\"type\":\"state\",\"isRunning\":true}\n")
            .await
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !session.is_running() && Instant::now() < deadline {
            session.tick(&mut host).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(session.is_running());
        assert!(session.is_connected());
        session.stop(&mut host).await;
    }

    async fn tick_until<F>(session: &mut Session, host: &mut MemoryHost, done: F)
    where
        F: Fn(&Session) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done(session) && Instant::now() < deadline {
            session.tick(host).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_malformed_line_keeps_peer_and_recording() {
        let (mut session, mut host, _blocker) = running_session().await;
        let addr = SocketAddr::new([127, 0, 0, 1].into(), session.port().unwrap());
        let mut client = TcpStream::connect(addr).await.unwrap();
        tick_until(&mut session, &mut host, Session::is_connected).await;

        client
            .write_all(b"{\"type\":\"state\",\"isRunning\":true}\n")
            .await
            .unwrap();
        tick_until(&mut session, &mut host, Session::is_running).await;
        session.start_recording().unwrap();

        client
            .write_all(b"{\"type\":\"frame\",\"ts\":\"\xff\xfe\"}\n{\"type\":\"state\",\"isRunning\":true}\n")
            .await
            .unwrap();
        tick_until(&mut session, &mut host, |s| s.stats().frames_skipped > 0).await;
        tick_until(&mut session, &mut host, |s| s.stats().messages_processed >= 3).await;

        assert_eq!(session.stats().frames_skipped, 1);
        assert!(session.is_connected());
        assert!(session.is_running());
        assert!(session.is_recording());
        assert_eq!(session.state(), SessionState::Running);
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_rejected_peer_cannot_crowd_out_first() {
        let (config, _blocker) = config_with_blocker().await;
        let mut session = Session::new(ReceiverConfig {
            queue_capacity: 8,
            ..config
        });
        let mut host = MemoryHost::new();
        session.start(&mut host).await.unwrap();
        let addr = SocketAddr::new([127, 0, 0, 1].into(), session.port().unwrap());

        let mut first = TcpStream::connect(addr).await.unwrap();
        tick_until(&mut session, &mut host, Session::is_connected).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        // The rejected socket may already be closed; its writes are best effort
        let _ = second.write_all("junk\n".repeat(100).as_bytes()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        first
            .write_all(b"{\"type\":\"state\",\"isRunning\":true}\n")
            .await
            .unwrap();

        tick_until(&mut session, &mut host, Session::is_running).await;
        assert!(session.is_running());
        assert_eq!(session.stats().queue_drops, 0);
        assert_eq!(session.stats().connections_rejected, 1);
        assert!(session.fault().is_none());
        session.stop(&mut host).await;
    }

    #[tokio::test]
    async fn test_external_playback_stops_session() {
        let (mut session, mut host, _blocker) = running_session().await;
        host.set_playing(true);
        let report = session.tick(&mut host).await;
        assert!(report.stopped);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_while_recording_defers_restore() {
        let (mut session, mut host, _blocker) = streaming_session().await;
        let quarter_z = Rotation::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let q = quarter_z.quaternion();
        let theta = vec![format!("[{},{},{},{}]", q.w, q.i, q.j, q.k); 21].join(",");
        push(
            &session,
            &format!(r#"{{"type":"frame","ts":0,"hands":{{"Left":{{"theta":[{theta}]}}}}}}"#),
        );
        session.start_recording().unwrap();
        session.tick(&mut host).await;

        session.stop(&mut host).await;
        assert!(session.has_deferred_restore());
        let rig = host.rig_by_name("left_hand").unwrap();
        assert!(rotations_close(&rig.pose_rotation("left_root").unwrap(), &quarter_z, 1e-9));

        assert!(!session.poll_deferred(&mut host, Instant::now()));
        assert!(session.poll_deferred(&mut host, Instant::now() + Duration::from_secs(1)));
        let rig = host.rig_by_name("left_hand").unwrap();
        assert_eq!(rig.pose_rotation("left_root"), Some(Rotation::identity()));
    }

    #[tokio::test]
    async fn test_reset_pose_on_demand() {
        let (mut session, mut host, _blocker) = streaming_session().await;
        push(&session, r#"{"type":"frame","ts":0,"bones":{"spine":[0,0,0,1]}}"#);
        session.tick(&mut host).await;
        assert_ne!(
            host.rig_by_name("root").unwrap().pose_rotation("spine"),
            Some(Rotation::identity())
        );

        session.reset_pose(&mut host).unwrap();
        assert_eq!(
            host.rig_by_name("root").unwrap().pose_rotation("spine"),
            Some(Rotation::identity())
        );
        session.stop(&mut host).await;
        assert_eq!(session.reset_pose(&mut host), Err(RigError::NotRunning));
    }

    #[tokio::test]
    async fn test_change_port_while_running() {
        let (mut session, mut host, _blocker) = running_session().await;
        let other = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let held = other.local_addr().unwrap().port();

        let bound = session.change_port(&mut host, held).await.unwrap().unwrap();
        assert_ne!(bound, held);
        assert_eq!(session.port(), Some(bound));
        assert_eq!(session.config().bind_port, held);
        assert!(session.change_port(&mut host, 0).await.is_err());
        session.stop(&mut host).await;

        assert_eq!(session.change_port(&mut host, held).await, Ok(None));
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (mut session, mut host, _blocker) = streaming_session().await;
        let status = session.status();
        assert_eq!(status.state, SessionState::Running);
        assert!(status.connected);
        assert!(status.running);
        assert!(status.can_toggle_capture);
        assert!(status.can_record);
        assert!(status.fault.is_none());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "running");
        session.stop(&mut host).await;
    }
}
