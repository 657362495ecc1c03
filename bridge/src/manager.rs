//! Composition root: wires the transport, decoder, binder, command table and
//! render throttle together and exposes the API the block layer calls.
//!
//! Everything here runs on the host's own scheduling domain. The network thread
//! only moves bytes; decoding, snapshot replacement, scene writes and command
//! serialization all happen inside `poll`/`step` calls made by the host.

use std::time::Instant;

use rlbridge_shared::config::{BridgeConfig, Endpoint};
use rlbridge_shared::protocol::{
    decode_snapshot, decode_snapshot_json, ControllerCommand, GameSnapshot, PlayerState,
};
use rlbridge_shared::vec3::{sub, Vector3};

use crate::binder::{EntityBinder, EntityRole};
use crate::control::{ControlChannel, ControlField, SubscriptionTable};
use crate::coord::{angle_to_target_to_simulator_radians, map_heading, map_position, shortest_turn};
use crate::events::{CommandChanged, EventPorts, FilterChanged};
use crate::scene::SceneHost;
use crate::throttle::RenderThrottle;
use crate::transport::{InboundFrame, Transport, TransportEvent, TransportSession};

pub struct SyncManager<T: Transport, S: SceneHost> {
    config: BridgeConfig,
    transport: T,
    host: S,
    snapshot: Option<GameSnapshot>,
    binder: EntityBinder<S::Handle>,
    subscriptions: SubscriptionTable,
    control: ControlChannel,
    throttle: RenderThrottle,
    events: EventPorts<S::Handle>,
    connected: bool,
    frames_received: u64,
    decode_errors: u64,
}

impl<S: SceneHost> SyncManager<TransportSession, S> {
    /// Start a live session to the configured host.
    pub fn connect(config: BridgeConfig, host: S) -> Self {
        let transport = TransportSession::connect(config.endpoint(), config.reconnect_delay);
        Self::new(config, transport, host)
    }
}

impl<T: Transport, S: SceneHost> SyncManager<T, S> {
    pub fn new(config: BridgeConfig, transport: T, host: S) -> Self {
        let max_players = config.max_players;
        Self {
            binder: EntityBinder::new(max_players),
            subscriptions: SubscriptionTable::new(max_players),
            control: ControlChannel::new(max_players),
            throttle: RenderThrottle::new(config.render_interval),
            events: EventPorts::new(config.event_capacity),
            config,
            transport,
            host,
            snapshot: None,
            connected: false,
            frames_received: 0,
            decode_errors: 0,
        }
    }

    pub fn events(&self) -> &EventPorts<S::Handle> {
        &self.events
    }

    pub fn host(&self) -> &S {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut S {
        &mut self.host
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The latest decoded frame, if any has arrived.
    pub fn snapshot(&self) -> Option<&GameSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Frames dropped because they could not be decoded.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    // === Connection ===

    /// Point the bridge at a new simulator. A host without a port gets the default one.
    pub fn set_host(&mut self, host: &str) {
        let endpoint = Endpoint::resolve(host, self.config.default_port);
        self.config.host = host.trim().to_string();
        self.transport.set_endpoint(endpoint);
    }

    /// Drain transport events and process every inbound frame in arrival order.
    pub fn poll(&mut self, now: Instant) {
        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Connected => self.set_connected(true),
                TransportEvent::Disconnected => self.set_connected(false),
                TransportEvent::Frame(frame) => self.handle_frame(&frame, now),
            }
        }
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            self.events.publish_connectivity(connected);
        }
    }

    /// Decode one frame, replace the snapshot, move bound entities if the render
    /// throttle allows it and notify the interpreter.
    pub fn handle_frame(&mut self, frame: &InboundFrame, now: Instant) {
        let decoded = match frame {
            InboundFrame::Binary(bytes) => decode_snapshot(bytes),
            InboundFrame::Text(text) => decode_snapshot_json(text),
        };
        let snapshot = match decoded {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.decode_errors += 1;
                tracing::warn!(
                    "Dropping undecodable frame ({} so far): {}",
                    self.decode_errors,
                    e
                );
                return;
            }
        };

        self.snapshot = Some(snapshot);
        self.frames_received += 1;
        self.set_connected(true);

        self.discover_targets();
        if self.throttle.should_apply(now) {
            self.render();
        }
        self.host.broadcast_new_data();
    }

    /// Bind scene entities for simulator slots that have none yet. Skipped entirely
    /// once every reported slot is bound.
    fn discover_targets(&mut self) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        let player_count = snapshot.players.len().min(self.config.max_players);
        let ball_present = snapshot.ball.is_some();
        if !self.binder.has_unbound(player_count, ball_present) {
            return;
        }

        let candidates: Vec<_> = self
            .host
            .entities()
            .into_iter()
            .filter_map(|entity| self.host.identity(entity).map(|name| (entity, name)))
            .collect();

        for (entity, role) in self.binder.discover(candidates, player_count, ball_present) {
            tracing::debug!("Discovered {:?} as {:?}", entity, role);
            if let EntityRole::Player(index) = role {
                self.apply_subscription(index);
            }
        }
    }

    fn render(&mut self) {
        let Some(snapshot) = &self.snapshot else {
            return;
        };
        let scale = self.config.coordinate_scale;

        if let (Some(entity), Some(ball)) = (self.binder.ball(), &snapshot.ball) {
            self.host
                .set_position(entity, map_position(ball.location, scale));
        }

        for (index, entity) in self.binder.players() {
            if let Some(player) = snapshot.player(index) {
                self.host
                    .set_position(entity, map_position(player.location, scale));
                self.host
                    .set_heading(entity, map_heading(player.rotation.yaw as f64));
            }
        }
    }

    // === Binding ===

    /// (Re)bind a scene entity according to its name. Returns the role it was bound
    /// to, or None if the name means nothing to the bridge.
    pub fn init_target(&mut self, entity: S::Handle) -> Option<EntityRole> {
        let previous = self.binder.unbind(entity);
        let role = self
            .host
            .identity(entity)
            .and_then(|name| EntityRole::from_identity(&name));

        // A renamed player leaves its old slot the same way a forgotten one does.
        if let Some(EntityRole::Player(old)) = previous {
            if role != previous {
                self.release_player(old);
            }
        }

        let role = role?;
        if !self.binder.bind(entity, role) {
            return None;
        }
        tracing::debug!("Bound {:?} as {:?}", entity, role);

        if let EntityRole::Player(index) = role {
            self.apply_subscription(index);
        }
        Some(role)
    }

    /// Drop every binding to `entity`. For a player this also deletes its
    /// subscription and command. Takes effect before the next render or step.
    pub fn forget_target(&mut self, entity: S::Handle) {
        match self.binder.unbind(entity) {
            Some(EntityRole::Player(index)) => {
                self.release_player(index);
                tracing::debug!("Forgot player {} ({:?})", index, entity);
            }
            Some(EntityRole::Ball) => tracing::debug!("Forgot ball ({:?})", entity),
            None => {}
        }
    }

    fn release_player(&mut self, index: usize) {
        self.control.disable(index);
        self.subscriptions.clear(index);
    }

    /// A newly bound player is driven unless the host switched it off earlier.
    fn apply_subscription(&mut self, index: usize) {
        if self.subscriptions.state(index) == Some(false) {
            return;
        }
        self.subscriptions.set(index, true);
        self.control.enable(index);
    }

    // === Commands ===

    pub fn filter_player(&mut self, index: usize, enabled: bool) {
        if !self.subscriptions.set(index, enabled) {
            return;
        }

        if enabled {
            self.control.enable(index);
            return;
        }

        self.control.disable(index);
        if let Some(entity) = self.binder.player(index) {
            self.host.stop_scripts(entity);
            self.events.publish_filter_changed(FilterChanged {
                entity,
                index,
                enabled,
            });
        }
    }

    /// Set one field of a subscribed player's command. Silently ignored otherwise.
    pub fn update_controller_state(&mut self, index: usize, field: ControlField, value: f64) {
        if let Some(command) = self.control.update(index, field, value) {
            self.events
                .publish_command_changed(CommandChanged { index, command });
        }
    }

    pub fn get_controller_state(&self, index: usize) -> Option<ControllerCommand> {
        self.control.command(index)
    }

    pub fn is_subscribed(&self, index: usize) -> bool {
        self.subscriptions.is_enabled(index)
    }

    /// Send the full command table. Call once per host simulation step; does nothing
    /// while disconnected. Returns true if a payload went out.
    pub fn step(&mut self) -> bool {
        if !self.transport.is_connected() {
            return false;
        }
        let payload = match self.control.serialize_outbound() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to serialize controller state: {}", e);
                return false;
            }
        };
        let changed = self.control.is_dirty();
        if !self.transport.send(payload) {
            return false;
        }
        if changed {
            tracing::debug!(
                "Sent updated controller state for players {:?}",
                self.control.active_indices().collect::<Vec<_>>()
            );
        }
        self.control.mark_sent();
        true
    }

    // === Queries ===
    //
    // Never throttled, always the latest snapshot, and a zero value when the
    // snapshot or the requested entity is missing.

    fn player(&self, index: usize) -> Option<&PlayerState> {
        self.snapshot.as_ref()?.player(index)
    }

    pub fn get_player_location(&self, index: usize) -> Vector3 {
        self.player(index)
            .map(|p| map_position(p.location, self.config.coordinate_scale))
            .unwrap_or_default()
    }

    pub fn get_player_velocity(&self, index: usize) -> Vector3 {
        self.player(index)
            .map(|p| map_position(p.velocity, self.config.coordinate_scale))
            .unwrap_or_default()
    }

    pub fn get_ball_location(&self) -> Vector3 {
        self.snapshot
            .as_ref()
            .and_then(|s| s.ball.as_ref())
            .map(|b| map_position(b.location, self.config.coordinate_scale))
            .unwrap_or_default()
    }

    pub fn get_ball_velocity(&self) -> Vector3 {
        self.snapshot
            .as_ref()
            .and_then(|s| s.ball.as_ref())
            .map(|b| map_position(b.velocity, self.config.coordinate_scale))
            .unwrap_or_default()
    }

    /// Raw simulator yaw.
    pub fn get_player_yaw_radians(&self, index: usize) -> f64 {
        self.player(index)
            .map(|p| p.rotation.yaw as f64)
            .unwrap_or(0.0)
    }

    pub fn get_player_pitch(&self, index: usize) -> f64 {
        self.player(index)
            .map(|p| p.rotation.pitch as f64)
            .unwrap_or(0.0)
    }

    pub fn get_player_roll(&self, index: usize) -> f64 {
        self.player(index)
            .map(|p| p.rotation.roll as f64)
            .unwrap_or(0.0)
    }

    pub fn get_player_boost(&self, index: usize) -> f64 {
        self.player(index).map(|p| p.boost as f64).unwrap_or(0.0)
    }

    /// -1 for blue (defends the negative-y goal), 1 for orange, 0 if unknown.
    pub fn get_player_defending_side(&self, index: usize) -> f64 {
        match self.player(index).map(|p| p.team) {
            Some(0) => -1.0,
            Some(_) => 1.0,
            None => 0.0,
        }
    }

    /// Signed degrees the player must turn to face `target` (scene space), taking
    /// the short way round.
    pub fn degrees_to(&self, index: usize, target: Vector3) -> f64 {
        let Some(player) = self.player(index) else {
            return 0.0;
        };
        let location = map_position(player.location, self.config.coordinate_scale);
        let to_target = sub(target, location);
        let ideal = angle_to_target_to_simulator_radians(to_target.y.atan2(to_target.x));
        shortest_turn(ideal - player.rotation.yaw as f64).to_degrees()
    }
}
