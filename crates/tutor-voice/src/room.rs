//! Room connection used by a session.
//!
//! A connected room has two halves. The agent side, [`Room`], is what the
//! session bootstrapper and the pipeline see: participants, the inbound
//! audio stream, and the outbound audio sink. The media side,
//! [`RoomBridge`], is driven by whatever moves audio in and out of the real
//! room (the LiveKit media gateway, the HTTP bridge, or a test).

use crate::error::VoiceError;
use crate::service::VoiceService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};
use tutor_types::{AudioFrame, Participant};

/// Capacity of the inbound audio channel per room. At 20 ms per frame this
/// buffers roughly ten seconds of speech while the pipeline is busy.
const AUDIO_IN_CAPACITY: usize = 512;

/// Default interval between LiveKit participant list refreshes.
pub const DEFAULT_PARTICIPANT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which remote tracks the agent subscribes to on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSubscribe {
    #[default]
    SubscribeAll,
    SubscribeNone,
    AudioOnly,
    VideoOnly,
}

impl AutoSubscribe {
    pub fn audio(self) -> bool {
        matches!(self, Self::SubscribeAll | Self::AudioOnly)
    }

    pub fn video(self) -> bool {
        matches!(self, Self::SubscribeAll | Self::VideoOnly)
    }
}

/// An inbound audio frame tagged with the participant who produced it.
#[derive(Debug, Clone)]
pub struct ParticipantAudio {
    pub identity: String,
    pub frame: AudioFrame,
}

/// Agent side of a connected room.
#[derive(Debug)]
pub struct Room {
    name: String,
    subscribe: AutoSubscribe,
    participants: watch::Receiver<Vec<Participant>>,
    audio_in: Mutex<Option<mpsc::Receiver<ParticipantAudio>>>,
    audio_out: mpsc::UnboundedSender<AudioFrame>,
    closed: watch::Receiver<bool>,
    close_tx: Arc<watch::Sender<bool>>,
}

impl Room {
    /// Creates both halves of a connected room.
    pub fn pair(name: impl Into<String>, subscribe: AutoSubscribe) -> (Room, RoomBridge) {
        let name = name.into();
        let (participants_tx, participants_rx) = watch::channel(Vec::new());
        let (audio_in_tx, audio_in_rx) = mpsc::channel(AUDIO_IN_CAPACITY);
        let (audio_out_tx, audio_out_rx) = mpsc::unbounded_channel();
        let (close_tx, closed_rx) = watch::channel(false);
        let close_tx = Arc::new(close_tx);

        let room = Room {
            name: name.clone(),
            subscribe,
            participants: participants_rx,
            audio_in: Mutex::new(Some(audio_in_rx)),
            audio_out: audio_out_tx,
            closed: closed_rx.clone(),
            close_tx: Arc::clone(&close_tx),
        };
        let bridge = RoomBridge {
            name,
            subscribe,
            participants: participants_tx,
            audio_in: audio_in_tx,
            audio_out: tokio::sync::Mutex::new(audio_out_rx),
            closed: closed_rx,
            close_tx,
            join_token: OnceLock::new(),
        };
        (room, bridge)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscription(&self) -> AutoSubscribe {
        self.subscribe
    }

    /// Remote participants currently in the room.
    pub fn participants(&self) -> Vec<Participant> {
        self.participants.borrow().clone()
    }

    /// Suspends until a remote, non-agent participant is present. With an
    /// `identity`, only that participant satisfies the wait.
    pub async fn wait_for_participant(
        &self,
        identity: Option<&str>,
    ) -> Result<Participant, VoiceError> {
        let mut participants = self.participants.clone();
        let mut closed = self.closed.clone();

        loop {
            let found = participants
                .borrow_and_update()
                .iter()
                .find(|p| !p.is_agent() && identity.map_or(true, |id| p.identity == id))
                .cloned();
            if let Some(participant) = found {
                return Ok(participant);
            }
            if *closed.borrow_and_update() {
                return Err(VoiceError::RoomClosed(self.name.clone()));
            }

            tokio::select! {
                changed = participants.changed() => {
                    if changed.is_err() {
                        return Err(VoiceError::RoomClosed(self.name.clone()));
                    }
                }
                changed = closed.changed() => {
                    if changed.is_err() {
                        return Err(VoiceError::RoomClosed(self.name.clone()));
                    }
                }
            }
        }
    }

    /// Takes the inbound audio stream. Only one consumer may own it.
    pub fn take_audio_stream(&self) -> Result<mpsc::Receiver<ParticipantAudio>, VoiceError> {
        self.audio_in
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| VoiceError::AudioStreamTaken(self.name.clone()))
    }

    /// Publishes one frame of agent audio into the room.
    pub fn publish_frame(&self, frame: AudioFrame) -> Result<(), VoiceError> {
        if self.is_closed() {
            return Err(VoiceError::RoomClosed(self.name.clone()));
        }
        self.audio_out
            .send(frame)
            .map_err(|_| VoiceError::RoomClosed(self.name.clone()))
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the room is closed from either side.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|c| *c).await;
    }

    pub fn disconnect(&self) {
        if !self.close_tx.send_replace(true) {
            info!(room = %self.name, "agent disconnected from room");
        }
    }
}

/// Media side of a connected room.
#[derive(Debug)]
pub struct RoomBridge {
    name: String,
    subscribe: AutoSubscribe,
    participants: watch::Sender<Vec<Participant>>,
    audio_in: mpsc::Sender<ParticipantAudio>,
    audio_out: tokio::sync::Mutex<mpsc::UnboundedReceiver<AudioFrame>>,
    closed: watch::Receiver<bool>,
    close_tx: Arc<watch::Sender<bool>>,
    join_token: OnceLock<String>,
}

impl RoomBridge {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a participant, replacing any entry with the same identity.
    pub fn join(&self, participant: Participant) {
        info!(
            room = %self.name,
            identity = %participant.identity,
            kind = ?participant.kind,
            "participant joined"
        );
        self.participants.send_modify(|list| {
            list.retain(|p| p.identity != participant.identity);
            list.push(participant);
        });
    }

    /// Removes a participant. Returns `false` if it was not present.
    pub fn leave(&self, identity: &str) -> bool {
        let removed = self.participants.send_if_modified(|list| {
            let before = list.len();
            list.retain(|p| p.identity != identity);
            list.len() != before
        });
        if removed {
            info!(room = %self.name, identity, "participant left");
        }
        removed
    }

    /// Replaces the participant list wholesale, notifying waiters only when
    /// it actually changed.
    pub fn set_participants(&self, participants: Vec<Participant>) {
        self.participants.send_if_modified(|list| {
            if *list == participants {
                false
            } else {
                *list = participants;
                true
            }
        });
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.participants.borrow().clone()
    }

    /// Delivers a frame from `identity` to the agent. Returns `Ok(false)` if
    /// the agent did not subscribe to audio.
    pub async fn push_audio(&self, identity: &str, frame: AudioFrame) -> Result<bool, VoiceError> {
        if self.is_closed() {
            return Err(VoiceError::RoomClosed(self.name.clone()));
        }
        if !self.subscribe.audio() {
            return Ok(false);
        }

        let item = ParticipantAudio {
            identity: identity.to_string(),
            frame,
        };
        tokio::select! {
            sent = self.audio_in.send(item) => {
                sent.map_err(|_| VoiceError::RoomClosed(self.name.clone()))?;
                Ok(true)
            }
            () = self.closed() => Err(VoiceError::RoomClosed(self.name.clone())),
        }
    }

    /// Waits for the next frame the agent published.
    pub async fn recv_published(&self) -> Option<AudioFrame> {
        self.audio_out.lock().await.recv().await
    }

    /// Returns every frame published so far without waiting.
    pub async fn drain_published(&self) -> Vec<AudioFrame> {
        let mut rx = self.audio_out.lock().await;
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn set_join_token(&self, token: String) {
        if self.join_token.set(token).is_err() {
            debug!(room = %self.name, "join token already set");
        }
    }

    /// Token the media gateway uses to join the LiveKit room on the agent's
    /// behalf, when LiveKit is configured.
    pub fn join_token(&self) -> Option<&str> {
        self.join_token.get().map(String::as_str)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|c| *c).await;
    }

    /// Closes the room, ending the session bound to it.
    pub fn close(&self) {
        if !self.close_tx.send_replace(true) {
            info!(room = %self.name, "room closed");
        }
    }
}

/// Opens room connections for sessions.
#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn connect(
        &self,
        room_name: &str,
        subscribe: AutoSubscribe,
    ) -> Result<Arc<Room>, VoiceError>;
}

/// Open rooms by name, shared between the connector and the media side.
///
/// Uses `std::sync::RwLock`: every acquisition is a brief map operation that
/// never spans an `.await`.
#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    rooms: RwLock<HashMap<String, Arc<RoomBridge>>>,
    notify: Notify,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bridge. A closed room with the same name is replaced; an
    /// open one is an error.
    pub fn insert(&self, bridge: Arc<RoomBridge>) -> Result<(), VoiceError> {
        {
            let mut rooms = self
                .inner
                .rooms
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            rooms.retain(|_, b| !b.is_closed());
            if rooms.contains_key(bridge.name()) {
                return Err(VoiceError::RoomAlreadyConnected(bridge.name().to_string()));
            }
            rooms.insert(bridge.name().to_string(), bridge);
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Returns the bridge of an open room.
    pub fn get(&self, name: &str) -> Option<Arc<RoomBridge>> {
        self.inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .filter(|b| !b.is_closed())
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<RoomBridge>> {
        self.inner
            .rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Names of open rooms, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, b)| !b.is_closed())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Suspends until a room with this name is open.
    pub async fn wait_for(&self, name: &str) -> Arc<RoomBridge> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(bridge) = self.get(name) {
                return bridge;
            }
            notified.await;
        }
    }
}

/// Connector that hands each room's media side to a [`RoomRegistry`].
///
/// With a LiveKit [`VoiceService`], connecting first makes sure the room
/// exists on the server and mints the agent's join token, then mirrors the
/// server's participant list into the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    registry: RoomRegistry,
    livekit: Option<Arc<VoiceService>>,
    poll_interval: Duration,
}

impl BridgeConnector {
    pub fn new(registry: RoomRegistry) -> Self {
        Self {
            registry,
            livekit: None,
            poll_interval: DEFAULT_PARTICIPANT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_livekit(mut self, service: Arc<VoiceService>) -> Self {
        self.livekit = Some(service);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }
}

#[async_trait]
impl RoomConnector for BridgeConnector {
    async fn connect(
        &self,
        room_name: &str,
        subscribe: AutoSubscribe,
    ) -> Result<Arc<Room>, VoiceError> {
        let token = match &self.livekit {
            Some(service) => {
                let room = service.create_room(room_name).await?;
                debug!(room = %room.name, sid = %room.sid, "livekit room ready");
                Some(service.generate_agent_token(room_name)?)
            }
            None => None,
        };

        let (room, bridge) = Room::pair(room_name, subscribe);
        let bridge = Arc::new(bridge);
        if let Some(token) = token {
            bridge.set_join_token(token);
        }
        self.registry.insert(Arc::clone(&bridge))?;

        if let Some(service) = &self.livekit {
            tokio::spawn(sync_participants(
                Arc::clone(service),
                Arc::clone(&bridge),
                self.poll_interval,
            ));
        }

        info!(room = room_name, ?subscribe, "connected to room");
        Ok(Arc::new(room))
    }
}

/// Mirrors the LiveKit participant list into the bridge until the room
/// closes. The agent's own identity is filtered out.
async fn sync_participants(service: Arc<VoiceService>, bridge: Arc<RoomBridge>, interval: Duration) {
    loop {
        tokio::select! {
            _ = bridge.closed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match service.list_participants(bridge.name()).await {
            Ok(list) => {
                let remote = list
                    .into_iter()
                    .filter(|p| p.identity != service.agent_identity())
                    .collect();
                bridge.set_participants(remote);
            }
            Err(e) => warn!(room = %bridge.name(), "failed to list participants: {}", e),
        }
    }
    debug!(room = %bridge.name(), "participant sync stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_types::ParticipantKind;

    #[tokio::test]
    async fn wait_for_participant_ignores_agents() {
        let (room, bridge) = Room::pair("lesson-1", AutoSubscribe::AudioOnly);
        bridge.join(Participant::new("other-agent").with_kind(ParticipantKind::Agent));

        let waiter = tokio::spawn(async move { room.wait_for_participant(None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        bridge.join(Participant::new("student"));
        let participant = waiter.await.unwrap().expect("participant should arrive");
        assert_eq!(participant.identity, "student");
    }

    #[tokio::test]
    async fn wait_for_participant_fails_when_room_closes() {
        let (room, bridge) = Room::pair("lesson-1", AutoSubscribe::AudioOnly);
        let waiter = tokio::spawn(async move { room.wait_for_participant(None).await });
        bridge.close();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, VoiceError::RoomClosed(name) if name == "lesson-1"));
    }

    #[tokio::test]
    async fn audio_is_dropped_without_audio_subscription() {
        let (room, bridge) = Room::pair("video-room", AutoSubscribe::VideoOnly);
        let delivered = bridge
            .push_audio("student", AudioFrame::silence(16_000, Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(!delivered);

        let mut stream = room.take_audio_stream().unwrap();
        assert!(stream.try_recv().is_err());
        assert!(matches!(
            room.take_audio_stream(),
            Err(VoiceError::AudioStreamTaken(_))
        ));
    }

    #[tokio::test]
    async fn published_frames_reach_the_bridge() {
        let (room, bridge) = Room::pair("lesson-1", AutoSubscribe::AudioOnly);
        let frame = AudioFrame::new(vec![1, 2, 3], 24_000, 1);
        room.publish_frame(frame.clone()).unwrap();
        assert_eq!(bridge.drain_published().await, vec![frame]);

        room.disconnect();
        assert!(bridge.is_closed());
        assert!(matches!(
            room.publish_frame(AudioFrame::new(vec![0], 24_000, 1)),
            Err(VoiceError::RoomClosed(_))
        ));
    }

    #[tokio::test]
    async fn registry_rejects_duplicate_open_rooms() {
        let registry = RoomRegistry::new();
        let connector = BridgeConnector::new(registry.clone());

        let room = connector
            .connect("lesson-1", AutoSubscribe::AudioOnly)
            .await
            .unwrap();
        let err = connector
            .connect("lesson-1", AutoSubscribe::AudioOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::RoomAlreadyConnected(_)));

        room.disconnect();
        assert!(registry.get("lesson-1").is_none());
        connector
            .connect("lesson-1", AutoSubscribe::AudioOnly)
            .await
            .expect("closed room should be replaced");
        assert_eq!(registry.names(), vec!["lesson-1".to_string()]);
    }

    #[tokio::test]
    async fn registry_wait_for_resolves_after_connect() {
        let registry = RoomRegistry::new();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_for("lesson-2").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let connector = BridgeConnector::new(registry);
        let _room = connector
            .connect("lesson-2", AutoSubscribe::AudioOnly)
            .await
            .unwrap();
        let bridge = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_for should resolve")
            .unwrap();
        assert_eq!(bridge.name(), "lesson-2");
    }

    #[test]
    fn leave_reports_unknown_identity() {
        let (_room, bridge) = Room::pair("lesson-1", AutoSubscribe::AudioOnly);
        bridge.join(Participant::new("student"));
        assert!(bridge.leave("student"));
        assert!(!bridge.leave("student"));
        assert!(bridge.participants().is_empty());
    }
}
