use crate::config::LiveKitConfig;
use crate::error::VoiceError;
use livekit_api::access_token::{AccessToken, VideoGrants};
use livekit_api::services::room::{CreateRoomOptions, RoomClient};
use livekit_protocol::{ParticipantInfo, Room};
use std::time::Duration;
use tutor_types::{Participant, ParticipantKind};

/// LiveKit Room Service client used by the worker to prepare rooms and
/// observe who is in them.
#[derive(Debug)]
pub struct VoiceService {
    config: LiveKitConfig,
    room_client: RoomClient,
}

impl VoiceService {
    pub fn new(config: LiveKitConfig) -> Self {
        let room_client =
            RoomClient::with_api_key(&config.url, &config.api_key, &config.api_secret);
        Self {
            config,
            room_client,
        }
    }

    pub fn get_url(&self) -> &str {
        &self.config.url
    }

    /// Returns the browser-facing URL. Falls back to the internal URL if no
    /// public URL is configured.
    pub fn get_public_url(&self) -> &str {
        if self.config.public_url.is_empty() {
            &self.config.url
        } else {
            &self.config.public_url
        }
    }

    pub fn agent_identity(&self) -> &str {
        &self.config.agent_identity
    }

    /// Creates the room, or returns the existing one with the same name.
    pub async fn create_room(&self, name: &str) -> Result<Room, VoiceError> {
        let options = CreateRoomOptions::default();

        self.room_client
            .create_room(name, options)
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))
    }

    pub fn generate_join_token(
        &self,
        room_name: &str,
        participant_identity: &str,
        participant_name: &str,
    ) -> Result<String, VoiceError> {
        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(participant_identity)
            .with_name(participant_name)
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(Duration::from_secs(self.config.token_ttl_seconds));

        token.to_jwt().map_err(VoiceError::LiveKit)
    }

    /// Join token for the agent itself.
    pub fn generate_agent_token(&self, room_name: &str) -> Result<String, VoiceError> {
        self.generate_join_token(
            room_name,
            &self.config.agent_identity,
            &self.config.agent_identity,
        )
    }

    pub async fn list_participants(&self, room_name: &str) -> Result<Vec<Participant>, VoiceError> {
        let infos = self
            .room_client
            .list_participants(room_name)
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))?;
        Ok(infos.iter().map(participant_from_info).collect())
    }
}

/// Maps LiveKit's `ParticipantInfo.Kind` wire values onto [`ParticipantKind`].
pub fn participant_kind_from_wire(kind: i32) -> ParticipantKind {
    match kind {
        1 => ParticipantKind::Ingress,
        2 => ParticipantKind::Egress,
        3 => ParticipantKind::Sip,
        4 => ParticipantKind::Agent,
        _ => ParticipantKind::Standard,
    }
}

fn participant_from_info(info: &ParticipantInfo) -> Participant {
    Participant::new(info.identity.clone())
        .with_name(info.name.clone())
        .with_kind(participant_kind_from_wire(info.kind))
}
