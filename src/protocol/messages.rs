// ABOUTME: Protocol message type definitions and parsing
// ABOUTME: Typed payloads for every control message plus the envelope parser

use crate::error::Error;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only protocol version spoken
pub const PROTOCOL_VERSION: u32 = 1;

/// Role names as they appear on the wire
pub mod roles {
    /// Audio playback role
    pub const PLAYER: &str = "player@v1";
    /// Track metadata role
    pub const METADATA: &str = "metadata@v1";
}

/// Goodbye reasons
pub mod goodbye {
    /// Another sender took over this player
    pub const ANOTHER_SERVER: &str = "another_server";
    /// The peer is going away
    pub const SHUTDOWN: &str = "shutdown";
    /// The peer will be back shortly
    pub const RESTART: &str = "restart";
    /// The user asked for it
    pub const USER_REQUEST: &str = "user_request";
}

/// Set of negotiated roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roles(u8);

impl Roles {
    /// No roles
    pub const NONE: Roles = Roles(0);
    /// `player@v1`
    pub const PLAYER: Roles = Roles(1);
    /// `metadata@v1`
    pub const METADATA: Roles = Roles(2);

    /// Collect the roles we know from a list of names; others are ignored
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        names.iter().fold(Roles::NONE, |acc, name| match name.as_ref() {
            roles::PLAYER => acc.union(Roles::PLAYER),
            roles::METADATA => acc.union(Roles::METADATA),
            _ => acc,
        })
    }

    /// Wire names of the roles in this set
    pub fn names(self) -> Vec<String> {
        let mut names = Vec::new();
        if self.contains(Roles::PLAYER) {
            names.push(roles::PLAYER.to_string());
        }
        if self.contains(Roles::METADATA) {
            names.push(roles::METADATA.to_string());
        }
        names
    }

    /// Both sets combined
    pub fn union(self, other: Roles) -> Roles {
        Roles(self.0 | other.0)
    }

    /// Roles present in both sets
    pub fn intersection(self, other: Roles) -> Roles {
        Roles(self.0 & other.0)
    }

    /// Whether every role of `other` is present
    pub fn contains(self, other: Roles) -> bool {
        self.0 & other.0 == other.0
    }

    /// True for the empty set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Why the sender opened this session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionReason {
    /// The sender found the player and wants it known
    #[default]
    Discovery,
    /// The sender wants the player to play now
    Playback,
    /// A reason this version does not know
    #[serde(other)]
    Unknown,
}

impl ConnectionReason {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionReason::Discovery => "discovery",
            ConnectionReason::Playback => "playback",
            ConnectionReason::Unknown => "unknown",
        }
    }
}

/// Group playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Audio is flowing
    Playing,
    /// Playback paused
    Paused,
    /// Playback stopped
    Stopped,
    /// A state this version does not know
    #[serde(other)]
    Unknown,
}

impl PlaybackState {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Unknown => "unknown",
        }
    }
}

/// Player synchronization state reported in client/state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerSyncState {
    /// Playing in sync
    Synchronized,
    /// Unable to play
    Error,
    /// A state this version does not know
    #[serde(other)]
    Unknown,
}

impl PlayerSyncState {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerSyncState::Synchronized => "synchronized",
            PlayerSyncState::Error => "error",
            PlayerSyncState::Unknown => "unknown",
        }
    }
}

/// Client hello message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHello {
    /// Unique client identifier
    pub client_id: String,
    /// Human-readable client name
    pub name: String,
    /// Protocol version number
    pub version: u32,
    /// Roles the client can take (e.g. "player@v1")
    #[serde(default)]
    pub supported_roles: Vec<String>,
    /// Device information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    /// Player capabilities, present when the client can play
    #[serde(
        rename = "player@v1_support",
        alias = "player_support",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub player_support: Option<PlayerSupport>,
}

/// Device information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Product name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    /// Manufacturer name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Software version string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

/// Player capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSupport {
    /// Formats in order of preference
    pub supported_formats: Vec<AudioFormatSpec>,
    /// Jitter buffer size in bytes
    pub buffer_capacity: u32,
    /// Commands the player accepts (e.g. "volume", "mute")
    #[serde(default)]
    pub supported_commands: Vec<String>,
}

/// One entry of `supported_formats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormatSpec {
    /// Codec name ("pcm", "opus", "flac")
    pub codec: String,
    /// Number of audio channels
    pub channels: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bit depth per sample
    pub bit_depth: u32,
}

/// Server hello message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerHello {
    /// Unique server identifier
    pub server_id: String,
    /// Human-readable server name
    pub name: String,
    /// Protocol version number
    pub version: u32,
    /// Roles activated for this client
    #[serde(default)]
    pub active_roles: Vec<String>,
    /// Why the server opened the session
    #[serde(default)]
    pub connection_reason: ConnectionReason,
}

/// Client time sync request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTime {
    /// Client clock when sent (microseconds)
    pub client_transmitted: u64,
}

/// Server time sync reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTime {
    /// Echo of the request's client timestamp
    pub client_transmitted: u64,
    /// Server clock when the request arrived
    pub server_received: u64,
    /// Server clock when the reply was sent
    pub server_transmitted: u64,
}

/// Client state message (client -> server)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    /// Player state (if client has player role)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerState>,
}

/// Player state in client/state message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Synchronization state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PlayerSyncState>,
    /// Current volume (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    /// Mute state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

/// Server state message (server -> client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    /// Metadata state (if client has metadata role)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataState>,
}

/// Metadata state in server/state message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataState {
    /// Server timestamp for this metadata
    pub timestamp: u64,
    /// Track title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Artist name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Album name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
}

/// Stream start message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStart {
    /// Player stream configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<StreamPlayerConfig>,
}

/// Stream player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPlayerConfig {
    /// Audio codec name
    pub codec: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of audio channels
    pub channels: u32,
    /// Bit depth per sample, PCM only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u32>,
    /// Optional codec-specific header (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_header: Option<String>,
}

/// Player's request for a different format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequestFormat {
    /// Requested player format; absent fields keep their current value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<FormatRequest>,
}

/// Fields of a format request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatRequest {
    /// Codec name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Sample rate in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Number of channels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    /// Bit depth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_depth: Option<u32>,
}

/// Stream end message (server -> client)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEnd {
    /// Roles to end streams for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// Stream clear message (server -> client)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamClear {
    /// Roles to clear buffers for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// Group update message (server -> client)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdate {
    /// Playback state of the group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<PlaybackState>,
    /// Group identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Group name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

/// Client goodbye message (client -> server)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientGoodbye {
    /// Reason for leaving, see [`goodbye`]
    pub reason: String,
}

/// Server command message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCommand {
    /// Command for the player role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerCommand>,
}

/// Player command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCommand {
    /// Command name ("volume" or "mute")
    pub command: String,
    /// Volume level (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    /// Mute state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
}

/// Client command message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCommand {
    /// Command for the controller role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerCommand>,
}

/// Controller command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerCommand {
    /// Command name (e.g. "play", "pause", "volume")
    pub command: String,
    /// Volume level (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    /// Mute state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
}

/// A parsed text message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// client/hello
    ClientHello(ClientHello),
    /// server/hello
    ServerHello(ServerHello),
    /// client/state
    ClientState(ClientState),
    /// server/state
    ServerState(ServerState),
    /// client/time
    ClientTime(ClientTime),
    /// server/time
    ServerTime(ServerTime),
    /// stream/start
    StreamStart(StreamStart),
    /// stream/end
    StreamEnd(StreamEnd),
    /// stream/clear
    StreamClear(StreamClear),
    /// stream/request-format
    StreamRequestFormat(StreamRequestFormat),
    /// group/update
    GroupUpdate(GroupUpdate),
    /// client/goodbye
    ClientGoodbye(ClientGoodbye),
    /// server/command
    ServerCommand(ServerCommand),
    /// client/command
    ClientCommand(ClientCommand),
    /// Any type we do not know; ignored by both sides
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

fn payload<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::InvalidMessage(format!("{} payload: {}", kind, e)))
}

impl Message {
    /// Parse a `{"type": ..., "payload": {...}}` text message
    ///
    /// Unknown keys are ignored. A known key of the wrong type or a missing
    /// required key is an [`Error::InvalidMessage`]; a payload that is not
    /// an object is an [`Error::Protocol`].
    pub fn parse(text: &str) -> Result<Message> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let value = match envelope.payload {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(v @ Value::Object(_)) => v,
            Some(_) => {
                return Err(Error::Protocol(format!(
                    "{} payload is not an object",
                    envelope.kind
                )))
            }
        };

        let kind = envelope.kind.as_str();
        Ok(match kind {
            "client/hello" => Message::ClientHello(payload(kind, value)?),
            "server/hello" => Message::ServerHello(payload(kind, value)?),
            "client/state" => Message::ClientState(payload(kind, value)?),
            "server/state" => Message::ServerState(payload(kind, value)?),
            "client/time" => Message::ClientTime(payload(kind, value)?),
            "server/time" => Message::ServerTime(payload(kind, value)?),
            "stream/start" => Message::StreamStart(payload(kind, value)?),
            "stream/end" => Message::StreamEnd(payload(kind, value)?),
            "stream/clear" => Message::StreamClear(payload(kind, value)?),
            "stream/request-format" => Message::StreamRequestFormat(payload(kind, value)?),
            "group/update" => Message::GroupUpdate(payload(kind, value)?),
            "client/goodbye" => Message::ClientGoodbye(payload(kind, value)?),
            "server/command" => Message::ServerCommand(payload(kind, value)?),
            "client/command" => Message::ClientCommand(payload(kind, value)?),
            _ => Message::Unknown(envelope.kind),
        })
    }

    /// The message's `type`
    pub fn kind(&self) -> &str {
        match self {
            Message::ClientHello(_) => "client/hello",
            Message::ServerHello(_) => "server/hello",
            Message::ClientState(_) => "client/state",
            Message::ServerState(_) => "server/state",
            Message::ClientTime(_) => "client/time",
            Message::ServerTime(_) => "server/time",
            Message::StreamStart(_) => "stream/start",
            Message::StreamEnd(_) => "stream/end",
            Message::StreamClear(_) => "stream/clear",
            Message::StreamRequestFormat(_) => "stream/request-format",
            Message::GroupUpdate(_) => "group/update",
            Message::ClientGoodbye(_) => "client/goodbye",
            Message::ServerCommand(_) => "server/command",
            Message::ClientCommand(_) => "client/command",
            Message::Unknown(kind) => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_from_names() {
        let roles = Roles::from_names(&["player@v1", "controller@v1", "metadata@v1"]);
        assert!(roles.contains(Roles::PLAYER));
        assert!(roles.contains(Roles::METADATA));
        assert_eq!(roles.names(), vec!["player@v1", "metadata@v1"]);

        let player_only = roles.intersection(Roles::PLAYER);
        assert_eq!(player_only.names(), vec!["player@v1"]);
        assert!(Roles::from_names::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let msg = Message::parse(r#"{"type":"client/sync-offset","payload":{}}"#).unwrap();
        assert_eq!(msg, Message::Unknown("client/sync-offset".into()));
    }

    #[test]
    fn test_payload_must_be_object() {
        let err = Message::parse(r#"{"type":"stream/end","payload":[1,2]}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_missing_payload_is_empty_object() {
        let msg = Message::parse(r#"{"type":"stream/end"}"#).unwrap();
        assert_eq!(msg, Message::StreamEnd(StreamEnd { roles: None }));
    }

    #[test]
    fn test_type_mismatch_is_invalid() {
        let err = Message::parse(r#"{"type":"client/time","payload":{"client_transmitted":"x"}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn test_missing_required_field_is_invalid() {
        let err = Message::parse(r#"{"type":"client/time","payload":{}}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let msg = Message::parse(
            r#"{"type":"client/time","payload":{"client_transmitted":5,"extra":true}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::ClientTime(ClientTime {
                client_transmitted: 5
            })
        );
    }

    #[test]
    fn test_player_support_alias() {
        let msg = Message::parse(
            r#"{"type":"client/hello","payload":{"client_id":"c","name":"n","version":1,
                "supported_roles":["player@v1"],
                "player_support":{"supported_formats":[],"buffer_capacity":100}}}"#,
        )
        .unwrap();
        match msg {
            Message::ClientHello(hello) => {
                let support = hello.player_support.unwrap();
                assert_eq!(support.buffer_capacity, 100);
                assert!(support.supported_commands.is_empty());
            }
            _ => panic!("Expected ClientHello"),
        }
    }

    #[test]
    fn test_unknown_player_state_still_parses() {
        let msg = Message::parse(r#"{"type":"client/state","payload":{"player":{"state":"buffering"}}}"#)
            .unwrap();
        match msg {
            Message::ClientState(state) => {
                assert_eq!(state.player.unwrap().state, Some(PlayerSyncState::Unknown));
            }
            _ => panic!("Expected ClientState"),
        }

        let msg = Message::parse(r#"{"type":"client/state","payload":{"player":{"volume":30}}}"#)
            .unwrap();
        match msg {
            Message::ClientState(state) => {
                let player = state.player.unwrap();
                assert_eq!(player.state, None);
                assert_eq!(player.volume, Some(30));
            }
            _ => panic!("Expected ClientState"),
        }
    }

    #[test]
    fn test_unknown_reason_and_playback_state() {
        let msg = Message::parse(
            r#"{"type":"server/hello","payload":{"server_id":"s","name":"n","version":1,
                "connection_reason":"reconnect"}}"#,
        )
        .unwrap();
        match msg {
            Message::ServerHello(hello) => {
                assert_eq!(hello.connection_reason, ConnectionReason::Unknown)
            }
            _ => panic!("Expected ServerHello"),
        }

        let msg = Message::parse(r#"{"type":"group/update","payload":{"playback_state":"buffering"}}"#)
            .unwrap();
        match msg {
            Message::GroupUpdate(update) => {
                assert_eq!(update.playback_state, Some(PlaybackState::Unknown))
            }
            _ => panic!("Expected GroupUpdate"),
        }
    }

    #[test]
    fn test_enum_of_wrong_json_type_is_invalid() {
        let err = Message::parse(r#"{"type":"client/state","payload":{"player":{"state":7}}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn test_not_json() {
        assert!(Message::parse("hello").is_err());
    }
}
