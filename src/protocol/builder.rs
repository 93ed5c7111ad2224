// ABOUTME: Per-message JSON builders for outgoing control messages
// ABOUTME: Each function spells out the wire shape of one message type

use crate::protocol::messages::{
    AudioFormatSpec, ClientCommand, ClientGoodbye, ClientHello, ClientState, ClientTime,
    GroupUpdate, ServerCommand, ServerHello, ServerState, ServerTime, StreamClear, StreamEnd,
    StreamRequestFormat, StreamStart,
};
use serde_json::{json, Map, Value};

fn envelope(kind: &str, payload: Value) -> String {
    json!({ "type": kind, "payload": payload }).to_string()
}

/// Insert `key` only when `value` is present
fn put<T: Into<Value>>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v.into());
    }
}

fn format_spec(spec: &AudioFormatSpec) -> Value {
    json!({
        "codec": spec.codec,
        "channels": spec.channels,
        "sample_rate": spec.sample_rate,
        "bit_depth": spec.bit_depth,
    })
}

/// client/hello
pub fn client_hello(hello: &ClientHello) -> String {
    let mut payload = Map::new();
    payload.insert("client_id".into(), hello.client_id.clone().into());
    payload.insert("name".into(), hello.name.clone().into());
    payload.insert("version".into(), hello.version.into());
    payload.insert("supported_roles".into(), hello.supported_roles.clone().into());

    if let Some(info) = &hello.device_info {
        let mut device = Map::new();
        put(&mut device, "product_name", info.product_name.clone());
        put(&mut device, "manufacturer", info.manufacturer.clone());
        put(&mut device, "software_version", info.software_version.clone());
        payload.insert("device_info".into(), Value::Object(device));
    }

    if let Some(support) = &hello.player_support {
        let formats: Vec<Value> = support.supported_formats.iter().map(format_spec).collect();
        payload.insert(
            "player@v1_support".into(),
            json!({
                "supported_formats": formats,
                "buffer_capacity": support.buffer_capacity,
                "supported_commands": support.supported_commands,
            }),
        );
    }

    envelope("client/hello", Value::Object(payload))
}

/// server/hello
pub fn server_hello(hello: &ServerHello) -> String {
    envelope(
        "server/hello",
        json!({
            "server_id": hello.server_id,
            "name": hello.name,
            "version": hello.version,
            "active_roles": hello.active_roles,
            "connection_reason": hello.connection_reason.as_str(),
        }),
    )
}

/// client/state
pub fn client_state(state: &ClientState) -> String {
    let mut payload = Map::new();
    if let Some(player) = &state.player {
        let mut p = Map::new();
        put(&mut p, "state", player.state.map(|s| s.as_str()));
        put(&mut p, "volume", player.volume);
        put(&mut p, "muted", player.muted);
        payload.insert("player".into(), Value::Object(p));
    }
    envelope("client/state", Value::Object(payload))
}

/// server/state
pub fn server_state(state: &ServerState) -> String {
    let mut payload = Map::new();
    if let Some(metadata) = &state.metadata {
        let mut m = Map::new();
        m.insert("timestamp".into(), metadata.timestamp.into());
        put(&mut m, "title", metadata.title.clone());
        put(&mut m, "artist", metadata.artist.clone());
        put(&mut m, "album", metadata.album.clone());
        payload.insert("metadata".into(), Value::Object(m));
    }
    envelope("server/state", Value::Object(payload))
}

/// client/time
pub fn client_time(time: &ClientTime) -> String {
    envelope(
        "client/time",
        json!({ "client_transmitted": time.client_transmitted }),
    )
}

/// server/time
pub fn server_time(time: &ServerTime) -> String {
    envelope(
        "server/time",
        json!({
            "client_transmitted": time.client_transmitted,
            "server_received": time.server_received,
            "server_transmitted": time.server_transmitted,
        }),
    )
}

/// stream/start
pub fn stream_start(start: &StreamStart) -> String {
    let mut payload = Map::new();
    if let Some(player) = &start.player {
        let mut p = Map::new();
        p.insert("codec".into(), player.codec.clone().into());
        p.insert("sample_rate".into(), player.sample_rate.into());
        p.insert("channels".into(), player.channels.into());
        put(&mut p, "bit_depth", player.bit_depth);
        put(&mut p, "codec_header", player.codec_header.clone());
        payload.insert("player".into(), Value::Object(p));
    }
    envelope("stream/start", Value::Object(payload))
}

/// stream/end
pub fn stream_end(end: &StreamEnd) -> String {
    let mut payload = Map::new();
    put(&mut payload, "roles", end.roles.clone());
    envelope("stream/end", Value::Object(payload))
}

/// stream/clear
pub fn stream_clear(clear: &StreamClear) -> String {
    let mut payload = Map::new();
    put(&mut payload, "roles", clear.roles.clone());
    envelope("stream/clear", Value::Object(payload))
}

/// stream/request-format
pub fn stream_request_format(request: &StreamRequestFormat) -> String {
    let mut payload = Map::new();
    if let Some(player) = &request.player {
        let mut p = Map::new();
        put(&mut p, "codec", player.codec.clone());
        put(&mut p, "sample_rate", player.sample_rate);
        put(&mut p, "channels", player.channels);
        put(&mut p, "bit_depth", player.bit_depth);
        payload.insert("player".into(), Value::Object(p));
    }
    envelope("stream/request-format", Value::Object(payload))
}

/// group/update
pub fn group_update(update: &GroupUpdate) -> String {
    let mut payload = Map::new();
    put(
        &mut payload,
        "playback_state",
        update.playback_state.map(|s| s.as_str()),
    );
    put(&mut payload, "group_id", update.group_id.clone());
    put(&mut payload, "group_name", update.group_name.clone());
    envelope("group/update", Value::Object(payload))
}

/// client/goodbye
pub fn client_goodbye(goodbye: &ClientGoodbye) -> String {
    envelope("client/goodbye", json!({ "reason": goodbye.reason }))
}

/// server/command
pub fn server_command(command: &ServerCommand) -> String {
    let mut payload = Map::new();
    if let Some(player) = &command.player {
        let mut p = Map::new();
        p.insert("command".into(), player.command.clone().into());
        put(&mut p, "volume", player.volume);
        put(&mut p, "mute", player.mute);
        payload.insert("player".into(), Value::Object(p));
    }
    envelope("server/command", Value::Object(payload))
}

/// client/command
pub fn client_command(command: &ClientCommand) -> String {
    let mut payload = Map::new();
    if let Some(controller) = &command.controller {
        let mut c = Map::new();
        c.insert("command".into(), controller.command.clone().into());
        put(&mut c, "volume", controller.volume);
        put(&mut c, "mute", controller.mute);
        payload.insert("controller".into(), Value::Object(c));
    }
    envelope("client/command", Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ConnectionReason;

    #[test]
    fn test_envelope_shape() {
        let json = client_time(&ClientTime {
            client_transmitted: 42,
        });
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "client/time");
        assert_eq!(value["payload"]["client_transmitted"], 42);
    }

    #[test]
    fn test_server_hello_reason_on_wire() {
        let json = server_hello(&ServerHello {
            server_id: "s".into(),
            name: "n".into(),
            version: 1,
            active_roles: vec!["player@v1".into()],
            connection_reason: ConnectionReason::Playback,
        });
        assert!(json.contains("\"connection_reason\":\"playback\""));
    }

    #[test]
    fn test_absent_options_are_omitted() {
        let json = stream_end(&StreamEnd { roles: None });
        assert!(!json.contains("roles"));
    }
}
