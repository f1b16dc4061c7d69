use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel delivery semantics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// One-to-one: delivered to the identity named by the channel id
    Person,
    /// Group: delivered to every subscriber of the channel
    Group,
}

impl ChannelType {
    /// Numeric code used by the server wire protocol
    pub fn code(&self) -> u8 {
        match self {
            ChannelType::Person => 1,
            ChannelType::Group => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ChannelType::Person),
            2 => Some(ChannelType::Group),
            _ => None,
        }
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" | "1" => Ok(ChannelType::Person),
            "group" | "2" => Ok(ChannelType::Group),
            other => Err(format!("unknown channel type '{}'", other)),
        }
    }
}

/// Addressable message destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    id: String,
    channel_type: ChannelType,
}

impl Channel {
    pub fn new(id: impl Into<String>, channel_type: ChannelType) -> Self {
        Self {
            id: id.into(),
            channel_type,
        }
    }

    pub fn person(id: impl Into<String>) -> Self {
        Self::new(id, ChannelType::Person)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(id, ChannelType::Group)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_type.code(), self.id)
    }
}

/// Per-send flags passed to the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub no_encrypt: bool,
    pub no_persist: bool,
}

/// Message delivered to a connection
#[derive(Debug, Clone)]
pub struct RecvPacket {
    pub message_id: u64,
    pub from_uid: String,
    pub channel: Channel,
    pub payload: Bytes,
}

/// Server acknowledgment of one send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendAck {
    pub client_seq: u64,
    pub message_id: u64,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Success,
    Rejected,
}

/// Client to server frames of the WebSocket transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate the connection as `uid`
    Connect { uid: String, token: String },
    /// Publish `payload` to a channel
    Send {
        client_seq: u64,
        channel_id: String,
        channel_type: u8,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        no_encrypt: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        no_persist: bool,
        payload: String,
    },
    /// Acknowledge a delivered message
    RecvAck { message_id: u64 },
}

/// Server to client frames of the WebSocket transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connack {
        status: ReasonCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Sendack {
        client_seq: u64,
        message_id: u64,
        status: ReasonCode,
    },
    Recv {
        message_id: u64,
        from_uid: String,
        channel_id: String,
        channel_type: u8,
        payload: String,
    },
}

impl ClientFrame {
    /// Get the frame type name for logging
    pub fn frame_type(&self) -> &'static str {
        match self {
            ClientFrame::Connect { .. } => "connect",
            ClientFrame::Send { .. } => "send",
            ClientFrame::RecvAck { .. } => "recv_ack",
        }
    }
}

impl ServerFrame {
    /// Get the frame type name for logging
    pub fn frame_type(&self) -> &'static str {
        match self {
            ServerFrame::Connack { .. } => "connack",
            ServerFrame::Sendack { .. } => "sendack",
            ServerFrame::Recv { .. } => "recv",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_frame_wire_shape() {
        let frame = ClientFrame::Send {
            client_seq: 7,
            channel_id: "room".to_string(),
            channel_type: ChannelType::Group.code(),
            no_encrypt: true,
            no_persist: false,
            payload: "xx".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "send");
        assert_eq!(json["client_seq"], 7);
        assert_eq!(json["channel_type"], 2);
        assert_eq!(json["no_encrypt"], true);
        assert!(json.get("no_persist").is_none());
    }

    #[test]
    fn test_server_recv_frame_parses() {
        let text = r#"{"type":"recv","message_id":3,"from_uid":"a","channel_id":"b",
            "channel_type":1,"payload":"hi"}"#;
        match serde_json::from_str::<ServerFrame>(text).unwrap() {
            ServerFrame::Recv {
                from_uid,
                channel_type,
                ..
            } => {
                assert_eq!(from_uid, "a");
                assert_eq!(ChannelType::from_code(channel_type), Some(ChannelType::Person));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_channel_type_parses_names_and_codes() {
        assert_eq!("group".parse::<ChannelType>().unwrap(), ChannelType::Group);
        assert_eq!("1".parse::<ChannelType>().unwrap(), ChannelType::Person);
        assert!("broadcast".parse::<ChannelType>().is_err());
    }
}
