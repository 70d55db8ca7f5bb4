//! RCON packet layout.
//!
//! ```text
//! i32 LE  length   (bytes that follow: id + type + body + 2)
//! i32 LE  id
//! i32 LE  type
//! [u8]    body
//! u8, u8  0x00 0x00
//! ```

/// Packet type values.
pub mod packet_type {
    /// Client -> server login request.
    pub const AUTH: i32 = 3;
    /// Client -> server command; also the server's login answer.
    pub const EXEC_COMMAND: i32 = 2;
    pub const AUTH_RESPONSE: i32 = 2;
    /// Server -> client command output.
    pub const RESPONSE_VALUE: i32 = 0;
}

/// Request id the server answers with when the password is wrong.
pub const AUTH_FAILED_ID: i32 = -1;

/// id + type + two pad bytes.
pub const HEADER_AND_PADDING: usize = 10;

/// Largest body the server puts in one response frame.
pub const MAX_RESPONSE_BODY: usize = 4096;

/// Length field of a full-size frame; such a frame may be continued.
pub const CONTINUATION_FRAME_LENGTH: i32 = (MAX_RESPONSE_BODY + HEADER_AND_PADDING) as i32;

/// Anything above this cannot be a real frame and means the stream is out of sync.
pub const MAX_FRAME_LENGTH: i32 = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl RconPacket {
    pub fn auth(id: i32, password: &str) -> Self {
        Self {
            id,
            kind: packet_type::AUTH,
            body: password.to_string(),
        }
    }

    pub fn command(id: i32, command: &str) -> Self {
        Self {
            id,
            kind: packet_type::EXEC_COMMAND,
            body: command.to_string(),
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        self.kind == packet_type::AUTH_RESPONSE && self.id == AUTH_FAILED_ID
    }
}
