use fabmq_codec::error::{DecodeError, EncodeError};

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// MQTT decoding error
    #[error("Decoding error: {0:?}")]
    Decode(#[from] DecodeError),
    /// MQTT encoding error
    #[error("Encoding error: {0:?}")]
    Encode(#[from] EncodeError),
    /// Read timeout
    #[error("Read timeout")]
    ReadTimeout,
    /// Write timeout
    #[error("Write timeout")]
    WriteTimeout,
    /// Flush timeout
    #[error("Flush timeout")]
    FlushTimeout,
    /// Close timeout
    #[error("Close timeout")]
    CloseTimeout,
    /// First frame on a connection was not CONNECT
    #[error("invalid protocol")]
    InvalidProtocol,
    #[error("unexpected packet, type: {0:#04x}")]
    UnexpectedPacket(u8),
    #[error("identifier rejected")]
    IdentifierRejected,
    #[error("bad user name or password")]
    BadUserNameOrPassword,
    #[error("connection closed")]
    Closed,
}

impl MqttError {
    /// Protocol name/level the broker does not speak.
    #[inline]
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, MqttError::Decode(e) if e.is_version_mismatch())
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            MqttError::ReadTimeout | MqttError::WriteTimeout | MqttError::FlushTimeout | MqttError::CloseTimeout
        )
    }
}

