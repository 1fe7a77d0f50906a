use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error("Peer closed the link with an empty frame")]
    PeerHangup,
}
