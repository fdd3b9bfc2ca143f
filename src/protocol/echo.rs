//! Echo frame composition
//!
//! Inbound frames are not parsed. The reply is the marker prefix followed
//! by the received bytes verbatim, bounded by the transport frame length.

use super::ProtocolError;
use crate::config::protocol::{ECHO_PREFIX, MAX_FRAME_LEN};
use heapless::Vec;

/// Outgoing echo, never longer than one transport frame
pub type EchoFrame = Vec<u8, MAX_FRAME_LEN>;

/// Prefix `received` with the echo marker.
///
/// Returns [`ProtocolError::FrameTooLarge`] instead of truncating when the
/// result would not fit in one frame.
pub fn compose_echo(received: &[u8]) -> Result<EchoFrame, ProtocolError> {
    let len = ECHO_PREFIX.len() + received.len();
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge { len });
    }

    let mut frame = EchoFrame::new();
    frame
        .extend_from_slice(ECHO_PREFIX)
        .and_then(|_| frame.extend_from_slice(received))
        .map_err(|_| ProtocolError::FrameTooLarge { len })?;
    Ok(frame)
}
