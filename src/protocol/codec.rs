use crate::error::{CollexError, Result};
use crate::protocol::message::WorkMessage;
use rkyv::util::AlignedVec;

/// Encode a `WorkMessage` into an aligned rkyv archive.
pub fn encode_message(msg: &WorkMessage) -> Result<AlignedVec> {
    rkyv::to_bytes::<rkyv::rancor::Error>(msg).map_err(|e| CollexError::EncodeFailed(e.to_string()))
}

/// Decode an archive produced by [`encode_message`].
///
/// The collective kind is validated here so an unknown discriminant never
/// reaches routing.
pub fn decode_message(buf: &AlignedVec) -> Result<WorkMessage> {
    let msg = rkyv::from_bytes::<WorkMessage, rkyv::rancor::Error>(buf)
        .map_err(|e| CollexError::DecodeFailed(e.to_string()))?;
    msg.collective_kind()?;
    Ok(msg)
}
