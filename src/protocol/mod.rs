pub(crate) mod codec;
mod message;

pub use codec::{decode_message, encode_message};
pub use message::{CollectiveDone, WorkMessage};
