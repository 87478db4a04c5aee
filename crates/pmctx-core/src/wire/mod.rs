//! Host wire protocol: length-prefixed big-endian frames.

pub mod attr;
pub mod conn;
pub mod frame;
pub mod hostspec;
pub mod messages;

pub use attr::{AttrTag, Attribute, MAX_ATTR_LEN, NameChecker, valid_container_name};
pub use conn::{Connection, Transport};
pub use frame::{FrameType, HEADER_LEN};
pub use hostspec::HostSpec;
pub use messages::Pdu;
