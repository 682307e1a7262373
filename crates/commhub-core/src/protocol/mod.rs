//! Protocol module: the outer frame codec and the bulk-transfer sub-protocol.

pub mod bulk;
pub mod frame;

pub use bulk::{BulkDecoder, BulkEvent, BulkTransferHeader, TransferError};
pub use frame::{decode_frame, encode_frame, Frame, FrameHeader, FrameKind, ProtocolError};
