//! hdrop-transfer: one file over one TCP connection
//!
//! ```text
//! Header:          [u32 fileNameLen][fileNameLen bytes utf8][u64 fileSize][u32 encryptedFlag]
//! Plain body:      raw bytes, cumulative length == fileSize
//! Encrypted body:  [u32 ivLen][iv][u32 tagLen][tag][u32 ctLen][ciphertext]   (repeated)
//! ```
//!
//! There is no end-of-transfer marker: the sender closes the connection once
//! `fileSize` plaintext bytes have been produced.

pub mod header;
pub mod mode;
pub mod receiver;
pub mod sender;
pub mod wire;

pub use header::{sanitize_file_name, TransferHeader, MAX_FILE_NAME_LEN};
pub use mode::TransferMode;
pub use receiver::{PendingTransfer, ReceivedFile, Receiver, ReceiverOptions};
pub use sender::{SendReport, Sender, SenderOptions};
pub use wire::WireReader;
