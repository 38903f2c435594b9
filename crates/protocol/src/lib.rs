//! # protocol
//!
//! The request/response protocol spoken between stagehand and the dispatcher
//! it launches on each host.
//!
//! - [`frame`]: ten digit length header + payload, end-of-stream, `OK` acks
//! - [`command`]: the closed catalog of [`Command`]s and their [`Response`]s
//! - [`mode`]: permission-bit comparison used on both sides
//! - [`digest`]: content fingerprints
//!
//! ## Example
//!
//! ```
//! use protocol::{Command, Frame, read_frame, write_frame};
//!
//! let cmd = Command::PackageInstall { package: "nginx".into() };
//! let mut pipe = Vec::new();
//! write_frame(&mut pipe, cmd.to_json().unwrap().as_bytes()).unwrap();
//!
//! let frame = read_frame(&mut pipe.as_slice()).unwrap();
//! let Frame::Message(payload) = frame else { unreachable!() };
//! assert_eq!(Command::from_json(&payload).unwrap(), cmd);
//! ```

pub mod command;
pub mod digest;
pub mod error;
pub mod frame;
pub mod mode;

pub use command::{Command, FileProps, Outcome, Response, Status};
pub use digest::{fingerprint, fingerprint_reader};
pub use error::{Error, Result};
pub use frame::{
    ACK, Frame, HEADER_LEN, MAX_PAYLOAD, STOP_SENTINEL, read_ack, read_frame, write_ack,
    write_end, write_frame,
};
pub use mode::{format_mode, merge_mode, mode_matches, parse_mode};
