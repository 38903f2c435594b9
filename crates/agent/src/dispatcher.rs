//! The dispatcher's command loop.

use std::io::{Read, Write};

use protocol::{Command, frame};

use crate::backend::Backends;
use crate::error::Result;
use crate::handlers;
use crate::state::DispatcherState;

/// Serve commands from `reader` until the stop sentinel arrives.
///
/// Writes the startup ack, answers each command with exactly one response
/// frame, and writes the shutdown ack after `BYE`. When the peer closes the
/// pipe at a frame boundary the loop ends without the shutdown ack. Any
/// framing or decoding failure is returned and terminates the dispatcher.
pub fn run<R, W>(
    reader: &mut R,
    writer: &mut W,
    host: &Backends,
    state: &mut DispatcherState,
) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    frame::write_ack(writer)?;

    loop {
        let payload = match frame::read_frame(reader) {
            Ok(frame) if frame.is_stop() => break,
            Ok(frame) => frame.into_payload(),
            Err(protocol::Error::Closed) => {
                log::debug!("command pipe closed without stop sentinel");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let command = Command::from_json(&payload)?;
        log::debug!("received {}", command.name());
        let response = handlers::handle(state, host, &command);
        log::debug!("{} -> {}", response.name(), response.outcome());
        frame::write_frame(writer, response.to_json()?.as_bytes())?;
    }

    frame::write_ack(writer)?;
    Ok(())
}
