//! Sentinel-framed breakpoint channel.
//!
//! Messages travel between literal start/end markers around an opaque JSON
//! payload. The reader accumulates chunks until a full frame is present;
//! partially received frames stay buffered across calls.

use std::io::{Read, Write};

use tracing::warn;

use clrsnap_runtime::error::DebugError;

use crate::protocol::Breakpoint;

/// Frame start marker.
pub const START_MESSAGE: &str = "START_DEBUG_MESSAGE";
/// Frame end marker.
pub const END_MESSAGE: &str = "END_DEBUG_MESSAGE";

const READ_CHUNK: usize = 1024;

/// Read one framed payload, buffering partial input in `buffer`.
pub fn read_framed<R: Read>(pipe: &mut R, buffer: &mut String) -> Result<String, DebugError> {
    loop {
        if let Some(end) = buffer.find(END_MESSAGE) {
            let start = buffer.find(START_MESSAGE).ok_or_else(|| {
                DebugError::runtime("malformed frame: end marker without start")
            })?;
            if start > end {
                return Err(DebugError::runtime(
                    "malformed frame: start marker after end",
                ));
            }
            let payload = buffer[start + START_MESSAGE.len()..end].to_owned();
            buffer.drain(..end + END_MESSAGE.len());
            return Ok(payload);
        }

        let mut chunk = [0u8; READ_CHUNK];
        let read = pipe
            .read(&mut chunk)
            .map_err(|err| DebugError::runtime(format!("pipe read failed: {err}")))?;
        if read == 0 {
            return Err(DebugError::Shutdown);
        }
        buffer.push_str(&String::from_utf8_lossy(&chunk[..read]));
    }
}

/// Write one framed payload.
pub fn write_framed<W: Write>(pipe: &mut W, payload: &str) -> Result<(), DebugError> {
    let framed = format!("{START_MESSAGE}{payload}{END_MESSAGE}");
    pipe.write_all(framed.as_bytes())
        .and_then(|()| pipe.flush())
        .map_err(|err| DebugError::runtime(format!("pipe write failed: {err}")))
}

/// Breakpoint read/write surface over an abstract byte pipe.
pub struct BreakpointClient<P> {
    pipe: P,
    buffer: String,
}

impl<P: Read + Write> BreakpointClient<P> {
    #[must_use]
    pub fn new(pipe: P) -> Self {
        Self {
            pipe,
            buffer: String::new(),
        }
    }

    /// Block until a full breakpoint message arrives.
    pub fn read_breakpoint(&mut self) -> Result<Breakpoint, DebugError> {
        loop {
            let payload = read_framed(&mut self.pipe, &mut self.buffer)?;
            match serde_json::from_str(&payload) {
                Ok(message) => return Ok(message),
                Err(err) => {
                    // A bad frame is the client's bug, not a reason to die.
                    warn!(error = %err, "discarding malformed breakpoint message");
                }
            }
        }
    }

    /// Send one breakpoint message.
    pub fn write_breakpoint(&mut self, message: &Breakpoint) -> Result<(), DebugError> {
        let payload = serde_json::to_string(message)
            .map_err(|err| DebugError::runtime(format!("serialisation failed: {err}")))?;
        write_framed(&mut self.pipe, &payload)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;

    /// Loopback pipe: reads consume what writes produced.
    struct Loopback {
        data: VecDeque<u8>,
        /// Bytes handed out per read, to exercise partial frames.
        read_size: usize,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let take = buf.len().min(self.read_size).min(self.data.len());
            for slot in buf.iter_mut().take(take) {
                *slot = self.data.pop_front().unwrap();
            }
            Ok(take)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn round_trip_through_the_frame_markers() {
        let pipe = Loopback {
            data: VecDeque::new(),
            read_size: usize::MAX,
        };
        let mut client = BreakpointClient::new(pipe);
        let message = Breakpoint::request("bp-7", "Program.cs", 12, None);
        client.write_breakpoint(&message).unwrap();
        let back = client.read_breakpoint().unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn frames_reassemble_from_small_chunks() {
        let mut pipe = Loopback {
            data: VecDeque::new(),
            read_size: 3,
        };
        let message = Breakpoint::request("bp-8", "Program.cs", 9, Some("a == 1"));
        let payload = serde_json::to_string(&message).unwrap();
        write_framed(&mut pipe, &payload).unwrap();

        let mut client = BreakpointClient::new(pipe);
        let back = client.read_breakpoint().unwrap();
        assert_eq!(back.id, "bp-8");
    }

    #[test]
    fn two_frames_in_one_buffer_read_in_order() {
        let mut pipe = Loopback {
            data: VecDeque::new(),
            read_size: usize::MAX,
        };
        for id in ["first", "second"] {
            let message = Breakpoint::request(id, "a.cs", 1, None);
            write_framed(&mut pipe, &serde_json::to_string(&message).unwrap()).unwrap();
        }
        let mut client = BreakpointClient::new(pipe);
        assert_eq!(client.read_breakpoint().unwrap().id, "first");
        assert_eq!(client.read_breakpoint().unwrap().id, "second");
    }

    #[test]
    fn closed_pipe_reports_shutdown() {
        let pipe = Loopback {
            data: VecDeque::new(),
            read_size: usize::MAX,
        };
        let mut client = BreakpointClient::new(pipe);
        assert_eq!(client.read_breakpoint().unwrap_err(), DebugError::Shutdown);
    }
}
