use std::{
    fmt::{Debug, Formatter},
    os::fd::{AsFd, BorrowedFd, OwnedFd},
    rc::Rc,
};

use log::trace;
use rustix::io::{Errno, ioctl_fionbio, write};

/// An outgoing payload being written into a receiver-supplied handle.
pub struct PendingSend {
    write: OwnedFd,
    payload: Rc<[u8]>,
    written: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendProgress {
    /// Everything was written; dropping the send closes the handle.
    Done,
    /// The handle would block; wait for writability before resuming.
    Blocked,
    Failed(Errno),
}

impl PendingSend {
    #[must_use]
    pub fn new(write: OwnedFd, payload: Rc<[u8]>) -> Self {
        Self {
            write,
            payload,
            written: 0,
        }
    }

    /// Writes as much of the remaining payload as the handle accepts without
    /// blocking.
    pub fn resume(&mut self) -> SendProgress {
        let Self {
            write: fd,
            payload,
            written,
        } = self;

        if *written == 0 {
            if let Err(e) = ioctl_fionbio(&*fd, true) {
                return SendProgress::Failed(e);
            }
        }

        while *written < payload.len() {
            match write(&*fd, &payload[*written..]) {
                Ok(count) => {
                    *written += count;
                    trace!("Wrote {count} bytes, {written}/{} total.", payload.len());
                }
                Err(Errno::INTR) => {}
                Err(Errno::AGAIN) => return SendProgress::Blocked,
                Err(e) => return SendProgress::Failed(e),
            }
        }
        SendProgress::Done
    }

    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

impl AsFd for PendingSend {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.write.as_fd()
    }
}

impl Debug for PendingSend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSend")
            .field("write", &self.write)
            .field("written", &self.written)
            .field("len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Read};

    use rustix::pipe::{PipeFlags, pipe_with};

    use super::*;

    #[test]
    fn writes_everything_without_terminator() {
        let (r, w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        let mut send = PendingSend::new(w, Rc::from(&b"hello"[..]));

        assert_eq!(send.resume(), SendProgress::Done);
        assert_eq!(send.written(), 5);
        drop(send);

        let mut received = Vec::new();
        File::from(r).read_to_end(&mut received).unwrap();
        assert_eq!(received, b"hello");
    }

    #[test]
    fn blocks_on_full_pipe_then_resumes() {
        let (r, w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        let payload = vec![7; 1 << 20];
        let mut send = PendingSend::new(w, Rc::from(payload.as_slice()));

        assert_eq!(send.resume(), SendProgress::Blocked);
        let first = send.written();
        assert!(first > 0 && first < payload.len());

        let mut r = File::from(r);
        let mut received = Vec::new();
        let mut chunk = vec![0; 64 * 1024];
        loop {
            let count = r.read(&mut chunk).unwrap();
            received.extend_from_slice(&chunk[..count]);
            if send.resume() == SendProgress::Done {
                break;
            }
        }
        drop(send);
        r.read_to_end(&mut received).unwrap();
        assert_eq!(received, payload);
    }

    #[test]
    fn closed_reader_fails() {
        let (r, w) = pipe_with(PipeFlags::CLOEXEC).unwrap();
        drop(r);
        let mut send = PendingSend::new(w, Rc::from(&b"hello"[..]));

        assert_eq!(send.resume(), SendProgress::Failed(Errno::PIPE));
    }
}
