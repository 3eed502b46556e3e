//! File descriptor transfer over the control channel
//!
//! The shared memory region is handed to clients as a file descriptor in
//! socket ancillary data. The descriptor rides on a single marker byte so
//! the receiver has a data payload to attach the control message to; the
//! marker sits outside the frame codec and is consumed by the client
//! immediately after it decodes a `GetSharedMemoryResponse` reply.

use std::io;
use std::mem;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Marker byte accompanying the descriptor.
pub const FD_MARKER: u8 = 0xf5;

const CMSG_BUF_LEN: usize = 64;

fn fd_cmsg_space() -> usize {
    // Safety: CMSG_SPACE is a pure size computation.
    unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) as usize }
}

/// Sends `fd` over the connected socket `channel` with one marker byte.
pub fn send_fd(channel: RawFd, fd: RawFd) -> io::Result<()> {
    let mut marker = [FD_MARKER];
    let mut iov = libc::iovec {
        iov_base: marker.as_mut_ptr().cast(),
        iov_len: marker.len(),
    };

    let mut cmsg_buf = [0u8; CMSG_BUF_LEN];
    debug_assert!(fd_cmsg_space() <= CMSG_BUF_LEN);

    // Safety: msghdr is fully initialised below before sendmsg reads it;
    // the control buffer outlives the call.
    unsafe {
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = fd_cmsg_space() as _;

        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
        std::ptr::copy_nonoverlapping(
            (&fd as *const RawFd).cast::<u8>(),
            libc::CMSG_DATA(cmsg),
            mem::size_of::<RawFd>(),
        );

        if libc::sendmsg(channel, &msg, 0) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Receives a descriptor sent by [`send_fd`] from the connected socket.
pub fn recv_fd(channel: RawFd) -> io::Result<OwnedFd> {
    let mut marker = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: marker.as_mut_ptr().cast(),
        iov_len: marker.len(),
    };

    let mut cmsg_buf = [0u8; CMSG_BUF_LEN];

    // Safety: msghdr points at live buffers for the duration of recvmsg;
    // the returned control data is validated before the fd is read.
    unsafe {
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = CMSG_BUF_LEN as _;

        let received = libc::recvmsg(channel, &mut msg, 0);
        if received < 0 {
            return Err(io::Error::last_os_error());
        }
        if received == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "channel closed while waiting for descriptor",
            ));
        }
        if marker[0] != FD_MARKER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected marker byte {:#04x}", marker[0]),
            ));
        }

        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null()
            || (*cmsg).cmsg_level != libc::SOL_SOCKET
            || (*cmsg).cmsg_type != libc::SCM_RIGHTS
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "marker byte arrived without an attached descriptor",
            ));
        }

        let mut fd: RawFd = -1;
        std::ptr::copy_nonoverlapping(
            libc::CMSG_DATA(cmsg),
            (&mut fd as *mut RawFd).cast::<u8>(),
            mem::size_of::<RawFd>(),
        );
        if fd < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid descriptor received"));
        }
        Ok(OwnedFd::from_raw_fd(fd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::fd::{AsRawFd, FromRawFd};
    use std::os::unix::net::UnixStream;

    #[test]
    fn descriptor_survives_the_trip() {
        let (left, right) = UnixStream::pair().unwrap();

        // Safety: memfd_create returns a fresh descriptor we own.
        let memfd = unsafe { libc::memfd_create(c"fdpass-test".as_ptr(), 0) };
        assert!(memfd >= 0);
        let mut source = unsafe { File::from_raw_fd(memfd) };
        source.write_all(b"shared bytes").unwrap();

        send_fd(left.as_raw_fd(), source.as_raw_fd()).unwrap();

        let received = recv_fd(right.as_raw_fd()).unwrap();
        let mut received = File::from(received);
        received.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        received.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "shared bytes");
    }

    #[test]
    fn plain_byte_without_descriptor_is_rejected() {
        let (mut left, right) = UnixStream::pair().unwrap();
        left.write_all(&[FD_MARKER]).unwrap();
        assert!(recv_fd(right.as_raw_fd()).is_err());
    }
}
