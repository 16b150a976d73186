//! Send generated messages over TCP.

use crate::error::Error;
use log::{debug, info};
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};

/// Open a connection, write every message in order, and close it.
pub fn send_all<A: ToSocketAddrs>(addr: A, messages: &[Vec<u8>]) -> Result<usize, Error> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let mut total = 0;
    for message in messages {
        stream.write_all(message)?;
        debug!("sent {} byte(s) to {}", message.len(), peer);
        total += message.len();
    }
    stream.flush()?;
    info!("sent {} message(s), {} byte(s) to {}", messages.len(), total, peer);
    Ok(total)
}

/// Single-message form of [`send_all`].
pub fn send<A: ToSocketAddrs>(addr: A, message: &[u8]) -> Result<usize, Error> {
    send_all(addr, &[message.to_vec()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn messages_arrive_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().expect("accept");
            let mut buf = Vec::new();
            conn.read_to_end(&mut buf).expect("read");
            buf
        });
        let sent = send_all(addr, &[vec![0x10, 0x00], vec![0xc0, 0x00]]).expect("send");
        assert_eq!(sent, 4);
        assert_eq!(server.join().expect("join"), vec![0x10, 0x00, 0xc0, 0x00]);
    }

    #[test]
    fn refused_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        assert!(matches!(send(addr, b"x"), Err(Error::Io(_))));
    }
}
