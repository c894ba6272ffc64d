use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use tern::net::UdpSocket;

mod util;
use util::init_with_context;

#[test]
fn connected_send() {
    let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let ioc = init_with_context();
    let conn = UdpSocket::connect(&ioc, receiver.local_addr().unwrap()).unwrap();
    assert_eq!(conn.peer_addr(), Some(receiver.local_addr().unwrap()));

    let sent = Rc::new(Cell::new(false));
    let sent2 = Rc::clone(&sent);
    conn.async_send(b"hello".to_vec(), move |res, buf| {
        assert_eq!(res.unwrap(), 5);
        assert_eq!(&buf[..], b"hello");
        sent2.set(true);
    });
    ioc.run_pending().unwrap();
    assert!(sent.get());

    let mut buf = [0u8; 16];
    let (n, _) = receiver.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
}

/// Re-arming from inside the callback yields one delivery per datagram, in
/// order.
#[test]
fn packet_read_loop() {
    let ioc = init_with_context();
    let socket = UdpSocket::bind(&ioc, "127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = socket.local_addr().unwrap();

    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let sender_addr = sender.local_addr().unwrap();
    for seq in 0u8..3 {
        sender.send_to(&[seq], addr).unwrap();
    }

    let seen: Rc<RefCell<Vec<(u8, SocketAddr)>>> = Rc::new(RefCell::new(Vec::new()));
    read_next(&socket, Rc::clone(&seen));

    ioc.run_pending().unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    for (index, (seq, from)) in seen.iter().enumerate() {
        assert_eq!(*seq as usize, index);
        assert_eq!(*from, sender_addr);
    }
}

fn read_next(socket: &UdpSocket, seen: Rc<RefCell<Vec<(u8, SocketAddr)>>>) {
    let again = socket.clone();
    socket.async_recv_from(vec![0u8; 32], move |res, buf| {
        let (n, from) = res.unwrap();
        assert_eq!(n, 1);
        seen.borrow_mut().push((buf[0], from));
        if seen.borrow().len() < 3 {
            read_next(&again, seen);
        }
    });
}

/// A zero-length datagram is a valid read on a packet socket, not an
/// end-of-stream condition.
#[test]
fn empty_datagram_is_not_eof() {
    let ioc = init_with_context();
    let reader = UdpSocket::bind(&ioc, "127.0.0.1:0".parse().unwrap()).unwrap();

    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&[], reader.local_addr().unwrap()).unwrap();

    let got = Rc::new(Cell::new(false));
    let got2 = Rc::clone(&got);
    reader.async_recv_from(vec![0u8; 16], move |res, _| {
        let (n, _) = res.expect("empty datagram should complete successfully");
        assert_eq!(n, 0);
        got2.set(true);
    });

    ioc.run_pending().unwrap();
    assert!(got.get());
}

#[test]
fn sync_round_trip() {
    let ioc = init_with_context();
    let a = UdpSocket::bind(&ioc, "127.0.0.1:0".parse().unwrap()).unwrap();
    let b = UdpSocket::bind(&ioc, "127.0.0.1:0".parse().unwrap()).unwrap();

    assert_eq!(a.send_to(b"ping", b.local_addr().unwrap()).unwrap(), 4);

    // Let the loopback queue do its thing before the nonblocking read.
    let mut buf = [0u8; 16];
    let (n, from) = loop {
        match b.recv_from(&mut buf) {
            Ok(res) => break res,
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(err) => panic!("recv_from failed: {}", err),
        }
    };
    assert_eq!(&buf[..n], b"ping");
    assert_eq!(from, a.local_addr().unwrap());
}
