use std::cell::RefCell;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use tern::multicast::UdpPeer;
use tern::Timer;

mod util;
use util::init_with_context;

#[test]
fn bind_grammar() {
    let ioc = init_with_context();

    for spec in ["", ":0"] {
        let peer = UdpPeer::bind(&ioc, spec).unwrap();
        let addr = peer.local_addr();
        assert_eq!(addr.ip(), Ipv4Addr::UNSPECIFIED);
        assert_ne!(addr.port(), 0, "bind must capture the ephemeral port");
        assert!(peer.outbound().is_none());
    }

    for spec in ["127.0.0.1:0", "localhost:0"] {
        let peer = UdpPeer::bind(&ioc, spec).unwrap();
        let addr = peer.local_addr();
        assert_eq!(addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
    }

    // A host or address without a port is user error.
    assert!(UdpPeer::bind(&ioc, "0.0.0.0").is_err());
    assert!(UdpPeer::bind(&ioc, "localhost").is_err());
}

#[test]
fn portable_defaults() {
    let ioc = init_with_context();
    let peer = UdpPeer::bind(&ioc, "").unwrap();

    // Both are set explicitly at construction, whatever the OS default.
    assert!(!peer.loop_enabled().unwrap());
    assert_eq!(peer.ttl().unwrap(), 1);
    assert!(peer.joined().is_empty());
}

#[test]
fn loop_toggle() {
    let ioc = init_with_context();
    let peer = UdpPeer::bind(&ioc, "localhost:0").unwrap();

    assert!(!peer.loop_enabled().unwrap());
    peer.set_loop(false).unwrap();
    assert!(!peer.loop_enabled().unwrap());
    peer.set_loop(true).unwrap();
    assert!(peer.loop_enabled().unwrap());
    peer.set_loop(false).unwrap();
    assert!(!peer.loop_enabled().unwrap());
}

#[test]
fn ttl_round_trip() {
    let ioc = init_with_context();
    let peer = UdpPeer::bind(&ioc, "").unwrap();

    assert_eq!(peer.ttl().unwrap(), 1);
    for ttl in [0u8, 1, 2, 32, 255] {
        peer.set_ttl(ttl).unwrap();
        assert_eq!(peer.ttl().unwrap(), ttl);
    }
}

#[test]
fn join_rejects_non_multicast() {
    let ioc = init_with_context();
    let peer = UdpPeer::bind(&ioc, "").unwrap();

    let err = peer.join(Ipv4Addr::new(0, 0, 0, 0)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    let err = peer.join(Ipv4Addr::new(192, 168, 1, 1)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    assert!(peer.joined().is_empty());
}

#[test]
fn join_and_leave() {
    let ioc = init_with_context();
    let peer = UdpPeer::bind(&ioc, "").unwrap();

    let group = Ipv4Addr::new(224, 0, 0, 0);
    if let Err(err) = peer.join(group) {
        // Hosts without a multicast-capable route can't run this one.
        eprintln!("skipping join_and_leave: {}", err);
        return;
    }
    assert_eq!(peer.joined(), vec![group]);

    peer.leave(group).unwrap();
    assert!(peer.joined().is_empty());

    // Leaving a group that was never joined is a no-op.
    peer.leave(group).unwrap();
}

#[test]
fn outbound_requires_real_interface() {
    let ioc = init_with_context();
    let peer = UdpPeer::bind(&ioc, "").unwrap();

    let err = peer.set_outbound("no-such-interface0").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    assert!(peer.outbound().is_none());
}

#[cfg(target_os = "linux")]
#[test]
fn outbound_selection() {
    let ioc = init_with_context();
    let peer = UdpPeer::bind(&ioc, "").unwrap();

    let mut selected = None;
    for entry in std::fs::read_dir("/sys/class/net").unwrap() {
        let name = entry.unwrap().file_name().into_string().unwrap();
        if peer.set_outbound(&name).is_ok() {
            selected = Some(name);
            break;
        }
    }
    let name = match selected {
        Some(name) => name,
        None => {
            eprintln!("skipping outbound_selection: no multicast-capable IPv4 interface");
            return;
        }
    };

    let (outbound_name, outbound_ip) = peer.outbound().unwrap();
    assert_eq!(outbound_name, name);
    assert!(!outbound_ip.is_unspecified());
}

/// Unicast packet I/O between two peers exercises the send/receive paths
/// without depending on kernel multicast routing.
#[test]
fn peer_packet_round_trip() {
    let ioc = init_with_context();
    let reader = UdpPeer::bind(&ioc, "").unwrap();
    let writer = UdpPeer::bind(&ioc, "").unwrap();

    let target = SocketAddr::from((Ipv4Addr::LOCALHOST, reader.local_addr().port()));
    assert_eq!(writer.send_to(b"ping", target).unwrap(), 4);

    let received = Rc::new(RefCell::new(Vec::new()));
    let received2 = Rc::clone(&received);
    reader.async_recv_from(vec![0u8; 32], move |res, buf| {
        let (n, from) = res.unwrap();
        received2.borrow_mut().push((buf[..n].to_vec(), from));
    });

    ioc.run_pending().unwrap();

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, b"ping");
    assert_eq!(received[0].1.port(), writer.local_addr().port());
}

/// Ten looped-back multicast datagrams arrive in order from a single
/// source. Degrades to a skip on hosts that cannot route multicast.
#[test]
fn multicast_receive() {
    let ioc = init_with_context();
    let group = Ipv4Addr::new(224, 0, 1, 0);

    let reader = UdpPeer::bind(&ioc, "").unwrap();
    if let Err(err) = reader.join(group) {
        eprintln!("skipping multicast_receive: {}", err);
        return;
    }

    let writer = UdpPeer::bind(&ioc, "").unwrap();
    writer.set_loop(true).unwrap();

    let target = SocketAddr::from((group, reader.local_addr().port()));
    let mut sent = 0;
    for seq in 0u8..10 {
        match writer.send_to(&[seq], target) {
            Ok(_) => sent += 1,
            Err(err) => {
                eprintln!("skipping multicast_receive: send failed: {}", err);
                return;
            }
        }
    }
    assert_eq!(sent, 10);

    let seqs: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let sources: Rc<RefCell<BTreeSet<SocketAddr>>> = Rc::new(RefCell::new(BTreeSet::new()));
    read_loop(&reader, Rc::clone(&seqs), Rc::clone(&sources));

    // Bound the wait; loopback delivery is fast when it works at all.
    let deadline = Timer::new(&ioc).unwrap();
    let closer = reader.clone();
    deadline
        .schedule_once(Duration::from_millis(500), move || closer.close())
        .unwrap();

    while !reader.is_closed() && seqs.borrow().len() < 10 {
        ioc.run_one().unwrap();
    }
    deadline.cancel();

    let seqs = seqs.borrow();
    if seqs.is_empty() {
        eprintln!("skipping multicast_receive: loopback delivered nothing");
        return;
    }
    assert_eq!(*seqs, (0u8..10).collect::<Vec<_>>());
    assert_eq!(sources.borrow().len(), 1, "expected exactly one source");
}

fn read_loop(peer: &UdpPeer, seqs: Rc<RefCell<Vec<u8>>>, sources: Rc<RefCell<BTreeSet<SocketAddr>>>) {
    let again = peer.clone();
    peer.async_recv_from(vec![0u8; 32], move |res, buf| {
        let (n, from) = match res {
            Ok(res) => res,
            // The reader was closed by the deadline timer.
            Err(_) => return,
        };
        assert_eq!(n, 1);
        seqs.borrow_mut().push(buf[0]);
        sources.borrow_mut().insert(from);
        if seqs.borrow().len() < 10 {
            read_loop(&again, seqs, sources);
        }
    });
}
