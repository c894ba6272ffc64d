use std::cell::Cell;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::thread;

use tern::net::{TcpConn, TcpListener};

mod util;
use util::init_with_context;

const HELLO: &[u8] = b"hello";
const ROUNDS: usize = 5;

/// Echo against a std peer: the client reads five bytes, writes them back,
/// and repeats until the server hangs up.
#[test]
fn echo_client() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; HELLO.len()];
        for _ in 0..ROUNDS {
            stream.write_all(HELLO).unwrap();
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf[..], HELLO);
        }
        // Dropping the stream here ends the client with a clean EOF.
    });

    let ioc = init_with_context();
    let conn = TcpConn::connect(&ioc, addr).unwrap();
    assert!(conn.peer_addr().unwrap() == addr);

    let rounds = Rc::new(Cell::new(0usize));
    let done = Rc::new(Cell::new(false));
    echo_round(conn, Rc::clone(&rounds), Rc::clone(&done));

    ioc.run_pending().unwrap();
    server.join().unwrap();

    assert!(done.get(), "client never observed the server hanging up");
    assert_eq!(rounds.get(), ROUNDS);
}

fn echo_round(conn: TcpConn, rounds: Rc<Cell<usize>>, done: Rc<Cell<bool>>) {
    let writer = conn.clone();
    conn.async_read_exact(vec![0u8; HELLO.len()], move |res, buf| match res {
        Ok(n) => {
            assert_eq!(n, HELLO.len());
            assert_eq!(&buf[..], HELLO);
            rounds.set(rounds.get() + 1);

            let reader = writer.clone();
            writer.async_write_all(buf, move |res, _| {
                res.expect("echo write failed");
                echo_round(reader, rounds, done);
            });
        }
        Err(err) => {
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
            done.set(true);
        }
    });
}

/// The peer writes once and closes; repeated reads end in `UnexpectedEof`
/// and nothing fires after that.
#[test]
fn read_until_eof() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(HELLO).unwrap();
    });

    let ioc = init_with_context();
    let conn = TcpConn::connect(&ioc, addr).unwrap();

    let done = Rc::new(Cell::new(false));
    let done2 = Rc::clone(&done);
    let again = conn.clone();
    conn.async_read_exact(vec![0u8; HELLO.len()], move |res, mut buf| {
        assert_eq!(res.unwrap(), HELLO.len());
        assert_eq!(&buf[..], HELLO);

        buf.resize(128, 0);
        again.async_read_exact(buf, move |res, _| {
            assert_eq!(res.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
            done2.set(true);
        });
    });

    ioc.run_pending().unwrap();
    server.join().unwrap();
    assert!(done.get());
}

/// The peer closes without reading everything; repeated writes end in
/// `BrokenPipe` or `ConnectionReset`.
#[test]
fn write_to_closed_peer() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 128];
        let _ = stream.read(&mut buf).unwrap();
        // Dropping with unread data in flight produces a reset.
    });

    let ioc = init_with_context();
    let conn = TcpConn::connect(&ioc, addr).unwrap();

    let done = Rc::new(Cell::new(false));
    write_until_error(conn, Rc::clone(&done));

    ioc.run_pending().unwrap();
    server.join().unwrap();
    assert!(done.get(), "writes kept succeeding against a closed peer");
}

fn write_until_error(conn: TcpConn, done: Rc<Cell<bool>>) {
    let payload: Vec<u8> = (0..8192).map(|_| rand::random::<u8>()).collect();
    let again = conn.clone();
    conn.async_write_all(payload, move |res, _| match res {
        Ok(_) => write_until_error(again, done),
        Err(err) => {
            assert!(
                matches!(
                    err.kind(),
                    io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
                ),
                "unexpected write error: {}",
                err
            );
            done.set(true);
        }
    });
}

/// Accept through the reactor and echo one message over the accepted
/// connection.
#[test]
fn async_accept() {
    let ioc = init_with_context();
    let listener = TcpListener::bind(&ioc, "127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || {
        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        stream.write_all(HELLO).unwrap();
        let mut buf = [0u8; HELLO.len()];
        stream.read_exact(&mut buf).unwrap();
        buf
    });

    let echoed = Rc::new(Cell::new(false));
    let echoed2 = Rc::clone(&echoed);
    listener.async_accept(move |res| {
        let conn = res.expect("accept failed");
        let writer = conn.clone();
        conn.async_read_exact(vec![0u8; HELLO.len()], move |res, buf| {
            assert_eq!(res.unwrap(), HELLO.len());
            writer.async_write_all(buf, move |res, _| {
                res.unwrap();
                echoed2.set(true);
            });
        });
    });

    ioc.run_pending().unwrap();
    assert!(echoed.get());
    assert_eq!(&client.join().unwrap()[..], HELLO);
}

/// Closing a connection with an armed read delivers nothing and releases
/// the pending count.
#[test]
fn close_drops_armed_callback() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream
    });

    let ioc = init_with_context();
    let conn = TcpConn::connect(&ioc, addr).unwrap();
    let stream = server.join().unwrap();

    conn.async_read(vec![0u8; 16], |_, _| {
        panic!("callback for a closed connection must never run");
    });
    assert_eq!(ioc.pending(), 1);

    conn.close();
    assert!(conn.is_closed());
    assert_eq!(ioc.pending(), 0);

    // Nothing left to run; a closed object stays silent.
    ioc.run_pending().unwrap();
    drop(stream);
}
