//! (S1) accept + connect + send + recv round-trip, and (S6) the cleanup
//! path when an in-flight `accept` is killed out from under it.

#![cfg(windows)]

mod support;

use std::ffi::c_void;
use std::net::SocketAddr;
use std::os::windows::io::{FromRawSocket, IntoRawSocket};
use std::time::Duration;

use socket2::Socket;
use windows_sys::Win32::Networking::WinSock::{AF_INET, IPPROTO_TCP, SOCK_STREAM, SOCKET, closesocket};

use wiocp::{
    AcceptError, CloseError, Completion, CompletionResult, ConnectError, Reactor, RecvError,
    SendError,
};

use support::{Slot, drain_until};

fn bound_listener(reactor: &Reactor) -> (SOCKET, SocketAddr) {
    let raw = wiocp::open_socket(reactor, AF_INET as i32, SOCK_STREAM, IPPROTO_TCP)
        .expect("open_socket (listener)");
    // SAFETY: `raw` is a freshly created, uniquely owned overlapped socket.
    let socket = unsafe { Socket::from_raw_socket(raw as u64) };
    socket
        .bind(&"127.0.0.1:0".parse::<SocketAddr>().unwrap().into())
        .expect("bind");
    socket.listen(16).expect("listen");
    let addr = socket
        .local_addr()
        .expect("local_addr")
        .as_socket()
        .expect("IPv4 local address");
    (socket.into_raw_socket() as SOCKET, addr)
}

unsafe fn on_accept(ctx: *mut c_void, result: CompletionResult) {
    if let CompletionResult::Accept(res) = result {
        unsafe { Slot::<Result<SOCKET, AcceptError>>::fill(ctx, res) };
    }
}

unsafe fn on_connect(ctx: *mut c_void, result: CompletionResult) {
    if let CompletionResult::Connect(res) = result {
        unsafe { Slot::<Result<(), ConnectError>>::fill(ctx, res) };
    }
}

unsafe fn on_send(ctx: *mut c_void, result: CompletionResult) {
    if let CompletionResult::Send(res) = result {
        unsafe { Slot::<Result<u32, SendError>>::fill(ctx, res) };
    }
}

unsafe fn on_recv(ctx: *mut c_void, result: CompletionResult) {
    if let CompletionResult::Recv(res) = result {
        unsafe { Slot::<Result<u32, RecvError>>::fill(ctx, res) };
    }
}

unsafe fn on_close(ctx: *mut c_void, result: CompletionResult) {
    if let CompletionResult::Close(res) = result {
        unsafe { Slot::<Result<(), CloseError>>::fill(ctx, res) };
    }
}

fn close_socket(reactor: &Reactor, socket: SOCKET) {
    let slot = Slot::<Result<(), CloseError>>::new();
    let completion = Completion::close(slot.ctx(), on_close, socket as isize);
    reactor.submit(&completion);
    drain_until(reactor, || slot.is_set(), Duration::from_secs(5));
    slot.take().expect("close failed");
}

#[test]
fn tcp_echo_accept_connect_send_recv() {
    support::init_logger();
    let reactor = Reactor::init(0, 0).expect("reactor init");
    let (listen_socket, addr) = bound_listener(&reactor);

    let accept_slot = Slot::<Result<SOCKET, AcceptError>>::new();
    let accept_completion = Completion::accept(accept_slot.ctx(), on_accept, listen_socket);
    reactor.submit(&accept_completion);

    let client_socket = wiocp::open_socket(&reactor, AF_INET as i32, SOCK_STREAM, IPPROTO_TCP)
        .expect("open_socket (client)");
    let connect_slot = Slot::<Result<(), ConnectError>>::new();
    let connect_completion = Completion::connect(connect_slot.ctx(), on_connect, client_socket, addr);
    reactor.submit(&connect_completion);

    drain_until(
        &reactor,
        || accept_slot.is_set() && connect_slot.is_set(),
        Duration::from_secs(5),
    );

    let accepted_socket = accept_slot.take().expect("accept failed");
    connect_slot.take().expect("connect failed");

    let ping = *b"ping";
    let send_slot = Slot::<Result<u32, SendError>>::new();
    let send_completion = unsafe {
        Completion::send(
            send_slot.ctx(),
            on_send,
            client_socket,
            ping.as_ptr(),
            ping.len() as u32,
        )
    };
    reactor.submit(&send_completion);

    let mut recv_buf = [0u8; 4];
    let recv_slot = Slot::<Result<u32, RecvError>>::new();
    let recv_completion = unsafe {
        Completion::recv(
            recv_slot.ctx(),
            on_recv,
            accepted_socket,
            recv_buf.as_mut_ptr(),
            recv_buf.len() as u32,
        )
    };
    reactor.submit(&recv_completion);

    drain_until(
        &reactor,
        || send_slot.is_set() && recv_slot.is_set(),
        Duration::from_secs(5),
    );

    assert_eq!(send_slot.take().expect("send failed"), 4);
    assert_eq!(recv_slot.take().expect("recv failed"), 4);
    assert_eq!(&recv_buf, b"ping");

    close_socket(&reactor, accepted_socket);
    close_socket(&reactor, client_socket);
    close_socket(&reactor, listen_socket);

    reactor.deinit();
}

#[test]
fn accept_failure_cleans_up_candidate_socket() {
    support::init_logger();
    let reactor = Reactor::init(0, 0).expect("reactor init");
    let (listen_socket, _addr) = bound_listener(&reactor);

    let accept_slot = Slot::<Result<SOCKET, AcceptError>>::new();
    let accept_completion = Completion::accept(accept_slot.ctx(), on_accept, listen_socket);
    reactor.submit(&accept_completion);

    // Drive the op's first attempt: with no incoming connection, AcceptEx
    // goes kernel-pending and the candidate socket is now live.
    reactor.tick().expect("tick");
    assert!(!accept_slot.is_set(), "accept should not complete with no connector");

    // Kill the listener out from under the pending accept.
    unsafe { closesocket(listen_socket) };

    drain_until(&reactor, || accept_slot.is_set(), Duration::from_secs(5));

    match accept_slot.take() {
        Ok(socket) => panic!("accept unexpectedly succeeded with socket {socket}"),
        Err(_mapped) => {}
    }
}
