//! End-to-end relay tests: real TCP clients, a real Unix socket target.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tcp_unix_proxy::{ProxyConfig, ProxyMetrics, TcpUnixProxy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixListener};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

/// Unix socket server that echoes every connection back to itself
fn spawn_echo_server(path: &Path) -> JoinHandle<()> {
    let listener = UnixListener::bind(path).expect("bind echo socket");
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    })
}

async fn start_proxy(config: ProxyConfig) -> (TcpUnixProxy, SocketAddr) {
    let proxy = TcpUnixProxy::new(config.listen_host("127.0.0.1")).expect("valid config");
    let addr = proxy.start().await.expect("proxy starts");
    (proxy, addr)
}

async fn ping(client: &mut TcpStream, message: &[u8]) {
    client.write_all(message).await.unwrap();
    let mut buf = vec![0u8; message.len()];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(buf, message);
}

/// The proxy closed this client: reads end with EOF or a reset, never hang
async fn assert_closed_by_proxy(client: &mut TcpStream) {
    let mut buf = [0u8; 16];
    match timeout(WAIT, client.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        Ok(Ok(n)) => panic!("unexpected {n} bytes from a closed pair"),
        Err(_) => panic!("connection was not closed by the proxy"),
    }
}

async fn wait_for_metrics(proxy: &TcpUnixProxy, check: impl Fn(&ProxyMetrics) -> bool) {
    timeout(WAIT, async {
        while !check(&proxy.metrics()) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("metrics never converged: {:?}", proxy.metrics()));
}

#[tokio::test]
async fn test_ping_is_echoed_through_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("echo.sock");
    let _echo = spawn_echo_server(&socket);
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    ping(&mut client, b"ping").await;

    // Counters are bumped after each write completes, so they may trail the echo
    wait_for_metrics(&proxy, |m| m.bytes_to_target == 4 && m.bytes_to_client == 4).await;
    assert_eq!(proxy.metrics().connections_accepted, 1);

    proxy.stop().await;
}

#[tokio::test]
async fn test_ephemeral_port_is_connectable() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("echo.sock");
    let _echo = spawn_echo_server(&socket);
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket).listen_port(0)).await;

    assert_ne!(addr.port(), 0);
    assert!(addr.ip().is_loopback());
    timeout(WAIT, TcpStream::connect(addr))
        .await
        .expect("connect timed out")
        .expect("bound port accepts connections");

    proxy.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_payload_is_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("echo.sock");
    let _echo = spawn_echo_server(&socket);
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket)).await;

    let payload: Vec<u8> = (0..1_048_576u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
        .collect();

    let client = TcpStream::connect(addr).await.unwrap();
    let (mut reader, mut writer) = client.into_split();

    // Write and read concurrently so neither side stalls on full socket buffers
    let to_send = payload.clone();
    let sender = tokio::spawn(async move {
        writer.write_all(&to_send).await.unwrap();
        writer
    });

    let mut received = vec![0u8; payload.len()];
    timeout(WAIT, reader.read_exact(&mut received))
        .await
        .expect("payload timed out")
        .unwrap();
    let _writer = sender.await.unwrap();

    assert!(received == payload, "relayed bytes differ from what was sent");
    let expected = payload.len() as u64;
    wait_for_metrics(&proxy, |m| m.bytes_to_target == expected && m.bytes_to_client == expected)
        .await;

    proxy.stop().await;
}

#[tokio::test]
async fn test_unreachable_target_closes_inbound_and_keeps_listening() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("gone.sock");

    // The socket file must exist when the proxy is built; nobody listens on it afterwards
    drop(UnixListener::bind(&socket).unwrap());
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket)).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    assert_closed_by_proxy(&mut first).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    assert_closed_by_proxy(&mut second).await;

    wait_for_metrics(&proxy, |m| m.target_connect_failures == 2).await;
    assert_eq!(proxy.metrics().active_pairs, 0);

    // Once the target comes back the same listener relays again
    std::fs::remove_file(&socket).unwrap();
    let _echo = spawn_echo_server(&socket);
    let mut third = TcpStream::connect(addr).await.unwrap();
    ping(&mut third, b"back").await;

    proxy.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_receive_their_own_payload() {
    const CLIENTS: usize = 50;
    const PAYLOAD: usize = 1024;

    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("echo.sock");
    let _echo = spawn_echo_server(&socket);
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket)).await;

    let clients: Vec<_> = (0..CLIENTS)
        .map(|id| {
            tokio::spawn(async move {
                let payload: Vec<u8> = (0..PAYLOAD).map(|i| ((i * 31 + id * 7) % 256) as u8).collect();
                let mut client = TcpStream::connect(addr).await.unwrap();
                client.write_all(&payload).await.unwrap();

                let mut echoed = vec![0u8; PAYLOAD];
                timeout(WAIT, client.read_exact(&mut echoed))
                    .await
                    .expect("client timed out")
                    .unwrap();
                (payload, echoed)
            })
        })
        .collect();

    for client in clients {
        let (sent, echoed) = client.await.unwrap();
        assert_eq!(echoed, sent);
    }

    wait_for_metrics(&proxy, |m| m.bytes_to_client == (CLIENTS * PAYLOAD) as u64).await;
    assert_eq!(proxy.metrics().connections_accepted, CLIENTS as u64);

    proxy.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_closing_one_pair_leaves_others_alone() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("echo.sock");
    let _echo = spawn_echo_server(&socket);
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket)).await;

    let mut doomed = TcpStream::connect(addr).await.unwrap();
    let mut survivor = TcpStream::connect(addr).await.unwrap();
    ping(&mut doomed, b"one").await;
    ping(&mut survivor, b"two").await;

    drop(doomed);
    wait_for_metrics(&proxy, |m| m.pairs_closed == 1).await;

    assert_eq!(proxy.metrics().active_pairs, 1);
    ping(&mut survivor, b"still here").await;

    proxy.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_close_releases_pair_once() {
    const ROUNDS: u64 = 25;

    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("slam.sock");

    // Target hangs up the moment it accepts
    let listener = UnixListener::bind(&socket).unwrap();
    let _target = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket)).await;

    for _ in 0..ROUNDS {
        let mut client = TcpStream::connect(addr).await.unwrap();
        // Client hangs up too, racing the target's close
        client.shutdown().await.unwrap();
        assert_closed_by_proxy(&mut client).await;
    }

    wait_for_metrics(&proxy, |m| m.pairs_closed + m.target_connect_failures == ROUNDS).await;
    let metrics = proxy.metrics();
    assert_eq!(metrics.active_pairs, 0);
    assert_eq!(metrics.connections_accepted, ROUNDS);

    proxy.stop().await;
}

#[tokio::test]
async fn test_target_hangup_closes_client() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("oneshot.sock");

    // Answer a single chunk, then hang up
    let listener = UnixListener::bind(&socket).unwrap();
    let _target = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 64];
            if let Ok(n) = stream.read(&mut buf).await {
                let _ = stream.write_all(&buf[..n]).await;
            }
        }
    });
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket)).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    ping(&mut client, b"bye").await;
    assert_closed_by_proxy(&mut client).await;

    wait_for_metrics(&proxy, |m| m.pairs_closed == 1 && m.active_pairs == 0).await;
    proxy.stop().await;
}

#[tokio::test]
async fn test_stop_only_halts_new_accepts() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("echo.sock");
    let _echo = spawn_echo_server(&socket);
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket)).await;

    let mut live = TcpStream::connect(addr).await.unwrap();
    ping(&mut live, b"before stop").await;

    proxy.stop().await;
    proxy.stop().await;

    assert!(
        TcpStream::connect(addr).await.is_err(),
        "listening socket should be closed after stop"
    );
    ping(&mut live, b"after stop").await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("echo.sock");
    let _echo = spawn_echo_server(&socket);
    let (proxy, _) = start_proxy(ProxyConfig::new(&socket)).await;
    proxy.stop().await;

    let second_addr = proxy.start().await.unwrap();
    assert_ne!(second_addr.port(), 0);
    assert!(proxy.is_running());

    let mut client = TcpStream::connect(second_addr).await.unwrap();
    ping(&mut client, b"again").await;

    proxy.stop().await;
}

#[tokio::test]
async fn test_connection_limit_rejects_excess_clients() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("echo.sock");
    let _echo = spawn_echo_server(&socket);
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket).max_connections(1)).await;

    let mut admitted = TcpStream::connect(addr).await.unwrap();
    ping(&mut admitted, b"first").await;

    let mut rejected = TcpStream::connect(addr).await.unwrap();
    assert_closed_by_proxy(&mut rejected).await;
    wait_for_metrics(&proxy, |m| m.connections_rejected == 1).await;

    // The slot is free as soon as the first pair no longer counts as active
    drop(admitted);
    wait_for_metrics(&proxy, |m| m.active_pairs == 0).await;

    let mut next = TcpStream::connect(addr).await.unwrap();
    ping(&mut next, b"next").await;
    ping(&mut next, b"served").await;
    assert_eq!(proxy.metrics().connections_rejected, 1);

    proxy.stop().await;
}

#[tokio::test]
async fn test_dropping_running_proxy_closes_listener() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("echo.sock");
    let _echo = spawn_echo_server(&socket);
    let (proxy, addr) = start_proxy(ProxyConfig::new(&socket)).await;
    drop(proxy);

    timeout(WAIT, async {
        while TcpStream::connect(addr).await.is_ok() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("listener should close after the proxy is dropped");
}
