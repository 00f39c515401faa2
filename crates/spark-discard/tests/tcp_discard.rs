//! 在真实回环 TCP 上运行完整的丢弃服务端。

use std::{
    io::{self, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::Duration,
};

use spark_discard::{ServerConfig, serve};
use spark_flow_tcp::TcpContext;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn serves_one_tcp_flow_until_the_peer_closes() {
    let port = free_port();
    let port_arg = port.to_string();
    let config = ServerConfig::try_parse_from([
        "server_discard",
        "-P",
        "NEAT_PROPERTY_TCP_REQUIRED,NEAT_PROPERTY_IPV4_REQUIRED",
        "--bind",
        "127.0.0.1",
        "--port",
        port_arg.as_str(),
    ])
    .unwrap();

    let client = thread::spawn(move || {
        for _ in 0..500 {
            if let Ok(mut stream) = TcpStream::connect(("127.0.0.1", port)) {
                stream.write_all(&[7u8; 300]).unwrap();
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("server never started listening on port {port}");
    });

    let report = serve(&config, TcpContext::new, || -> Box<dyn Write> { Box::new(io::sink()) }).unwrap();
    client.join().unwrap();

    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.total_bytes(), 300);
    assert!(report.sessions[0].peer_closed);
    assert!(report.sessions[0].reads >= 3);
}
