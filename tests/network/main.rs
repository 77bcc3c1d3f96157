use libmqtt::network::error::Error;
use libmqtt::network::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

pub mod application;

/// Connector handing out one end of an in-memory pipe per call.
struct PipeNetwork {
    remotes: Vec<String>,
    peers: Vec<DuplexStream>,
}

impl PipeNetwork {
    fn new() -> Self {
        Self {
            remotes: Vec::new(),
            peers: Vec::new(),
        }
    }
}

impl Connect for PipeNetwork {
    type Connection = DuplexStream;

    async fn connect(&mut self, remote: &str) -> Result<DuplexStream, Error> {
        if remote.is_empty() {
            return Err(Error::Io(std::io::ErrorKind::InvalidInput.into()));
        }
        let (local, peer) = duplex(64);
        self.remotes.push(remote.to_owned());
        self.peers.push(peer);
        Ok(local)
    }
}

#[tokio::test]
async fn test_connect_returns_a_working_connection() {
    let mut network = PipeNetwork::new();
    let mut conn = network.connect("mock://broker").await.unwrap();
    assert_eq!(network.remotes, ["mock://broker"]);

    conn.write_all(&[1, 2, 3, 4]).await.unwrap();
    let mut buf = [0u8; 4];
    network.peers[0].read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, [1, 2, 3, 4]);
}

#[tokio::test]
async fn test_connect_error_is_reported() {
    let mut network = PipeNetwork::new();
    assert!(matches!(network.connect("").await, Err(Error::Io(_))));
}

#[tokio::test]
async fn test_tcp_connector_reaches_a_local_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let mut tcp = Tcp { nodelay: true };
    let (conn, accepted) = tokio::join!(tcp.connect(&addr), listener.accept());
    let conn = conn.unwrap();
    assert!(conn.nodelay().unwrap());
    assert!(accepted.is_ok());
}

#[tokio::test]
async fn test_tcp_connector_reports_refused_connections() {
    // bind then drop to get a port nobody listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let mut tcp = Tcp::default();
    assert!(matches!(tcp.connect(&addr).await, Err(Error::Io(_))));
}
