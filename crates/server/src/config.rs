use friendlink::{DEFAULT_CLIENT_PORT, DEFAULT_SERVER_PORT};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub max_clients: u8,
    /// TCP listen port; clients also receive UDP on this port.
    pub tcp_port: u16,
    /// UDP receive port for client datagrams.
    pub udp_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "FriendLink Server".to_string(),
            max_clients: 6,
            tcp_port: DEFAULT_CLIENT_PORT,
            udp_port: DEFAULT_SERVER_PORT,
        }
    }
}
