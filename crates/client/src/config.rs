//! Server coordinates read from the drop-in config file.

use std::fs;
use std::io;
use std::path::Path;

/// Three whitespace-separated tokens: host, TCP port, UDP port.
pub const CONFIG_FILE: &str = "FriendLinkIP.cfg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    /// Server TCP port; the client also receives UDP on this port.
    pub tcp_port: u16,
    /// Server UDP receive port.
    pub udp_port: u16,
}

pub fn read_config(path: &Path) -> io::Result<ClientConfig> {
    parse_config(&fs::read_to_string(path)?)
}

fn parse_config(text: &str) -> io::Result<ClientConfig> {
    let mut tokens = text.split_whitespace();
    let (Some(host), Some(tcp), Some(udp)) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "config needs three tokens: host tcp-port udp-port",
        ));
    };
    let parse_port = |token: &str| {
        token.parse::<u16>().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, format!("bad port: {token}"))
        })
    };
    Ok(ClientConfig {
        host: host.to_string(),
        tcp_port: parse_port(tcp)?,
        udp_port: parse_port(udp)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_tokens() {
        let config = parse_config("192.168.0.4 29015 29016\n").unwrap();
        assert_eq!(
            config,
            ClientConfig {
                host: "192.168.0.4".to_string(),
                tcp_port: 29015,
                udp_port: 29016,
            }
        );
    }

    #[test]
    fn any_whitespace_separates() {
        let config = parse_config("example.org\t4000\n4001").unwrap();
        assert_eq!(config.host, "example.org");
        assert_eq!(config.tcp_port, 4000);
        assert_eq!(config.udp_port, 4001);
    }

    #[test]
    fn missing_tokens_rejected() {
        assert!(parse_config("host 29015").is_err());
        assert!(parse_config("").is_err());
    }

    #[test]
    fn non_numeric_port_rejected() {
        assert!(parse_config("host port 29016").is_err());
    }
}
