//! IPv4 address codec. IPv6 text is accepted by the parser only to be
//! rejected explicitly with [`Error::NotImplemented`], never silently
//! mis-encoded into a 4-octet buffer it doesn't fit.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::Error;

/// Parses `"a.b.c.d:port"` into a `SocketAddrV4`. An address that parses
/// as valid but is IPv6 is rejected with `NotImplemented`, not `Invalid` —
/// the syntax was fine, the address family isn't supported.
pub fn parse(text: &str) -> Result<SocketAddrV4, Error> {
    match text.parse::<SocketAddr>().map_err(|_| Error::Invalid)? {
        SocketAddr::V4(addr) => Ok(addr),
        SocketAddr::V6(_) => Err(Error::NotImplemented),
    }
}

pub fn format(addr: &SocketAddrV4) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// 6-byte wire form: 4 octets network order, then a big-endian port, for
/// when an address needs to travel as a buffer rather than a `SocketAddr`.
pub fn encode(addr: &SocketAddrV4) -> [u8; 6] {
    let mut buf = [0u8; 6];
    buf[..4].copy_from_slice(&addr.ip().octets());
    buf[4..].copy_from_slice(&addr.port().to_be_bytes());
    buf
}

pub fn decode(buf: &[u8]) -> Result<SocketAddrV4, Error> {
    if buf.len() != 6 {
        return Err(Error::Invalid);
    }
    let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
    let port = u16::from_be_bytes([buf[4], buf[5]]);
    Ok(SocketAddrV4::new(ip, port))
}
