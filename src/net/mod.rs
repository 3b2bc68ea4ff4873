pub mod codec;
pub mod connection;
pub mod dos_protection;
pub mod framing;
pub mod protocol;
pub mod tls;
pub mod transport;
