//! Version-pinned hello exchange.
//!
//! A full handshake library refuses to speak SSLv2/SSLv3 and will not pin
//! TLSv1.3, so each pinned attempt sends a hand-built ClientHello offering
//! exactly one version and reads the server's first record:
//!
//! * ServerHello selecting the offered version: supported.
//! * Alert, a ServerHello at another version, or an orderly close: rejected.
//! * Anything else (timeout, reset, bytes that are not TLS): indeterminate.

use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::core::models::ProtocolVersion;
use crate::errors::ProbeError;

const CONTENT_HANDSHAKE: u8 = 0x16;
const CONTENT_ALERT: u8 = 0x15;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_SERVER_HELLO: u8 = 0x02;

const SSL2_MT_CLIENT_HELLO: u8 = 0x01;
const SSL2_MT_SERVER_HELLO: u8 = 0x04;
const SSL2_MT_ERROR: u8 = 0x00;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
const EXT_KEY_SHARE: u16 = 0x0033;

const GROUP_X25519: u16 = 0x001d;

// Largest TLS record we are willing to buffer (2^14 plus expansion).
const MAX_RECORD: usize = 16_384 + 2_048;

const LEGACY_SUITES: &[u16] = &[
    0xc02f, 0xc030, 0xc02b, 0xc02c, 0xc013, 0xc014, 0xc009, 0xc00a, 0x009c, 0x009d, 0x002f,
    0x0035, 0x0033, 0x0039, 0x000a, 0x0005, 0x0004, 0x00ff,
];

const TLS13_SUITES: &[u16] = &[0x1301, 0x1302, 0x1303];

const SIGNATURE_ALGORITHMS: &[u16] = &[
    0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203, 0x0201,
];

// SSLv2 cipher kinds, three bytes each.
const SSL2_CIPHER_SPECS: &[[u8; 3]] = &[
    [0x01, 0x00, 0x80],
    [0x02, 0x00, 0x80],
    [0x03, 0x00, 0x80],
    [0x04, 0x00, 0x80],
    [0x05, 0x00, 0x80],
    [0x06, 0x00, 0x40],
    [0x07, 0x00, 0xc0],
];

/// What the server's first flight said about the offered version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloVerdict {
    Accepted,
    Refused,
}

/// Connects to `host:port` and runs one pinned hello exchange.
pub async fn attempt_hello(
    host: &str,
    port: u16,
    version: ProtocolVersion,
    limit: Duration,
) -> Result<(), ProbeError> {
    let hello = match version {
        ProtocolVersion::Ssl2 => build_ssl2_client_hello(),
        ProtocolVersion::Negotiated => {
            return Err(ProbeError::TlsHandshake(
                "negotiated handshakes are not pinned".into(),
            ));
        }
        pinned => build_client_hello(pinned, host),
    };

    let exchange = async {
        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ProbeError::Connection(e.to_string()))?;
        stream
            .write_all(&hello)
            .await
            .map_err(|e| ProbeError::Connection(e.to_string()))?;

        if version == ProtocolVersion::Ssl2 {
            read_ssl2_reply(&mut stream).await
        } else {
            read_tls_reply(&mut stream, version).await
        }
    };

    let verdict = timeout(limit, exchange)
        .await
        .map_err(|_| ProbeError::Timeout(limit))??;

    debug!(host, %version, ?verdict, "Pinned hello finished.");
    match verdict {
        HelloVerdict::Accepted => Ok(()),
        HelloVerdict::Refused => Err(ProbeError::TlsHandshakeRejected(version)),
    }
}

// --- ClientHello builders ---

/// Builds a TLS-record ClientHello offering only `version` (SSLv3 to TLSv1.3).
pub fn build_client_hello(version: ProtocolVersion, host: &str) -> Vec<u8> {
    let wire = version.wire_version().unwrap_or(0x0303);
    let is_tls13 = version == ProtocolVersion::Tls13;
    let mut rng = rand::rng();

    let mut random = [0u8; 32];
    rng.fill(&mut random);

    let mut body = Vec::with_capacity(512);
    // TLSv1.3 freezes legacy_version at TLSv1.2 and moves the real offer into
    // the supported_versions extension.
    put_u16(&mut body, if is_tls13 { 0x0303 } else { wire });
    body.extend_from_slice(&random);

    if is_tls13 {
        let mut session_id = [0u8; 32];
        rng.fill(&mut session_id);
        body.push(session_id.len() as u8);
        body.extend_from_slice(&session_id);
    } else {
        body.push(0);
    }

    let suites = if is_tls13 { TLS13_SUITES } else { LEGACY_SUITES };
    put_u16(&mut body, (suites.len() * 2) as u16);
    for suite in suites {
        put_u16(&mut body, *suite);
    }

    // compression: null only
    body.extend_from_slice(&[0x01, 0x00]);

    if version != ProtocolVersion::Ssl3 {
        let mut key_share = [0u8; 32];
        rng.fill(&mut key_share);
        let extensions = build_extensions(version, host, &key_share);
        put_u16(&mut body, extensions.len() as u16);
        body.extend_from_slice(&extensions);
    }

    let mut handshake = Vec::with_capacity(body.len() + 4);
    handshake.push(HANDSHAKE_CLIENT_HELLO);
    put_u24(&mut handshake, body.len());
    handshake.extend_from_slice(&body);

    let record_version = if version == ProtocolVersion::Ssl3 { 0x0300 } else { 0x0301 };
    let mut record = Vec::with_capacity(handshake.len() + 5);
    record.push(CONTENT_HANDSHAKE);
    put_u16(&mut record, record_version);
    put_u16(&mut record, handshake.len() as u16);
    record.extend_from_slice(&handshake);
    record
}

fn build_extensions(version: ProtocolVersion, host: &str, key_share: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);

    if host.parse::<std::net::IpAddr>().is_err() && !host.is_empty() {
        let name = host.as_bytes();
        let mut ext = Vec::with_capacity(name.len() + 5);
        put_u16(&mut ext, (name.len() + 3) as u16);
        ext.push(0x00); // host_name
        put_u16(&mut ext, name.len() as u16);
        ext.extend_from_slice(name);
        put_extension(&mut out, EXT_SERVER_NAME, &ext);
    }

    let groups: &[u16] = &[GROUP_X25519, 0x0017, 0x0018];
    let mut ext = Vec::new();
    put_u16(&mut ext, (groups.len() * 2) as u16);
    for group in groups {
        put_u16(&mut ext, *group);
    }
    put_extension(&mut out, EXT_SUPPORTED_GROUPS, &ext);

    put_extension(&mut out, EXT_EC_POINT_FORMATS, &[0x01, 0x00]);

    if matches!(version, ProtocolVersion::Tls12 | ProtocolVersion::Tls13) {
        let mut ext = Vec::new();
        put_u16(&mut ext, (SIGNATURE_ALGORITHMS.len() * 2) as u16);
        for alg in SIGNATURE_ALGORITHMS {
            put_u16(&mut ext, *alg);
        }
        put_extension(&mut out, EXT_SIGNATURE_ALGORITHMS, &ext);
    }

    if version == ProtocolVersion::Tls13 {
        put_extension(&mut out, EXT_SUPPORTED_VERSIONS, &[0x02, 0x03, 0x04]);

        let mut ext = Vec::with_capacity(38);
        put_u16(&mut ext, 36);
        put_u16(&mut ext, GROUP_X25519);
        put_u16(&mut ext, 32);
        ext.extend_from_slice(key_share);
        put_extension(&mut out, EXT_KEY_SHARE, &ext);
    }

    out
}

/// Builds an SSLv2 CLIENT-HELLO with a two-byte record header.
pub fn build_ssl2_client_hello() -> Vec<u8> {
    let mut challenge = [0u8; 16];
    rand::rng().fill(&mut challenge);

    let mut msg = Vec::with_capacity(64);
    msg.push(SSL2_MT_CLIENT_HELLO);
    put_u16(&mut msg, 0x0002);
    put_u16(&mut msg, (SSL2_CIPHER_SPECS.len() * 3) as u16);
    put_u16(&mut msg, 0); // session id length
    put_u16(&mut msg, challenge.len() as u16);
    for spec in SSL2_CIPHER_SPECS {
        msg.extend_from_slice(spec);
    }
    msg.extend_from_slice(&challenge);

    let mut record = Vec::with_capacity(msg.len() + 2);
    put_u16(&mut record, 0x8000 | msg.len() as u16);
    record.extend_from_slice(&msg);
    record
}

// --- Reply parsing ---

async fn read_tls_reply(stream: &mut TcpStream, version: ProtocolVersion) -> Result<HelloVerdict, ProbeError> {
    let mut header = [0u8; 5];
    if let Some(verdict) = read_or_refused(stream, &mut header).await? {
        return Ok(verdict);
    }

    let length = u16::from_be_bytes([header[3], header[4]]) as usize;
    if length == 0 || length > MAX_RECORD {
        return Err(ProbeError::ParseFailure(format!("implausible record length {length}")));
    }

    let mut payload = vec![0u8; length];
    if let Some(verdict) = read_or_refused(stream, &mut payload).await? {
        return Ok(verdict);
    }

    classify_tls_record(header[0], &payload, version)
}

async fn read_ssl2_reply(stream: &mut TcpStream) -> Result<HelloVerdict, ProbeError> {
    let mut head = [0u8; 3];
    if let Some(verdict) = read_or_refused(stream, &mut head).await? {
        return Ok(verdict);
    }
    classify_ssl2_reply(&head)
}

/// Fills `buf`, mapping an orderly close by the peer to a refusal.
async fn read_or_refused(stream: &mut TcpStream, buf: &mut [u8]) -> Result<Option<HelloVerdict>, ProbeError> {
    match stream.read_exact(buf).await {
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(Some(HelloVerdict::Refused)),
        Err(e) => Err(ProbeError::Connection(e.to_string())),
    }
}

/// Classifies the first TLS record sent back for a pinned hello.
pub fn classify_tls_record(
    content_type: u8,
    payload: &[u8],
    version: ProtocolVersion,
) -> Result<HelloVerdict, ProbeError> {
    match content_type {
        CONTENT_ALERT => Ok(HelloVerdict::Refused),
        CONTENT_HANDSHAKE => {
            let selected = parse_server_hello_version(payload)?;
            if Some(selected) == version.wire_version() {
                Ok(HelloVerdict::Accepted)
            } else {
                debug!(%version, selected, "Server picked a different version.");
                Ok(HelloVerdict::Refused)
            }
        }
        other => Err(ProbeError::ParseFailure(format!("unexpected content type {other:#04x}"))),
    }
}

/// Extracts the version a ServerHello selects, honouring `supported_versions`.
pub fn parse_server_hello_version(payload: &[u8]) -> Result<u16, ProbeError> {
    let mut reader = Reader::new(payload);
    let kind = reader.u8()?;
    if kind != HANDSHAKE_SERVER_HELLO {
        return Err(ProbeError::ParseFailure(format!("expected ServerHello, got handshake type {kind}")));
    }
    let _length = reader.u24()?;
    let legacy_version = reader.u16()?;
    reader.skip(32)?; // random
    let session_len = reader.u8()? as usize;
    reader.skip(session_len)?;
    reader.skip(2)?; // cipher suite
    reader.skip(1)?; // compression

    // Extensions are optional before TLSv1.3, and may be cut off when the
    // hello spans records.
    let Ok(ext_total) = reader.u16() else {
        return Ok(legacy_version);
    };
    let mut remaining = ext_total as usize;
    while remaining >= 4 {
        let (Ok(ext_type), Ok(ext_len)) = (reader.u16(), reader.u16()) else {
            break;
        };
        let ext_len = ext_len as usize;
        if ext_type == EXT_SUPPORTED_VERSIONS && ext_len == 2 {
            return reader.u16();
        }
        if reader.skip(ext_len).is_err() {
            break;
        }
        remaining = remaining.saturating_sub(4 + ext_len);
    }
    Ok(legacy_version)
}

/// Classifies the first bytes sent back for an SSLv2 CLIENT-HELLO.
pub fn classify_ssl2_reply(head: &[u8; 3]) -> Result<HelloVerdict, ProbeError> {
    // A TLS record in reply means the server does not speak SSLv2.
    if head[0] == CONTENT_ALERT || head[0] == CONTENT_HANDSHAKE {
        return Ok(HelloVerdict::Refused);
    }
    if head[0] & 0x80 != 0 {
        return match head[2] {
            SSL2_MT_SERVER_HELLO => Ok(HelloVerdict::Accepted),
            SSL2_MT_ERROR => Ok(HelloVerdict::Refused),
            other => Err(ProbeError::ParseFailure(format!("unexpected SSLv2 message {other}"))),
        };
    }
    Err(ProbeError::ParseFailure("reply is neither SSLv2 nor TLS".into()))
}

// --- Byte helpers ---

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u24(out: &mut Vec<u8>, value: usize) {
    let bytes = (value as u32).to_be_bytes();
    out.extend_from_slice(&bytes[1..]);
}

fn put_extension(out: &mut Vec<u8>, kind: u16, data: &[u8]) {
    put_u16(out, kind);
    put_u16(out, data.len() as u16);
    out.extend_from_slice(data);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProbeError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(ProbeError::ParseFailure("truncated ServerHello".into())),
        }
    }

    fn skip(&mut self, n: usize) -> Result<(), ProbeError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, ProbeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ProbeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<u32, ProbeError> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }
}
