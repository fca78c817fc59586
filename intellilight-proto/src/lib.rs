//! IntelliLight wire protocol - Kasa LAN codec, message types and framing

pub mod ble;
pub mod cipher;
pub mod message;
pub mod sysinfo;

use std::io::{self, Read, Write};

pub use cipher::{decode, encode, HEADER_LEN};

/// Port the Kasa app talks to, both TCP and UDP discovery
pub const KASA_PORT: u16 = 9999;

/// Largest framed message accepted from a peer
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Write one length-prefixed, ciphered message
pub fn write_frame<W: Write>(writer: &mut W, plain: &[u8]) -> io::Result<()> {
    writer.write_all(&encode(plain, true))?;
    writer.flush()
}

/// Read one length-prefixed message and return its plaintext
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let len = u32::from_be_bytes(header) as usize;

    // Sanity check
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    Ok(cipher::decrypt(&payload))
}

/// Async frame operations for tokio
#[cfg(feature = "async")]
pub mod async_io {
    use super::*;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, plain: &[u8]) -> io::Result<()> {
        writer.write_all(&encode(plain, true)).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;

        let len = u32::from_be_bytes(header) as usize;

        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;

        Ok(cipher::decrypt(&payload))
    }
}
