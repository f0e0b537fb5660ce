//! Wire framing: every file is an 8-byte signed size followed by exactly
//! that many raw bytes. No names, counts or checksums are exchanged.

use super::constants::PREFIX_LEN;
use super::error::TransferError;
use crate::config::ByteOrder;
use crate::transport::Transport;

/// Send the size prefix of the next file
pub async fn send_prefix<T: Transport>(
    transport: &mut T,
    order: ByteOrder,
    file_size: i64,
) -> Result<(), TransferError> {
    transport
        .send_reliably(&order.encode(file_size))
        .await
        .map_err(TransferError::Framing)?;
    Ok(())
}

/// Receive the size prefix of the next file
pub async fn recv_prefix<T: Transport>(
    transport: &mut T,
    order: ByteOrder,
) -> Result<u64, TransferError> {
    let mut buf = [0u8; PREFIX_LEN];
    transport
        .recv_reliably(&mut buf)
        .await
        .map_err(TransferError::Framing)?;

    let declared = order.decode(buf);
    u64::try_from(declared).map_err(|_| TransferError::InvalidPrefix(declared))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;

    #[tokio::test]
    async fn test_prefix_is_little_endian_by_default() {
        let (left, right) = tokio::io::duplex(64);
        let mut left = StreamTransport::new(left);

        send_prefix(&mut left, ByteOrder::default(), 16_777_217).await.unwrap();
        drop(left);

        let mut raw = Vec::new();
        let mut right = right;
        tokio::io::AsyncReadExt::read_to_end(&mut right, &mut raw)
            .await
            .unwrap();
        assert_eq!(raw, vec![0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_prefix_split_across_reads() {
        // A 3-byte pipe forces the prefix to arrive in pieces
        let (left, right) = tokio::io::duplex(3);
        let mut left = StreamTransport::new(left);
        let mut right = StreamTransport::new(right);

        let (sent, received) = tokio::join!(
            send_prefix(&mut left, ByteOrder::Little, 1234567),
            recv_prefix(&mut right, ByteOrder::Little),
        );
        sent.unwrap();
        assert_eq!(received.unwrap(), 1234567);
    }

    #[tokio::test]
    async fn test_negative_prefix_rejected() {
        let (left, right) = tokio::io::duplex(64);
        let mut left = StreamTransport::new(left);
        let mut right = StreamTransport::new(right);

        send_prefix(&mut left, ByteOrder::Little, -1).await.unwrap();
        let result = recv_prefix(&mut right, ByteOrder::Little).await;
        assert!(matches!(result, Err(TransferError::InvalidPrefix(-1))));
    }

    #[tokio::test]
    async fn test_truncated_prefix_is_framing_error() {
        let (left, right) = tokio::io::duplex(64);
        let mut left = StreamTransport::new(left);
        let mut right = StreamTransport::new(right);

        left.send_reliably(&[1, 2, 3]).await.unwrap();
        left.shutdown().await.unwrap();

        let result = recv_prefix(&mut right, ByteOrder::Little).await;
        assert!(matches!(result, Err(TransferError::Framing(_))));
    }
}
