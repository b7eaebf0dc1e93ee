use super::Packet;
use crate::error::{GatewayError, Result};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads the next control packet, reassembling across short reads. `buf`
/// keeps the carry-over between calls, so pass the same buffer every time.
///
/// Returns `Ok(None)` on a clean EOF at a packet boundary.
pub(crate) async fn read_packet<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<Packet>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(packet) = Packet::parse(buf)? {
            return Ok(Some(packet));
        }
        if reader.read_buf(buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(GatewayError::MqttProtocol(
                "connection closed mid-packet".into(),
            ));
        }
    }
}

pub(crate) async fn write_packet<W>(writer: &mut W, packet: &Packet, buf: &mut BytesMut) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    buf.clear();
    packet.encode(buf);
    writer.write_all(buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::Publish;

    #[tokio::test]
    async fn read_reassembles_split_packets() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let packet = Packet::Publish(Publish::new("test/topic", 0, vec![7u8; 100]));
        let mut wire = BytesMut::new();
        packet.encode(&mut wire);

        let writer = tokio::spawn(async move {
            for chunk in wire.chunks(9) {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            client
        });

        let mut buf = BytesMut::new();
        let parsed = read_packet(&mut server, &mut buf).await.unwrap().unwrap();
        assert_eq!(parsed, packet);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let mut buf = BytesMut::new();
        assert!(read_packet(&mut server, &mut buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_packet_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x30, 0x05, 0x00]).await.unwrap();
        drop(client);
        let mut buf = BytesMut::new();
        assert!(read_packet(&mut server, &mut buf).await.is_err());
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let packet = Packet::PubRec { packet_id: 11 };

        let mut out = BytesMut::new();
        write_packet(&mut client, &packet, &mut out).await.unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(
            read_packet(&mut server, &mut buf).await.unwrap().unwrap(),
            packet
        );
    }
}
