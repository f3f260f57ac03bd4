//! GT7 UDP feed reader
//!
//! The console streams encrypted packets to whoever sent it a heartbeat
//! recently. The reader keeps the stream alive by re-sending the heartbeat
//! every N packets and whenever the socket goes quiet.

use crate::config::ServerConfig;
use gt7_core::{CarDatabase, PacketDecoder, TelemetrySnapshot};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Heartbeat requesting the standard packet layout
pub const HEARTBEAT: &[u8] = b"A";

const BUFFER_SIZE: usize = 4096;

pub struct Gt7Reader {
    socket: UdpSocket,
    console: SocketAddr,
    decoder: PacketDecoder,
    packet_count: u32,
    heartbeat_packets: u32,
    timeout: Duration,
}

impl Gt7Reader {
    /// Bind the receive port from `config` and target `ps_ip` for heartbeats
    pub async fn bind(ps_ip: Ipv4Addr, config: &ServerConfig) -> io::Result<Self> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.udp_recv_port);
        let socket = UdpSocket::bind(bind_addr).await?;
        let console = SocketAddr::V4(SocketAddrV4::new(ps_ip, config.udp_send_port));
        info!(port = config.udp_recv_port, %console, "GT7 reader listening");
        Ok(Self::with_socket(socket, console, config))
    }

    /// Use an already bound socket
    pub fn with_socket(socket: UdpSocket, console: SocketAddr, config: &ServerConfig) -> Self {
        Self {
            socket,
            console,
            decoder: PacketDecoder::new(),
            packet_count: 0,
            heartbeat_packets: config.heartbeat_packets.max(1),
            timeout: config.socket_timeout(),
        }
    }

    /// Attach car metadata to every decoded snapshot
    pub fn with_cars(mut self, cars: Arc<CarDatabase>) -> Self {
        self.decoder = PacketDecoder::with_cars(cars);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn send_heartbeat(&self) -> io::Result<()> {
        self.socket.send_to(HEARTBEAT, self.console).await?;
        Ok(())
    }

    /// Wait for the next decodable packet.
    ///
    /// Undecryptable packets are skipped. A quiet socket triggers a fresh
    /// heartbeat and the wait continues.
    pub async fn next_snapshot(&mut self) -> io::Result<TelemetrySnapshot> {
        let mut buf = [0u8; BUFFER_SIZE];
        loop {
            let received = tokio::time::timeout(self.timeout, self.socket.recv_from(&mut buf));
            let len = match received.await {
                Ok(Ok((len, _src))) => len,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!("socket timeout, sending heartbeat");
                    self.send_heartbeat().await?;
                    self.packet_count = 0;
                    continue;
                }
            };

            self.packet_count += 1;
            if self.packet_count > self.heartbeat_packets {
                self.send_heartbeat().await?;
                self.packet_count = 0;
            }

            match self.decoder.decode(&buf[..len]) {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => debug!(error = %e, len, "skipping packet"),
            }
        }
    }

    /// Stream snapshots into `tx` until cancelled or the receiver goes away
    pub async fn run(
        mut self,
        tx: mpsc::Sender<TelemetrySnapshot>,
        cancel: CancellationToken,
    ) -> io::Result<()> {
        self.send_heartbeat().await?;
        loop {
            let snapshot = tokio::select! {
                _ = cancel.cancelled() => break,
                snapshot = self.next_snapshot() => snapshot?,
            };
            if tx.send(snapshot).await.is_err() {
                debug!("snapshot receiver dropped, stopping GT7 reader");
                break;
            }
        }
        info!(console = %self.console, "GT7 reader stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt7_core::crypto::{encrypt_packet, MAGIC};
    use gt7_core::packet::PACKET_SIZE;

    fn packet(lap: i16, iv: u32) -> Vec<u8> {
        let mut plain = vec![0u8; PACKET_SIZE];
        plain[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        plain[0x74..0x76].copy_from_slice(&lap.to_le_bytes());
        plain[0x8E..0x90].copy_from_slice(&1u16.to_le_bytes());
        encrypt_packet(&plain, iv)
    }

    async fn pair(config: &ServerConfig) -> (Gt7Reader, UdpSocket) {
        let console = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let reader = Gt7Reader::with_socket(socket, console.local_addr().unwrap(), config);
        (reader, console)
    }

    #[tokio::test]
    async fn test_decodes_packets_and_skips_garbage() {
        let (mut reader, console) = pair(&ServerConfig::default()).await;
        let target = reader.local_addr().unwrap();

        console.send_to(&[0xAB; 40], target).await.unwrap();
        console.send_to(&packet(2, 99), target).await.unwrap();

        let snap = reader.next_snapshot().await.unwrap();
        assert_eq!(snap.current_lap, 2);
        assert!(snap.is_on_track());
    }

    #[tokio::test]
    async fn test_attaches_car_info() {
        let cars = CarDatabase::from_readers(
            "ID,Name\n9,Jaguar\n".as_bytes(),
            "ID,ShortName,Maker\n0,Jaguar Vision GT SV,9\n".as_bytes(),
        )
        .unwrap();
        let (reader, console) = pair(&ServerConfig::default()).await;
        let mut reader = reader.with_cars(Arc::new(cars));
        let target = reader.local_addr().unwrap();

        console.send_to(&packet(1, 4), target).await.unwrap();
        let snap = reader.next_snapshot().await.unwrap();
        assert_eq!(snap.car_info.map(|c| c.maker_name), Some("Jaguar".to_string()));
    }

    #[tokio::test]
    async fn test_heartbeat_every_n_packets() {
        let config = ServerConfig {
            heartbeat_packets: 2,
            ..ServerConfig::default()
        };
        let (mut reader, console) = pair(&config).await;
        let target = reader.local_addr().unwrap();

        for i in 0..3 {
            console.send_to(&packet(1, i), target).await.unwrap();
            reader.next_snapshot().await.unwrap();
        }

        let mut buf = [0u8; 8];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), console.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], HEARTBEAT);
    }

    #[tokio::test]
    async fn test_quiet_socket_resends_heartbeat() {
        let config = ServerConfig {
            socket_timeout_secs: 1,
            ..ServerConfig::default()
        };
        let (mut reader, console) = pair(&config).await;

        let pending = tokio::spawn(async move {
            let _ = tokio::time::timeout(Duration::from_millis(1500), reader.next_snapshot()).await;
        });

        let mut buf = [0u8; 8];
        let (len, _) = tokio::time::timeout(Duration::from_secs(3), console.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], HEARTBEAT);
        pending.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_forwards_until_cancelled() {
        let (reader, console) = pair(&ServerConfig::default()).await;
        let target = reader.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reader.run(tx, cancel.clone()));

        // Initial heartbeat goes out before anything is received
        let mut buf = [0u8; 8];
        let (len, _) = console.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], HEARTBEAT);

        console.send_to(&packet(3, 5), target).await.unwrap();
        assert_eq!(rx.recv().await.map(|s| s.current_lap), Some(3));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
