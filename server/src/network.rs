//! Server network layer: UDP transport around the single-owner world loop

use crate::client_manager::ClientManager;
use crate::game::{Intent, Outbound, Outbox, Recipient, World};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
    Shutdown,
}

/// Messages sent from the server loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { packet: Packet },
}

/// Owns the socket, the connection table and the world. Every packet and
/// every tick is applied to the world from `run`, one at a time.
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    world: World,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        client_timeout: Duration,
        world: World,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                max_clients,
                client_timeout,
            ))),
            world,
            tick_duration,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Sender that can stop `run` with [`ServerMessage::Shutdown`]
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if !packet.is_client_intent() {
                                warn!("Ignoring client-bound packet type from {}", addr);
                                continue;
                            }
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue in order
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn queue(&self, message: GameMessage) {
        if let Err(e) = self.game_tx.send(message) {
            error!("Failed to queue outgoing packet: {}", e);
        }
    }

    /// Sends to an address that may not be a registered client yet
    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        self.queue(GameMessage::SendPacket { packet, addr });
    }

    /// Resolves recipients against the connection table and queues the
    /// packets in the order the world produced them
    async fn dispatch(&self, outbox: Outbox) {
        if outbox.is_empty() {
            return;
        }

        let clients = self.clients.read().await;
        for Outbound { to, packet } in outbox {
            match to {
                Recipient::Client(client_id) => match clients.get_addr(client_id) {
                    Some(addr) => self.queue(GameMessage::SendPacket { packet, addr }),
                    None => debug!("Dropping packet for departed client {}", client_id),
                },
                Recipient::All => self.queue(GameMessage::BroadcastPacket { packet }),
            }
        }
    }

    async fn client_for(&self, addr: SocketAddr) -> Option<u32> {
        let mut clients = self.clients.write().await;
        let client_id = clients.find_client_by_addr(addr)?;
        clients.touch(client_id);
        Some(client_id)
    }

    /// Processes one incoming packet against the world
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    warn!(
                        "Rejecting {}: protocol version {} (expected {})",
                        addr, client_version, PROTOCOL_VERSION
                    );
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Remove existing connection if present
                let existing_client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(existing_id) = existing_client_id {
                    info!("Removing existing client {} from {}", existing_id, addr);
                    self.clients.write().await.remove_client(&existing_id);
                    let outbox = self.world.disconnect(existing_id);
                    self.dispatch(outbox).await;
                }

                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr)
                };

                match client_id {
                    Some(client_id) => {
                        self.send_packet(Packet::Connected { client_id }, addr);
                        let outbox = self.world.connect(client_id);
                        self.dispatch(outbox).await;
                    }
                    None => {
                        self.send_packet(
                            Packet::Disconnected {
                                reason: "Server full".to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Heartbeat => {
                if self.client_for(addr).await.is_none() {
                    debug!("Heartbeat from unknown address {}", addr);
                }
            }

            Packet::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    self.clients.write().await.remove_client(&client_id);
                    let outbox = self.world.disconnect(client_id);
                    self.dispatch(outbox).await;
                }
            }

            other => {
                let Some(client_id) = self.client_for(addr).await else {
                    debug!("Ignoring packet from unconnected address {}", addr);
                    return;
                };

                match Intent::from_packet(other) {
                    Some(intent) => {
                        let outbox = self.world.handle_intent(client_id, intent);
                        self.dispatch(outbox).await;
                    }
                    None => warn!("Unexpected packet type from client {}", client_id),
                }
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            let outbox = self.world.disconnect(client_id);
                            self.dispatch(outbox).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let outbox = self.world.tick();
                    self.dispatch(outbox).await;
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::clock::SystemClock;
    use crate::config::GameConfig;
    use std::net::{IpAddr, Ipv4Addr};

    async fn test_server() -> Server {
        let config = GameConfig {
            first_seed: Some("42".to_string()),
            ..GameConfig::default()
        };
        let world = World::new(config, Arc::new(SystemClock), 1, AuditLog::disabled());
        Server::new(
            "127.0.0.1:0",
            Duration::from_millis(1000),
            2,
            Duration::from_secs(30),
            world,
        )
        .await
        .unwrap()
    }

    async fn recv_packet(socket: &UdpSocket) -> Packet {
        let mut buffer = vec![0u8; 65536];
        let (len, _) = socket.recv_from(&mut buffer).await.unwrap();
        deserialize(&buffer[..len]).unwrap()
    }

    async fn send(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) {
        socket
            .send_to(&serialize(packet).unwrap(), addr)
            .await
            .unwrap();
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        assert!(tx
            .send(ServerMessage::PacketReceived {
                packet: Packet::Connect { client_version: 1 },
                addr,
            })
            .is_ok());

        match rx.try_recv().unwrap() {
            ServerMessage::PacketReceived { packet, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(packet, Packet::Connect { client_version: 1 });
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_resolves_recipients() {
        let mut server = test_server().await;
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let client_id = server.clients.write().await.add_client(addr).unwrap();

        let mut outbox = Outbox::default();
        outbox.send(client_id, Packet::Connected { client_id });
        outbox.send(77, Packet::Connected { client_id: 77 });
        outbox.broadcast(Packet::PlayerLeft { id: 3 });
        server.dispatch(outbox).await;

        match server.game_rx.try_recv().unwrap() {
            GameMessage::SendPacket { packet, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(packet, Packet::Connected { client_id });
            }
            other => panic!("Unexpected message {:?}", other),
        }
        match server.game_rx.try_recv().unwrap() {
            GameMessage::BroadcastPacket { packet } => {
                assert_eq!(packet, Packet::PlayerLeft { id: 3 });
            }
            other => panic!("Unexpected message {:?}", other),
        }
        assert!(server.game_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_handshake_over_udp() {
        let mut server = test_server().await;
        let server_addr = server.local_addr().unwrap();
        let control = server.control();

        let client = async move {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            send(&socket, &Packet::Connect { client_version: PROTOCOL_VERSION }, server_addr).await;

            loop {
                if let Packet::Connected { client_id } = recv_packet(&socket).await {
                    assert_eq!(client_id, 1);
                    break;
                }
            }
            loop {
                if let Packet::GameState { snapshot, terrain, .. } = recv_packet(&socket).await {
                    assert!(snapshot.in_progress);
                    assert_eq!(terrain, shared::generate("42"));
                    break;
                }
            }

            send(&socket, &Packet::JoinTeam { team: "red".to_string() }, server_addr).await;
            loop {
                if let Packet::TeamJoined { team } = recv_packet(&socket).await {
                    assert_eq!(team, shared::Team::Red);
                    break;
                }
            }

            control.send(ServerMessage::Shutdown).unwrap();
        };

        let result = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(server.run(), client).0
        })
        .await;
        tokio_test::assert_ok!(result.expect("handshake timed out"));
        assert_eq!(server.world().team_counts().red, 1);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let mut server = test_server().await;
        let server_addr = server.local_addr().unwrap();
        let control = server.control();

        let client = async move {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            send(&socket, &Packet::Connect { client_version: 99 }, server_addr).await;
            let reply = recv_packet(&socket).await;
            control.send(ServerMessage::Shutdown).unwrap();
            reply
        };

        let (run, reply) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(server.run(), client)
        })
        .await
        .expect("no reply");
        tokio_test::assert_ok!(run);
        assert_eq!(
            reply,
            Packet::Disconnected {
                reason: "Protocol version mismatch".to_string()
            }
        );
        assert!(server.clients.read().await.is_empty());
    }
}
