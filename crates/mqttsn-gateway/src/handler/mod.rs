//! The per-client handler: owns the MQTT-SN socket, the dedicated broker
//! connection, and the transaction table, and routes every frame between
//! them until one side goes away.

mod broker_publish;
mod connect;
mod publish;
mod subscribe;
mod table;
mod transaction;


use crate::config::{HandlerConfig, PredefinedTopics};
use crate::error::{GatewayError, Result};
use crate::mqtt;
use crate::topics::{DeliveryRef, TopicRegistry};
use broker_publish::{BrokerPublishTransaction, PendingRegister};
use bytes::BytesMut;
use connect::ConnectTransaction;
use futures::future::BoxFuture;
use mqttsn_protocol::message as sn;
use mqttsn_protocol::topic::has_wildcard;
use mqttsn_protocol::types::TopicIdType;
use mqttsn_protocol::{Message, MsgType, QoS, ReturnCode};
use publish::{PublishQos1, PublishQos2};
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subscribe::{SubAckTopicId, SubscribeTransaction, UnsubscribeTransaction};
use table::TransactionTable;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use transaction::{Input, Timing};

/// Byte stream the handler can drive; both sockets are injected as this.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// A connected stream to the upstream MQTT broker.
pub type BrokerStream = Box<dyn Transport>;

/// Dials the broker for one handler. Injected so the embedding process owns
/// addressing, TLS and socket options.
pub type BrokerDialer =
    Box<dyn Fn() -> BoxFuture<'static, std::io::Result<BrokerStream>> + Send + Sync>;

/// Session lifecycle states. `Asleep`/`Awake` are reserved for the
/// standard's sleeping-client feature, which this gateway does not
/// implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Active = 1,
    Asleep = 2,
    Awake = 3,
}

/// Watchdog fires at 1.5x the negotiated keepalive, per the standard's
/// tolerance for datagram jitter.
const KEEPALIVE_FACTOR_MILLIS: u64 = 1500;

pub(crate) struct Session {
    state: AtomicU8,
    keepalive_secs: AtomicU16,
    changed: Notify,
}

impl Session {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Disconnected as u8),
            keepalive_secs: AtomicU16::new(0),
            changed: Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            1 => SessionState::Active,
            2 => SessionState::Asleep,
            3 => SessionState::Awake,
            _ => SessionState::Disconnected,
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
        self.changed.notify_one();
    }

    fn activate(&self, keepalive_secs: u16) {
        self.keepalive_secs.store(keepalive_secs, Ordering::SeqCst);
        self.set_state(SessionState::Active);
    }

    fn watchdog_deadline(&self, last_sn_packet: Instant) -> Option<Instant> {
        if self.state() != SessionState::Active {
            return None;
        }
        let secs = self.keepalive_secs.load(Ordering::SeqCst);
        if secs == 0 {
            return None;
        }
        Some(last_sn_packet + Duration::from_millis(u64::from(secs) * KEEPALIVE_FACTOR_MILLIS))
    }
}

/// Shared sinks and state handed to every transaction. Sends are queue
/// pushes onto the per-socket writer tasks, so each socket sees one
/// serialized stream of frames no matter how many transactions write.
#[derive(Clone)]
pub(crate) struct HandlerIo {
    sn_tx: mpsc::UnboundedSender<Message>,
    mqtt_tx: mpsc::UnboundedSender<mqtt::Packet>,
    fatal_tx: mpsc::UnboundedSender<GatewayError>,
    pub(crate) session: Arc<Session>,
    pub(crate) registry: Arc<TopicRegistry>,
}

impl HandlerIo {
    pub(crate) fn send_sn(&self, msg: impl Into<Message>) {
        let msg = msg.into();
        trace!(msg_type = ?msg.msg_type(), "-> SN");
        let _ = self.sn_tx.send(msg);
    }

    pub(crate) fn send_mqtt(&self, packet: mqtt::Packet) {
        trace!(packet = ?packet, "-> MQTT");
        let _ = self.mqtt_tx.send(packet);
    }

    /// Reports an error that must take the whole handler down.
    pub(crate) fn fatal(&self, err: GatewayError) {
        let _ = self.fatal_tx.send(err);
    }

    pub(crate) fn activate_session(&self, client_id: &str, keepalive_secs: u16) {
        debug!(client_id, keepalive_secs, "session active");
        self.registry.bind_client(client_id);
        self.session.activate(keepalive_secs);
    }
}

enum Next {
    Continue,
    /// Clean DISCONNECT handshake completed; stop the handler.
    Disconnect,
}

/// One client's gateway session.
pub struct Handler {
    cfg: HandlerConfig,
    dialer: BrokerDialer,
    session: Arc<Session>,
    registry: Arc<TopicRegistry>,
    transactions: Arc<TransactionTable>,
}

impl Handler {
    #[must_use]
    pub fn new(cfg: HandlerConfig, predefined: PredefinedTopics, dialer: BrokerDialer) -> Self {
        Self {
            cfg,
            dialer,
            session: Arc::new(Session::new()),
            registry: Arc::new(TopicRegistry::new(predefined)),
            transactions: Arc::new(TransactionTable::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Drives the session to completion: dials the broker, then shuttles
    /// frames until a clean DISCONNECT, a protocol violation, a fatal
    /// transaction failure, or either transport going away.
    pub async fn run<S: Transport + 'static>(&self, sn_conn: S) -> Result<()> {
        let broker = (self.dialer)().await?;
        debug!("connected to MQTT broker");

        let (sn_rd, sn_wr) = tokio::io::split(sn_conn);
        let (mqtt_rd, mqtt_wr) = tokio::io::split(broker);
        let (sn_tx, sn_rx) = mpsc::unbounded_channel();
        let (mqtt_tx, mqtt_rx) = mpsc::unbounded_channel();
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

        let sn_writer = tokio::spawn(sn_writer_task(sn_rx, sn_wr));
        let mqtt_writer = tokio::spawn(mqtt_writer_task(mqtt_rx, mqtt_wr));

        let io = HandlerIo {
            sn_tx,
            mqtt_tx,
            fatal_tx,
            session: Arc::clone(&self.session),
            registry: Arc::clone(&self.registry),
        };

        let result = self.event_loop(sn_rd, mqtt_rd, &io, &mut fatal_rx).await;

        // Teardown: cancel what is still in flight, then let the writers
        // drain whatever the transactions queued on their way out.
        self.transactions.cancel_all();
        self.session.set_state(SessionState::Disconnected);
        drop(io);
        let _ = sn_writer.await;
        let _ = mqtt_writer.await;

        match &result {
            Ok(()) => debug!("handler finished"),
            Err(err) => debug!(error = %err, "handler finished with error"),
        }
        result
    }

    async fn event_loop<S, B>(
        &self,
        mut sn_rd: ReadHalf<S>,
        mut mqtt_rd: ReadHalf<B>,
        io: &HandlerIo,
        fatal_rx: &mut mpsc::UnboundedReceiver<GatewayError>,
    ) -> Result<()>
    where
        S: AsyncRead,
        B: AsyncRead,
    {
        let mut sn_buf = BytesMut::with_capacity(1024);
        let mut mqtt_buf = BytesMut::with_capacity(1024);
        let mut last_sn_packet = Instant::now();

        loop {
            let watchdog = self.session.watchdog_deadline(last_sn_packet);
            tokio::select! {
                msg = read_sn_message(&mut sn_rd, &mut sn_buf) => {
                    let Some(msg) = msg? else {
                        debug!("client closed the connection");
                        return Ok(());
                    };
                    last_sn_packet = Instant::now();
                    if let Next::Disconnect = self.dispatch_sn(msg, io)? {
                        return Ok(());
                    }
                }
                packet = mqtt::read_packet(&mut mqtt_rd, &mut mqtt_buf) => {
                    let Some(packet) = packet? else {
                        // NOTE: it is not settled whether the client should
                        // get a DISCONNECT when the broker goes away; this
                        // mirrors the long-standing behavior, best effort.
                        debug!("broker closed the connection");
                        io.send_sn(sn::Disconnect::new(0));
                        return Err(GatewayError::BrokerDisconnected);
                    };
                    self.dispatch_mqtt(packet, io);
                }
                Some(err) = fatal_rx.recv() => return Err(err),
                () = self.session.changed.notified() => {
                    // Re-evaluate the watchdog against the new state.
                }
                () = sleep_until_opt(watchdog) => return Err(GatewayError::KeepaliveTimeout),
            }
        }
    }

    fn dispatch_sn(&self, msg: Message, io: &HandlerIo) -> Result<Next> {
        let state = self.session.state();
        trace!(?state, msg_type = ?msg.msg_type(), "<- SN");
        if state == SessionState::Disconnected {
            return self.dispatch_sn_disconnected(msg, io);
        }

        match msg {
            Message::Connect(connect) => {
                self.start_connect(&connect, io);
                Ok(Next::Continue)
            }
            Message::Auth(_) | Message::WillTopic(_) | Message::WillMsg(_) => {
                self.route_connect(msg, state)
            }
            Message::Register(register) => {
                let topic_id = self.registry.register(&register.topic_name);
                io.send_sn(sn::RegAck::new(topic_id, register.msg_id, ReturnCode::Accepted));
                Ok(Next::Continue)
            }
            Message::RegAck(_)
            | Message::PubAck(_)
            | Message::PubRec(_)
            | Message::PubRel(_)
            | Message::PubComp(_) => {
                self.route_msg_id(msg);
                Ok(Next::Continue)
            }
            Message::Publish(publish) => self.client_publish(&publish, io),
            Message::Subscribe(subscribe) => self.client_subscribe(&subscribe, io),
            Message::Unsubscribe(unsubscribe) => self.client_unsubscribe(&unsubscribe, io),
            Message::PingReq(_) => {
                io.send_sn(sn::PingResp::new());
                Ok(Next::Continue)
            }
            Message::Disconnect(disconnect) => Ok(self.client_disconnect(disconnect, io)),
            Message::SearchGw(_) => {
                io.send_sn(sn::GwInfo::new(self.cfg.gateway_id));
                Ok(Next::Continue)
            }
            Message::Advertise(_) | Message::GwInfo(_) => {
                debug!("ignoring discovery message in session");
                Ok(Next::Continue)
            }
            other => Err(GatewayError::NotPermitted {
                msg_type: other.msg_type(),
                state,
            }),
        }
    }

    /// Legality matrix before CONNECT completes: connection setup, gateway
    /// discovery, the fire-and-forget publish carve-out, and a clean
    /// DISCONNECT. Everything else closes the connection with no reply.
    fn dispatch_sn_disconnected(&self, msg: Message, io: &HandlerIo) -> Result<Next> {
        match msg {
            Message::Connect(connect) => {
                self.start_connect(&connect, io);
                Ok(Next::Continue)
            }
            Message::Auth(_) | Message::WillTopic(_) | Message::WillMsg(_) => {
                self.route_connect(msg, SessionState::Disconnected)
            }
            Message::Publish(publish)
                if publish.qos == QoS::FireAndForget
                    && !self.cfg.auth_enabled
                    && matches!(
                        publish.topic_id_type,
                        TopicIdType::Predefined | TopicIdType::Short
                    ) =>
            {
                let topic = self
                    .registry
                    .resolve_publish(publish.topic_id_type, publish.topic_id)?;
                let mut forward = mqtt::Publish::new(topic, 0, publish.data.clone());
                forward.retain = publish.retain;
                io.send_mqtt(mqtt::Packet::Publish(forward));
                Ok(Next::Continue)
            }
            Message::SearchGw(_) => {
                io.send_sn(sn::GwInfo::new(self.cfg.gateway_id));
                Ok(Next::Continue)
            }
            Message::Advertise(_) => Ok(Next::Continue),
            Message::Disconnect(disconnect) => Ok(self.client_disconnect(disconnect, io)),
            other => Err(GatewayError::NotPermitted {
                msg_type: other.msg_type(),
                state: SessionState::Disconnected,
            }),
        }
    }

    fn dispatch_mqtt(&self, packet: mqtt::Packet, io: &HandlerIo) {
        trace!(packet = ?packet, "<- MQTT");
        match packet {
            mqtt::Packet::ConnAck(_) => match self.transactions.singleton(MsgType::Connect) {
                Some(handle) => handle.deliver(Input::Mqtt(packet)),
                None => debug!("CONNACK with no CONNECT in flight"),
            },
            mqtt::Packet::SubAck(_)
            | mqtt::Packet::UnsubAck { .. }
            | mqtt::Packet::PubAck { .. }
            | mqtt::Packet::PubRec { .. }
            | mqtt::Packet::PubRel { .. }
            | mqtt::Packet::PubComp { .. } => {
                let packet_id = mqtt_packet_id(&packet);
                match self.transactions.get(packet_id) {
                    Some(handle) => handle.deliver(Input::Mqtt(packet)),
                    None => debug!(packet_id, "no transaction for MQTT packet id"),
                }
            }
            mqtt::Packet::Publish(publish) => self.broker_publish(publish, io),
            mqtt::Packet::PingReq | mqtt::Packet::PingResp => {
                debug!("ignoring broker ping traffic");
            }
            other => warn!(packet = ?other, "unexpected packet from broker"),
        }
    }

    fn start_connect(&self, connect: &sn::Connect, io: &HandlerIo) {
        // A client that lost our CONNACK restarts from scratch; the stale
        // transaction must give way to a fresh one.
        if let Some(old) = self.transactions.singleton(MsgType::Connect) {
            debug!("replacing live CONNECT transaction");
            old.cancel();
        }
        let exchange = ConnectTransaction::new(connect, self.cfg.auth_enabled);
        self.transactions.spawn(
            &[],
            Some(MsgType::Connect),
            Timing::Expire(self.cfg.connect_timeout),
            exchange,
            io,
        );
    }

    fn route_connect(&self, msg: Message, state: SessionState) -> Result<Next> {
        match self.transactions.singleton(MsgType::Connect) {
            Some(handle) => {
                handle.deliver(Input::Sn(msg));
                Ok(Next::Continue)
            }
            None => Err(GatewayError::NotPermitted {
                msg_type: msg.msg_type(),
                state,
            }),
        }
    }

    fn route_msg_id(&self, msg: Message) {
        let msg_id = msg.msg_id().unwrap_or(0);
        match self.transactions.get(msg_id) {
            Some(handle) => handle.deliver(Input::Sn(msg)),
            None => debug!(msg_id, "no transaction for message id"),
        }
    }

    fn client_publish(&self, publish: &sn::Publish, io: &HandlerIo) -> Result<Next> {
        match publish.qos {
            QoS::AtMostOnce | QoS::FireAndForget => {
                match self
                    .registry
                    .resolve_publish(publish.topic_id_type, publish.topic_id)
                {
                    Ok(topic) => {
                        let mut forward = mqtt::Publish::new(topic, 0, publish.data.clone());
                        forward.retain = publish.retain;
                        io.send_mqtt(mqtt::Packet::Publish(forward));
                    }
                    Err(err) => warn!(error = %err, "dropping PUBLISH on unknown topic"),
                }
            }
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                let topic = match self
                    .registry
                    .resolve_publish(publish.topic_id_type, publish.topic_id)
                {
                    Ok(topic) => topic,
                    Err(_) => {
                        io.send_sn(sn::PubAck::new(
                            publish.topic_id,
                            publish.msg_id,
                            ReturnCode::InvalidTopicId,
                        ));
                        return Ok(Next::Continue);
                    }
                };
                if self.transactions.get(publish.msg_id).is_some() {
                    debug!(msg_id = publish.msg_id, "duplicate PUBLISH for live transaction");
                    return Ok(Next::Continue);
                }
                let mut forward =
                    mqtt::Publish::new(topic, publish.qos.as_mqtt(), publish.data.clone());
                forward.packet_id = publish.msg_id;
                forward.retain = publish.retain;
                forward.dup = publish.dup;
                if publish.qos == QoS::AtLeastOnce {
                    self.transactions.spawn(
                        &[publish.msg_id],
                        None,
                        self.retry_timing(),
                        PublishQos1::new(publish.msg_id, publish.topic_id, forward),
                        io,
                    );
                } else {
                    self.transactions.spawn(
                        &[publish.msg_id],
                        None,
                        self.retry_timing(),
                        PublishQos2::new(publish.msg_id, forward),
                        io,
                    );
                }
            }
        }
        Ok(Next::Continue)
    }

    fn client_subscribe(&self, subscribe: &sn::Subscribe, io: &HandlerIo) -> Result<Next> {
        let topic_name = match self.registry.resolve_filter(&subscribe.topic) {
            Ok(name) => name,
            Err(_) => {
                io.send_sn(sn::SubAck::new(
                    QoS::AtMostOnce,
                    0,
                    subscribe.msg_id,
                    ReturnCode::InvalidTopicId,
                ));
                return Ok(Next::Continue);
            }
        };
        let reply_id = match &subscribe.topic {
            sn::TopicRef::Name(name) if !has_wildcard(name) => {
                SubAckTopicId::Register(name.clone())
            }
            sn::TopicRef::Name(_) | sn::TopicRef::Short(_) => SubAckTopicId::Fixed(0),
            sn::TopicRef::Predefined(id) => SubAckTopicId::Fixed(*id),
        };
        self.transactions.spawn(
            &[subscribe.msg_id],
            None,
            self.retry_timing(),
            SubscribeTransaction::new(subscribe.msg_id, subscribe.qos, topic_name, reply_id),
            io,
        );
        Ok(Next::Continue)
    }

    fn client_unsubscribe(&self, unsubscribe: &sn::Unsubscribe, io: &HandlerIo) -> Result<Next> {
        let topic_name = match self.registry.resolve_filter(&unsubscribe.topic) {
            Ok(name) => name,
            Err(_) => {
                // UNSUBACK has no return code to carry the failure.
                io.send_sn(sn::UnsubAck::new(unsubscribe.msg_id));
                return Ok(Next::Continue);
            }
        };
        self.transactions.spawn(
            &[unsubscribe.msg_id],
            None,
            self.retry_timing(),
            UnsubscribeTransaction::new(unsubscribe.msg_id, topic_name),
            io,
        );
        Ok(Next::Continue)
    }

    fn client_disconnect(&self, disconnect: sn::Disconnect, io: &HandlerIo) -> Next {
        if disconnect.duration > 0 {
            warn!(
                duration = disconnect.duration,
                "sleeping clients are not supported; treating DISCONNECT as final"
            );
        }
        io.send_mqtt(mqtt::Packet::Disconnect);
        io.send_sn(sn::Disconnect::new(0));
        self.session.set_state(SessionState::Disconnected);
        Next::Disconnect
    }

    fn broker_publish(&self, publish: mqtt::Publish, io: &HandlerIo) {
        let qos = publish.qos;
        let msg_id = if qos > 0 { publish.packet_id } else { 0 };

        let (topic_id, id_type, register) = match self.registry.delivery_ref(&publish.topic) {
            DeliveryRef::Predefined(id) => (id, TopicIdType::Predefined, None),
            DeliveryRef::Registered(id) => (id, TopicIdType::Normal, None),
            DeliveryRef::Short(id) => (id, TopicIdType::Short, None),
            DeliveryRef::Unregistered => {
                let topic_id = self.registry.allocate_id();
                let mut register_msg_id = self.transactions.next_msg_id();
                while register_msg_id == msg_id {
                    register_msg_id = self.transactions.next_msg_id();
                }
                let register = PendingRegister {
                    topic_id,
                    msg_id: register_msg_id,
                    topic_name: publish.topic.clone(),
                };
                (topic_id, TopicIdType::Normal, Some(register))
            }
        };

        let mut sn_publish = sn::Publish::new(
            topic_id,
            id_type,
            QoS::from_bits(qos),
            publish.payload.clone(),
        )
        .with_retain(publish.retain);
        sn_publish.msg_id = msg_id;

        if register.is_none() && qos == 0 {
            io.send_sn(sn_publish);
            return;
        }

        let mut keys = Vec::with_capacity(2);
        if qos > 0 {
            keys.push(msg_id);
        }
        if let Some(register) = &register {
            keys.push(register.msg_id);
        }
        self.transactions.spawn(
            &keys,
            None,
            self.retry_timing(),
            BrokerPublishTransaction::new(msg_id, qos, sn_publish, register),
            io,
        );
    }

    fn retry_timing(&self) -> Timing {
        Timing::Retry {
            delay: self.cfg.retry_delay,
            count: self.cfg.retry_count,
        }
    }
}

fn mqtt_packet_id(packet: &mqtt::Packet) -> u16 {
    match packet {
        mqtt::Packet::SubAck(ack) => ack.packet_id,
        mqtt::Packet::UnsubAck { packet_id }
        | mqtt::Packet::PubAck { packet_id }
        | mqtt::Packet::PubRec { packet_id }
        | mqtt::Packet::PubRel { packet_id }
        | mqtt::Packet::PubComp { packet_id } => *packet_id,
        _ => 0,
    }
}

/// Reads one MQTT-SN frame, reassembling across short reads; `Ok(None)` is
/// a clean EOF at a frame boundary.
async fn read_sn_message<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(msg) = Message::parse(buf)? {
            return Ok(Some(msg));
        }
        if reader.read_buf(buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            )));
        }
    }
}

async fn sn_writer_task<W>(mut rx: mpsc::UnboundedReceiver<Message>, mut writer: WriteHalf<W>)
where
    W: AsyncWrite,
{
    let mut buf = BytesMut::with_capacity(512);
    while let Some(msg) = rx.recv().await {
        buf.clear();
        msg.encode(&mut buf);
        if let Err(err) = writer.write_all(&buf).await {
            debug!(error = %err, "SN write failed");
            break;
        }
        if let Err(err) = writer.flush().await {
            debug!(error = %err, "SN flush failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn mqtt_writer_task<W>(
    mut rx: mpsc::UnboundedReceiver<mqtt::Packet>,
    mut writer: WriteHalf<W>,
) where
    W: AsyncWrite,
{
    let mut buf = BytesMut::with_capacity(512);
    while let Some(packet) = rx.recv().await {
        if let Err(err) = mqtt::write_packet(&mut writer, &packet, &mut buf).await {
            debug!(error = %err, "MQTT write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
