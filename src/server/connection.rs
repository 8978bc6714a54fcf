//! Per-connection session driver
//!
//! Owns everything about one peer: the socket, the handshake, chunk
//! reassembly, RPC dispatch, and (for subscribers) forwarding of relayed
//! frames gated on keyframe readiness.
//!
//! Lifecycle: handshake → chunk-stream mode → `connect` → either
//! `FCPublish`/`publish` (publisher) or `createStream`/`play`
//! (subscriber) → media until EOF, peer close, or protocol error. Every
//! error is confined to this session.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::amf::{AmfObject, AmfValue, Decoder};
use crate::error::{AmfError, Error, ProtocolError, Result};
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder};
use crate::protocol::constants::*;
use crate::protocol::handshake::Handshake;
use crate::protocol::message::{
    clear_stream_payload, invoke_payload, notify_payload, parse_u32_payload, result_payload,
    set_chunk_size_payload, user_control_event, Message,
};
use crate::relay::{RelayEvent, RelayHub};
use crate::server::config::ServerConfig;
use crate::server::handler::{AuthResult, RtmpHandler};
use crate::session::SessionState;

/// Per-connection handler
pub struct Connection<H: RtmpHandler> {
    state: SessionState,

    reader: BufReader<ReadHalf<TcpStream>>,
    writer: BufWriter<WriteHalf<TcpStream>>,

    /// Inbound byte accumulator
    read_buf: BytesMut,

    decoder: ChunkDecoder,
    encoder: ChunkEncoder,

    /// Scratch buffer for outgoing chunks
    write_buf: BytesMut,

    config: ServerConfig,
    handler: Arc<H>,
    hub: Arc<RelayHub>,

    /// Relay event receiver; present exactly while `playing`
    events: Option<broadcast::Receiver<RelayEvent>>,

    /// This session holds the hub's publisher slot
    holds_publisher_slot: bool,

    consecutive_lags: u32,
}

impl<H: RtmpHandler> Connection<H> {
    /// Create a handler for an accepted socket
    pub fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: ServerConfig,
        handler: Arc<H>,
        hub: Arc<RelayHub>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(socket);

        Self {
            state: SessionState::new(session_id, peer_addr),
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            read_buf: BytesMut::with_capacity(8 * 1024),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            write_buf: BytesMut::with_capacity(8 * 1024),
            config,
            handler,
            hub,
            events: None,
            holds_publisher_slot: false,
            consecutive_lags: 0,
        }
    }

    /// Drive the session to completion
    pub async fn run(&mut self) -> Result<()> {
        if !self
            .handler
            .on_connection(self.state.id, self.state.peer_addr)
            .await
        {
            return Err(Error::Rejected("connection refused".into()));
        }

        let result = self.drive().await;

        self.cleanup().await;
        self.handler.on_disconnect(self.state.id).await;

        result
    }

    async fn drive(&mut self) -> Result<()> {
        self.do_handshake().await?;
        self.state.complete_handshake();
        tracing::debug!(session_id = self.state.id, "Handshake complete");

        // announce a larger write chunk size before anything else goes out
        self.send_message(
            MSG_SET_CHUNK_SIZE,
            CONTROL_ENDPOINT,
            0,
            set_chunk_size_payload(self.config.chunk_size),
            CSID_CONTROL,
        )
        .await?;
        self.encoder.set_chunk_size(self.config.chunk_size);

        loop {
            if let Some(mut rx) = self.events.take() {
                tokio::select! {
                    biased;

                    event = rx.recv() => {
                        self.events = Some(rx);
                        match event {
                            Ok(event) => {
                                self.consecutive_lags = 0;
                                self.forward_event(event).await?;
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                self.handle_lag(skipped)?;
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                // hub dropped, the server is going away
                                return Ok(());
                            }
                        }
                    }

                    read = self.read_and_process() => {
                        // dispatch may have paused playback or restarted it
                        // with a fresh subscription; retire the taken
                        // receiver accordingly
                        if self.state.playing && self.events.is_none() {
                            self.events = Some(rx);
                        } else {
                            drop(rx);
                            self.hub.unsubscribe().await;
                        }
                        if !read? {
                            return Ok(());
                        }
                    }
                }
            } else if !self.read_and_process().await? {
                return Ok(());
            }
        }
    }

    /// Release shared state on the way out
    async fn cleanup(&mut self) {
        if self.holds_publisher_slot {
            self.hub.release_publisher(self.state.id).await;
        }
        if self.events.take().is_some() {
            self.hub.unsubscribe().await;
        }
    }

    /// Run the handshake state machine against the read buffer
    async fn do_handshake(&mut self) -> Result<()> {
        let mut handshake = Handshake::new();

        let deadline = self.config.handshake_timeout;
        timeout(deadline, async {
            while !handshake.is_done() {
                if self.read_buf.len() < handshake.bytes_needed() {
                    let n = self.reader.read_buf(&mut self.read_buf).await?;
                    if n == 0 {
                        return Err(Error::ConnectionClosed);
                    }
                    continue;
                }
                if let Some(response) = handshake.process(&mut self.read_buf)? {
                    self.writer.write_all(&response).await?;
                    self.writer.flush().await?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|_| Error::Timeout)?
    }

    /// Read from the socket and dispatch assembled messages
    ///
    /// Returns false on EOF. Drains already-buffered messages before
    /// blocking so data that arrived alongside the previous read is not
    /// held hostage by the socket.
    async fn read_and_process(&mut self) -> Result<bool> {
        let mut processed = false;
        while let Some(msg) = self.decoder.decode(&mut self.read_buf)? {
            self.dispatch(msg).await?;
            processed = true;
        }
        if processed {
            return Ok(true);
        }

        let n = self.reader.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Ok(false);
        }
        self.state.add_read(n as u32);

        while let Some(msg) = self.decoder.decode(&mut self.read_buf)? {
            self.dispatch(msg).await?;
        }
        Ok(true)
    }

    /// Interpret one assembled message
    async fn dispatch(&mut self, msg: Message) -> Result<()> {
        match msg.type_id {
            MSG_SET_CHUNK_SIZE => {
                let size = parse_u32_payload(&msg.payload)?;
                tracing::debug!(session_id = self.state.id, size, "Peer chunk size updated");
                self.decoder.set_chunk_size(size);
            }

            MSG_BYTES_READ => {
                self.state.peer_read_seq = parse_u32_payload(&msg.payload)?;
                tracing::trace!(
                    session_id = self.state.id,
                    depth = self.state.queue_depth(),
                    "Bytes-read report"
                );
            }

            MSG_USER_CONTROL => {
                tracing::trace!(
                    session_id = self.state.id,
                    event = ?user_control_event(&msg.payload),
                    "User control ignored"
                );
            }

            MSG_INVOKE => {
                let dec = Decoder::new(msg.payload.clone());
                self.handle_invoke(&msg, dec).await?;
            }

            MSG_INVOKE_AMF3 => {
                // the first payload byte is discarded
                if msg.payload.is_empty() {
                    return Err(AmfError::ShortBuffer.into());
                }
                let dec = Decoder::new(msg.payload.slice(1..));
                self.handle_invoke(&msg, dec).await?;
            }

            MSG_NOTIFY => self.handle_notify(&msg).await?,

            MSG_AUDIO => self.handle_audio(&msg).await?,

            MSG_VIDEO => self.handle_video(&msg).await?,

            MSG_FLV_TUNNEL => return Err(ProtocolError::FlvTunnel.into()),

            other => {
                tracing::debug!(
                    session_id = self.state.id,
                    type_id = other,
                    len = msg.payload.len(),
                    "Unhandled message type"
                );
            }
        }
        Ok(())
    }

    /// Decode an RPC request and route it by endpoint and method
    ///
    /// Arguments are pulled from the decoder lazily by each method
    /// handler, so unknown methods never touch their arguments and are
    /// ignored without error.
    async fn handle_invoke(&mut self, msg: &Message, mut dec: Decoder) -> Result<()> {
        let method = dec.string()?;
        let txid = dec.number()?;
        tracing::debug!(session_id = self.state.id, method = %method, "Invoke");

        match (msg.endpoint, method.as_str()) {
            (CONTROL_ENDPOINT, CMD_CONNECT) => self.handle_connect(txid, &mut dec).await,
            (CONTROL_ENDPOINT, CMD_FC_PUBLISH) => self.handle_fc_publish(txid, &mut dec).await,
            (CONTROL_ENDPOINT, CMD_CREATE_STREAM) => self.handle_create_stream(txid).await,
            (STREAM_ENDPOINT, CMD_PUBLISH) => self.handle_publish(txid, &mut dec).await,
            (STREAM_ENDPOINT, CMD_PLAY) => self.handle_play(txid, &mut dec).await,
            (STREAM_ENDPOINT, CMD_PLAY2) => self.handle_play2(txid, &mut dec).await,
            (STREAM_ENDPOINT, CMD_PAUSE) => self.handle_pause(txid, &mut dec).await,
            _ => {
                tracing::trace!(session_id = self.state.id, method = %method, "Unknown method ignored");
                Ok(())
            }
        }
    }

    async fn handle_connect(&mut self, txid: f64, dec: &mut Decoder) -> Result<()> {
        let params = dec.object()?;
        let app = params.get_str("app").unwrap_or_default().to_string();
        let flash_ver = params.get_str("flashVer").unwrap_or("(unknown)");

        if app != self.config.app_name {
            return Err(ProtocolError::UnsupportedApp(app).into());
        }
        if let AuthResult::Reject(reason) = self.handler.on_connect(self.state.id, &app).await {
            return Err(Error::Rejected(reason));
        }

        tracing::info!(
            session_id = self.state.id,
            app = %app,
            flash_ver = %flash_ver,
            "Connected"
        );

        let mut server_info = AmfObject::new();
        server_info.insert("fmsVer", FMS_VERSION);
        server_info.insert("capabilities", SERVER_CAPABILITIES);
        server_info.insert("mode", SERVER_MODE);

        let mut status = AmfObject::new();
        status.insert("level", "status");
        status.insert("code", NC_CONNECT_SUCCESS);
        status.insert("description", "Connection succeeded.");
        status.insert("objectEncoding", OBJECT_ENCODING_AMF3);

        self.send_reply(txid, AmfValue::Object(server_info), AmfValue::Object(status))
            .await
    }

    async fn handle_fc_publish(&mut self, txid: f64, dec: &mut Decoder) -> Result<()> {
        // claim the slot before anything else; a second publisher dies here
        self.hub.claim_publisher(self.state.id).await?;
        self.holds_publisher_slot = true;

        dec.value()?; // null placeholder
        let path = dec.string()?;
        tracing::debug!(session_id = self.state.id, path = %path, "FCPublish");

        let mut status = AmfObject::new();
        status.insert("code", NS_PUBLISH_START);
        status.insert("description", path);

        let payload = invoke_payload(
            CMD_ON_FC_PUBLISH,
            0.0,
            &[AmfValue::Null, AmfValue::Object(status)],
        )?;
        self.send_message(MSG_INVOKE, CONTROL_ENDPOINT, 0, payload, CSID_CONTROL)
            .await?;

        self.send_reply(txid, AmfValue::Null, AmfValue::Null).await
    }

    async fn handle_create_stream(&mut self, txid: f64) -> Result<()> {
        self.send_reply(txid, AmfValue::Null, AmfValue::Number(f64::from(STREAM_ENDPOINT)))
            .await
    }

    async fn handle_publish(&mut self, txid: f64, dec: &mut Decoder) -> Result<()> {
        dec.value()?; // null placeholder
        let path = dec.string()?;

        if let AuthResult::Reject(reason) = self.handler.on_publish(self.state.id, &path).await {
            return Err(Error::Rejected(reason));
        }
        tracing::info!(session_id = self.state.id, path = %path, "Publishing");

        let mut status = AmfObject::new();
        status.insert("level", "status");
        status.insert("code", NS_PUBLISH_START);
        status.insert("description", "Stream is now published.");
        status.insert("details", path);

        let payload = invoke_payload(
            CMD_ON_STATUS,
            0.0,
            &[AmfValue::Null, AmfValue::Object(status)],
        )?;
        self.send_message(MSG_INVOKE, STREAM_ENDPOINT, 0, payload, CSID_STREAM)
            .await?;

        self.send_reply(txid, AmfValue::Null, AmfValue::Null).await
    }

    async fn handle_play(&mut self, txid: f64, dec: &mut Decoder) -> Result<()> {
        dec.value()?; // null placeholder
        let path = dec.string()?;
        self.authorize_play(&path).await?;
        self.start_playback().await?;
        self.send_reply(txid, AmfValue::Null, AmfValue::Null).await
    }

    async fn handle_play2(&mut self, txid: f64, dec: &mut Decoder) -> Result<()> {
        dec.value()?; // null placeholder
        let params = dec.object()?;
        let path = params
            .get_str("streamName")
            .ok_or(ProtocolError::MissingField("streamName"))?
            .to_string();
        self.authorize_play(&path).await?;
        self.start_playback().await?;
        self.send_reply(txid, AmfValue::Null, AmfValue::Null).await
    }

    async fn authorize_play(&mut self, path: &str) -> Result<()> {
        if let AuthResult::Reject(reason) = self.handler.on_play(self.state.id, path).await {
            return Err(Error::Rejected(reason));
        }
        tracing::info!(session_id = self.state.id, path = %path, "Playing");
        Ok(())
    }

    async fn handle_pause(&mut self, txid: f64, dec: &mut Decoder) -> Result<()> {
        dec.value()?; // null placeholder
        let paused = dec.boolean()?;

        if paused {
            tracing::debug!(session_id = self.state.id, "Pausing");
            let payload = on_status_payload("status", NS_PAUSE_NOTIFY, "Pausing.")?;
            self.send_message(MSG_INVOKE, STREAM_ENDPOINT, 0, payload, CSID_STREAM)
                .await?;

            self.state.playing = false;
            self.state.ready = false;
        } else {
            self.start_playback().await?;
        }

        self.send_reply(txid, AmfValue::Null, AmfValue::Null).await
    }

    /// Shared tail of `play`, `play2`, and unpause
    async fn start_playback(&mut self) -> Result<()> {
        let reset = on_status_payload("status", NS_PLAY_RESET, "Resetting and playing stream.")?;
        self.send_message(MSG_INVOKE, STREAM_ENDPOINT, 0, reset, CSID_STREAM)
            .await?;

        let start = on_status_payload("status", NS_PLAY_START, "Started playing.")?;
        self.send_message(MSG_INVOKE, STREAM_ENDPOINT, 0, start, CSID_STREAM)
            .await?;

        let access = notify_payload(
            CMD_SAMPLE_ACCESS,
            &[AmfValue::Boolean(true), AmfValue::Boolean(true)],
        )?;
        self.send_message(MSG_NOTIFY, STREAM_ENDPOINT, 0, access, CSID_STREAM)
            .await?;

        self.state.playing = true;
        self.state.ready = false;
        if self.events.is_none() {
            self.events = Some(self.hub.subscribe().await);
        }

        // a live publisher implies metadata, possibly an empty one
        if self.hub.has_publisher().await {
            let metadata = self.hub.metadata().await.unwrap_or_default();
            let payload = notify_payload(CMD_ON_METADATA, &[AmfValue::EcmaArray(metadata)])?;
            self.send_message(MSG_NOTIFY, STREAM_ENDPOINT, 0, payload, CSID_STREAM)
                .await?;
        }

        Ok(())
    }

    async fn handle_notify(&mut self, msg: &Message) -> Result<()> {
        let mut dec = Decoder::new(msg.payload.clone());
        let name = dec.string()?;
        tracing::debug!(session_id = self.state.id, name = %name, "Notify");

        if msg.endpoint == STREAM_ENDPOINT && name == CMD_SET_DATA_FRAME {
            self.handle_set_data_frame(&mut dec).await?;
        }
        Ok(())
    }

    async fn handle_set_data_frame(&mut self, dec: &mut Decoder) -> Result<()> {
        if !self.hub.is_publisher(self.state.id).await {
            return Err(ProtocolError::NotPublisher.into());
        }

        let name = dec.string()?;
        if name != CMD_ON_METADATA {
            return Err(ProtocolError::InvalidDataFrame(name).into());
        }

        let metadata = dec.ecma_array()?;
        self.handler.on_metadata(self.state.id, &metadata).await;

        let payload = notify_payload(CMD_ON_METADATA, &[AmfValue::EcmaArray(metadata.clone())])?;
        self.hub.set_metadata(metadata).await;
        self.hub.broadcast(RelayEvent::Metadata { payload });
        Ok(())
    }

    async fn handle_audio(&mut self, msg: &Message) -> Result<()> {
        if !self.hub.is_publisher(self.state.id).await {
            return Err(ProtocolError::NotPublisher.into());
        }
        self.hub.broadcast(RelayEvent::Audio {
            timestamp: msg.timestamp,
            data: msg.payload.clone(),
        });
        Ok(())
    }

    async fn handle_video(&mut self, msg: &Message) -> Result<()> {
        if !self.hub.is_publisher(self.state.id).await {
            return Err(ProtocolError::NotPublisher.into());
        }
        if msg.payload.is_empty() {
            return Ok(());
        }
        let keyframe = msg.payload[0] >> 4 == FLV_KEY_FRAME;
        self.hub.broadcast(RelayEvent::Video {
            timestamp: msg.timestamp,
            data: msg.payload.clone(),
            keyframe,
        });
        Ok(())
    }

    /// Forward one relayed event, honoring this subscriber's readiness
    async fn forward_event(&mut self, event: RelayEvent) -> Result<()> {
        match event {
            RelayEvent::Audio { timestamp, data } => {
                if self.state.ready {
                    self.send_message(MSG_AUDIO, STREAM_ENDPOINT, timestamp, data, CSID_STREAM)
                        .await?;
                }
            }
            RelayEvent::Video {
                timestamp,
                data,
                keyframe,
            } => {
                if keyframe && !self.state.ready {
                    self.send_message(
                        MSG_USER_CONTROL,
                        CONTROL_ENDPOINT,
                        0,
                        clear_stream_payload(STREAM_ENDPOINT),
                        CSID_CONTROL,
                    )
                    .await?;
                    self.state.ready = true;
                    tracing::debug!(session_id = self.state.id, "Keyframe sync");
                }
                if self.state.ready {
                    self.send_message(MSG_VIDEO, STREAM_ENDPOINT, timestamp, data, CSID_STREAM)
                        .await?;
                }
            }
            RelayEvent::Metadata { payload } => {
                self.send_message(MSG_NOTIFY, STREAM_ENDPOINT, 0, payload, CSID_STREAM)
                    .await?;
            }
            RelayEvent::PublisherGone => {
                self.state.ready = false;
                tracing::debug!(session_id = self.state.id, "Publisher gone, awaiting keyframe");
            }
        }
        Ok(())
    }

    /// A lagging subscriber loses frames; resync at the next keyframe and
    /// give up on peers that lag persistently
    fn handle_lag(&mut self, skipped: u64) -> Result<()> {
        self.consecutive_lags += 1;
        if self.consecutive_lags >= self.config.max_consecutive_lags {
            return Err(Error::Rejected("subscriber too slow".into()));
        }
        if self.state.ready {
            self.state.ready = false;
            tracing::warn!(
                session_id = self.state.id,
                skipped,
                "Subscriber lagging, resyncing at next keyframe"
            );
        }
        Ok(())
    }

    // === Sending helpers ===

    /// Chunk-encode and send one message
    ///
    /// Messages scoped to the stream endpoint always travel on the stream
    /// chunk channel, whatever the caller asked for.
    async fn send_message(
        &mut self,
        type_id: u8,
        endpoint: u32,
        timestamp: u32,
        payload: Bytes,
        csid: u8,
    ) -> Result<()> {
        let csid = if endpoint == STREAM_ENDPOINT {
            CSID_STREAM
        } else {
            csid
        };
        let msg = Message::new(type_id, endpoint, timestamp, payload);

        self.write_buf.clear();
        self.encoder.encode(&msg, csid, &mut self.write_buf);
        self.state.add_written(self.write_buf.len() as u32);

        self.writer.write_all(&self.write_buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a `_result` for a transaction; ids ≤ 0 expect no reply
    async fn send_reply(&mut self, txid: f64, reply: AmfValue, status: AmfValue) -> Result<()> {
        if txid <= 0.0 {
            return Ok(());
        }
        let payload = result_payload(txid, reply, status)?;
        self.send_message(MSG_INVOKE, CONTROL_ENDPOINT, 0, payload, CSID_RESULT)
            .await
    }
}

/// Standard onStatus invoke payload
fn on_status_payload(level: &str, code: &str, description: &str) -> Result<Bytes> {
    let mut status = AmfObject::new();
    status.insert("level", level);
    status.insert("code", code);
    status.insert("description", description);
    let payload = invoke_payload(
        CMD_ON_STATUS,
        0.0,
        &[AmfValue::Null, AmfValue::Object(status)],
    )?;
    Ok(payload)
}
