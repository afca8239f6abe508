//-
// Copyright (c) 2026, The Relaymap Developers
//
// This file is part of Relaymap.
//
// Relaymap is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public  License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Relaymap is distributed in the hope that  it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Relaymap. If not, see <http://www.gnu.org/licenses/>.

//! Broker connection lifecycle.
//!
//! The transport is a strict state machine:
//!
//! ```text
//! Disconnected -> Connecting -> LoggedIn -> ChannelOpen -> Declared
//!                                                             |
//!                                                             v
//!                                                          Consuming
//! ```
//!
//! A failure in any state tears the whole connection down (socket, channel
//! table and all) and returns to `Disconnected`; the caller sleeps a fixed
//! interval and reconnects. There is never an "open but unauthenticated"
//! half-state to observe.

use std::io;
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, warn};

use super::wire::{self, FramePayload, Method, REPLY_SUCCESS};
use crate::support::error::Error;
use crate::support::system_config::BrokerConfig;

/// Delay between reconnect attempts of the consumer loop.
///
/// Deliberately a fixed interval rather than an exponential backoff; the
/// broker is a local service and a fraction of a second is long enough to
/// avoid busy-spinning.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Channel the transport opens at connect time for its own use.
pub const CONTROL_CHANNEL: u16 = 1;

const DEFAULT_FRAME_MAX: u32 = 131_072;
const TEARDOWN_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    LoggedIn,
    ChannelOpen,
    Declared,
    Consuming,
}

/// One message taken off a queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Consumed {
    Message(Delivery),
    /// Nothing arrived within the timeout.
    Empty,
}

struct Connection {
    stream: TcpStream,
    frame_max: u32,
    channel_max: u16,
    /// Used/free table; index 0 is protocol-reserved and always used.
    channels: Vec<bool>,
}

pub struct BrokerTransport {
    config: BrokerConfig,
    state: State,
    conn: Option<Connection>,
}

impl BrokerTransport {
    pub fn new(config: BrokerConfig) -> Self {
        BrokerTransport {
            config,
            state: State::Disconnected,
            conn: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.conn.is_some()
    }

    /// Open the transport connection, log in, and open the control channel.
    ///
    /// On any failure the transport disconnects fully before returning the
    /// error, so a connection object is never left half-initialised.
    pub fn connect(&mut self) -> Result<(), Error> {
        if self.is_alive() {
            return Ok(());
        }

        self.state = State::Connecting;
        match self.login() {
            Ok(()) => (),
            Err(e) => {
                self.disconnect();
                return Err(e);
            },
        }

        self.state = State::LoggedIn;
        match self.open_channel(CONTROL_CHANNEL) {
            Ok(()) => {
                self.state = State::ChannelOpen;
                Ok(())
            },
            Err(e) => {
                self.disconnect();
                Err(e)
            },
        }
    }

    fn login(&mut self) -> Result<(), Error> {
        debug!(
            "Connecting to broker {}:{}",
            self.config.host, self.config.port
        );
        let mut stream = TcpStream::connect(
            (&self.config.host as &str, self.config.port),
        )?;
        stream.write_all_frames(wire::PROTOCOL_HEADER)?;

        let start = read_expected(&mut stream)?;
        let mechanisms = match start {
            Method::ConnectionStart { mechanisms, .. } => mechanisms,
            other => return Err(unexpected_reply(&other)),
        };
        if !mechanisms
            .split(|&b| b' ' == b)
            .any(|m| b"PLAIN" == m)
        {
            return Err(Error::BrokerProtocol(
                "broker does not offer PLAIN authentication".to_owned(),
            ));
        }

        debug!("Logging into broker, vhost={}", self.config.vhost);
        wire::write_frame(
            &mut stream,
            0,
            &FramePayload::Method(Method::ConnectionStartOk {
                mechanism: "PLAIN".to_owned(),
                response: wire::plain_auth_response(
                    &self.config.user,
                    &self.config.password,
                ),
                locale: "en_US".to_owned(),
            }),
        )?;

        let (channel_max, frame_max) = match read_expected(&mut stream)? {
            Method::ConnectionTune {
                channel_max,
                frame_max,
                ..
            } => (
                if 0 == channel_max {
                    u16::MAX
                } else {
                    channel_max
                },
                if 0 == frame_max {
                    DEFAULT_FRAME_MAX
                } else {
                    frame_max.min(DEFAULT_FRAME_MAX)
                },
            ),
            other => return Err(unexpected_reply(&other)),
        };
        wire::write_frame(
            &mut stream,
            0,
            &FramePayload::Method(Method::ConnectionTuneOk {
                channel_max,
                frame_max,
                heartbeat: 0,
            }),
        )?;

        wire::write_frame(
            &mut stream,
            0,
            &FramePayload::Method(Method::ConnectionOpen {
                vhost: self.config.vhost.clone(),
            }),
        )?;
        match read_expected(&mut stream)? {
            Method::ConnectionOpenOk => (),
            other => return Err(unexpected_reply(&other)),
        }

        let mut channels = vec![false; channel_max as usize + 1];
        // Channel 0 is reserved by the protocol
        channels[0] = true;

        self.conn = Some(Connection {
            stream,
            frame_max,
            channel_max,
            channels,
        });
        Ok(())
    }

    /// Release the connection, channel table and socket unconditionally.
    ///
    /// Close methods are sent best-effort; the peer's replies are not
    /// awaited since the connection may already be dead.
    pub fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            debug!("Closing broker connection");
            let _ = conn.stream.set_write_timeout(Some(TEARDOWN_TIMEOUT));
            for channel in 1..conn.channels.len() {
                if conn.channels[channel] {
                    debug!("Closing broker channel {}", channel);
                    let _ = wire::write_frame(
                        &mut conn.stream,
                        channel as u16,
                        &FramePayload::Method(Method::ChannelClose {
                            code: REPLY_SUCCESS,
                            text: "Goodbye".to_owned(),
                        }),
                    );
                }
            }
            let _ = wire::write_frame(
                &mut conn.stream,
                0,
                &FramePayload::Method(Method::ConnectionClose {
                    code: REPLY_SUCCESS,
                    text: "Goodbye".to_owned(),
                }),
            );
        }
        self.state = State::Disconnected;
    }

    /// Find an unused channel number, scanning from 1 upward.
    pub fn get_free_channel(&self) -> Result<u16, Error> {
        let conn = self.conn.as_ref().ok_or(Error::BrokerNotConnected)?;
        for channel in 1..=conn.channel_max as usize {
            if !conn.channels[channel] {
                return Ok(channel as u16);
            }
        }
        Err(Error::ChannelsExhausted)
    }

    pub fn open_channel(&mut self, channel: u16) -> Result<(), Error> {
        debug!("Opening broker channel {}", channel);
        match self.rpc(channel, &Method::ChannelOpen)? {
            Method::ChannelOpenOk => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.channels[channel as usize] = true;
                }
                Ok(())
            },
            other => self.fail(unexpected_reply(&other)),
        }
    }

    pub fn close_channel(&mut self, channel: u16) -> Result<(), Error> {
        debug!("Closing broker channel {}", channel);
        match self.rpc(
            channel,
            &Method::ChannelClose {
                code: REPLY_SUCCESS,
                text: "Goodbye".to_owned(),
            },
        )? {
            Method::ChannelCloseOk => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.channels[channel as usize] = false;
                }
                Ok(())
            },
            other => self.fail(unexpected_reply(&other)),
        }
    }

    /// Idempotently declare `exchange` of the given kind.
    pub fn declare_exchange(
        &mut self,
        channel: u16,
        exchange: &str,
        kind: &str,
    ) -> Result<(), Error> {
        debug!("Declaring {} exchange '{}'", kind, exchange);
        match self.rpc(
            channel,
            &Method::ExchangeDeclare {
                exchange: exchange.to_owned(),
                kind: kind.to_owned(),
            },
        )? {
            Method::ExchangeDeclareOk => Ok(()),
            other => self.fail(unexpected_reply(&other)),
        }
    }

    /// Idempotently declare `exchange` and an auto-delete `queue` bound to
    /// it with `routing_key`.
    ///
    /// An empty `queue` asks the broker for a server-named queue; the actual
    /// name is returned either way.
    pub fn declare(
        &mut self,
        channel: u16,
        exchange: &str,
        kind: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<String, Error> {
        self.declare_exchange(channel, exchange, kind)?;

        debug!("Declaring queue '{}'", queue);
        let queue = match self.rpc(
            channel,
            &Method::QueueDeclare {
                queue: queue.to_owned(),
                auto_delete: true,
            },
        )? {
            Method::QueueDeclareOk { queue } => queue,
            other => return self.fail(unexpected_reply(&other)),
        };

        debug!(
            "Binding queue '{}' to exchange '{}' with key '{}'",
            queue, exchange, routing_key
        );
        match self.rpc(
            channel,
            &Method::QueueBind {
                queue: queue.clone(),
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
            },
        )? {
            Method::QueueBindOk => {
                self.state = State::Declared;
                Ok(queue)
            },
            other => self.fail(unexpected_reply(&other)),
        }
    }

    /// Begin no-ack message delivery from `queue` on `channel`.
    pub fn start_consumer(
        &mut self,
        channel: u16,
        queue: &str,
    ) -> Result<(), Error> {
        debug!("Starting consumer on queue '{}'", queue);
        match self.rpc(
            channel,
            &Method::BasicConsume {
                queue: queue.to_owned(),
                no_ack: true,
            },
        )? {
            Method::BasicConsumeOk { .. } => {
                self.state = State::Consuming;
                Ok(())
            },
            other => self.fail(unexpected_reply(&other)),
        }
    }

    /// Block up to `timeout` for one delivered message.
    ///
    /// Returns `Empty` if nothing arrives in time. A channel- or
    /// connection-close frame from the server tears the transport down and
    /// surfaces as the corresponding error; the caller must reconnect
    /// before consuming again.
    pub fn consume(&mut self, timeout: Duration) -> Result<Consumed, Error> {
        let result = self.try_consume(timeout);
        if let Err(ref e) = result {
            if e.is_transport() {
                self.disconnect();
            }
        }
        result
    }

    fn try_consume(&mut self, timeout: Duration) -> Result<Consumed, Error> {
        let conn = self.conn.as_mut().ok_or(Error::BrokerNotConnected)?;
        conn.stream.set_read_timeout(Some(timeout))?;

        let frame = match wire::read_frame(&mut conn.stream) {
            Ok(frame) => frame,
            Err(Error::Io(ref e)) if is_timeout(e) => {
                return Ok(Consumed::Empty)
            },
            Err(e) => return Err(e),
        };

        let (exchange, routing_key) = match frame.payload {
            FramePayload::Method(Method::BasicDeliver {
                exchange,
                routing_key,
                ..
            }) => (exchange, routing_key),
            // Heartbeats are not messages; report the poll as empty and let
            // the caller come around again.
            FramePayload::Heartbeat => return Ok(Consumed::Empty),
            FramePayload::Method(Method::ConnectionClose { code, text }) => {
                let _ = wire::write_frame(
                    &mut conn.stream,
                    0,
                    &FramePayload::Method(Method::ConnectionCloseOk),
                );
                return Err(Error::ConnectionClosed {
                    code,
                    message: text,
                });
            },
            FramePayload::Method(Method::ChannelClose { code, text }) => {
                let _ = wire::write_frame(
                    &mut conn.stream,
                    frame.channel,
                    &FramePayload::Method(Method::ChannelCloseOk),
                );
                return Err(Error::ChannelClosed {
                    code,
                    message: text,
                });
            },
            FramePayload::Method(other) => {
                return Err(unexpected_reply(&other))
            },
            _ => {
                return Err(Error::BrokerProtocol(
                    "content frame without a preceding deliver".to_owned(),
                ))
            },
        };

        let body_size = match wire::read_frame(&mut conn.stream)?.payload {
            FramePayload::Header { body_size, .. } => body_size,
            _ => {
                return Err(Error::BrokerProtocol(
                    "deliver not followed by a content header".to_owned(),
                ))
            },
        };

        let mut body = Vec::with_capacity(body_size as usize);
        while (body.len() as u64) < body_size {
            match wire::read_frame(&mut conn.stream)?.payload {
                FramePayload::Body(chunk) => body.extend_from_slice(&chunk),
                _ => {
                    return Err(Error::BrokerProtocol(
                        "non-body frame inside message content".to_owned(),
                    ))
                },
            }
        }

        Ok(Consumed::Message(Delivery {
            exchange,
            routing_key,
            body,
        }))
    }

    /// Best-effort publish of `body` to `exchange` with `routing_key`.
    ///
    /// No confirmation is awaited; a failure is reported but not retried
    /// here (retry, if any, is the consumer loop's reconnect policy).
    pub fn publish(
        &mut self,
        channel: u16,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), Error> {
        let result = self.try_publish(channel, exchange, routing_key, body);
        if let Err(ref e) = result {
            if e.is_transport() {
                self.disconnect();
            }
        }
        result
    }

    fn try_publish(
        &mut self,
        channel: u16,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), Error> {
        let conn = self.conn.as_mut().ok_or(Error::BrokerNotConnected)?;

        wire::write_frame(
            &mut conn.stream,
            channel,
            &FramePayload::Method(Method::BasicPublish {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
            }),
        )?;
        wire::write_frame(
            &mut conn.stream,
            channel,
            &FramePayload::Header {
                class: 60,
                body_size: body.len() as u64,
            },
        )?;

        // 8 octets of framing around each body chunk
        let max_chunk = conn.frame_max as usize - 8;
        for chunk in body.chunks(max_chunk.max(1)) {
            wire::write_frame(
                &mut conn.stream,
                channel,
                &FramePayload::Body(chunk.to_vec()),
            )?;
        }
        Ok(())
    }

    /// Send `request` and read the next method frame, classifying close
    /// frames from the server and disconnecting on any transport failure.
    fn rpc(&mut self, channel: u16, request: &Method) -> Result<Method, Error> {
        let result = self.try_rpc(channel, request);
        if let Err(ref e) = result {
            if e.is_transport() {
                self.disconnect();
            }
        }
        result
    }

    fn try_rpc(
        &mut self,
        channel: u16,
        request: &Method,
    ) -> Result<Method, Error> {
        let conn = self.conn.as_mut().ok_or(Error::BrokerNotConnected)?;
        // An earlier consume may have left its poll timeout on the socket;
        // a reply must be waited for however long it takes
        conn.stream.set_read_timeout(None)?;
        wire::write_frame(
            &mut conn.stream,
            channel,
            &FramePayload::Method(request.clone()),
        )?;

        loop {
            let frame = wire::read_frame(&mut conn.stream)?;
            match frame.payload {
                FramePayload::Heartbeat => continue,
                FramePayload::Method(Method::ConnectionClose {
                    code,
                    text,
                }) => {
                    let _ = wire::write_frame(
                        &mut conn.stream,
                        0,
                        &FramePayload::Method(Method::ConnectionCloseOk),
                    );
                    return Err(Error::ConnectionClosed {
                        code,
                        message: text,
                    });
                },
                FramePayload::Method(Method::ChannelClose { code, text }) => {
                    let _ = wire::write_frame(
                        &mut conn.stream,
                        frame.channel,
                        &FramePayload::Method(Method::ChannelCloseOk),
                    );
                    return Err(Error::ChannelClosed {
                        code,
                        message: text,
                    });
                },
                FramePayload::Method(method) => return Ok(method),
                _ => {
                    return Err(Error::BrokerProtocol(
                        "unexpected content frame in reply".to_owned(),
                    ))
                },
            }
        }
    }

    /// Fail the current operation with full teardown.
    fn fail<T>(&mut self, error: Error) -> Result<T, Error> {
        warn!("Broker operation failed: {}", error);
        self.disconnect();
        Err(error)
    }
}

fn read_expected(stream: &mut TcpStream) -> Result<Method, Error> {
    loop {
        match wire::read_frame(stream)?.payload {
            FramePayload::Heartbeat => continue,
            FramePayload::Method(method) => return Ok(method),
            _ => {
                return Err(Error::BrokerProtocol(
                    "unexpected content frame during handshake".to_owned(),
                ))
            },
        }
    }
}

fn unexpected_reply(method: &Method) -> Error {
    match method {
        Method::Other { class, method } => Error::BrokerProtocol(format!(
            "unknown server method, class {} method {}",
            class, method
        )),
        _ => Error::MissingBrokerReply,
    }
}

fn is_timeout(e: &io::Error) -> bool {
    io::ErrorKind::WouldBlock == e.kind()
        || io::ErrorKind::TimedOut == e.kind()
}

trait WriteAllFrames {
    fn write_all_frames(&mut self, data: &[u8]) -> io::Result<()>;
}

impl WriteAllFrames for TcpStream {
    fn write_all_frames(&mut self, data: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.write_all(data)?;
        self.flush()
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;
    use std::net::{TcpListener, TcpStream as ServerStream};
    use std::thread;

    use super::*;

    fn test_config(port: u16) -> BrokerConfig {
        BrokerConfig {
            host: "127.0.0.1".to_owned(),
            port,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            ..BrokerConfig::default()
        }
    }

    /// Drive the server half of the login handshake plus the control
    /// channel open.
    fn server_handshake(stream: &mut ServerStream) {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).unwrap();
        assert_eq!(wire::PROTOCOL_HEADER, &header[..]);

        server_send(
            stream,
            0,
            Method::ConnectionStart {
                mechanisms: b"PLAIN AMQPLAIN".to_vec(),
                locales: b"en_US".to_vec(),
            },
        );
        assert_matches!(
            Method::ConnectionStartOk { .. },
            server_recv(stream).1
        );
        server_send(
            stream,
            0,
            Method::ConnectionTune {
                channel_max: 2047,
                frame_max: 131_072,
                heartbeat: 0,
            },
        );
        assert_matches!(Method::ConnectionTuneOk { .. }, server_recv(stream).1);
        assert_matches!(Method::ConnectionOpen { .. }, server_recv(stream).1);
        server_send(stream, 0, Method::ConnectionOpenOk);

        let (channel, open) = server_recv(stream);
        assert_eq!(CONTROL_CHANNEL, channel);
        assert_matches!(Method::ChannelOpen, open);
        server_send(stream, CONTROL_CHANNEL, Method::ChannelOpenOk);
    }

    fn server_send(stream: &mut ServerStream, channel: u16, method: Method) {
        wire::write_frame(stream, channel, &FramePayload::Method(method))
            .unwrap();
    }

    fn server_recv(stream: &mut ServerStream) -> (u16, Method) {
        let frame = wire::read_frame(stream).unwrap();
        match frame.payload {
            FramePayload::Method(method) => (frame.channel, method),
            other => panic!("expected method frame, got {:?}", other),
        }
    }

    fn spawn_server(
        script: impl FnOnce(&mut ServerStream) + Send + 'static,
    ) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            server_handshake(&mut stream);
            script(&mut stream);
        });
        (port, handle)
    }

    #[test]
    fn connect_reaches_channel_open() {
        crate::init_test_log();
        let (port, server) = spawn_server(|_| ());
        let mut transport = BrokerTransport::new(test_config(port));

        transport.connect().unwrap();
        assert!(transport.is_alive());
        assert_eq!(State::ChannelOpen, transport.state());
        // Channel 1 is the control channel, channel 0 is reserved
        assert_eq!(2, transport.get_free_channel().unwrap());

        transport.disconnect();
        assert_eq!(State::Disconnected, transport.state());
        server.join().unwrap();
    }

    #[test]
    fn declare_binds_and_returns_queue_name() {
        crate::init_test_log();
        let (port, server) = spawn_server(|stream| {
            assert_matches!(
                Method::ExchangeDeclare { .. },
                server_recv(stream).1
            );
            server_send(stream, CONTROL_CHANNEL, Method::ExchangeDeclareOk);
            assert_matches!(Method::QueueDeclare { .. }, server_recv(stream).1);
            server_send(
                stream,
                CONTROL_CHANNEL,
                Method::QueueDeclareOk {
                    queue: "amq.gen-x7".to_owned(),
                },
            );
            assert_matches!(Method::QueueBind { .. }, server_recv(stream).1);
            server_send(stream, CONTROL_CHANNEL, Method::QueueBindOk);
        });

        let mut transport = BrokerTransport::new(test_config(port));
        transport.connect().unwrap();
        let queue = transport
            .declare(CONTROL_CHANNEL, "notif", "fanout", "", "")
            .unwrap();
        assert_eq!("amq.gen-x7", queue);
        assert_eq!(State::Declared, transport.state());

        transport.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn consume_delivers_message_body() {
        crate::init_test_log();
        let (port, server) = spawn_server(|stream| {
            assert_matches!(
                Method::BasicConsume { no_ack: true, .. },
                server_recv(stream).1
            );
            server_send(
                stream,
                CONTROL_CHANNEL,
                Method::BasicConsumeOk {
                    consumer_tag: "tag-1".to_owned(),
                },
            );
            server_send(
                stream,
                CONTROL_CHANNEL,
                Method::BasicDeliver {
                    consumer_tag: "tag-1".to_owned(),
                    delivery_tag: 1,
                    exchange: "notif".to_owned(),
                    routing_key: "new-mail".to_owned(),
                },
            );
            wire::write_frame(
                stream,
                CONTROL_CHANNEL,
                &FramePayload::Header {
                    class: 60,
                    body_size: 9,
                },
            )
            .unwrap();
            wire::write_frame(
                stream,
                CONTROL_CHANNEL,
                &FramePayload::Body(b"some body".to_vec()),
            )
            .unwrap();
        });

        let mut transport = BrokerTransport::new(test_config(port));
        transport.connect().unwrap();
        transport
            .start_consumer(CONTROL_CHANNEL, "new-mail-queue")
            .unwrap();
        assert_eq!(State::Consuming, transport.state());

        match transport.consume(Duration::from_secs(5)).unwrap() {
            Consumed::Message(delivery) => {
                assert_eq!("new-mail", delivery.routing_key);
                assert_eq!(b"some body".to_vec(), delivery.body);
            },
            Consumed::Empty => panic!("expected a message"),
        }

        transport.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn consume_times_out_empty() {
        crate::init_test_log();
        let (port, server) = spawn_server(|stream| {
            // Hold the connection open until the client finishes
            let _ = server_recv(stream);
        });

        let mut transport = BrokerTransport::new(test_config(port));
        transport.connect().unwrap();
        assert_eq!(
            Consumed::Empty,
            transport.consume(Duration::from_millis(50)).unwrap()
        );
        assert!(transport.is_alive());

        transport.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn server_channel_close_forces_full_reconnect() {
        crate::init_test_log();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            {
                let (mut stream, _) = listener.accept().unwrap();
                server_handshake(&mut stream);
                server_send(
                    &mut stream,
                    CONTROL_CHANNEL,
                    Method::ChannelClose {
                        code: 406,
                        text: "PRECONDITION_FAILED".to_owned(),
                    },
                );
                assert_matches!(Method::ChannelCloseOk, server_recv(&mut stream).1);
            }
            // The client reconnects from scratch
            let (mut stream, _) = listener.accept().unwrap();
            server_handshake(&mut stream);
        });

        let mut transport = BrokerTransport::new(test_config(port));
        transport.connect().unwrap();
        assert_matches!(
            Err(Error::ChannelClosed { code: 406, .. }),
            transport.consume(Duration::from_secs(5))
        );

        // All handles are gone; nothing works until a fresh connect
        assert!(!transport.is_alive());
        assert_eq!(State::Disconnected, transport.state());
        assert_matches!(
            Err(Error::BrokerNotConnected),
            transport.consume(Duration::from_secs(1))
        );

        transport.connect().unwrap();
        assert_eq!(State::ChannelOpen, transport.state());
        transport.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn rpc_after_timed_out_consume_waits_for_slow_reply() {
        crate::init_test_log();
        let (port, server) = spawn_server(|stream| {
            let (channel, open) = server_recv(stream);
            assert_matches!(Method::ChannelOpen, open);
            // Reply well after the consume timeout the client last used
            thread::sleep(Duration::from_millis(200));
            server_send(stream, channel, Method::ChannelOpenOk);
        });

        let mut transport = BrokerTransport::new(test_config(port));
        transport.connect().unwrap();
        assert_eq!(
            Consumed::Empty,
            transport.consume(Duration::from_millis(50)).unwrap()
        );

        transport.open_channel(2).unwrap();
        assert!(transport.is_alive());

        transport.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn publish_sends_method_header_and_body() {
        crate::init_test_log();
        let (port, server) = spawn_server(|stream| {
            assert_matches!(
                Method::BasicPublish { .. },
                server_recv(stream).1
            );
            let header = wire::read_frame(stream).unwrap();
            assert_matches!(
                FramePayload::Header { body_size: 4, .. },
                header.payload
            );
            let body = wire::read_frame(stream).unwrap();
            assert_eq!(FramePayload::Body(b"ping".to_vec()), body.payload);
        });

        let mut transport = BrokerTransport::new(test_config(port));
        transport.connect().unwrap();
        transport
            .publish(CONTROL_CHANNEL, "user_notification", "", b"ping")
            .unwrap();

        transport.disconnect();
        server.join().unwrap();
    }
}
