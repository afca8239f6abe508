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

//! AMQP 0-9-1 wire framing.
//!
//! Only the methods the transport actually exchanges are modelled; anything
//! else decodes to `Method::Other` so the caller can report it instead of
//! desynchronising. All integers are network byte order. Field tables are
//! always sent empty and skipped wholesale on read.

use std::convert::TryInto;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::support::error::Error;

/// Preamble sent by the client before any frame.
pub const PROTOCOL_HEADER: &[u8] = b"AMQP\x00\x00\x09\x01";

pub const FRAME_METHOD: u8 = 1;
pub const FRAME_HEADER: u8 = 2;
pub const FRAME_BODY: u8 = 3;
pub const FRAME_HEARTBEAT: u8 = 8;
/// Sentinel octet terminating every frame.
pub const FRAME_END: u8 = 0xCE;

/// Reply code sent with a clean close.
pub const REPLY_SUCCESS: u16 = 200;

const CLASS_CONNECTION: u16 = 10;
const CLASS_CHANNEL: u16 = 20;
const CLASS_EXCHANGE: u16 = 40;
const CLASS_QUEUE: u16 = 50;
const CLASS_BASIC: u16 = 60;

/// One decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub channel: u16,
    pub payload: FramePayload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramePayload {
    Method(Method),
    /// Content header preceding the body of a delivered/published message.
    Header { class: u16, body_size: u64 },
    Body(Vec<u8>),
    Heartbeat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Method {
    ConnectionStart {
        mechanisms: Vec<u8>,
        locales: Vec<u8>,
    },
    ConnectionStartOk {
        mechanism: String,
        response: Vec<u8>,
        locale: String,
    },
    ConnectionTune {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionTuneOk {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionOpen {
        vhost: String,
    },
    ConnectionOpenOk,
    ConnectionClose {
        code: u16,
        text: String,
    },
    ConnectionCloseOk,
    ChannelOpen,
    ChannelOpenOk,
    ChannelClose {
        code: u16,
        text: String,
    },
    ChannelCloseOk,
    ExchangeDeclare {
        exchange: String,
        kind: String,
    },
    ExchangeDeclareOk,
    QueueDeclare {
        queue: String,
        auto_delete: bool,
    },
    QueueDeclareOk {
        queue: String,
    },
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    QueueBindOk,
    BasicConsume {
        queue: String,
        no_ack: bool,
    },
    BasicConsumeOk {
        consumer_tag: String,
    },
    BasicPublish {
        exchange: String,
        routing_key: String,
    },
    BasicDeliver {
        consumer_tag: String,
        delivery_tag: u64,
        exchange: String,
        routing_key: String,
    },
    /// A method this codec does not understand. Carried so the transport
    /// can log the class/method ids rather than fail to parse the stream.
    Other {
        class: u16,
        method: u16,
    },
}

/// Read exactly one frame from `r`.
///
/// Fails with `BrokerProtocol` if the frame-end octet is missing or the
/// frame type is unknown.
pub fn read_frame(r: &mut impl Read) -> Result<Frame, Error> {
    let frame_type = r.read_u8()?;
    let channel = r.read_u16::<BigEndian>()?;
    let size = r.read_u32::<BigEndian>()?;

    let mut payload = vec![0u8; size as usize];
    r.read_exact(&mut payload)?;
    if FRAME_END != r.read_u8()? {
        return Err(Error::BrokerProtocol(
            "missing frame-end octet".to_owned(),
        ));
    }

    let payload = match frame_type {
        FRAME_METHOD => FramePayload::Method(decode_method(&payload)?),
        FRAME_HEADER => {
            let mut c = io::Cursor::new(&payload[..]);
            let class = c.read_u16::<BigEndian>()?;
            let _weight = c.read_u16::<BigEndian>()?;
            let body_size = c.read_u64::<BigEndian>()?;
            FramePayload::Header { class, body_size }
        },
        FRAME_BODY => FramePayload::Body(payload),
        FRAME_HEARTBEAT => FramePayload::Heartbeat,
        t => {
            return Err(Error::BrokerProtocol(format!(
                "unknown frame type {}",
                t
            )))
        },
    };

    Ok(Frame { channel, payload })
}

/// Write one frame to `w`.
pub fn write_frame(
    w: &mut impl Write,
    channel: u16,
    payload: &FramePayload,
) -> Result<(), Error> {
    let (frame_type, body) = match payload {
        FramePayload::Method(method) => (FRAME_METHOD, encode_method(method)?),
        &FramePayload::Header { class, body_size } => {
            let mut body = Vec::with_capacity(14);
            body.write_u16::<BigEndian>(class)?;
            body.write_u16::<BigEndian>(0)?;
            body.write_u64::<BigEndian>(body_size)?;
            // No properties
            body.write_u16::<BigEndian>(0)?;
            (FRAME_HEADER, body)
        },
        FramePayload::Body(data) => (FRAME_BODY, data.clone()),
        FramePayload::Heartbeat => (FRAME_HEARTBEAT, Vec::new()),
    };

    w.write_u8(frame_type)?;
    w.write_u16::<BigEndian>(channel)?;
    w.write_u32::<BigEndian>(
        body.len()
            .try_into()
            .map_err(|_| Error::BrokerProtocol("frame too large".to_owned()))?,
    )?;
    w.write_all(&body)?;
    w.write_u8(FRAME_END)?;
    w.flush()?;
    Ok(())
}

/// Encode one method frame body.
///
/// Fails if any short-string field exceeds the protocol's 255-byte limit;
/// truncating the length octet instead would desynchronise the stream.
fn encode_method(method: &Method) -> Result<Vec<u8>, Error> {
    let mut e = Encoder::default();
    match method {
        Method::ConnectionStart {
            mechanisms,
            locales,
        } => {
            e.method(CLASS_CONNECTION, 10);
            e.u8(0);
            e.u8(9);
            e.table();
            e.longstr(mechanisms);
            e.longstr(locales);
        },
        Method::ConnectionStartOk {
            mechanism,
            response,
            locale,
        } => {
            e.method(CLASS_CONNECTION, 11);
            e.table();
            e.shortstr(mechanism)?;
            e.longstr(response);
            e.shortstr(locale)?;
        },
        &Method::ConnectionTune {
            channel_max,
            frame_max,
            heartbeat,
        } => {
            e.method(CLASS_CONNECTION, 30);
            e.u16(channel_max);
            e.u32(frame_max);
            e.u16(heartbeat);
        },
        &Method::ConnectionTuneOk {
            channel_max,
            frame_max,
            heartbeat,
        } => {
            e.method(CLASS_CONNECTION, 31);
            e.u16(channel_max);
            e.u32(frame_max);
            e.u16(heartbeat);
        },
        Method::ConnectionOpen { vhost } => {
            e.method(CLASS_CONNECTION, 40);
            e.shortstr(vhost)?;
            e.shortstr("")?;
            e.u8(0);
        },
        Method::ConnectionOpenOk => {
            e.method(CLASS_CONNECTION, 41);
            e.shortstr("")?;
        },
        Method::ConnectionClose { code, text } => {
            e.method(CLASS_CONNECTION, 50);
            e.u16(*code);
            e.shortstr(text)?;
            e.u16(0);
            e.u16(0);
        },
        Method::ConnectionCloseOk => e.method(CLASS_CONNECTION, 51),
        Method::ChannelOpen => {
            e.method(CLASS_CHANNEL, 10);
            e.shortstr("")?;
        },
        Method::ChannelOpenOk => {
            e.method(CLASS_CHANNEL, 11);
            e.longstr(&[]);
        },
        Method::ChannelClose { code, text } => {
            e.method(CLASS_CHANNEL, 40);
            e.u16(*code);
            e.shortstr(text)?;
            e.u16(0);
            e.u16(0);
        },
        Method::ChannelCloseOk => e.method(CLASS_CHANNEL, 41),
        Method::ExchangeDeclare { exchange, kind } => {
            e.method(CLASS_EXCHANGE, 10);
            e.u16(0);
            e.shortstr(exchange)?;
            e.shortstr(kind)?;
            // passive/durable/auto-delete/internal/no-wait all clear
            e.u8(0);
            e.table();
        },
        Method::ExchangeDeclareOk => e.method(CLASS_EXCHANGE, 11),
        Method::QueueDeclare { queue, auto_delete } => {
            e.method(CLASS_QUEUE, 10);
            e.u16(0);
            e.shortstr(queue)?;
            e.u8(if *auto_delete { 0x08 } else { 0 });
            e.table();
        },
        Method::QueueDeclareOk { queue } => {
            e.method(CLASS_QUEUE, 11);
            e.shortstr(queue)?;
            e.u32(0);
            e.u32(0);
        },
        Method::QueueBind {
            queue,
            exchange,
            routing_key,
        } => {
            e.method(CLASS_QUEUE, 20);
            e.u16(0);
            e.shortstr(queue)?;
            e.shortstr(exchange)?;
            e.shortstr(routing_key)?;
            e.u8(0);
            e.table();
        },
        Method::QueueBindOk => e.method(CLASS_QUEUE, 21),
        Method::BasicConsume { queue, no_ack } => {
            e.method(CLASS_BASIC, 20);
            e.u16(0);
            e.shortstr(queue)?;
            e.shortstr("")?;
            e.u8(if *no_ack { 0x02 } else { 0 });
            e.table();
        },
        Method::BasicConsumeOk { consumer_tag } => {
            e.method(CLASS_BASIC, 21);
            e.shortstr(consumer_tag)?;
        },
        Method::BasicPublish {
            exchange,
            routing_key,
        } => {
            e.method(CLASS_BASIC, 40);
            e.u16(0);
            e.shortstr(exchange)?;
            e.shortstr(routing_key)?;
            e.u8(0);
        },
        Method::BasicDeliver {
            consumer_tag,
            delivery_tag,
            exchange,
            routing_key,
        } => {
            e.method(CLASS_BASIC, 60);
            e.shortstr(consumer_tag)?;
            e.u64(*delivery_tag);
            e.u8(0);
            e.shortstr(exchange)?;
            e.shortstr(routing_key)?;
        },
        &Method::Other { class, method } => e.method(class, method),
    }
    Ok(e.0)
}

fn decode_method(payload: &[u8]) -> Result<Method, Error> {
    let mut d = io::Cursor::new(payload);
    let class = d.read_u16::<BigEndian>()?;
    let method = d.read_u16::<BigEndian>()?;

    let decoded = match (class, method) {
        (CLASS_CONNECTION, 10) => {
            let _version_major = d.read_u8()?;
            let _version_minor = d.read_u8()?;
            skip_table(&mut d)?;
            let mechanisms = read_longstr(&mut d)?;
            let locales = read_longstr(&mut d)?;
            Method::ConnectionStart {
                mechanisms,
                locales,
            }
        },
        (CLASS_CONNECTION, 11) => {
            skip_table(&mut d)?;
            let mechanism = read_shortstr(&mut d)?;
            let response = read_longstr(&mut d)?;
            let locale = read_shortstr(&mut d)?;
            Method::ConnectionStartOk {
                mechanism,
                response,
                locale,
            }
        },
        (CLASS_CONNECTION, 30) => Method::ConnectionTune {
            channel_max: d.read_u16::<BigEndian>()?,
            frame_max: d.read_u32::<BigEndian>()?,
            heartbeat: d.read_u16::<BigEndian>()?,
        },
        (CLASS_CONNECTION, 31) => Method::ConnectionTuneOk {
            channel_max: d.read_u16::<BigEndian>()?,
            frame_max: d.read_u32::<BigEndian>()?,
            heartbeat: d.read_u16::<BigEndian>()?,
        },
        (CLASS_CONNECTION, 40) => Method::ConnectionOpen {
            vhost: read_shortstr(&mut d)?,
        },
        (CLASS_CONNECTION, 41) => Method::ConnectionOpenOk,
        (CLASS_CONNECTION, 50) => Method::ConnectionClose {
            code: d.read_u16::<BigEndian>()?,
            text: read_shortstr(&mut d)?,
        },
        (CLASS_CONNECTION, 51) => Method::ConnectionCloseOk,
        (CLASS_CHANNEL, 10) => Method::ChannelOpen,
        (CLASS_CHANNEL, 11) => Method::ChannelOpenOk,
        (CLASS_CHANNEL, 40) => Method::ChannelClose {
            code: d.read_u16::<BigEndian>()?,
            text: read_shortstr(&mut d)?,
        },
        (CLASS_CHANNEL, 41) => Method::ChannelCloseOk,
        (CLASS_EXCHANGE, 10) => {
            let _reserved = d.read_u16::<BigEndian>()?;
            Method::ExchangeDeclare {
                exchange: read_shortstr(&mut d)?,
                kind: read_shortstr(&mut d)?,
            }
        },
        (CLASS_EXCHANGE, 11) => Method::ExchangeDeclareOk,
        (CLASS_QUEUE, 10) => {
            let _reserved = d.read_u16::<BigEndian>()?;
            let queue = read_shortstr(&mut d)?;
            let bits = d.read_u8()?;
            Method::QueueDeclare {
                queue,
                auto_delete: 0 != (bits & 0x08),
            }
        },
        (CLASS_QUEUE, 11) => Method::QueueDeclareOk {
            queue: read_shortstr(&mut d)?,
        },
        (CLASS_QUEUE, 20) => {
            let _reserved = d.read_u16::<BigEndian>()?;
            Method::QueueBind {
                queue: read_shortstr(&mut d)?,
                exchange: read_shortstr(&mut d)?,
                routing_key: read_shortstr(&mut d)?,
            }
        },
        (CLASS_QUEUE, 21) => Method::QueueBindOk,
        (CLASS_BASIC, 20) => {
            let _reserved = d.read_u16::<BigEndian>()?;
            let queue = read_shortstr(&mut d)?;
            let _consumer_tag = read_shortstr(&mut d)?;
            let bits = d.read_u8()?;
            Method::BasicConsume {
                queue,
                no_ack: 0 != (bits & 0x02),
            }
        },
        (CLASS_BASIC, 21) => Method::BasicConsumeOk {
            consumer_tag: read_shortstr(&mut d)?,
        },
        (CLASS_BASIC, 40) => {
            let _reserved = d.read_u16::<BigEndian>()?;
            Method::BasicPublish {
                exchange: read_shortstr(&mut d)?,
                routing_key: read_shortstr(&mut d)?,
            }
        },
        (CLASS_BASIC, 60) => Method::BasicDeliver {
            consumer_tag: read_shortstr(&mut d)?,
            delivery_tag: d.read_u64::<BigEndian>()?,
            exchange: {
                let _redelivered = d.read_u8()?;
                read_shortstr(&mut d)?
            },
            routing_key: read_shortstr(&mut d)?,
        },
        (class, method) => Method::Other { class, method },
    };

    Ok(decoded)
}

/// Build the SASL PLAIN response for `connection.start-ok`.
pub fn plain_auth_response(user: &str, password: &str) -> Vec<u8> {
    let mut response = Vec::with_capacity(user.len() + password.len() + 2);
    response.push(0);
    response.extend_from_slice(user.as_bytes());
    response.push(0);
    response.extend_from_slice(password.as_bytes());
    response
}

#[derive(Default)]
struct Encoder(Vec<u8>);

impl Encoder {
    fn method(&mut self, class: u16, method: u16) {
        self.u16(class);
        self.u16(method);
    }

    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    fn shortstr(&mut self, s: &str) -> Result<(), Error> {
        if s.len() > 255 {
            return Err(Error::BrokerProtocol(format!(
                "short string too long ({} bytes)",
                s.len()
            )));
        }
        self.u8(s.len() as u8);
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn longstr(&mut self, s: &[u8]) {
        self.u32(s.len() as u32);
        self.0.extend_from_slice(s);
    }

    /// Empty field table.
    fn table(&mut self) {
        self.u32(0);
    }
}

fn read_shortstr(d: &mut io::Cursor<&[u8]>) -> Result<String, Error> {
    let len = d.read_u8()? as usize;
    let mut buf = vec![0u8; len];
    d.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| Error::BrokerProtocol("non-UTF-8 short string".to_owned()))
}

fn read_longstr(d: &mut io::Cursor<&[u8]>) -> Result<Vec<u8>, Error> {
    let len = d.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    d.read_exact(&mut buf)?;
    Ok(buf)
}

fn skip_table(d: &mut io::Cursor<&[u8]>) -> Result<(), Error> {
    let len = d.read_u32::<BigEndian>()? as i64;
    let pos = d.position() as i64;
    if pos + len > d.get_ref().len() as i64 {
        return Err(Error::BrokerProtocol("truncated field table".to_owned()));
    }
    d.set_position((pos + len) as u64);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(channel: u16, payload: FramePayload) {
        let mut buf = Vec::new();
        write_frame(&mut buf, channel, &payload).unwrap();
        let frame = read_frame(&mut &buf[..]).unwrap();
        assert_eq!(channel, frame.channel);
        assert_eq!(payload, frame.payload);
    }

    #[test]
    fn method_round_trips() {
        round_trip(
            0,
            FramePayload::Method(Method::ConnectionTune {
                channel_max: 2047,
                frame_max: 131072,
                heartbeat: 60,
            }),
        );
        round_trip(
            0,
            FramePayload::Method(Method::ConnectionOpen {
                vhost: "/".to_owned(),
            }),
        );
        round_trip(
            1,
            FramePayload::Method(Method::ExchangeDeclare {
                exchange: "relaymap-notifications".to_owned(),
                kind: "direct".to_owned(),
            }),
        );
        round_trip(
            1,
            FramePayload::Method(Method::QueueDeclare {
                queue: "new-mail-queue".to_owned(),
                auto_delete: true,
            }),
        );
        round_trip(
            1,
            FramePayload::Method(Method::QueueBind {
                queue: "new-mail-queue".to_owned(),
                exchange: "relaymap-notifications".to_owned(),
                routing_key: "new-mail".to_owned(),
            }),
        );
        round_trip(
            1,
            FramePayload::Method(Method::BasicConsume {
                queue: "new-mail-queue".to_owned(),
                no_ack: true,
            }),
        );
        round_trip(
            1,
            FramePayload::Method(Method::BasicDeliver {
                consumer_tag: "tag".to_owned(),
                delivery_tag: 7,
                exchange: "relaymap-notifications".to_owned(),
                routing_key: "new-mail".to_owned(),
            }),
        );
        round_trip(
            2,
            FramePayload::Method(Method::ChannelClose {
                code: 404,
                text: "NOT_FOUND".to_owned(),
            }),
        );
    }

    #[test]
    fn content_frames_round_trip() {
        round_trip(
            1,
            FramePayload::Header {
                class: 60,
                body_size: 13,
            },
        );
        round_trip(1, FramePayload::Body(b"hello, broker".to_vec()));
        round_trip(0, FramePayload::Heartbeat);
    }

    #[test]
    fn unknown_method_is_preserved_not_fatal() {
        let mut buf = Vec::new();
        write_frame(
            &mut buf,
            1,
            &FramePayload::Method(Method::Other {
                class: 90,
                method: 10,
            }),
        )
        .unwrap();
        let frame = read_frame(&mut &buf[..]).unwrap();
        assert_eq!(
            FramePayload::Method(Method::Other {
                class: 90,
                method: 10
            }),
            frame.payload
        );
    }

    #[test]
    fn missing_frame_end_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 0, &FramePayload::Heartbeat).unwrap();
        *buf.last_mut().unwrap() = 0x00;
        assert_matches!(
            Err(Error::BrokerProtocol(..)),
            read_frame(&mut &buf[..])
        );
    }

    #[test]
    fn overlong_short_string_is_rejected_not_truncated() {
        let mut buf = Vec::new();
        assert_matches!(
            Err(Error::BrokerProtocol(..)),
            write_frame(
                &mut buf,
                1,
                &FramePayload::Method(Method::ExchangeDeclare {
                    exchange: format!("{}_notification", "u".repeat(300)),
                    kind: "fanout".to_owned(),
                }),
            )
        );
        // Nothing was emitted for the rejected frame
        assert!(buf.is_empty());
    }

    #[test]
    fn plain_response_interleaves_nuls() {
        assert_eq!(
            b"\x00guest\x00secret".to_vec(),
            plain_auth_response("guest", "secret")
        );
    }
}
