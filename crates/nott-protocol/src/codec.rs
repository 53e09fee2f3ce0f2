//! Bencode wire codec
//!
//! Datagrams are bencoded dictionaries. The raw form below mirrors the
//! dictionary layout one to one; the typed `Message` is built from it and
//! back.

use serde::{Deserialize, Serialize};
use serde_bencode::value::Value;
use serde_bytes::ByteBuf;

use crate::address::{
    decode_compact_addr, decode_nodes_v4, decode_nodes_v6, encode_compact_addr, encode_nodes_v4,
    encode_nodes_v6,
};
use crate::error::{ProtocolError, Result};
use crate::message::{
    AnnounceArgs, ErrorCode, ErrorMessage, Message, Nodes, PutArgs, Query, Reply, Request,
    RequestKind, Response, StoredItem,
};
use crate::types::{NodeId, TransactionId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawMessage {
    t: ByteBuf,
    y: ByteBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    q: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    a: Option<RawBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r: Option<RawBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    e: Option<(i64, ByteBuf)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ro: Option<i64>,
}

/// Union of query arguments and reply values
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info_hash: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    implied_port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nodes: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nodes6: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    values: Option<Vec<ByteBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    k: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<ByteBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sig: Option<ByteBuf>,
}

impl RawBody {
    fn with_id(id: &NodeId) -> Self {
        RawBody {
            id: Some(bytes(id.as_bytes())),
            ..Default::default()
        }
    }

    fn id(&self) -> Result<NodeId> {
        let id = self.id.as_ref().ok_or(ProtocolError::MissingField("id"))?;
        NodeId::from_slice(id)
    }

    fn set_nodes(&mut self, nodes: &Nodes) {
        if !nodes.v4.is_empty() {
            self.nodes = Some(ByteBuf::from(encode_nodes_v4(&nodes.v4)));
        }
        if !nodes.v6.is_empty() {
            self.nodes6 = Some(ByteBuf::from(encode_nodes_v6(&nodes.v6)));
        }
    }

    fn nodes(&self) -> Result<Nodes> {
        let v4 = match &self.nodes {
            Some(raw) => decode_nodes_v4(raw)?,
            None => Vec::new(),
        };
        let v6 = match &self.nodes6 {
            Some(raw) => decode_nodes_v6(raw)?,
            None => Vec::new(),
        };
        Ok(Nodes { v4, v6 })
    }
}

fn bytes(slice: &[u8]) -> ByteBuf {
    ByteBuf::from(slice.to_vec())
}

fn opt_bytes(value: &Option<Vec<u8>>) -> Option<ByteBuf> {
    value.as_ref().map(|v| bytes(v))
}

fn into_vec(value: Option<ByteBuf>) -> Option<Vec<u8>> {
    value.map(ByteBuf::into_vec)
}

fn required_id(value: &Option<ByteBuf>, field: &'static str) -> Result<NodeId> {
    let raw = value.as_ref().ok_or(ProtocolError::MissingField(field))?;
    NodeId::from_slice(raw)
}

/// Encode a message into a datagram payload
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let raw = match msg {
        Message::Query(query) => RawMessage {
            t: bytes(query.tid.as_bytes()),
            y: bytes(b"q"),
            q: Some(bytes(query.request.kind().method().as_bytes())),
            a: Some(query_body(query)),
            ro: query.read_only.then_some(1),
            ..Default::default()
        },
        Message::Response(reply) => RawMessage {
            t: bytes(reply.tid.as_bytes()),
            y: bytes(b"r"),
            r: Some(reply_body(reply)),
            ip: reply.ip.map(|addr| ByteBuf::from(encode_compact_addr(&addr))),
            ..Default::default()
        },
        Message::Error(error) => RawMessage {
            t: bytes(error.tid.as_bytes()),
            y: bytes(b"e"),
            e: Some((error.code.code(), bytes(error.message.as_bytes()))),
            ..Default::default()
        },
    };

    serde_bencode::to_bytes(&raw).map_err(|e| ProtocolError::SerializationFailed(e.to_string()))
}

fn query_body(query: &Query) -> RawBody {
    let mut body = RawBody::with_id(&query.id);
    match &query.request {
        Request::Ping => {}
        Request::FindNode { target } => body.target = Some(bytes(target.as_bytes())),
        Request::GetPeers { info_hash } => body.info_hash = Some(bytes(info_hash.as_bytes())),
        Request::Get { target, seq } => {
            body.target = Some(bytes(target.as_bytes()));
            body.seq = *seq;
        }
        Request::Put(args) => {
            body.token = Some(bytes(&args.token));
            body.v = Some(args.v.clone());
            body.cas = args.cas;
            body.k = opt_bytes(&args.k);
            body.salt = opt_bytes(&args.salt);
            body.seq = args.seq;
            body.sig = opt_bytes(&args.sig);
        }
        Request::AnnouncePeer(args) => {
            body.info_hash = Some(bytes(args.info_hash.as_bytes()));
            body.port = Some(i64::from(args.port));
            body.token = Some(bytes(&args.token));
            body.name = opt_bytes(&args.name);
            body.implied_port = args.implied_port.then_some(1);
        }
    }
    body
}

fn reply_body(reply: &Reply) -> RawBody {
    let mut body = RawBody::with_id(&reply.id);
    match &reply.response {
        Response::Ping | Response::Put | Response::AnnouncePeer => {}
        Response::FindNode { nodes } => body.set_nodes(nodes),
        Response::GetPeers {
            nodes,
            token,
            values,
        } => {
            body.set_nodes(nodes);
            body.token = opt_bytes(token);
            if !values.is_empty() {
                body.values = Some(
                    values
                        .iter()
                        .map(|addr| ByteBuf::from(encode_compact_addr(addr)))
                        .collect(),
                );
            }
        }
        Response::Get { nodes, token, item } => {
            body.set_nodes(nodes);
            body.token = opt_bytes(token);
            if let Some(item) = item {
                body.v = Some(item.v.clone());
                body.k = opt_bytes(&item.k);
                body.seq = item.seq;
                body.sig = opt_bytes(&item.sig);
            }
        }
    }
    body
}

/// Decode a datagram payload.
///
/// Replies do not name their method, so `pending` must return the kind of
/// the outstanding query registered under the reply's transaction ID.
pub fn decode<F>(payload: &[u8], pending: F) -> Result<Message>
where
    F: FnOnce(&TransactionId) -> Option<RequestKind>,
{
    let raw: RawMessage = serde_bencode::from_bytes(payload)
        .map_err(|e| ProtocolError::DeserializationFailed(e.to_string()))?;
    let tid = TransactionId::from_slice(&raw.t)?;

    match raw.y.as_slice() {
        b"q" => decode_query(tid, raw)
            .map(Message::Query)
            .map_err(|e| ProtocolError::MalformedQuery {
                tid,
                unknown_method: matches!(e, ProtocolError::UnknownMethod(_)),
                reason: e.to_string(),
            }),
        b"r" => {
            let kind = pending(&tid).ok_or(ProtocolError::UnknownTransaction(tid))?;
            decode_reply(tid, kind, raw)
                .map(Message::Response)
                .map_err(|e| ProtocolError::MalformedReply {
                    tid,
                    reason: e.to_string(),
                })
        }
        b"e" => decode_error(tid, raw).map(Message::Error),
        other => Err(ProtocolError::InvalidMessageType(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

fn decode_query(tid: TransactionId, raw: RawMessage) -> Result<Query> {
    let method = raw.q.ok_or(ProtocolError::MissingField("q"))?;
    let method = String::from_utf8_lossy(&method).into_owned();
    let kind =
        RequestKind::from_method(&method).ok_or(ProtocolError::UnknownMethod(method.clone()))?;
    let body = raw.a.ok_or(ProtocolError::MissingField("a"))?;
    let id = body.id()?;

    let request = match kind {
        RequestKind::Ping => Request::Ping,
        RequestKind::FindNode => Request::FindNode {
            target: required_id(&body.target, "target")?,
        },
        RequestKind::GetPeers => Request::GetPeers {
            info_hash: required_id(&body.info_hash, "info_hash")?,
        },
        RequestKind::Get => Request::Get {
            target: required_id(&body.target, "target")?,
            seq: body.seq,
        },
        RequestKind::Put => Request::Put(PutArgs {
            token: into_vec(body.token).ok_or(ProtocolError::MissingField("token"))?,
            v: body.v.ok_or(ProtocolError::MissingField("v"))?,
            cas: body.cas,
            k: into_vec(body.k),
            salt: into_vec(body.salt),
            seq: body.seq,
            sig: into_vec(body.sig),
        }),
        RequestKind::AnnouncePeer => {
            let info_hash = required_id(&body.info_hash, "info_hash")?;
            let port = body.port.ok_or(ProtocolError::MissingField("port"))?;
            let port = u16::try_from(port).map_err(|_| {
                ProtocolError::InvalidMessageFormat(format!("port out of range: {}", port))
            })?;
            Request::AnnouncePeer(AnnounceArgs {
                info_hash,
                port,
                token: into_vec(body.token).ok_or(ProtocolError::MissingField("token"))?,
                name: into_vec(body.name),
                implied_port: body.implied_port == Some(1),
            })
        }
    };

    Ok(Query {
        tid,
        id,
        read_only: raw.ro == Some(1),
        request,
    })
}

fn decode_reply(tid: TransactionId, kind: RequestKind, raw: RawMessage) -> Result<Reply> {
    let body = raw.r.ok_or(ProtocolError::MissingField("r"))?;
    let id = body.id()?;
    // the reflected address is advisory; a malformed one is ignored
    let ip = raw
        .ip
        .and_then(|ip| decode_compact_addr(&ip).ok())
        .flatten();

    let response = match kind {
        RequestKind::Ping => Response::Ping,
        RequestKind::Put => Response::Put,
        RequestKind::AnnouncePeer => Response::AnnouncePeer,
        RequestKind::FindNode => Response::FindNode {
            nodes: body.nodes()?,
        },
        RequestKind::GetPeers => {
            let nodes = body.nodes()?;
            let values = body
                .values
                .unwrap_or_default()
                .iter()
                .filter_map(|raw| decode_compact_addr(raw).ok().flatten())
                .collect();
            Response::GetPeers {
                nodes,
                token: into_vec(body.token),
                values,
            }
        }
        RequestKind::Get => {
            let nodes = body.nodes()?;
            let item = body.v.map(|v| StoredItem {
                v,
                k: body.k.map(ByteBuf::into_vec),
                seq: body.seq,
                sig: body.sig.map(ByteBuf::into_vec),
            });
            Response::Get {
                nodes,
                token: into_vec(body.token),
                item,
            }
        }
    };

    Ok(Reply {
        tid,
        id,
        ip,
        response,
    })
}

fn decode_error(tid: TransactionId, raw: RawMessage) -> Result<ErrorMessage> {
    let (code, message) = raw.e.ok_or(ProtocolError::MissingField("e"))?;
    Ok(ErrorMessage {
        tid,
        code: ErrorCode::from(code),
        message: String::from_utf8_lossy(&message).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::NodeEntry;

    fn no_pending(_: &TransactionId) -> Option<RequestKind> {
        None
    }

    fn roundtrip_reply(reply: Reply) -> Reply {
        let kind = reply.response.kind();
        let encoded = encode(&Message::Response(reply)).unwrap();
        match decode(&encoded, |_| Some(kind)).unwrap() {
            Message::Response(reply) => reply,
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_reference_ping() {
        let payload = b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe";
        let msg = decode(payload, no_pending).unwrap();

        match msg {
            Message::Query(query) => {
                assert_eq!(query.tid.as_bytes(), b"aa");
                assert_eq!(query.id.as_bytes(), b"abcdefghij0123456789");
                assert_eq!(query.request, Request::Ping);
                assert!(!query.read_only);
            }
            other => panic!("expected a query, got {:?}", other),
        }
    }

    #[test]
    fn test_query_roundtrip() {
        let query = Query {
            tid: TransactionId::random(),
            id: NodeId::random(),
            read_only: true,
            request: Request::AnnouncePeer(AnnounceArgs {
                info_hash: NodeId::random(),
                port: 51413,
                token: vec![1, 2, 3, 4],
                name: None,
                implied_port: true,
            }),
        };
        let encoded = encode(&Message::Query(query.clone())).unwrap();
        assert_eq!(
            decode(&encoded, no_pending).unwrap(),
            Message::Query(query)
        );
    }

    #[test]
    fn test_put_query_carries_opaque_signature_fields() {
        let query = Query {
            tid: TransactionId::random(),
            id: NodeId::random(),
            read_only: false,
            request: Request::Put(PutArgs {
                token: vec![9; 4],
                v: Value::Bytes(b"hello".to_vec()),
                cas: Some(3),
                k: Some(vec![7; 32]),
                salt: Some(b"salt".to_vec()),
                seq: Some(4),
                sig: Some(vec![5; 64]),
            }),
        };
        let encoded = encode(&Message::Query(query.clone())).unwrap();
        assert_eq!(
            decode(&encoded, no_pending).unwrap(),
            Message::Query(query)
        );
    }

    #[test]
    fn test_get_peers_reply_with_nodes_and_values() {
        let reply = Reply {
            tid: TransactionId::random(),
            id: NodeId::random(),
            ip: Some("8.8.4.4:1234".parse().unwrap()),
            response: Response::GetPeers {
                nodes: Nodes::from_entries(vec![
                    NodeEntry::new(NodeId::random(), "10.0.0.1:6881".parse().unwrap()),
                    NodeEntry::new(NodeId::random(), "[fe80::1]:6881".parse().unwrap()),
                ]),
                token: Some(vec![0xde, 0xad, 0xbe, 0xef]),
                values: vec!["10.0.0.9:80".parse().unwrap()],
            },
        };
        assert_eq!(roundtrip_reply(reply.clone()), reply);
    }

    #[test]
    fn test_get_reply_with_item() {
        let reply = Reply {
            tid: TransactionId::random(),
            id: NodeId::random(),
            ip: None,
            response: Response::Get {
                nodes: Nodes::default(),
                token: None,
                item: Some(StoredItem {
                    v: Value::Int(42),
                    k: None,
                    seq: None,
                    sig: None,
                }),
            },
        };
        assert_eq!(roundtrip_reply(reply.clone()), reply);
    }

    #[test]
    fn test_error_roundtrip() {
        let error = ErrorMessage {
            tid: TransactionId::random(),
            code: ErrorCode::Protocol,
            message: "Invalid Token".to_string(),
        };
        let encoded = encode(&Message::Error(error.clone())).unwrap();
        assert_eq!(
            decode(&encoded, no_pending).unwrap(),
            Message::Error(error)
        );
    }

    #[test]
    fn test_reply_without_pending_transaction() {
        let reply = Reply {
            tid: TransactionId::random(),
            id: NodeId::random(),
            ip: None,
            response: Response::Ping,
        };
        let tid = reply.tid;
        let encoded = encode(&Message::Response(reply)).unwrap();
        assert_eq!(
            decode(&encoded, no_pending),
            Err(ProtocolError::UnknownTransaction(tid))
        );
    }

    #[test]
    fn test_malformed_reply_is_reported_with_tid() {
        let payload = b"d1:rd2:id19:abcdefghij012345678e1:t2:aa1:y1:re";
        match decode(payload, |_| Some(RequestKind::Ping)) {
            Err(ProtocolError::MalformedReply { tid, .. }) => assert_eq!(tid.as_bytes(), b"aa"),
            other => panic!("expected a malformed reply, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method_is_reported_with_tid() {
        let payload = b"d1:ad2:id20:abcdefghij0123456789e1:q4:vote1:t2:xy1:y1:qe";
        match decode(payload, no_pending) {
            Err(ProtocolError::MalformedQuery {
                tid,
                unknown_method,
                ..
            }) => {
                assert_eq!(tid.as_bytes(), b"xy");
                assert!(unknown_method);
            }
            other => panic!("expected a malformed query, got {:?}", other),
        }
    }

    #[test]
    fn test_short_id_is_rejected() {
        let payload = b"d1:ad2:id3:abc6:target20:abcdefghij0123456789e1:q9:find_node1:t2:aa1:y1:qe";
        match decode(payload, no_pending) {
            Err(ProtocolError::MalformedQuery { unknown_method, .. }) => assert!(!unknown_method),
            other => panic!("expected a malformed query, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode(b"not bencode at all", no_pending).is_err());
        assert!(decode(b"d1:t0:1:y1:qe", no_pending).is_err());
        assert!(decode(b"d1:t2:aa1:y1:ze", no_pending).is_err());
    }
}
