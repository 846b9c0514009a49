//! End-to-end retrieval over TCP: a node with twenty CTD samples, a client
//! with a byte budget of ten packets, a local log and a sticky forwarder.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use mooring::checkpoint::CheckpointStore;
use mooring::client::PacketRequest;
use mooring::codec;
use mooring::filter::TypeSelection;
use mooring::forwarder::{Forwarder, MemoryPublisher};
use mooring::node::MemoryNode;
use mooring::retrieval::{LogSink, RetrievalCursor, SelectingSink};
use mooring::store::{FileLog, PacketLog};
use mooring::transport::{NodeServer, Transport, wire};
use mooring::types::{Packet, Port, TypeMask};

const DEVICE: i64 = 1553;

fn ctd_packets() -> Vec<Packet> {
    (0..20)
        .map(|i| Packet::sensor_data(DEVICE, 1000 + 50 * i, 100 + i, vec![0x5a; 16]))
        .collect()
}

async fn start_node(packets: Vec<Packet>) -> (NodeServer, Arc<MemoryNode>) {
    let node = Arc::new(MemoryNode::new("buoy-7", 42));
    node.add_port(Port::new("ctd", DEVICE, "SeaBird37"));
    node.append(Packet::device_message(DEVICE, 990, 99, b"sampling started".to_vec())).unwrap();
    node.extend(packets).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = NodeServer::spawn(listener, node.clone()).unwrap();
    (server, node)
}

fn data_request(packets: &[Packet]) -> PacketRequest {
    let max_bytes = (10 * codec::encoded_len(&packets[0])) as i32;
    PacketRequest::new(DEVICE, 0, 2000).with_max_bytes(max_bytes).with_types(TypeMask::SENSOR_DATA)
}

#[tokio::test]
async fn two_round_trips_fill_log_and_checkpoint() {
    let _ = tracing_subscriber::fmt::try_init();
    let packets = ctd_packets();
    let (server, _node) = start_node(packets.clone()).await;
    let dir = tempfile::tempdir().unwrap();

    let mut client =
        Transport::connect(server.local_addr().to_string(), Duration::from_secs(5)).await.unwrap();
    let log = FileLog::open(dir.path().join("logs"), DEVICE).unwrap();
    let store = CheckpointStore::new(dir.path().join("publish"), "logPostpublish");
    let forwarder = Forwarder::sticky(DEVICE, MemoryPublisher::default(), store.clone());

    let mut sink = SelectingSink::new(
        TypeSelection::only(TypeMask::SENSOR_DATA),
        (LogSink::new(log), forwarder),
    );
    let summary =
        RetrievalCursor::new(data_request(&packets)).run(&mut client, &mut sink).await.unwrap();

    assert_eq!(summary.rounds, 2);
    assert_eq!(summary.packets, 20);
    assert_eq!(summary.cursor, 1951);
    assert!(!summary.ended_empty);

    let (log_sink, forwarder) = sink.into_inner();
    let logged = log_sink.log().packets_from(0).unwrap();
    assert_eq!(logged, packets);
    assert!(logged.windows(2).all(|w| w[0].sequence_no < w[1].sequence_no));

    let published: Vec<i64> = forwarder.publisher().records.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(published, (100..120).collect::<Vec<_>>());

    let stats = forwarder.finish().await.unwrap();
    assert_eq!(stats.forwarded, 20);
    assert_eq!(stats.checkpoint, Some(119));

    let contents = std::fs::read_to_string(store.path(DEVICE)).unwrap();
    assert!(contents.lines().any(|line| line == "lastSequenceNumber=119"), "{contents}");

    // A second sticky pass over the same window forwards nothing new.
    let mut again = Forwarder::sticky(DEVICE, MemoryPublisher::default(), store.clone());
    let mut rerun = RetrievalCursor::new(data_request(&packets));
    rerun.run(&mut client, &mut again).await.unwrap();
    let stats = again.finish().await.unwrap();
    assert_eq!(stats.forwarded, 0);
    assert_eq!(stats.already_seen, 20);
    assert_eq!(store.load(DEVICE), Some(119));

    server.shutdown().await;
}

#[tokio::test]
async fn resumes_from_the_local_log_after_new_samples() {
    let packets = ctd_packets();
    let (server, node) = start_node(packets[..12].to_vec()).await;
    let dir = tempfile::tempdir().unwrap();
    let mut client =
        Transport::connect(server.local_addr().to_string(), Duration::from_secs(5)).await.unwrap();

    let mut sink = LogSink::new(FileLog::open(dir.path(), DEVICE).unwrap());
    RetrievalCursor::new(data_request(&packets)).run(&mut client, &mut sink).await.unwrap();
    assert_eq!(sink.log().len(), 12);

    node.extend(packets[12..].to_vec()).unwrap();

    // Reopen the log as a fresh process would and start just past its newest packet.
    drop(sink);
    let log = FileLog::open(dir.path(), DEVICE).unwrap();
    let start = log.max_timestamp().map_or(0, |t| t + 1);
    assert_eq!(start, 1551);

    let mut sink = LogSink::new(log);
    let request = data_request(&packets).starting_at(start);
    let summary = RetrievalCursor::new(request).run(&mut client, &mut sink).await.unwrap();
    assert_eq!(summary.packets, 8);
    assert_eq!(sink.log().packets_from(0).unwrap(), packets);

    server.shutdown().await;
}

#[tokio::test]
async fn unknown_device_is_nothing_to_do() {
    let (server, _node) = start_node(ctd_packets()).await;
    let mut client =
        Transport::connect(server.local_addr().to_string(), Duration::from_secs(5)).await.unwrap();

    let mut packets: Vec<Packet> = Vec::new();
    let err = RetrievalCursor::new(PacketRequest::new(9999, 0, 2000))
        .run(&mut client, &mut packets)
        .await
        .unwrap_err();
    assert!(err.is_nothing_to_do(), "{err}");
    assert!(packets.is_empty());

    server.shutdown().await;
}

/// Complete `getDevicePackets` answer carrying `records` as exported.
fn packet_set_reply(records: &[Vec<u8>]) -> BytesMut {
    let mut frame = BytesMut::new();
    frame.put_u8(0); // ok
    frame.put_u8(5); // packet set
    frame.put_u8(1); // complete
    frame.put_u32(records.len() as u32);
    for record in records {
        frame.put_u8(0);
        frame.put_u32(record.len() as u32);
        frame.put_slice(record);
    }
    frame
}

#[tokio::test]
async fn undecodable_packet_is_skipped_and_the_run_continues() {
    let packets = ctd_packets();
    let mut garbled = codec::to_bytes(&packets[1]).unwrap();
    let variant = codec::format::BASE_HEADER_LEN;
    garbled[variant..variant + 2].copy_from_slice(&0x0009u16.to_be_bytes());
    let records =
        vec![codec::to_bytes(&packets[0]).unwrap(), garbled, codec::to_bytes(&packets[2]).unwrap()];

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        while let Some(Ok(frame)) = framed.next().await {
            let request = wire::decode_request(frame.freeze()).unwrap();
            assert_eq!(request.command, wire::GET_DEVICE_PACKETS);
            if framed.send(packet_set_reply(&records).freeze()).await.is_err() {
                break;
            }
        }
    });

    let mut client = Transport::connect(addr.to_string(), Duration::from_secs(5)).await.unwrap();
    let mut retrieved: Vec<Packet> = Vec::new();
    let summary = RetrievalCursor::new(data_request(&packets))
        .run(&mut client, &mut retrieved)
        .await
        .unwrap();

    assert_eq!(summary.packets, 2);
    assert_eq!(retrieved, vec![packets[0].clone(), packets[2].clone()]);
    assert_eq!(summary.cursor, packets[2].system_time + 1);
    assert!(client.is_connected());
}
