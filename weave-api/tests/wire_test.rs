use bytes::Bytes;
use weave_api::stats::{decode_samples, encode_samples};
use weave_api::{
    EnvelopeError, Hop, MsgHeader, MsgKey, MsuId, MsuMessage, MsuTypeId, PeerHeader, PeerMsgType, Provenance,
    RemoteEnvelope, RuntimeId, StatKind, StatSample, TimedStat, MAX_PROVENANCE_LEN,
};

fn full_provenance() -> Provenance {
    let hops = (0..MAX_PROVENANCE_LEN as u32)
        .map(|i| Hop {
            runtime: RuntimeId(i % 3 + 1),
            msu: MsuId(100 + i),
            type_id: MsuTypeId(i),
        })
        .collect();
    Provenance::from_hops(hops).unwrap()
}

#[test]
fn test_message_survives_the_wire_with_full_provenance() {
    let header = MsgHeader {
        key: MsgKey::with_id(42, 7),
        provenance: full_provenance(),
        do_profile: true,
    };
    let msg = MsuMessage::with_header(header.clone(), "GET /index.html");
    let (peer_header, frame) = RemoteEnvelope::from_message(MsuId(9), MsuId(115), 80, msg)
        .frame()
        .unwrap();

    let decoded_header = PeerHeader::decode(&peer_header.encode()).unwrap();
    assert_eq!(decoded_header.kind, PeerMsgType::MsuMsg);
    assert_eq!(decoded_header.data_size, frame.len() as u64);

    let envelope = RemoteEnvelope::decode(&frame).unwrap();
    assert_eq!(envelope.proto, 80);
    assert_eq!(envelope.src, MsuId(115));
    let (dst, received) = envelope.into_message();
    assert_eq!(dst, MsuId(9));
    assert_eq!(received.header, header);
    assert_eq!(received.payload, Bytes::from_static(b"GET /index.html"));
    assert!(received.header.provenance.is_full());
}

#[test]
fn test_every_truncation_is_rejected() {
    let msg = MsuMessage::new(MsgKey::new(1), "payload");
    let frame = RemoteEnvelope::from_message(MsuId(1), MsuId(2), 0, msg)
        .encode()
        .unwrap();
    for cut in 0..frame.len() {
        let result = RemoteEnvelope::decode(&frame.slice(..cut));
        assert!(
            matches!(
                result,
                Err(EnvelopeError::Truncated { .. }) | Err(EnvelopeError::LengthMismatch { .. })
            ),
            "cut at {}",
            cut
        );
    }
}

#[test]
fn test_stat_samples_keep_order_and_values() {
    let samples = vec![
        StatSample {
            kind: StatKind::QueueLen,
            item_id: 20,
            cur_time: std::time::Duration::from_secs(12),
            points: vec![
                TimedStat::new(std::time::Duration::from_secs(10), 3.0),
                TimedStat::new(std::time::Duration::from_secs(11), 0.0),
            ],
        },
        StatSample {
            kind: StatKind::BytesSent,
            item_id: 21,
            cur_time: std::time::Duration::from_secs(12),
            points: Vec::new(),
        },
    ];
    let decoded = decode_samples(&encode_samples(&samples).unwrap()).unwrap();
    assert_eq!(decoded, samples);

    let mut padded = encode_samples(&samples).unwrap().to_vec();
    padded.push(0);
    assert!(matches!(decode_samples(&padded), Err(EnvelopeError::TrailingBytes(1))));
}
