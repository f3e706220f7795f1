use ebml_codec::matroska::ids::*;
use ebml_codec::{
    checksum, decode_vsize, encode_element_id, encode_uint, encode_vsize, AccessMode,
    BinaryPayload, Crc32, Document, EbmlError, Element, FileStorage, LoadContext, MemoryStorage,
    ReadOptions, Schema, Storage, UIntPayload, VSize,
};

const HEADER_STREAM: [u8; 37] = [
    0x1A, 0x45, 0xDF, 0xA3, // EBML element ID
    0xA0, // EBML length = 32
    0x42, 0x86, 0x81, 0x01, // EBMLVersion = 1
    0x42, 0xF7, 0x81, 0x01, // EBMLReadVersion = 1
    0x42, 0xF2, 0x81, 0x04, // EBMLMaxIDLength = 4
    0x42, 0xF3, 0x81, 0x08, // EBMLMaxSizeLength = 8
    0x42, 0x82, // DocType element ID
    0x85, // DocType length = 5
    0x64, 0x75, 0x6D, 0x6D, 0x79, // DocType data = "dummy"
    0x42, 0x87, 0x81, 0x01, // DocTypeVersion = 1
    0x42, 0x85, 0x81, 0x01, // DocTypeReadVersion = 1
];

const ALIEN_STREAM: [u8; 28] = [
    0x18, 0x53, 0x80, 0x67, // Segment element ID
    0x97, // Segment length = 23
    //
    0x15, 0x49, 0xA9, 0x66, // Info element ID
    0x92, // Info length = 18
    0x2A, 0xD7, 0xB1, // TimestampScale element ID
    0x83, // TimestampScale length = 3
    0x07, 0xA1, 0x20, // TimestampScale data = 500000
    0x4F, 0x01, // unknown element ID
    0x82, // unknown element length = 2
    0xAB, 0xCD, // unknown element data
    0x4D, 0x80, // MuxingApp element ID
    0x83, // MuxingApp length = 3
    0x61, 0x62, 0x63, // MuxingApp data = "abc"
];

const STREAMED_SEGMENT: [u8; 39] = [
    0x18, 0x53, 0x80, 0x67, // Segment element ID
    0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // Segment length = unknown
    //
    // --- Cluster 1 ---
    0x1F, 0x43, 0xB6, 0x75, // Cluster element ID
    0xFF, // Cluster length = unknown
    0xE7, 0x81, 0x00, // Timestamp = 0
    0xA3, // SimpleBlock element ID
    0x84, // SimpleBlock length = 4
    0x81, 0x00, 0x00, 0x80, // SimpleBlock data
    //
    // --- Cluster 2 ---
    0x1F, 0x43, 0xB6, 0x75, // Cluster element ID
    0xFF, // Cluster length = unknown
    0xE7, 0x81, 0x0A, // Timestamp = 10
    //
    0x1C, 0x53, 0xBB, 0x6B, // Cues element ID
    0x80, // Cues length = 0
];

fn load_body(bytes: &[u8], schema: &Schema, options: &ReadOptions) -> ebml_codec::Result<Vec<Element>> {
    let mut storage = MemoryStorage::from_bytes(bytes.to_vec());
    let ctx = LoadContext::new(schema, options);
    let mut body = Vec::new();
    while let Some(element) = Element::read_from(&mut storage, None, None, &ctx)? {
        body.push(element);
    }
    Ok(body)
}

fn save_all(elements: &[Element]) -> Vec<u8> {
    let mut storage = MemoryStorage::new();
    for element in elements {
        element.save(&mut storage, None).unwrap();
    }
    storage.bytes()
}

fn assert_sizes_match(element: &Element) {
    let mut storage = MemoryStorage::new();
    let written = element
        .save(&mut storage, None)
        .unwrap()
        .map_or(0, |receipt| receipt.length());
    assert_eq!(written, element.calc_size());
    assert_eq!(storage.bytes().len() as u64, written);
    element.children().iter().for_each(assert_sizes_match);
}

#[test]
fn var_int_widths() {
    assert_eq!(encode_uint(0x1A45DFA3, None).unwrap().len(), 4);
    assert_eq!(encode_uint(0xEC, None).unwrap().len(), 1);
    assert_eq!(encode_element_id(0x1A45DFA3).unwrap(), vec![0x1A, 0x45, 0xDF, 0xA3]);
    assert_eq!(encode_element_id(0xEC).unwrap(), vec![0xEC]);

    // 127 would be the one byte unknown marker
    let encoded = encode_vsize(127, None).unwrap();
    assert_eq!(encoded, vec![0x40, 0x7F]);
    assert_eq!(decode_vsize(&encoded).unwrap(), (VSize::Known(127), 2));
    assert_eq!(decode_vsize(&[0xFF]).unwrap(), (VSize::Unknown, 1));
}

#[test]
fn header_scenario() {
    let schema = Schema::with_ebml_header("dummy");
    let document = Document::new(&schema).unwrap();
    assert_eq!(document.calc_size(), 37);

    let mut storage = MemoryStorage::new();
    assert_eq!(document.save(&mut storage, None).unwrap(), 37);
    assert_eq!(storage.bytes(), HEADER_STREAM.to_vec());

    storage.seek(0).unwrap();
    let loaded = Document::load(&mut storage, &schema, &ReadOptions::new()).unwrap();
    assert_eq!(loaded.header.doc_type(), "dummy");
    assert_eq!(loaded.header.max_size_length(), 8);
    assert!(loaded.body.is_empty());
    assert_eq!(loaded, document);
}

#[test]
fn default_elision_and_forced_save() {
    let mut element = Element::new(FLAG_DEFAULT, UIntPayload::with_default(1));
    assert_eq!(element.calc_size(), 0);
    let mut storage = MemoryStorage::new();
    assert!(element.save(&mut storage, None).unwrap().is_none());
    assert!(storage.bytes().is_empty());

    element.set_uint(0).unwrap();
    assert_eq!(save_all(&[element.clone()]), vec![0x88, 0x81, 0x00]);

    element.reset_to_default();
    element.set_always_save(true);
    assert_eq!(save_all(&[element.clone()]), vec![0x88, 0x81, 0x01]);

    // forced survives another reset
    element.reset_to_default();
    assert_eq!(element.calc_size(), 3);
}

#[test]
fn save_length_matches_calc_size() {
    let schema = Schema::matroska();
    let mut segment = schema.create(SEGMENT).unwrap();
    let tracks = schema.add_child(&mut segment, TRACKS).unwrap();
    let entry = tracks.child_mut(TRACK_ENTRY).unwrap();
    schema.add_child(entry, TRACK_NUMBER).unwrap().set_uint(1).unwrap();
    schema.add_child(entry, CODEC_ID).unwrap().set_string("A_OPUS").unwrap();
    schema.add_child(entry, AUDIO).unwrap();

    let cluster = schema.add_child(&mut segment, CLUSTER).unwrap();
    cluster.push(Element::new(TIMESTAMP, UIntPayload::new(300))).unwrap();
    cluster
        .push(Element::new(SIMPLE_BLOCK, BinaryPayload::new(vec![0; 200])))
        .unwrap();
    cluster.set_checksum(true).unwrap();
    segment.push(Element::void(10).unwrap()).unwrap();

    assert_sizes_match(&segment);
}

#[test_log::test]
fn unknown_elements_survive_round_trip() {
    let schema = Schema::matroska();
    let body = load_body(&ALIEN_STREAM, &schema, &ReadOptions::new()).unwrap();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0].alien_count(), 1);

    let info = body[0].child(INFO).unwrap();
    assert_eq!(info.child(TIMESTAMP_SCALE).and_then(Element::uint), Some(500_000));
    assert_eq!(info.child(MUXING_APP).and_then(Element::string), Some("abc"));
    assert!(info.child(0x4F01).unwrap().is_alien());

    assert_eq!(save_all(&body), ALIEN_STREAM.to_vec());
}

#[test]
fn receipt_patches_only_its_range() {
    let mut storage = MemoryStorage::new();
    let first = Element::new(TRACK_NUMBER, UIntPayload::new(1));
    let second = Element::new(TRACK_UID, UIntPayload::new(0x1122));
    let third = Element::new(TRACK_TYPE, UIntPayload::new(2));

    first.save(&mut storage, None).unwrap();
    let receipt = second.save(&mut storage, None).unwrap().unwrap();
    third.save(&mut storage, None).unwrap();
    let before = storage.bytes();

    // payload of TrackUID starts after its 2 byte ID and 1 byte size
    receipt.narrow(3, 2).unwrap().save_again(&[0x33, 0x44]).unwrap();
    let after = storage.bytes();
    assert_eq!(after.len(), before.len());
    assert_eq!(&after[..6], &before[..6]);
    assert_eq!(&after[6..8], &[0x33, 0x44]);
    assert_eq!(&after[8..], &before[8..]);

    assert!(matches!(
        receipt.save_again(&[0; 6]),
        Err(EbmlError::ReceiptOverflow { capacity: 5, len: 6 })
    ));
    assert_eq!(storage.position(), after.len() as u64);
}

#[test]
fn save_pass_checksum_matches_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.mkv");

    let schema = Schema::matroska();
    let mut document = Document::new(&schema).unwrap();
    let mut segment = schema.create(SEGMENT).unwrap();
    let cluster = schema.add_child(&mut segment, CLUSTER).unwrap();
    cluster.push(Element::new(TIMESTAMP, UIntPayload::new(7))).unwrap();
    cluster
        .push(Element::new(SIMPLE_BLOCK, BinaryPayload::new((0..=255).collect())))
        .unwrap();
    cluster.set_checksum(true).unwrap();
    document.body.push(segment);

    let mut storage = FileStorage::open(&path, AccessMode::Create).unwrap();
    let mut crc = Crc32::new();
    let written = document.save(&mut storage, Some(&mut crc)).unwrap();
    assert_eq!(written, document.calc_size());
    assert_eq!(storage.checksum_range(0, written).unwrap(), crc.finalize());

    storage.close().unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(checksum(&bytes), crc.finalize());

    let mut storage = FileStorage::open(&path, AccessMode::Read).unwrap();
    let loaded = Document::load(&mut storage, &schema, &ReadOptions::new()).unwrap();
    let cluster = loaded.get(SEGMENT).and_then(|segment| segment.child(CLUSTER)).unwrap();
    assert!(cluster.has_checksum());

    let mut again = MemoryStorage::new();
    let mut crc_again = Crc32::new();
    loaded.save(&mut again, Some(&mut crc_again)).unwrap();
    assert_eq!(again.bytes(), bytes);
    assert_eq!(crc_again.finalize(), crc.finalize());
}

#[test]
fn master_checksum_written_and_verified() {
    let schema = Schema::matroska();
    let mut cluster = Element::master(CLUSTER, vec![Element::new(TIMESTAMP, UIntPayload::new(5))]);
    cluster.set_checksum(true).unwrap();

    let stored = checksum(&[0xE7, 0x81, 0x05]).to_le_bytes();
    let mut expected = vec![
        0x1F, 0x43, 0xB6, 0x75, // Cluster element ID
        0x89, // Cluster length = 9
        0xBF, // CRC-32 element ID
        0x84, // CRC-32 length = 4
    ];
    expected.extend_from_slice(&stored); // CRC-32 data, little endian
    expected.extend_from_slice(&[0xE7, 0x81, 0x05]); // Timestamp = 5
    assert_eq!(save_all(&[cluster.clone()]), expected);

    let body = load_body(&expected, &schema, &ReadOptions::new()).unwrap();
    assert_eq!(body, vec![cluster]);
    assert!(body[0].has_checksum());
    assert_eq!(body[0].children().len(), 1);

    let mut corrupted = expected.clone();
    corrupted[13] = 0x06;
    assert!(matches!(
        load_body(&corrupted, &schema, &ReadOptions::new()),
        Err(EbmlError::ChecksumMismatch { id: CLUSTER, offset: 5, .. })
    ));
}

#[test_log::test]
fn checksum_mismatch_tolerated_when_not_verifying() {
    let schema = Schema::matroska();
    let stream = [
        0x1F, 0x43, 0xB6, 0x75, // Cluster element ID
        0x89, // Cluster length = 9
        0xBF, 0x84, 0x00, 0x00, 0x00, 0x00, // CRC-32 = 0, wrong
        0xE7, 0x81, 0x05, // Timestamp = 5
    ];
    let options = ReadOptions::new().verify_checksums(false);
    let body = load_body(&stream, &schema, &options).unwrap();
    assert_eq!(body[0].child(TIMESTAMP).and_then(Element::uint), Some(5));

    // the stored value is recomputed on save
    let saved = save_all(&body);
    assert_eq!(&saved[7..11], &checksum(&[0xE7, 0x81, 0x05]).to_le_bytes());
}

#[test]
fn unknown_size_clusters_stop_at_next_element() {
    let schema = Schema::matroska();
    let body = load_body(&STREAMED_SEGMENT, &schema, &ReadOptions::new()).unwrap();
    assert_eq!(body.len(), 1);

    let segment = &body[0];
    assert!(segment.is_unknown_size());
    let ids: Vec<u32> = segment.children().iter().map(Element::id).collect();
    assert_eq!(ids, vec![CLUSTER, CLUSTER, CUES]);

    let clusters: Vec<&Element> = segment.children_with_id(CLUSTER).collect();
    assert!(clusters.iter().all(|c| c.is_unknown_size()));
    assert_eq!(clusters[0].children().len(), 2);
    assert_eq!(clusters[1].child(TIMESTAMP).and_then(Element::uint), Some(10));

    assert_eq!(save_all(&body), STREAMED_SEGMENT.to_vec());
}

#[test]
fn receipts_go_stale() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stale.ebml");

    let mut storage = FileStorage::open(&path, AccessMode::Create).unwrap();
    let receipt = Element::new(TIMESTAMP, UIntPayload::new(1))
        .save(&mut storage, None)
        .unwrap()
        .unwrap();
    receipt.save_again(&[0xE7, 0x81, 0x02]).unwrap();

    storage.close().unwrap();
    assert!(matches!(receipt.save_again(&[0xE7]), Err(EbmlError::StaleReceipt)));
    assert!(matches!(storage.seek(0), Err(EbmlError::Closed)));

    storage.reopen(AccessMode::ReadWrite).unwrap();
    assert!(matches!(receipt.save_again(&[0xE7]), Err(EbmlError::StaleReceipt)));
    let fresh = storage.save(&[0xEC, 0x80]).unwrap();
    fresh.save_again(&[0xEC]).unwrap();
    storage.close().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), vec![0xEC, 0x80, 0x02]);

    let mut memory = MemoryStorage::new();
    let receipt = memory.save(&[1, 2, 3]).unwrap();
    drop(memory);
    assert!(matches!(receipt.save_again(&[4]), Err(EbmlError::StaleReceipt)));
}
