use test_log::test;

use crate::{decode_payload, encode_payload, Addressing, NodeHandle};
use submerge_vers::{ShardId, VtId};

#[test]
fn addressing_partitions_vt_and_shard_ranges() {
    let addr = Addressing { shard_id_incr: 100 };
    assert_eq!(addr.vt_endpoint(VtId(2)).0, 2);
    assert_eq!(addr.shard_endpoint(ShardId(3)).0, 103);
    assert_eq!(addr.shard_of(addr.shard_endpoint(ShardId(3))), Some(ShardId(3)));
    assert_eq!(addr.shard_of(crate::EndpointId(50)), None);
}

#[test]
fn global_handle_sentinel_is_max_u64() {
    assert!(NodeHandle::GLOBAL.is_global());
    assert!(!NodeHandle(0).is_global());
    assert_eq!(NodeHandle::GLOBAL.0, u64::MAX);
}

#[test]
fn payload_round_trips_through_rmp() {
    let original = vec![ShardId(1), ShardId(2), ShardId(7)];
    let buf = encode_payload(&original).expect("encode");
    let decoded: Vec<ShardId> = decode_payload(&buf).expect("decode");
    assert_eq!(original, decoded);
}
