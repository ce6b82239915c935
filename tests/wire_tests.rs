use mesh_adapt_bridge::algs::wire::{self, WireGid, WireMatch, WireSize};
use mesh_adapt_bridge::mesh_error::MeshAdaptError;

#[test]
fn ragged_buffer_is_a_comm_error() {
    let mut bytes = wire::encode(&[WireGid::new(1, 2), WireGid::new(3, 4)]);
    bytes.pop();
    match wire::decode::<WireGid>(3, &bytes) {
        Err(MeshAdaptError::Comm { neighbor, .. }) => assert_eq!(neighbor, 3),
        other => panic!("expected a comm error, got {other:?}"),
    }
}

#[test]
fn empty_buffer_decodes_to_nothing() {
    let recs: Vec<WireMatch> = wire::decode(0, &[]).unwrap();
    assert!(recs.is_empty());
}

#[test]
fn size_record_pads_missing_values_with_zero() {
    let rec = WireSize::new(42, &[0.25, 0.5, 1.0]);
    assert_eq!(rec.key(), 42);
    assert_eq!(rec.values(), [0.25, 0.5, 1.0, 0.0, 0.0, 0.0]);
}

#[test]
fn size_record_keeps_nan_bits() {
    let rec = WireSize::new(u64::MAX, &[f64::NAN, -0.0]);
    assert_eq!(rec.key(), u64::MAX);
    assert!(rec.values()[0].is_nan());
    assert!(rec.values()[1].is_sign_negative());
}

#[test]
fn match_records_survive_a_byte_buffer() {
    let recs = vec![WireMatch::new(0, &[7], 1), WireMatch::new(2, &[1, 5, 9], 30)];
    let back: Vec<WireMatch> = wire::decode(1, &wire::encode(&recs)).unwrap();
    assert_eq!(back[0].key(), vec![7]);
    assert_eq!(back[1].dim(), 2);
    assert_eq!(back[1].key(), vec![1, 5, 9]);
    assert_eq!(back[1].handle(), 30);
}
