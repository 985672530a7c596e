use super::*;
use rand::{Rng, SeedableRng};
use std::cmp;
use rand_chacha::ChaChaRng;
use std::io::Write;

// The two reference messages from the standard: 63 bytes of ASCII digits,
// and a 72-byte CP1251 text.
const M1: &[u8] = b"012345678901234567890123456789012345678901234567890123456789012";
const M2: &[u8] = &[
    0xd1, 0xe5, 0x20, 0xe2, 0xe5, 0xf2, 0xf0, 0xe8, 0x2c, 0x20, 0xd1, 0xf2, 0xf0, 0xe8, 0xe1,
    0xee, 0xe6, 0xe8, 0x20, 0xe2, 0xed, 0xf3, 0xf6, 0xe8, 0x2c, 0x20, 0xe2, 0xe5, 0xfe, 0xf2,
    0xfa, 0x20, 0xf1, 0x20, 0xec, 0xee, 0xf0, 0xff, 0x20, 0xf1, 0xf2, 0xf0, 0xe5, 0xeb, 0xe0,
    0xec, 0xe8, 0x20, 0xed, 0xe0, 0x20, 0xf5, 0xf0, 0xe0, 0xe1, 0xf0, 0xfb, 0xff, 0x20, 0xef,
    0xeb, 0xfa, 0xea, 0xfb, 0x20, 0xc8, 0xe3, 0xee, 0xf0, 0xe5, 0xe2, 0xfb,
];

const M1_256: &str = "9d151eefd8590b89daa6ba6cb74af9275dd051026bb149a452fd84e5e57b5500";
const M1_512: &str = "1b54d01a4af5b9d5cc3d86d68d285462b19abc2475222f35c085122be4ba1ffa\
                      00ad30f8767b3a82384c6574f024c311e2a481332b08ef7f41797891c1646f48";
const M2_256: &str = "9dd2fe4e90409e5da87f53976d7405b0c0cac628fc669a741d50063c557e8f50";
const M2_512: &str = "1e88e62226bfca6f9994f1f2d51569e0daf8475a3b0fe61a5300eee46d961376\
                      035fe83549ada2b8620fcd7c496ce5b33f0cb9dddc2b6460143b03dabac9fb28";
const EMPTY_256: &str = "3f539a213e97c802cc229d474c6aa32a825a360b2a933a949fd925208d9ce1bb";
const EMPTY_512: &str = "8e945da209aa869f0455928529bcae4679e9873ab707b55315f56ceb98bef0a7\
                         362f715528356ee83cda5f2aac4c6ad2ba3a715c1bcd81cb8e9f90bf4c1c1a8a";

fn eq(digest: &Digest, expected: &str) {
    assert_eq!(digest.hex().as_str(), expected, "digest mismatch");
}

#[test]
fn test_vectors_256() {
    eq(&streebog256(M1), M1_256);
    eq(&streebog256(M2), M2_256);
    eq(&streebog256(b""), EMPTY_256);
}

#[test]
fn test_vectors_512() {
    eq(&streebog512(M1), M1_512);
    eq(&streebog512(M2), M2_512);
    eq(&streebog512(b""), EMPTY_512);
}

#[test]
fn test_empty_update_is_a_no_op() {
    eq(&State::new256().finalize(), EMPTY_256);
    let mut state = State::new256();
    state.update(b"");
    eq(&state.finalize(), EMPTY_256);
}

#[test]
fn test_256_is_not_a_truncation_of_512() {
    // The variants seed the chaining value differently, so the short digest
    // must not equal either half of the long one.
    let short = streebog256(M1);
    let long = streebog512(M1);
    assert_ne!(short.bytes(), &long.bytes()[..32]);
    assert_ne!(short.bytes(), &long.bytes()[32..]);
}

#[test]
fn test_determinism() {
    assert!(streebog512(M2) == streebog512(M2));
    assert!(streebog256(M2) == streebog256(M2));
    assert!(streebog256(M1) != streebog256(M2));
}

#[test]
fn test_streaming_chunk_sizes() {
    let input: Vec<u8> = (0..1 << 20).map(|i| i as u8).collect();
    let expected256 = streebog256(&input);
    let expected512 = streebog512(&input);
    for &size in &[1usize, 63, 64, 65, 1024, 8192] {
        let mut state256 = State::new256();
        let mut state512 = State::new512();
        for chunk in input.chunks(size) {
            state256.update(chunk);
            state512.update(chunk);
        }
        assert!(state256.finalize() == expected256, "chunk size {}", size);
        assert!(state512.finalize() == expected512, "chunk size {}", size);
    }
}

#[test]
fn test_streaming_random_partitions() {
    let input: Vec<u8> = (0..100_000).map(|i| (i * 31) as u8).collect();
    let expected = streebog512(&input);
    let mut rng = ChaChaRng::seed_from_u64(0x5eed);
    for _ in 0..10 {
        let mut state = State::new512();
        let mut rest = &input[..];
        while !rest.is_empty() {
            let take = cmp::min(rng.gen_range(0, 200), rest.len());
            state.update(&rest[..take]);
            rest = &rest[take..];
        }
        assert!(state.finalize() == expected);
    }
}

#[test]
fn test_boundary_lengths() {
    // One byte short of a block, exactly one block, one byte over.
    for &len in &[0usize, 1, 63, 64, 65, 127, 128, 129] {
        let input = vec![0xab; len];
        let oneshot = streebog256(&input);
        let mut state = State::new256();
        for byte in &input {
            state.update(std::slice::from_ref(byte));
        }
        assert!(state.finalize() == oneshot, "length {}", len);
    }
}

#[test]
fn test_finalize_does_not_consume() {
    let mut state = State::new512();
    state.update(&M2[..37]);
    let first = state.finalize();
    let second = state.finalize();
    assert!(first == second);
    // The stream continues as if finalize never happened.
    state.update(&M2[37..]);
    eq(&state.finalize(), M2_512);
}

#[test]
fn test_reset_reuse() {
    let mut state = State::new256();
    state.update(M1);
    eq(&state.finalize(), M1_256);
    state.reset();
    state.update(M2);
    eq(&state.finalize(), M2_256);
}

#[test]
fn test_write_trait() {
    let mut state = State::new512();
    state.write_all(&M1[..10]).unwrap();
    state.write_all(&M1[10..]).unwrap();
    state.flush().unwrap();
    eq(&state.finalize(), M1_512);
}

#[test]
fn test_digest_lengths() {
    assert_eq!(streebog256(M1).bytes().len(), OUTBYTES_256);
    assert_eq!(streebog512(M1).bytes().len(), OUTBYTES_512);
    assert_eq!(State::new256().digest_length(), OUTBYTES_256);
    assert_eq!(State::new512().digest_length(), OUTBYTES_512);
}
