use super::*;

#[test]
fn test_xv6_hash_layout() {
    assert_eq!(xv6_hash(0, 5), 5);
    assert_eq!(xv6_hash(1, 0), 1 << 27);
    assert_eq!(BucketHash::Xv6.bucket(0, 14, 13), 1);
    assert_eq!(BucketHash::Xv6.bucket(1, 0, 13), ((1u64 << 27) % 13) as usize);
}

#[test]
fn test_fnv1a_known_values() {
    // empty input hashes to the offset basis
    assert_eq!(fnv1a_hash(b""), 14695981039346656037);
    assert_eq!(fnv1a_hash(b"a"), 0xaf63dc4c8601ec8c);
}

#[test]
fn test_hashes_are_deterministic() {
    for hash in [BucketHash::Xv6, BucketHash::Fnv1a, BucketHash::Xxh64] {
        assert_eq!(hash.hash(3, 77), hash.hash(3, 77));
    }
    assert_ne!(BucketHash::Xxh64.hash(0, 1), BucketHash::Xxh64.hash(1, 0));
    assert_ne!(BucketHash::Fnv1a.hash(0, 1), BucketHash::Fnv1a.hash(1, 0));
}

#[test]
fn test_bucket_in_range_and_spread() {
    for hash in [BucketHash::Xv6, BucketHash::Fnv1a, BucketHash::Xxh64] {
        let mut seen = [0usize; 13];
        for blockno in 0..1300 {
            let b = hash.bucket(1, blockno, 13);
            assert!(b < 13);
            seen[b] += 1;
        }
        // every bucket gets used for a dense block range
        assert!(seen.iter().all(|&n| n > 0), "{:?} left a bucket empty", hash);
    }
}

#[test]
fn test_bucket_hash_serde_names() {
    let h: BucketHash = serde_json::from_str("\"xxh64\"").unwrap();
    assert_eq!(h, BucketHash::Xxh64);
    assert_eq!(serde_json::to_string(&BucketHash::Fnv1a).unwrap(), "\"fnv1a\"");
    assert_eq!(BucketHash::default(), BucketHash::Xv6);
}
