use anyhow::Result;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// 64-bit double-gradient perceptual hash of a captured frame, base64-encoded.
pub fn perceptual_hash(image_bytes: &[u8]) -> Result<String> {
    let img = image::load_from_memory(image_bytes)?;
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    let hash = hasher.hash_image(&img);
    Ok(hash.to_base64())
}

/// Hamming distance between two encoded hashes. None when either side does
/// not parse, so malformed input reads as "no measurable jump".
pub fn hamming_distance(lhs: &str, rhs: &str) -> Option<u32> {
    let h1 = ImageHash::<Vec<u8>>::from_base64(lhs).ok()?;
    let h2 = ImageHash::<Vec<u8>>::from_base64(rhs).ok()?;
    Some(h1.dist(&h2))
}


#[cfg(test)]
mod tests {
    use super::test_support::solid_png;
    use super::*;

    #[test]
    fn identical_frames_have_zero_distance() {
        let png = solid_png(40, 90, 200);
        let a = perceptual_hash(&png).unwrap();
        let b = perceptual_hash(&png).unwrap();
        assert_eq!(hamming_distance(&a, &b), Some(0));
    }

    #[test]
    fn malformed_hash_yields_none() {
        let png = solid_png(40, 90, 200);
        let a = perceptual_hash(&png).unwrap();
        assert_eq!(hamming_distance(&a, "not-a-hash!"), None);
        assert_eq!(hamming_distance("", &a), None);
    }

    #[test]
    fn garbage_bytes_fail_to_hash() {
        assert!(perceptual_hash(b"definitely not an image").is_err());
    }
}
