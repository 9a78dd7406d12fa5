//! # Inverse DCT
//!
//! Fixed-point Arai/Agui/Nakajima inverse DCT. Coefficients arrive
//! de-quantized and prescaled (see [`super::tables::IPSF`]); output samples
//! are level shifted and clipped to 0..=255.

const M13: i32 = 362; // 1.41421 * 256
const M4: i32 = 668; // 2.61313 * 256
const F2: f32 = 1.08239;
const F5: f32 = 1.84776;

/// Clip to the 8-bit sample range
#[inline]
pub fn clip8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// One 8-point butterfly over `s[0..8]` taken with `stride`
///
/// Returns the eight outputs in natural order.
#[inline]
fn butterfly(s0: i32, s1: i32, s2: i32, s3: i32, s4: i32, s5: i32, s6: i32, s7: i32) -> [i32; 8] {
    // Even part
    let mut t10 = s4 + s0;
    let t12 = (s0 << 1) - t10;
    let t13 = s6 + s2;
    let mut t11 = (s2 << 1) - t13;
    t11 = (t11 * M13 >> 8) - t13;

    let v0 = t10 + t13;
    let v3 = t10 - t13;
    let v1 = t12 + t11;
    let v2 = t12 - t11;

    // Odd part
    let mut v5 = s7 + s1;
    let mut v4 = (s1 << 1) - v5;
    let mut v6 = s5 - s3;
    let mut v7 = (s3 << 1) + v6;
    v7 += v5;

    t10 = ((v4 + v6) as f32 * F5) as i32;
    v6 = (v6 * M4 >> 8) + v7;
    v6 = t10 - v6;
    v5 = (((v5 << 1) - v7) * M13 >> 8) - v6;
    v4 = (v4 as f32 * F2) as i32 + v5;
    v4 = t10 - v4;

    [v0 + v7, v1 + v6, v2 + v5, v3 + v4, v3 - v4, v2 - v5, v1 - v6, v0 - v7]
}

/// Transform one block in place and store clipped samples in `dst`
///
/// `src` is consumed as scratch space.
pub fn block_idct(src: &mut [i32; 64], dst: &mut [u8]) {
    for col in 0..8 {
        let out = butterfly(
            src[col],
            src[col + 8],
            src[col + 16],
            src[col + 24],
            src[col + 32],
            src[col + 40],
            src[col + 48],
            src[col + 56],
        );
        for (k, v) in out.into_iter().enumerate() {
            src[col + k * 8] = v;
        }
    }

    for row in 0..8 {
        let s = &src[row * 8..row * 8 + 8];
        let out = butterfly(s[0] + (128 << 8), s[1], s[2], s[3], s[4], s[5], s[6], s[7]);
        for (k, v) in out.into_iter().enumerate() {
            dst[row * 8 + k] = clip8(v >> 8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip8() {
        assert_eq!(clip8(-5), 0);
        assert_eq!(clip8(128), 128);
        assert_eq!(clip8(300), 255);
    }

    #[test]
    fn test_zero_block_is_mid_gray() {
        let mut src = [0i32; 64];
        let mut dst = [0u8; 64];
        block_idct(&mut src, &mut dst);
        assert!(dst.iter().all(|&v| v == 128));
    }

    #[test]
    fn test_dc_only_block_is_flat() {
        let mut src = [0i32; 64];
        src[0] = 40 << 8;
        let mut dst = [0u8; 64];
        block_idct(&mut src, &mut dst);
        let first = dst[0];
        assert!(dst.iter().all(|&v| v == first));
        assert_eq!(first, 168);
    }

    #[test]
    fn test_horizontal_frequency_varies_along_row() {
        let mut src = [0i32; 64];
        src[1] = 60 << 8;
        let mut dst = [0u8; 64];
        block_idct(&mut src, &mut dst);

        // Every row identical, left and right halves mirrored around 128
        for row in 1..8 {
            assert_eq!(&dst[row * 8..row * 8 + 8], &dst[0..8]);
        }
        assert!(dst[0] > dst[7]);
        assert!(dst[0] > 128 && dst[7] < 128);
    }
}
