mod support;

use genbridge::image::{ImageFormat, inspect_image};
use proptest::prelude::*;

proptest! {
    #[test]
    fn rotated_jpeg_orientations_swap_dimensions(
        w in 1u16..=u16::MAX,
        h in 1u16..=u16::MAX,
        orientation in 5u16..=8,
    ) {
        let m = inspect_image(&support::jpeg(w, h, Some(orientation))).unwrap();
        prop_assert!(m.rotated);
        prop_assert_eq!((m.width, m.height), (u32::from(h), u32::from(w)));
        prop_assert_eq!((m.raw_width, m.raw_height), (u32::from(w), u32::from(h)));
        prop_assert_eq!(m.orientation.value(), orientation as u8);
    }

    #[test]
    fn upright_jpeg_orientations_keep_dimensions(
        w in 1u16..=u16::MAX,
        h in 1u16..=u16::MAX,
        orientation in 1u16..=4,
    ) {
        let m = inspect_image(&support::jpeg(w, h, Some(orientation))).unwrap();
        prop_assert!(!m.rotated);
        prop_assert_eq!((m.width, m.height), (u32::from(w), u32::from(h)));
    }

    #[test]
    fn png_is_never_rotated(w in 1u32..=1_000_000, h in 1u32..=1_000_000) {
        let m = inspect_image(&support::png(w, h)).unwrap();
        prop_assert_eq!(m.orientation.value(), 1);
        prop_assert_eq!((m.width, m.height), (w, h));
        prop_assert_eq!((m.raw_width, m.raw_height), (w, h));
    }

    #[test]
    fn webp_fields_decode_plus_one(w in 1u32..=16_384, h in 1u32..=16_384) {
        let lossy = inspect_image(&support::webp_vp8(w as u16, h as u16)).unwrap();
        prop_assert_eq!((lossy.width, lossy.height), (w, h));
        let lossless = inspect_image(&support::webp_vp8l(w, h)).unwrap();
        prop_assert_eq!((lossless.width, lossless.height), (w, h));
        let extended = inspect_image(&support::webp_vp8x(w, h)).unwrap();
        prop_assert_eq!((extended.width, extended.height), (w, h));
        prop_assert_eq!(extended.format, ImageFormat::WebP);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = inspect_image(&bytes);
    }
}

#[test]
fn short_or_unknown_buffers_are_none() {
    assert_eq!(inspect_image(&[0xFF, 0xD8, 0xFF]), None);
    assert_eq!(inspect_image(b"GIF89a-not-supported-here-at-all"), None);
    let mut truncated = support::png(10, 10);
    truncated.truncate(20);
    assert_eq!(inspect_image(&truncated), None);
}

#[test]
fn metrics_serialise_camel_case() {
    let m = inspect_image(&support::jpeg(4000, 3000, Some(6))).unwrap();
    let v = serde_json::to_value(m).unwrap();
    assert_eq!(v["width"], 3000);
    assert_eq!(v["rawWidth"], 4000);
    assert_eq!(v["rotated"], true);
    assert_eq!(v["format"], "jpeg");
}
