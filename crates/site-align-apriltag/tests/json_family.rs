use nalgebra::Point2;
use site_align_apriltag::synthetic::{frontal_corners, render_tag, PAPER};
use site_align_apriltag::{DetectorParams, Dictionary, QuadTagDetector, TagDetector};
use site_align_core::GrayImage;
use std::path::Path;

fn testdata_path(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../testdata")
        .join(name)
}

fn load_family() -> Dictionary {
    let raw = std::fs::read_to_string(testdata_path("test_4x4_6.json")).expect("read family");
    let dict: Dictionary = serde_json::from_str(&raw).expect("parse family");
    dict.validate().expect("valid family");
    dict
}

#[test]
fn every_id_of_the_family_is_detected() {
    let dict = load_family();
    let n = dict.len();
    let mut img = GrayImage::filled(120 * n, 140, PAPER);
    for id in 0..n {
        let c = Point2::new(60.0 + 120.0 * id as f32, 70.0);
        render_tag(&mut img, &dict, id as u32, &frontal_corners(c, 60.0, id as u8), 1.5)
            .expect("render");
    }

    let mut det =
        QuadTagDetector::new(dict, DetectorParams::default(), img.width, img.height, 1)
            .expect("detector");
    let found = det.detect(&img.view()).expect("detect");

    let mut ids: Vec<u32> = found.iter().map(|d| d.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..n as u32).collect::<Vec<_>>());
    for d in &found {
        let expected_x = 60.0 + 120.0 * d.id as f32;
        assert!((d.center.x - expected_x).abs() < 1e-2);
        assert!((d.center.y - 70.0).abs() < 1e-2);
        assert!(d.score > 0.99);
    }
}

#[test]
fn hamming_limit_override_is_respected() {
    let dict = load_family();
    let params = DetectorParams {
        max_hamming: Some(0),
        ..DetectorParams::default()
    };
    let det = QuadTagDetector::new(dict, params, 64, 64, 1).expect("detector");
    assert_eq!(det.matcher().max_hamming(), 0);
    assert_eq!(det.dimensions(), (64, 64));
    assert_eq!(det.decimation(), 1);
}
