use approx::assert_relative_eq;
use nalgebra::{Point3, UnitQuaternion, Vector3};
use site_align_core::{yaw_rotation, CameraPose, ModelTransform, TagPose};
use site_align_tracking::{
    CoordinateMatcher, FilterParams, MarkerFile, MatcherParams, ModeledMarkers, PoseFilter,
    SessionContext,
};

/// Camera-space observation of a session-space tag.
fn observe(camera: &CameraPose, tag: &TagPose) -> TagPose {
    let inv = camera.rotation.inverse();
    TagPose::new(
        tag.id,
        inv * (tag.position - camera.position),
        inv * tag.rotation,
    )
}

#[test]
fn rotated_and_shifted_site_is_recovered_from_a_moving_camera() {
    let markers: MarkerFile = serde_json::from_str(
        r#"{"markers": [
            {"id": "1", "position": [0.0, 0.0, 0.0], "orientation": [0.0, 0.0, 0.0]},
            {"id": "2", "position": [2.0, 0.0, 1.0], "orientation": [0.0, 0.0, 0.0]},
            {"id": "3", "position": [0.2, 0.0, 0.1], "orientation": [0.0, 0.0, 0.0]}
        ]}"#,
    )
    .unwrap();
    let modeled = ModeledMarkers::from_records(&markers.markers).unwrap();

    let site_yaw = 40f64.to_radians();
    let site_rot = yaw_rotation(site_yaw);
    let site_shift = Vector3::new(1.0, 0.5, -2.0);
    let truth: Vec<TagPose> = modeled
        .iter()
        .map(|m| TagPose::new(m.id, site_rot * m.position + site_shift, site_rot * m.rotation))
        .collect();

    let mut matcher = CoordinateMatcher::new(
        SessionContext::new(modeled.clone(), ModelTransform::identity()),
        MatcherParams::default(),
    );
    for k in 0..300 {
        let camera = CameraPose::new(
            Vector3::new(0.002 * k as f64, 1.6, 0.0),
            yaw_rotation(0.01 * k as f64),
        );
        let frame: Vec<TagPose> = truth.iter().map(|t| observe(&camera, t)).collect();
        matcher.update_detections(&frame, &camera);
    }

    assert!(matcher.is_ready());
    assert!(matcher.is_two_tag_mode());
    let offset = matcher.current_offset().unwrap();
    assert_relative_eq!(offset.yaw_degrees(), 40.0, epsilon = 1e-2);

    let model = matcher.model_transform();
    for (m, t) in modeled.iter().zip(&truth) {
        let placed = model.transform_point(&Point3::from(m.position));
        assert_relative_eq!(placed.coords, t.position, epsilon = 1e-3);
    }
    assert_eq!(matcher.detected_markers().len(), 3);
}

#[test]
fn model_origin_is_respected() {
    let modeled = ModeledMarkers::new([
        TagPose::new(1, Vector3::zeros(), UnitQuaternion::identity()),
        TagPose::new(2, Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity()),
    ])
    .unwrap();
    let origin = ModelTransform::new(Vector3::new(0.0, -1.0, 0.0), UnitQuaternion::identity());
    let mut matcher = CoordinateMatcher::new(
        SessionContext::new(modeled, origin),
        MatcherParams::default(),
    );
    let frame = [
        TagPose::new(1, Vector3::new(0.2, 0.0, 0.0), UnitQuaternion::identity()),
        TagPose::new(2, Vector3::new(1.2, 0.0, 0.0), UnitQuaternion::identity()),
    ];
    for _ in 0..200 {
        matcher.update_detections(&frame, &CameraPose::default());
    }
    assert_relative_eq!(
        matcher.model_transform().translation,
        Vector3::new(0.2, -1.0, 0.0),
        epsilon = 1e-3
    );
}

#[test]
fn unconfident_filter_reads_back_its_input() {
    let mut f = PoseFilter::new(FilterParams::default());
    let position = Vector3::new(0.25, 1.5, -3.0);
    let rotation = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
    f.update(position, rotation);

    assert!(!f.is_confident());
    assert_eq!(f.filtered_position(), Some(position));
    assert_eq!(f.filtered_rotation(), Some(rotation));
}
