//! End-to-end job dispatch with fake models
//!
//! Covers operation chaining, defaults, background options and failure
//! reporting without any model weights on disk.

mod common;

use common::{
    checkerboard, counting_registry, failing_registry, from_base64, gradient, init_logging, plate,
    to_base64, ScriptedDetector,
};
use image::{GenericImageView, Rgb, RgbImage};
use photo_ai_worker::{JobDispatcher, JobRequest, OutputFormat, WorkerConfig};

fn request(image: String, operations: &[&str]) -> JobRequest {
    JobRequest {
        image: Some(image),
        operations: Some(operations.iter().map(|op| (*op).to_string()).collect()),
        ..JobRequest::default()
    }
}

#[test]
fn test_missing_image_fails_without_loading_models() {
    init_logging();
    let (registry, counts) = counting_registry(ScriptedDetector::default());
    let config = WorkerConfig::default();
    let dispatcher = JobDispatcher::new(&registry, &config);

    for image in [None, Some(String::new()), Some("   ".to_string())] {
        let result = dispatcher.handle(&JobRequest {
            image,
            operations: Some(vec!["remove_background".into(), "blur_plates".into()]),
            ..JobRequest::default()
        });
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No image provided"));
        assert_eq!(result.error_kind.as_deref(), Some("input"));
        assert!(result.images.is_none());
        assert!(result.final_image.is_none());
    }

    assert_eq!(counts.segmenter_loads(), 0);
    assert_eq!(counts.detector_loads(), 0);
}

#[test]
fn test_absent_or_empty_operations_default_to_enhance() {
    let (registry, counts) = counting_registry(ScriptedDetector::default());
    let config = WorkerConfig::default();
    let dispatcher = JobDispatcher::new(&registry, &config);
    let image = to_base64(gradient(48, 32));

    let absent = JobRequest {
        image: Some(image.clone()),
        ..JobRequest::default()
    };
    let empty = request(image, &[]);

    for job in [absent, empty] {
        let output = dispatcher.run(&job).unwrap();
        assert_eq!(output.images.keys().collect::<Vec<_>>(), vec!["enhanced"]);
        assert_eq!(output.images["enhanced"], output.final_image);
    }
    assert_eq!(counts.segmenter_loads(), 0);
    assert_eq!(counts.detector_loads(), 0);
}

#[test]
fn test_enhance_then_blur_plates_chains_outputs() {
    init_logging();
    let detector = ScriptedDetector::new(vec![plate(100, 200, 220, 240)]);
    let seen = detector.seen.clone();
    let (registry, counts) = counting_registry(detector);
    let config = WorkerConfig::default();
    let dispatcher = JobDispatcher::new(&registry, &config);

    let mut job = request(to_base64(checkerboard(640, 480, 8)), &["enhance", "blur_plates"]);
    job.blur_strength = Some(15);
    let output = dispatcher.run(&job).unwrap();

    assert_eq!(output.images.len(), 2);
    assert_eq!(output.final_image, output.images["plates_blurred"]);
    assert_eq!(counts.detector_loads(), 1);

    let enhanced = from_base64(&output.images["enhanced"]).to_rgb8();
    let blurred = from_base64(&output.final_image).to_rgb8();
    assert_eq!(blurred.dimensions(), (640, 480));

    // The detector ran on the enhanced image, not the original input
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].to_rgb8(), enhanced);

    let mut changed_inside = 0;
    for (x, y, pixel) in blurred.enumerate_pixels() {
        let inside = (100..220).contains(&x) && (200..240).contains(&y);
        if inside {
            if pixel != enhanced.get_pixel(x, y) {
                changed_inside += 1;
            }
        } else {
            assert_eq!(pixel, enhanced.get_pixel(x, y), "pixel ({x}, {y}) outside the plate");
        }
    }
    assert!(changed_inside > 0);
}

#[test]
fn test_non_plate_detections_leave_image_unchanged() {
    // Square box: aspect ratio 1.0 is below the plate range
    let detector = ScriptedDetector::new(vec![plate(10, 10, 60, 60)]);
    let (registry, _) = counting_registry(detector);
    let config = WorkerConfig::default();
    let dispatcher = JobDispatcher::new(&registry, &config);

    let input = checkerboard(320, 240, 4);
    let output = dispatcher
        .run(&request(to_base64(input.clone()), &["blur_plates"]))
        .unwrap();
    assert_eq!(from_base64(&output.final_image).to_rgb8(), input);
}

#[test]
fn test_background_options_keep_input_dimensions() {
    let (registry, counts) = counting_registry(ScriptedDetector::default());
    let config = WorkerConfig::default();
    let dispatcher = JobDispatcher::new(&registry, &config);
    let input = gradient(64, 40);
    let image = to_base64(input.clone());

    // Transparent: alpha follows the mask
    let output = dispatcher
        .run(&request(image.clone(), &["remove_background"]))
        .unwrap();
    let transparent = from_base64(&output.images["background_removed"]);
    assert_eq!(transparent.dimensions(), (64, 40));
    let rgba = transparent.to_rgba8();
    assert_eq!(rgba.get_pixel(5, 5).0[3], 255);
    assert_eq!(rgba.get_pixel(60, 5).0[3], 0);

    // Solid color: background pixels take the color exactly
    let mut job = request(image.clone(), &["remove_background"]);
    job.background_color = Some(vec![10, 200, 30]);
    let colored = from_base64(&dispatcher.run(&job).unwrap().final_image).to_rgb8();
    assert_eq!(colored.dimensions(), (64, 40));
    assert_eq!(*colored.get_pixel(60, 20), Rgb([10, 200, 30]));
    assert_eq!(colored.get_pixel(5, 20), input.get_pixel(5, 20));

    // Background image of another size is resized; it wins over the color
    let mut job = request(image, &["remove_background"]);
    job.background_color = Some(vec![10, 200, 30]);
    job.background_image = Some(to_base64(RgbImage::from_pixel(17, 91, Rgb([90, 90, 90]))));
    let replaced = from_base64(&dispatcher.run(&job).unwrap().final_image).to_rgb8();
    assert_eq!(replaced.dimensions(), (64, 40));
    assert_eq!(*replaced.get_pixel(60, 20), Rgb([90, 90, 90]));

    assert_eq!(counts.segmenter_loads(), 1);
}

#[test]
fn test_unknown_operations_skipped_by_default() {
    let (registry, _) = counting_registry(ScriptedDetector::default());
    let config = WorkerConfig::default();
    let dispatcher = JobDispatcher::new(&registry, &config);

    let output = dispatcher
        .run(&request(to_base64(gradient(16, 16)), &["sharpen", "enhance", "resize"]))
        .unwrap();
    assert_eq!(output.images.keys().collect::<Vec<_>>(), vec!["enhanced"]);

    // Only unknown names: the input passes through unchanged
    let input = gradient(16, 16);
    let output = dispatcher
        .run(&request(to_base64(input.clone()), &["sharpen"]))
        .unwrap();
    assert!(output.images.is_empty());
    assert_eq!(from_base64(&output.final_image).to_rgb8(), input);
}

#[test]
fn test_unknown_operation_rejected_in_strict_mode() {
    let (registry, counts) = counting_registry(ScriptedDetector::default());
    let config = WorkerConfig::builder()
        .strict_operations(true)
        .build()
        .unwrap();
    let dispatcher = JobDispatcher::new(&registry, &config);

    let result = dispatcher.handle(&request(
        to_base64(gradient(16, 16)),
        &["remove_background", "sharpen"],
    ));
    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("input"));
    assert!(result.error.unwrap().contains("sharpen"));
    // Names are validated before any operation runs
    assert_eq!(counts.segmenter_loads(), 0);
}

#[test]
fn test_repeated_jobs_are_deterministic() {
    let detector = ScriptedDetector::new(vec![plate(20, 40, 50, 50)]);
    let (registry, counts) = counting_registry(detector);
    let config = WorkerConfig::default();
    let dispatcher = JobDispatcher::new(&registry, &config);

    let mut job = request(
        to_base64(gradient(128, 96)),
        &["remove_background", "blur_plates", "enhance"],
    );
    job.background_color = Some(vec![255, 255, 255]);

    let first = dispatcher.handle(&job);
    let second = dispatcher.handle(&job);
    assert!(first.success);
    assert_eq!(first, second);
    assert_eq!(first.images.as_ref().unwrap().len(), 3);

    // Models stay loaded between jobs
    assert_eq!(counts.segmenter_loads(), 1);
    assert_eq!(counts.detector_loads(), 1);
}

#[test]
fn test_parameter_errors_are_structured() {
    let (registry, counts) = counting_registry(ScriptedDetector::default());
    let config = WorkerConfig::default();
    let dispatcher = JobDispatcher::new(&registry, &config);
    let image = to_base64(gradient(16, 16));

    let mut job = request(image.clone(), &["remove_background"]);
    job.background_color = Some(vec![0, 300, 0]);
    let result = dispatcher.handle(&job);
    assert_eq!(result.error_kind.as_deref(), Some("config"));

    let mut job = request(image, &["blur_plates"]);
    job.blur_strength = Some(0);
    let result = dispatcher.handle(&job);
    assert_eq!(result.error_kind.as_deref(), Some("config"));

    // Kernel sizes above the configured cap never reach the detector
    job.blur_strength = Some(2_000_001);
    let result = dispatcher.handle(&job);
    assert_eq!(result.error_kind.as_deref(), Some("config"));
    assert!(result.error.unwrap().contains("blur_strength"));
    assert_eq!(counts.detector_loads(), 0);

    let result = dispatcher.handle(&request("not base64 at all!".into(), &["enhance"]));
    assert_eq!(result.error_kind.as_deref(), Some("decode"));

    let result = dispatcher.handle(&request("aGVsbG8gd29ybGQ=".into(), &["enhance"]));
    assert_eq!(result.error_kind.as_deref(), Some("decode"));
}

#[test]
fn test_model_failures_are_reported_and_retried() {
    let (registry, counts) = failing_registry();
    let config = WorkerConfig::default();
    let dispatcher = JobDispatcher::new(&registry, &config);
    let job = request(to_base64(gradient(16, 16)), &["remove_background"]);

    for attempt in 1..=2 {
        let result = dispatcher.handle(&job);
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("model"));
        assert_eq!(counts.segmenter_loads(), attempt);
    }

    // Operations without a model still work
    let result = dispatcher.handle(&request(to_base64(gradient(16, 16)), &["enhance"]));
    assert!(result.success);
}

#[test]
fn test_jpeg_output_and_data_uri_input() {
    let (registry, _) = counting_registry(ScriptedDetector::default());
    let config = WorkerConfig::builder()
        .output_format(OutputFormat::Jpeg)
        .jpeg_quality(90)
        .build()
        .unwrap();
    let dispatcher = JobDispatcher::new(&registry, &config);

    let data_uri = format!("data:image/png;base64,{}", to_base64(gradient(40, 30)));
    let output = dispatcher.run(&request(data_uri, &["enhance"])).unwrap();

    let bytes = photo_ai_worker::codec::decode_bytes(&output.final_image).unwrap();
    assert_eq!(bytes.get(..2), Some(&[0xFF, 0xD8][..]));
    assert_eq!(from_base64(&output.final_image).dimensions(), (40, 30));
}
