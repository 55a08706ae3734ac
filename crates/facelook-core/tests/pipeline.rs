use approx::assert_relative_eq;
use facelook_core::classifier::{IdentityModel, InferenceFailure, InputShape};
use facelook_core::frame::LumaFrame;
use facelook_core::{
    FaceBox, FaceDetector, FaceLocator, IdentityClassifier, IdentityTable, LocateOptions, LocatorError,
    NormalizedFace, Recognition, RecognitionPipeline,
};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::ArrayView4;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

/// Single-stage Haar cascade that fires on a dark center block.
const DARK_CENTER_HAAR: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageParams><maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams><maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.5</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 -1.0000000000000000e-04</internalNodes>
          <leafValues>
            1.0 -1.0</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          4 4 16 16 -1.</_>
        <_>
          8 8 8 8 4.</_></rects></_></features></cascade>
</opencv_storage>
"#;

/// Single-stage LBP cascade accepting only code 0 (outer blocks all darker
/// than the center block).
const BRIGHT_CENTER_LBP: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade>
  <stageType>BOOST</stageType>
  <featureType>LBP</featureType>
  <height>12</height>
  <width>12</width>
  <stageParams><maxDepth>1</maxDepth><maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams><maxCatCount>256</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.0</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1 0 0 0 0 0 0 0</internalNodes>
          <leafValues>
            1.0 -1.0</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rect>
        0 0 4 4</rect></_></features></cascade>
</opencv_storage>
"#;

/// Detector that reports the same boxes for every frame.
struct FixedDetector(Vec<FaceBox>);

impl FaceDetector for FixedDetector {
    fn name(&self) -> &str {
        "fixed"
    }

    fn detect(&self, _frame: &LumaFrame, _min_size: u32) -> Vec<FaceBox> {
        self.0.clone()
    }
}

/// Model with a fixed score vector that records the tensor shape it saw.
struct ScriptedModel {
    shape: InputShape,
    scores: Result<Vec<f32>, String>,
    seen: Mutex<Vec<Vec<usize>>>,
}

impl ScriptedModel {
    fn scores(scores: Vec<f32>) -> Self {
        Self { shape: InputShape::nhwc(160, 160, 3), scores: Ok(scores), seen: Mutex::new(Vec::new()) }
    }

    fn failing() -> Self {
        Self { scores: Err("runtime exploded".into()), ..Self::scores(vec![]) }
    }
}

impl IdentityModel for ScriptedModel {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, InferenceFailure> {
        self.seen.lock().unwrap().push(input.shape().to_vec());
        self.scores.clone().map_err(InferenceFailure::Runtime)
    }
}

fn png_bytes(img: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn labels_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn felipe_classifier() -> IdentityClassifier {
    let labels = labels_file("[labels]\n\"0\" = \"ana\"\n\"1\" = \"felipe\"\n");
    IdentityClassifier::new(IdentityTable::load(labels.path()).unwrap())
}

#[test]
fn test_solid_gray_image_has_no_face() {
    let dir = tempfile::tempdir().unwrap();
    let frontal = dir.path().join("frontal.xml");
    std::fs::write(&frontal, DARK_CENTER_HAAR).unwrap();
    // Fallback missing on purpose: one cascade is enough
    let locator = FaceLocator::from_cascade_files(&frontal, dir.path().join("missing.xml")).unwrap();
    assert_eq!(locator.detector_names(), vec!["frontal"]);

    let pipeline = RecognitionPipeline::new(locator, felipe_classifier(), LocateOptions::default());
    let model = ScriptedModel::scores(vec![0.0, 1.0]);
    let img = RgbImage::from_pixel(300, 300, Rgb([128, 128, 128]));

    let outcome = pipeline.recognize(&model, &png_bytes(&img)).unwrap();
    assert_eq!(outcome, Recognition::NoFace);

    let resp = outcome.to_response();
    assert!(!resp.recognized);
    assert_eq!(resp.identity, "unknown");
    assert!(resp.message.is_some());
    assert!(model.seen.lock().unwrap().is_empty(), "model must not run without a face");
}

#[test]
fn test_prominent_face_is_identified() {
    // 192 px box is 40% of the 480 px side, centered in 640x480
    let face = FaceBox::new(224, 144, 192, 192);
    let crops: Arc<Mutex<Vec<NormalizedFace>>> = Arc::default();
    let sink = Arc::clone(&crops);
    let locator = FaceLocator::new(vec![Box::new(FixedDetector(vec![face]))])
        .unwrap()
        .with_crop_observer(move |crop| sink.lock().unwrap().push(crop.clone()));

    let pipeline = RecognitionPipeline::new(locator, felipe_classifier(), LocateOptions::default());
    let model = ScriptedModel::scores(vec![0.05, 0.92, 0.03]);
    let img = RgbImage::from_pixel(640, 480, Rgb([180, 140, 120]));

    let outcome = pipeline.recognize(&model, &png_bytes(&img)).unwrap();
    let resp = outcome.to_response();
    assert!(resp.recognized);
    assert_eq!(resp.identity, "felipe");
    assert_relative_eq!(resp.confidence, 0.92);
    assert_eq!(resp.message, None);

    let crops = crops.lock().unwrap();
    assert_eq!(crops.len(), 1);
    assert_eq!((crops[0].width(), crops[0].height(), crops[0].channels()), (160, 160, 3));
    assert_eq!(*model.seen.lock().unwrap(), vec![vec![1, 160, 160, 3]]);
}

#[test]
fn test_low_confidence_face_is_unknown() {
    let locator = FaceLocator::new(vec![Box::new(FixedDetector(vec![FaceBox::new(200, 120, 240, 240)]))]).unwrap();
    let pipeline = RecognitionPipeline::new(locator, felipe_classifier(), LocateOptions::default());
    let model = ScriptedModel::scores(vec![0.35, 0.4, 0.25]);
    let img = RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]));

    let resp = pipeline.recognize(&model, &png_bytes(&img)).unwrap().to_response();
    assert!(!resp.recognized);
    assert_eq!(resp.identity, "unknown");
    assert_relative_eq!(resp.confidence, 0.4);
}

#[test]
fn test_inference_failure_reports_unknown() {
    let locator = FaceLocator::new(vec![Box::new(FixedDetector(vec![FaceBox::new(200, 120, 240, 240)]))]).unwrap();
    let pipeline = RecognitionPipeline::new(locator, felipe_classifier(), LocateOptions::default());
    let img = RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]));

    let resp = pipeline.recognize(&ScriptedModel::failing(), &png_bytes(&img)).unwrap().to_response();
    assert!(!resp.recognized);
    assert_eq!(resp.identity, "unknown");
    assert_eq!(resp.confidence, 0.0);
}

#[test]
fn test_undecodable_bytes_are_an_error() {
    let locator = FaceLocator::new(vec![Box::new(FixedDetector(vec![]))]).unwrap();
    let pipeline = RecognitionPipeline::new(locator, felipe_classifier(), LocateOptions::default());
    let err = pipeline.recognize(&ScriptedModel::scores(vec![1.0]), b"not an image").unwrap_err();
    assert!(matches!(err, LocatorError::Decode(_)));
}

#[test]
fn test_no_cascades_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("broken.xml");
    std::fs::write(&bad, "<opencv_storage/>").unwrap();

    let err = FaceLocator::from_cascade_files(&bad, dir.path().join("missing.xml")).err().unwrap();
    match err {
        LocatorError::DetectorUnavailable(msg) => {
            assert!(msg.contains("frontal") && msg.contains("fallback"), "unexpected message: {msg}");
        }
        other => panic!("expected DetectorUnavailable, got {other:?}"),
    }
}

#[test]
fn test_fallback_cascade_alone_locates_face() {
    let dir = tempfile::tempdir().unwrap();
    let fallback = dir.path().join("fallback.xml");
    std::fs::write(&fallback, BRIGHT_CENTER_LBP).unwrap();
    let locator = FaceLocator::from_cascade_files(dir.path().join("missing.xml"), &fallback).unwrap();
    assert_eq!(locator.detector_names(), vec!["fallback"]);

    let mut img = RgbImage::from_pixel(96, 96, Rgb([40, 40, 40]));
    for y in 36..60 {
        for x in 36..60 {
            img.put_pixel(x, y, Rgb([200, 200, 200]));
        }
    }

    let face = locator.locate(&png_bytes(&img), &LocateOptions::default()).unwrap().expect("face");
    assert_eq!((face.width(), face.height()), (160, 160));
    let crop = face.to_image().to_rgb8();
    assert!(crop.get_pixel(80, 80)[0] > 150, "crop center should be the bright block");
    assert!(crop.get_pixel(0, 0)[0] < 100, "crop corner should be background");
}
