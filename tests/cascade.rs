// 该文件是 Lupai （路牌） 项目的一部分。
// tests/cascade.rs - 级联集成测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  io::Write,
  sync::{Arc, Mutex},
  thread,
};

use image::{Rgb, RgbImage};
use tempfile::NamedTempFile;

use lupai::{
  BoundingBox, Cascade, CascadeError, ClassifierBuilder, ClassifierError, Proposal, RecognizedObject,
  RegionProposer, SignClassifier,
  cascade::CascadeState,
  frame::{TensorSlice, TensorView},
  input::Frame,
  model::{EngineBackend, EngineError, InferenceEngine, copy_scores},
  output::Render,
  proposal::{RecordedProposer, StaticProposer},
  task::{ContinuousTask, Task},
};

const MODEL_MAGIC: &[u8] = b"LUPAI-TEST-MODEL";

/// 固定输出分数的引擎，输入全白时报错
struct FixedEngine {
  scores: Vec<f32>,
  seen_shapes: Arc<Mutex<Vec<[usize; 4]>>>,
}

impl InferenceEngine for FixedEngine {
  fn infer(&mut self, input: TensorView<'_>, scores: &mut [f32]) -> Result<(), EngineError> {
    self.seen_shapes.lock().unwrap().push(input.shape);
    let all_white = match input.data {
      TensorSlice::Float32(data) => data.iter().all(|v| *v == 1.0),
      TensorSlice::UInt8(data) => data.iter().all(|v| *v == 255),
    };
    if all_white {
      return Err(EngineError::Backend("blank region".to_string()));
    }
    copy_scores(&self.scores, scores)
  }
}

struct FixedBackend {
  scores: Vec<f32>,
  seen_shapes: Arc<Mutex<Vec<[usize; 4]>>>,
}

impl FixedBackend {
  fn new(scores: &[f32]) -> Self {
    Self {
      scores: scores.to_vec(),
      seen_shapes: Arc::new(Mutex::new(Vec::new())),
    }
  }
}

impl EngineBackend for FixedBackend {
  fn name(&self) -> &'static str {
    "fixed"
  }

  fn load(&self, model: &[u8]) -> Result<Box<dyn InferenceEngine>, EngineError> {
    if model != MODEL_MAGIC {
      return Err(EngineError::InvalidModel("unknown model".to_string()));
    }
    Ok(Box::new(FixedEngine {
      scores: self.scores.clone(),
      seen_shapes: self.seen_shapes.clone(),
    }))
  }
}

struct Assets {
  model: NamedTempFile,
  labels: NamedTempFile,
}

fn assets(model: &[u8], labels: &str) -> Assets {
  let mut model_file = NamedTempFile::new().unwrap();
  model_file.write_all(model).unwrap();
  let mut label_file = NamedTempFile::new().unwrap();
  label_file.write_all(labels.as_bytes()).unwrap();
  Assets {
    model: model_file,
    labels: label_file,
  }
}

fn sign_classifier(backend: &FixedBackend) -> Arc<SignClassifier> {
  let assets = assets(MODEL_MAGIC, "stop\nyield\nspeedlimit\n");
  let classifier = ClassifierBuilder::new(assets.model.path(), assets.labels.path())
    .build(backend)
    .unwrap();
  Arc::new(classifier)
}

fn proposal(id: &str, score: f32, bbox: [f32; 4]) -> Proposal {
  Proposal {
    id: id.to_string(),
    label: "sign".to_string(),
    score,
    bbox: BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3]).unwrap(),
  }
}

fn road_frame() -> RgbImage {
  RgbImage::from_fn(640, 480, |x, y| Rgb([(x % 200) as u8, (y % 200) as u8, 40]))
}

#[test]
fn confident_region_is_classified() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let proposer = StaticProposer::new(vec![proposal("1", 0.95, [100.0, 100.0, 300.0, 300.0])]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));

  let result = cascade.run_borrowed(&road_frame()).unwrap();

  assert_eq!(result.len(), 1);
  assert_eq!(result[0].id, "1");
  assert_eq!(result[0].label, "yield");
  assert_eq!(result[0].score, 0.95);
  assert_eq!(result[0].class_score, 0.9);
  assert_eq!(result[0].bbox, BoundingBox::new(100.0, 100.0, 300.0, 300.0).unwrap());
  assert_eq!(cascade.state(), CascadeState::Done);
  assert_eq!(*backend.seen_shapes.lock().unwrap(), vec![[1, 224, 224, 3]]);
}

#[test]
fn low_confidence_region_is_skipped() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let proposer = StaticProposer::new(vec![proposal("1", 0.5, [100.0, 100.0, 300.0, 300.0])]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));

  let result = cascade.run_borrowed(&road_frame()).unwrap();

  assert!(result.is_empty());
  assert!(backend.seen_shapes.lock().unwrap().is_empty());
}

#[test]
fn threshold_includes_its_boundary() {
  let backend = FixedBackend::new(&[0.7, 0.2, 0.1]);
  let proposer = StaticProposer::new(vec![
    proposal("below", 0.79, [10.0, 10.0, 50.0, 50.0]),
    proposal("at", 0.8, [10.0, 10.0, 50.0, 50.0]),
    proposal("above", 1.0, [10.0, 10.0, 50.0, 50.0]),
  ]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));

  let result = cascade.run_borrowed(&road_frame()).unwrap();
  let ids: Vec<&str> = result.iter().map(|r| r.id.as_str()).collect();
  assert_eq!(ids, ["at", "above"]);
}

#[test]
fn label_comes_from_classifier_not_proposal() {
  let backend = FixedBackend::new(&[0.0, 0.0, 3.0]);
  let mut p = proposal("42", 0.9, [0.0, 0.0, 64.0, 64.0]);
  p.label = "stop".to_string();
  let mut cascade = Cascade::new(StaticProposer::new(vec![p]), sign_classifier(&backend));

  let result = cascade.run_borrowed(&road_frame()).unwrap();
  assert_eq!(result[0].label, "speedlimit");
  assert_eq!(result[0].id, "42");
}

#[test]
fn proposer_order_is_preserved_and_runs_are_repeatable() {
  let backend = FixedBackend::new(&[0.3, 0.3, 0.1]);
  let proposer = StaticProposer::new(vec![
    proposal("c", 0.85, [300.0, 200.0, 360.0, 260.0]),
    proposal("a", 0.99, [0.0, 0.0, 32.0, 32.0]),
    proposal("b", 0.90, [600.0, 440.0, 700.0, 500.0]),
  ]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));
  let frame = road_frame();

  let first = cascade.run_borrowed(&frame).unwrap();
  let second = cascade.run_borrowed(&frame).unwrap();

  let ids: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
  assert_eq!(ids, ["c", "a", "b"]);
  // 并列最大值取靠前的标签
  assert!(first.iter().all(|r| r.label == "stop"));
  assert_eq!(first, second);
}

#[test]
fn failing_region_is_dropped_without_aborting() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let proposer = StaticProposer::new(vec![
    // 完全在帧外，裁剪结果全白，引擎报错
    proposal("outside", 0.99, [1000.0, 1000.0, 1100.0, 1100.0]),
    proposal("inside", 0.95, [100.0, 100.0, 300.0, 300.0]),
  ]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));

  let result = cascade.run_borrowed(&road_frame()).unwrap();

  assert_eq!(result.len(), 1);
  assert_eq!(result[0].id, "inside");
  assert_eq!(backend.seen_shapes.lock().unwrap().len(), 2);
  assert_eq!(cascade.state(), CascadeState::Done);
}

#[test]
fn oversized_region_is_dropped_without_aborting() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let proposer = StaticProposer::new(vec![
    proposal("huge", 0.9, [0.0, 0.0, 4e9, 4e9]),
    proposal("large", 0.9, [-50000.0, -50000.0, 50000.0, 50000.0]),
    proposal("small", 0.9, [10.0, 10.0, 50.0, 50.0]),
  ]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));

  let result = cascade.run_borrowed(&road_frame()).unwrap();

  assert_eq!(result.len(), 1);
  assert_eq!(result[0].id, "small");
  // 过大的区域不会进入推理
  assert_eq!(backend.seen_shapes.lock().unwrap().len(), 1);
  assert_eq!(cascade.state(), CascadeState::Done);
}

#[test]
fn partially_outside_region_is_classified() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let proposer = StaticProposer::new(vec![proposal("edge", 0.9, [600.0, 440.0, 700.0, 520.0])]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));

  let result = cascade.run_borrowed(&road_frame()).unwrap();
  assert_eq!(result.len(), 1);
  assert_eq!(result[0].label, "yield");
}

#[test]
fn borrowed_frame_is_left_unmodified() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let proposer = StaticProposer::new(vec![proposal("1", 0.95, [-20.0, -20.0, 300.0, 300.0])]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));
  let frame = road_frame();
  let before = frame.clone();

  cascade.run_borrowed(&frame).unwrap();
  assert_eq!(frame, before);
}

#[test]
fn owned_frame_gives_same_result() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let proposer = StaticProposer::new(vec![proposal("1", 0.95, [100.0, 100.0, 300.0, 300.0])]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));

  let borrowed = cascade.run_borrowed(&road_frame()).unwrap();
  let owned = cascade.run_owned(road_frame()).unwrap();
  assert_eq!(borrowed, owned);
}

#[test]
fn classifier_is_shared_across_workers() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let classifier = sign_classifier(&backend);

  let workers: Vec<_> = (0..4)
    .map(|i| {
      let classifier = classifier.clone();
      thread::spawn(move || {
        let proposer = StaticProposer::new(vec![proposal(&i.to_string(), 0.9, [0.0, 0.0, 100.0, 100.0])]);
        let mut cascade = Cascade::new(proposer, classifier);
        let frame = road_frame();
        (0..3)
          .map(|_| cascade.run_borrowed(&frame).unwrap())
          .collect::<Vec<_>>()
      })
    })
    .collect();

  for (i, worker) in workers.into_iter().enumerate() {
    for result in worker.join().unwrap() {
      assert_eq!(result.len(), 1);
      assert_eq!(result[0].id, i.to_string());
      assert_eq!(result[0].label, "yield");
    }
  }
  assert_eq!(backend.seen_shapes.lock().unwrap().len(), 12);
}

#[derive(Debug, thiserror::Error)]
#[error("detector offline")]
struct DetectorOffline;

struct BrokenProposer;

impl RegionProposer for BrokenProposer {
  type Error = DetectorOffline;

  fn run(&self, _frame: &RgbImage) -> Result<Vec<Proposal>, Self::Error> {
    Err(DetectorOffline)
  }
}

#[test]
fn proposer_failure_aborts_the_frame() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let mut cascade = Cascade::new(BrokenProposer, sign_classifier(&backend));

  let result = cascade.run_borrowed(&road_frame());
  assert!(matches!(result, Err(CascadeError::Proposer(_))));
  assert_eq!(cascade.state(), CascadeState::Failed);
}

#[test]
fn missing_model_fails_with_model_load() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let assets = assets(MODEL_MAGIC, "stop\n");
  let result: Result<SignClassifier, _> =
    ClassifierBuilder::new("/nonexistent/gtsrb.rknn", assets.labels.path()).build(&backend);
  assert!(matches!(result, Err(ClassifierError::ModelLoad(_))));
}

#[test]
fn corrupt_model_fails_with_model_load() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let assets = assets(b"garbage", "stop\n");
  let result: Result<SignClassifier, _> =
    ClassifierBuilder::new(assets.model.path(), assets.labels.path()).build(&backend);
  assert!(matches!(result, Err(ClassifierError::ModelLoad(_))));
}

#[test]
fn missing_or_empty_labels_fail_with_label_load() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);

  let assets_a = assets(MODEL_MAGIC, "");
  let result: Result<SignClassifier, _> =
    ClassifierBuilder::new(assets_a.model.path(), "/nonexistent/labels.txt").build(&backend);
  assert!(matches!(result, Err(ClassifierError::LabelLoad(_))));

  let result: Result<SignClassifier, _> =
    ClassifierBuilder::new(assets_a.model.path(), assets_a.labels.path()).build(&backend);
  assert!(matches!(result, Err(ClassifierError::LabelLoad(_))));
}

#[test]
fn short_model_output_drops_the_region() {
  let backend = FixedBackend::new(&[0.1, 0.9]);
  let proposer = StaticProposer::new(vec![proposal("1", 0.95, [100.0, 100.0, 300.0, 300.0])]);
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));

  let result = cascade.run_borrowed(&road_frame()).unwrap();
  assert!(result.is_empty());
}

const PER_FRAME_RECORD: &str = r#"{
  "a.png": [{"id": "a1", "label": "sign", "score": 0.9, "box": [100, 100, 300, 300]}],
  "b.png": [
    {"id": "b1", "label": "sign", "score": 0.95, "box": [10, 10, 50, 50]},
    {"id": "b2", "label": "sign", "score": 0.85, "box": [400, 300, 500, 400]}
  ]
}"#;

#[test]
fn recorded_proposals_follow_the_frame() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let proposer = RecordedProposer::from_json(PER_FRAME_RECORD).unwrap();
  let mut cascade = Cascade::new(proposer, sign_classifier(&backend));
  let frame = road_frame();

  cascade.select_frame("a.png", 0);
  let a = cascade.run_borrowed(&frame).unwrap();
  cascade.select_frame("b.png", 1);
  let b = cascade.run_borrowed(&frame).unwrap();
  cascade.select_frame("c.png", 2);
  let c = cascade.run_borrowed(&frame).unwrap();

  let ids = |r: &[RecognizedObject]| r.iter().map(|o| o.id.clone()).collect::<Vec<_>>();
  assert_eq!(ids(&a[..]), ["a1"]);
  assert_eq!(ids(&b[..]), ["b1", "b2"]);
  assert!(c.is_empty());
}

#[derive(Clone, Default)]
struct Collected(Arc<Mutex<Vec<(String, Vec<String>)>>>);

impl Render<Frame, [RecognizedObject]> for Collected {
  type Error = std::convert::Infallible;

  fn render_result(&self, frame: &Frame, result: &[RecognizedObject]) -> Result<(), Self::Error> {
    let ids = result.iter().map(|o| o.id.clone()).collect();
    self.0.lock().unwrap().push((frame.name.clone(), ids));
    Ok(())
  }
}

#[test]
fn continuous_task_selects_proposals_per_frame() {
  let backend = FixedBackend::new(&[0.1, 0.9, 0.05]);
  let proposer = RecordedProposer::from_json(PER_FRAME_RECORD).unwrap();
  let cascade = Cascade::new(proposer, sign_classifier(&backend));
  let frames: Vec<Frame> = ["a.png", "b.png", "c.png"]
    .iter()
    .enumerate()
    .map(|(index, name)| Frame {
      image: road_frame(),
      index: index as u64,
      name: name.to_string(),
    })
    .collect();
  let output = Collected::default();

  ContinuousTask::default()
    .run_task(frames.into_iter(), cascade, output.clone())
    .unwrap();

  let rendered = output.0.lock().unwrap();
  assert_eq!(rendered.len(), 3);
  assert_eq!(rendered[0], ("a.png".to_string(), vec!["a1".to_string()]));
  assert_eq!(rendered[1], ("b.png".to_string(), vec!["b1".to_string(), "b2".to_string()]));
  assert_eq!(rendered[2], ("c.png".to_string(), vec![]));
}
