// 该文件是 Qingxu （情绪） 项目的一部分。
// tests/nms_properties.rs - NMS 性质测试
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

use proptest::prelude::*;

use qingxu::nms::{Candidate, NmsConfig, iou, suppress};

fn candidate_strategy() -> impl Strategy<Value = Candidate> {
  (0.0f32..1.0, 0.0f32..100.0, 0.0f32..100.0, 1.0f32..50.0, 1.0f32..50.0).prop_map(
    |(score, x, y, w, h)| Candidate {
      index: 0,
      score,
      bbox: [x, y, x + w, y + h],
    },
  )
}

fn indexed(candidates: Vec<Candidate>) -> Vec<Candidate> {
  candidates
    .into_iter()
    .enumerate()
    .map(|(index, c)| Candidate { index, ..c })
    .collect()
}

proptest! {
  #[test]
  fn disjoint_boxes_above_threshold_are_all_kept(scores in prop::collection::vec(0.0f32..1.0, 1..32)) {
    let candidates: Vec<Candidate> = scores
      .iter()
      .enumerate()
      .map(|(index, &score)| {
        let x = index as f32 * 10.0;
        Candidate { index, score, bbox: [x, 0.0, x + 5.0, 5.0] }
      })
      .collect();
    let config = NmsConfig::detector();

    let picked = suppress(&candidates, &config);
    let expected = scores.iter().filter(|s| **s >= config.score_threshold).count();
    prop_assert_eq!(picked.len(), expected);
  }

  #[test]
  fn kept_boxes_are_sorted_and_do_not_overlap(raw in prop::collection::vec(candidate_strategy(), 0..48)) {
    let candidates = indexed(raw);
    let config = NmsConfig::hard();

    let picked = suppress(&candidates, &config);
    for pair in picked.windows(2) {
      prop_assert!(pair[0].score >= pair[1].score);
    }
    for (i, a) in picked.iter().enumerate() {
      prop_assert!(a.score >= config.score_threshold);
      for b in &picked[i + 1..] {
        prop_assert!(iou(&a.bbox, &b.bbox) <= config.iou_threshold);
      }
    }
  }

  #[test]
  fn suppression_is_deterministic(raw in prop::collection::vec(candidate_strategy(), 0..48)) {
    let candidates = indexed(raw);
    let config = NmsConfig::detector();
    prop_assert_eq!(suppress(&candidates, &config), suppress(&candidates, &config));
  }

  #[test]
  fn top_k_bounds_the_result(raw in prop::collection::vec(candidate_strategy(), 0..48), k in 1usize..5) {
    let candidates = indexed(raw);
    let config = NmsConfig { top_k: Some(k), ..NmsConfig::hard() };
    prop_assert!(suppress(&candidates, &config).len() <= k);
  }
}
