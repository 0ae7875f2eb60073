// 该文件是 Qingxu （情绪） 项目的一部分。
// src/anchor.rs - 检测器锚框表
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// BlazeFace 前置模型的锚框数量
pub const DEFAULT_NUM_ANCHORS: usize = 896;

const ANCHOR_COLUMNS: usize = 4;

#[derive(Error, Debug)]
pub enum AnchorError {
  #[error("锚框数据格式错误: {0}")]
  MalformedAnchorData(String),
  #[error("锚框文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 归一化的锚框：中心与宽高均以模型输入边长为单位
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
  pub center_x: f32,
  pub center_y: f32,
  pub width: f32,
  pub height: f32,
}

/// 只读锚框表，加载一次后在所有帧之间共享
#[derive(Debug, Clone)]
pub struct AnchorTable {
  anchors: Box<[Anchor]>,
}

impl AnchorTable {
  /// 解析 CSV 文本，每行 `center_x, center_y, width, height`，行数必须等于 `expected`
  pub fn parse(text: &str, expected: usize) -> Result<Self, AnchorError> {
    let mut anchors = Vec::with_capacity(expected);

    for (line_no, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }

      let values = line
        .split(',')
        .map(|field| field.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
          AnchorError::MalformedAnchorData(format!("第 {} 行无法解析: {}", line_no + 1, e))
        })?;

      if values.len() != ANCHOR_COLUMNS {
        return Err(AnchorError::MalformedAnchorData(format!(
          "第 {} 行应有 {} 列, 实际为 {} 列",
          line_no + 1,
          ANCHOR_COLUMNS,
          values.len()
        )));
      }

      if values.iter().any(|v| !v.is_finite()) {
        return Err(AnchorError::MalformedAnchorData(format!(
          "第 {} 行包含非有限数值",
          line_no + 1
        )));
      }

      anchors.push(Anchor {
        center_x: values[0],
        center_y: values[1],
        width: values[2],
        height: values[3],
      });
    }

    if anchors.len() != expected {
      error!("预期锚框数量为 {}, 实际为 {}", expected, anchors.len());
      return Err(AnchorError::MalformedAnchorData(format!(
        "预期锚框数量为 {}, 实际为 {}",
        expected,
        anchors.len()
      )));
    }

    debug!("解析锚框 {} 个", anchors.len());
    Ok(Self {
      anchors: anchors.into_boxed_slice(),
    })
  }

  pub fn load<P: AsRef<Path>>(path: P, expected: usize) -> Result<Self, AnchorError> {
    let path = path.as_ref();
    info!("加载锚框文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::parse(&text, expected)
  }

  pub fn len(&self) -> usize {
    self.anchors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.anchors.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&Anchor> {
    self.anchors.get(index)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
    self.anchors.iter()
  }
}

impl FromUrlWithScheme for AnchorTable {
  const SCHEME: &'static str = "anchors";
}

impl FromUrl for AnchorTable {
  type Error = AnchorError;

  /// `anchors:///path/to/anchors.csv?count=896`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(AnchorError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let expected = match url.query_pairs().find(|(k, _)| k == "count") {
      Some((_, v)) => v.parse::<usize>().map_err(|e| {
        AnchorError::MalformedAnchorData(format!("count 参数无效 '{}': {}", v, e))
      })?,
      None => DEFAULT_NUM_ANCHORS,
    };

    Self::load(crate::decode_url_path(url), expected)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_accepts_exact_row_count() {
    let text = "0.1, 0.2, 1.0, 1.0\n0.3,0.4,1,1\n\n";
    let table = AnchorTable::parse(text, 2).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(1).unwrap().center_y, 0.4);
  }

  #[test]
  fn parse_rejects_wrong_row_count() {
    let text = "0.1,0.2,1,1\n0.3,0.4,1,1\n";
    for expected in [1, 3, 896] {
      assert!(matches!(
        AnchorTable::parse(text, expected),
        Err(AnchorError::MalformedAnchorData(_))
      ));
    }
  }

  #[test]
  fn parse_rejects_bad_columns() {
    assert!(AnchorTable::parse("0.1,0.2,1\n", 1).is_err());
    assert!(AnchorTable::parse("0.1,0.2,1,1,5\n", 1).is_err());
    assert!(AnchorTable::parse("0.1,abc,1,1\n", 1).is_err());
    assert!(AnchorTable::parse("0.1,NaN,1,1\n", 1).is_err());
  }

  #[test]
  fn from_url_checks_scheme() {
    let url = Url::parse("file:///tmp/anchors.csv").unwrap();
    assert!(matches!(
      AnchorTable::from_url(&url),
      Err(AnchorError::SchemeMismatch(_))
    ));
  }
}
