// 该文件是 CardScan （卡牌扫描） 项目的一部分。
// src/history.rs - 扫描记录汇总
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

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::model::FrameResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanHistoryEntry {
  pub id: u64,
  pub card_id: String,
  pub quantity: u32,
  pub last_seen_at: DateTime<Utc>,
}

/// 界面侧的扫描记录
///
/// 以“上一次看到的卡牌”去抖：同一张卡在镜头前持续被识别时只计一次，
/// 只有当它离开画面（或被另一张卡替换）后再次出现才会增加数量。
#[derive(Debug, Default)]
pub struct ScanHistory {
  entries: Vec<ScanHistoryEntry>,
  last_seen: Option<String>,
  next_id: u64,
}

impl ScanHistory {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, result: &FrameResult) -> Option<&ScanHistoryEntry> {
    self.record_at(result, Utc::now())
  }

  /// 处理一帧结果，返回本帧被新增或累加的记录
  pub fn record_at(
    &mut self,
    result: &FrameResult,
    now: DateTime<Utc>,
  ) -> Option<&ScanHistoryEntry> {
    let Some(card_id) = result.first_classified().and_then(|card| card.card_id()) else {
      if self.last_seen.take().is_some() {
        debug!("第 {} 帧未识别到卡牌, 清除上一次记录", result.frame_index);
      }
      return None;
    };

    if self.last_seen.as_deref() == Some(card_id) {
      return None;
    }
    self.last_seen = Some(card_id.to_string());

    let index = match self.entries.iter().position(|e| e.card_id == card_id) {
      Some(index) => {
        let entry = &mut self.entries[index];
        entry.quantity += 1;
        entry.last_seen_at = now;
        index
      }
      None => {
        self.next_id += 1;
        self.entries.push(ScanHistoryEntry {
          id: self.next_id,
          card_id: card_id.to_string(),
          quantity: 1,
          last_seen_at: now,
        });
        self.entries.len() - 1
      }
    };

    let entry = &self.entries[index];
    info!("扫描到卡牌 {} (数量: {})", entry.card_id, entry.quantity);
    Some(entry)
  }

  pub fn entries(&self) -> &[ScanHistoryEntry] {
    &self.entries
  }

  pub fn get(&self, id: u64) -> Option<&ScanHistoryEntry> {
    self.entries.iter().find(|e| e.id == id)
  }

  pub fn last_seen(&self) -> Option<&str> {
    self.last_seen.as_deref()
  }

  pub fn total_quantity(&self) -> u64 {
    self.entries.iter().map(|e| e.quantity as u64).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 清空记录；仍在镜头前的卡牌会在下一帧重新计入
  pub fn clear(&mut self) {
    self.entries.clear();
    self.last_seen = None;
  }

  /// 删除一条记录，不影响去抖状态
  pub fn remove(&mut self, id: u64) -> Option<ScanHistoryEntry> {
    let index = self.entries.iter().position(|e| e.id == id)?;
    Some(self.entries.remove(index))
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&self.entries)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Classification, DetectedCard, Detection};
  use chrono::TimeZone;

  fn card(card_id: Option<&str>) -> DetectedCard {
    DetectedCard {
      detection: Detection {
        confidence: 0.9,
        x: 0.4,
        y: 0.4,
        width: 0.2,
        height: 0.2,
      },
      classification: card_id.map(|id| Classification {
        card_id: id.to_string(),
        confidence: 0.97,
      }),
    }
  }

  fn frame(index: u64, cards: Vec<DetectedCard>) -> FrameResult {
    FrameResult {
      frame_index: index,
      cards,
      ..Default::default()
    }
  }

  fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
  }

  #[test]
  fn card_held_steady_counts_once() {
    let mut history = ScanHistory::new();
    for i in 0..10 {
      history.record_at(&frame(i, vec![card(Some("RB-001"))]), at(i as i64));
    }
    assert_eq!(history.entries().len(), 1);
    assert_eq!(history.entries()[0].quantity, 1);
    assert_eq!(history.entries()[0].last_seen_at, at(0));
  }

  #[test]
  fn card_reappearing_counts_twice() {
    let mut history = ScanHistory::new();
    history.record_at(&frame(0, vec![card(Some("RB-001"))]), at(0));
    history.record_at(&frame(1, vec![]), at(1));
    let entry = history
      .record_at(&frame(2, vec![card(Some("RB-001"))]), at(2))
      .cloned()
      .unwrap();
    assert_eq!(entry.quantity, 2);
    assert_eq!(entry.last_seen_at, at(2));
    assert_eq!(history.entries().len(), 1);
  }

  #[test]
  fn unclassified_detection_clears_last_seen() {
    let mut history = ScanHistory::new();
    history.record_at(&frame(0, vec![card(Some("RB-001"))]), at(0));
    assert_eq!(history.last_seen(), Some("RB-001"));
    history.record_at(&frame(1, vec![card(None)]), at(1));
    assert_eq!(history.last_seen(), None);
    history.record_at(&frame(2, vec![card(Some("RB-001"))]), at(2));
    assert_eq!(history.entries()[0].quantity, 2);
  }

  #[test]
  fn interposed_card_counts_as_new_sighting() {
    let mut history = ScanHistory::new();
    history.record_at(&frame(0, vec![card(Some("RB-001"))]), at(0));
    history.record_at(&frame(1, vec![card(Some("RB-002"))]), at(1));
    history.record_at(&frame(2, vec![card(Some("RB-001"))]), at(2));
    let quantities: Vec<(String, u32)> = history
      .entries()
      .iter()
      .map(|e| (e.card_id.clone(), e.quantity))
      .collect();
    assert_eq!(
      quantities,
      vec![("RB-001".to_string(), 2), ("RB-002".to_string(), 1)]
    );
    assert_eq!(history.total_quantity(), 3);
  }

  #[test]
  fn first_classified_card_is_used() {
    let mut history = ScanHistory::new();
    history.record_at(
      &frame(0, vec![card(None), card(Some("RB-007")), card(Some("RB-008"))]),
      at(0),
    );
    assert_eq!(history.entries().len(), 1);
    assert_eq!(history.entries()[0].card_id, "RB-007");
  }

  #[test]
  fn remove_and_clear() {
    let mut history = ScanHistory::new();
    history.record_at(&frame(0, vec![card(Some("RB-001"))]), at(0));
    history.record_at(&frame(1, vec![card(Some("RB-002"))]), at(1));
    let id = history.entries()[0].id;

    assert_eq!(history.remove(id).map(|e| e.card_id), Some("RB-001".to_string()));
    assert!(history.get(id).is_none());
    assert!(history.remove(id).is_none());
    // 去抖状态不受删除影响
    assert!(history.record_at(&frame(2, vec![card(Some("RB-002"))]), at(2)).is_none());

    history.clear();
    assert!(history.is_empty());
    assert_eq!(history.last_seen(), None);
    let entry = history
      .record_at(&frame(3, vec![card(Some("RB-002"))]), at(3))
      .cloned()
      .unwrap();
    assert_eq!(entry.quantity, 1);
    assert_ne!(entry.id, id);
  }

  #[test]
  fn exports_entries_as_json() {
    let mut history = ScanHistory::new();
    history.record_at(&frame(0, vec![card(Some("RB-001"))]), at(0));
    let json = history.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value[0]["card_id"], "RB-001");
    assert_eq!(value[0]["quantity"], 1);
    assert!(value[0]["last_seen_at"].is_string());
  }
}
